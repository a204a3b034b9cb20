use thiserror::Error;

/// Why a single report row could not be mapped onto the schema.
///
/// Any of these aborts the whole report it belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum MappingError {
	#[error("record has an empty source_ip")]
	EmptySourceIp,

	#[error("'{0}' is neither an IPv4 nor an IPv6 address")]
	InvalidIp(String),

	#[error("record auth_results is not an object")]
	AuthResultsNotObject,

	#[error("{0} is not an object")]
	NotAnObject(&'static str),

	#[error("malformed row: {0}")]
	Malformed(String),
}

#[derive(Debug, Error)]
pub enum Error {
	#[error("could not decode archive: {0}")]
	Decode(String),

	#[error("could not parse report: {0}")]
	Parse(String),

	#[error("could not map report record: {0}")]
	Mapping(#[from] MappingError),

	#[error("database error: {0}")]
	Database(String),

	#[error("mail transport error: {0}")]
	Transport(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

impl From<mysql::Error> for Error {
	fn from(err: mysql::Error) -> Self {
		Error::Database(err.to_string())
	}
}

impl From<postgres::Error> for Error {
	fn from(err: postgres::Error) -> Self {
		Error::Database(err.to_string())
	}
}

impl From<imap::error::Error> for Error {
	fn from(err: imap::error::Error) -> Self {
		Error::Transport(err.to_string())
	}
}

impl From<native_tls::Error> for Error {
	fn from(err: native_tls::Error) -> Self {
		Error::Transport(err.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn mapping_errors_read_well() {
		assert_eq!(
			MappingError::InvalidIp("192.0.2.300".to_string()).to_string(),
			"'192.0.2.300' is neither an IPv4 nor an IPv6 address"
		);
		assert_eq!(MappingError::NotAnObject("policy_evaluated").to_string(), "policy_evaluated is not an object");

		let err = Error::from(MappingError::EmptySourceIp);
		assert_eq!(err.to_string(), "could not map report record: record has an empty source_ip");
		assert!(std::error::Error::source(&err).is_some());
	}
}
