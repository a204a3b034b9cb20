use std::net::IpAddr;

use crate::error::MappingError;

/// Declares a report enum whose textual form is checked against a fixed set of values.
/// Anything outside the set, including an absent value, becomes `Unknown`.
macro_rules! allowed_values {
	($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
		$(#[$meta])*
		#[derive(Clone, Copy, Debug, PartialEq, Eq)]
		pub enum $name {
			$($variant),+
		}

		impl $name {
			pub const VALUES: &'static [&'static str] = &[$($text),+];

			pub fn as_str(&self) -> &'static str {
				match self {
					$($name::$variant => $text),+
				}
			}

			pub fn parse(value: Option<&str>) -> $name {
				match value.map(str::trim) {
					$(Some($text) => $name::$variant,)+
					_ => $name::Unknown,
				}
			}
		}

		impl Default for $name {
			fn default() -> $name {
				$name::Unknown
			}
		}
	};
}

allowed_values! {
	Disposition {
		None => "none",
		Quarantine => "quarantine",
		Reject => "reject",
		Unknown => "unknown",
	}
}

allowed_values! {
	/// DKIM or SPF alignment as evaluated by the receiver
	Alignment {
		Fail => "fail",
		Pass => "pass",
		Unknown => "unknown",
	}
}

allowed_values! {
	DkimResult {
		None => "none",
		Pass => "pass",
		Fail => "fail",
		Neutral => "neutral",
		Policy => "policy",
		TempError => "temperror",
		PermError => "permerror",
		Unknown => "unknown",
	}
}

allowed_values! {
	SpfResult {
		None => "none",
		Neutral => "neutral",
		Pass => "pass",
		Fail => "fail",
		SoftFail => "softfail",
		TempError => "temperror",
		PermError => "permerror",
		Unknown => "unknown",
	}
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PolicyPublished {
	pub domain: String,
	pub adkim: Option<String>,
	pub aspf: Option<String>,
	pub p: Option<String>,
	pub sp: Option<String>,
	pub pct: Option<u8>,
}

/// DKIM or SPF results of one record, folded into one row.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AuthResult<R> {
	/// `/`-separated when the sender listed several signatures or mechanisms
	pub domain: Option<String>,
	pub result: R,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DmarcRecord {
	pub source_ip: IpAddr,
	pub count: u32,
	pub disposition: Disposition,
	pub reason: Option<String>,
	pub dkim_align: Alignment,
	pub spf_align: Alignment,
	pub header_from: Option<String>,
	pub dkim: AuthResult<DkimResult>,
	pub spf: AuthResult<SpfResult>,
}

#[derive(Debug)]
pub struct DmarcReport {
	pub org: String,
	pub report_id: String,
	pub email: Option<String>,
	pub extra_contact_info: Option<String>,
	/// epoch seconds
	pub begin: u64,
	pub end: u64,
	pub policy: PolicyPublished,
	pub raw_xml: String,
	/// Rows that failed to map are kept so storing the report can abort on them.
	pub records: Vec<Result<DmarcRecord, MappingError>>,
}
