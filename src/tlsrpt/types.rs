use std::net::IpAddr;

use crate::error::MappingError;

#[derive(Debug, Clone, PartialEq)]
pub struct TlsFailureRecord {
	pub send_ip: Option<IpAddr>,
	pub recv_ip: Option<IpAddr>,
	pub recv_mx: Option<String>,
	pub result_type: String,
	pub count: u64,
}

#[derive(Debug)]
pub struct TlsReport {
	pub org: String,
	pub report_id: String,
	pub email: Option<String>,
	/// `YYYY-MM-DD HH:MM:SS`, as reported (no timezone conversion)
	pub begin: String,
	pub end: String,
	pub policy_mode: String,
	pub policy_domain: String,
	pub success: u64,
	pub failure: u64,
	pub raw_json: String,
	pub records: Vec<Result<TlsFailureRecord, MappingError>>,
}
