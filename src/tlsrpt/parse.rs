use std::net::IpAddr;

use serde::Deserialize;
use serde_json::Value;

use super::types::{TlsFailureRecord, TlsReport};
use crate::error::{Error, MappingError};
use crate::types::OneOrMany;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DateRange {
	#[serde(rename = "start-datetime")]
	start_datetime: String,
	#[serde(rename = "end-datetime")]
	end_datetime: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PolicyDetails {
	#[serde(rename = "policy-string")]
	policy_string: Vec<String>,
	#[serde(rename = "policy-domain")]
	policy_domain: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Summary {
	#[serde(rename = "total-successful-session-count")]
	total_success: u64,
	#[serde(rename = "total-failure-session-count")]
	total_failure: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Policy {
	policy: PolicyDetails,
	summary: Summary,
	#[serde(rename = "failure-details")]
	failure_details: Option<OneOrMany<Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FailureDetails {
	#[serde(rename = "result-type")]
	result_type: String,
	#[serde(rename = "sending-mta-ip")]
	sending_mta_ip: Option<String>,
	#[serde(rename = "receiving-ip")]
	receiving_ip: Option<String>,
	#[serde(rename = "receiving-mx-hostname")]
	receiving_mx_hostname: Option<String>,
	#[serde(rename = "failed-session-count")]
	failed_session_count: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Report {
	#[serde(rename = "organization-name")]
	organization_name: String,
	#[serde(rename = "date-range")]
	date_range: Option<DateRange>,
	#[serde(rename = "contact-info")]
	contact_info: Option<String>,
	#[serde(rename = "report-id")]
	report_id: String,
	policies: Vec<Policy>,
}

/// `2020-01-01T00:00:00Z` becomes `2020-01-01 00:00:00`.
pub fn sql_timestamp(datetime: &str) -> String {
	datetime.trim().replace('T', " ").replace('Z', "")
}

fn ip(value: Option<&str>) -> Result<Option<IpAddr>, MappingError> {
	match value.map(str::trim) {
		None | Some("") => Ok(None),
		Some(text) => text
			.parse()
			.map(Some)
			.map_err(|_| MappingError::InvalidIp(text.to_string())),
	}
}

impl TlsFailureRecord {
	fn from_json(value: Value) -> Result<TlsFailureRecord, MappingError> {
		if !value.is_object() {
			return Err(MappingError::NotAnObject("failure-details entry"));
		}
		let details: FailureDetails =
			serde_json::from_value(value).map_err(|e| MappingError::Malformed(e.to_string()))?;

		Ok(TlsFailureRecord {
			send_ip: ip(details.sending_mta_ip.as_deref())?,
			recv_ip: ip(details.receiving_ip.as_deref())?,
			recv_mx: details.receiving_mx_hostname,
			result_type: details.result_type,
			count: details.failed_session_count,
		})
	}
}

impl TlsReport {
	/// Parses an SMTP TLS report document.
	///
	/// Only the first policy is read. Failure details are only read when the summary
	/// reports failed sessions.
	pub fn parse(data: &[u8]) -> Result<TlsReport, Error> {
		let report: Report = serde_json::from_slice(data).map_err(|e| Error::Parse(format!("json: {}", e)))?;

		if report.report_id.trim().is_empty() {
			return Err(Error::Parse("missing report-id".to_string()));
		}
		let date_range = report
			.date_range
			.ok_or_else(|| Error::Parse("missing date-range".to_string()))?;
		let policy = report
			.policies
			.into_iter()
			.next()
			.ok_or_else(|| Error::Parse("report has no policies".to_string()))?;

		let policy_mode = policy
			.policy
			.policy_string
			.get(1)
			.map(|mode| mode.strip_prefix("mode: ").unwrap_or(mode).trim().to_string())
			.unwrap_or_default();

		let records = if policy.summary.total_failure > 0 {
			policy
				.failure_details
				.map(OneOrMany::into_vec)
				.unwrap_or_default()
				.into_iter()
				.map(TlsFailureRecord::from_json)
				.collect()
		} else {
			Vec::new()
		};

		Ok(TlsReport {
			org: report.organization_name,
			report_id: report.report_id,
			email: report.contact_info,
			begin: sql_timestamp(&date_range.start_datetime),
			end: sql_timestamp(&date_range.end_datetime),
			policy_mode,
			policy_domain: policy.policy.policy_domain,
			success: policy.summary.total_success,
			failure: policy.summary.total_failure,
			raw_json: String::from_utf8_lossy(data).into_owned(),
			records,
		})
	}
}

#[cfg(test)]
pub mod tests {
	use super::*;
	use std::net::Ipv4Addr;

	pub fn report_json(report_id: &str, failures: u64, details: &str) -> String {
		format!(
			r#"{{
  "organization-name": "Company-X",
  "date-range": {{
    "start-datetime": "2016-04-01T00:00:00Z",
    "end-datetime": "2016-04-01T23:59:59Z"
  }},
  "contact-info": "sts-reporting@company-x.example",
  "report-id": "{}",
  "policies": [{{
    "policy": {{
      "policy-type": "sts",
      "policy-string": ["version: STSv1", "mode: testing", "mx: *.mail.company-y.example", "max_age: 86400"],
      "policy-domain": "company-y.example",
      "mx-host": ["*.mail.company-y.example"]
    }},
    "summary": {{
      "total-successful-session-count": 5326,
      "total-failure-session-count": {}
    }},
    "failure-details": {}
  }}]
}}"#,
			report_id, failures, details
		)
	}

	pub const DETAILS: &str = r#"[{
      "result-type": "certificate-expired",
      "sending-mta-ip": "2001:db8:abcd:0012::1",
      "receiving-mx-hostname": "mx2.mail.company-y.example",
      "failed-session-count": 100
    }, {
      "result-type": "starttls-not-supported",
      "sending-mta-ip": "2001:db8:abcd:0013::1",
      "receiving-mx-hostname": "mx.mail.company-y.example",
      "receiving-ip": "203.0.113.56",
      "failed-session-count": 200
    }]"#;

	#[test]
	fn parses_report() {
		let report = TlsReport::parse(report_json("5065427c-23d3-47ca-b6e0-946ea0e8c4be", 300, DETAILS).as_bytes()).unwrap();
		assert_eq!(report.org, "Company-X");
		assert_eq!(report.email.as_deref(), Some("sts-reporting@company-x.example"));
		assert_eq!(report.begin, "2016-04-01 00:00:00");
		assert_eq!(report.end, "2016-04-01 23:59:59");
		assert_eq!(report.policy_mode, "testing");
		assert_eq!(report.policy_domain, "company-y.example");
		assert_eq!(report.success, 5326);
		assert_eq!(report.failure, 300);
		assert_eq!(report.records.len(), 2);

		let second = report.records[1].as_ref().unwrap();
		assert_eq!(second.result_type, "starttls-not-supported");
		assert!(second.send_ip.unwrap().is_ipv6());
		assert_eq!(second.recv_ip, Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 56))));
		assert_eq!(second.count, 200);
		assert_eq!(report.records[0].as_ref().unwrap().recv_ip, None);
	}

	#[test]
	fn failure_details_ignored_without_failures() {
		let report = TlsReport::parse(report_json("1", 0, DETAILS).as_bytes()).unwrap();
		assert!(report.records.is_empty());
	}

	#[test]
	fn failure_details_single_object() {
		let single = r#"{"result-type": "validation-failure", "sending-mta-ip": "192.0.2.1", "failed-session-count": 4}"#;
		let report = TlsReport::parse(report_json("1", 4, single).as_bytes()).unwrap();
		assert_eq!(report.records.len(), 1);
		assert_eq!(report.records[0].as_ref().unwrap().count, 4);
	}

	#[test]
	fn bad_failure_rows_are_kept_as_errors() {
		let details = r#"[{"result-type": "x", "sending-mta-ip": "999.1.1.1"}, 7]"#;
		let report = TlsReport::parse(report_json("1", 2, details).as_bytes()).unwrap();
		assert_eq!(report.records[0], Err(MappingError::InvalidIp("999.1.1.1".to_string())));
		assert_eq!(report.records[1], Err(MappingError::NotAnObject("failure-details entry")));
	}

	#[test]
	fn missing_mode_is_empty() {
		let json = report_json("1", 0, "null").replace(r#""version: STSv1", "mode: testing", "mx: *.mail.company-y.example", "max_age: 86400""#, r#""version: STSv1""#);
		let report = TlsReport::parse(json.as_bytes()).unwrap();
		assert_eq!(report.policy_mode, "");
	}

	#[test]
	fn not_a_report() {
		assert!(matches!(TlsReport::parse(b"{not json"), Err(Error::Parse(_))));
		assert!(matches!(TlsReport::parse(br#"{"report-id": "1", "date-range": {}}"#), Err(Error::Parse(_))));
		assert!(matches!(TlsReport::parse(br#"{"policies": []}"#), Err(Error::Parse(_))));
	}
}
