use std::fmt;

use serde::Deserialize;

use super::dmarc::types::DmarcReport;
use super::tlsrpt::types::TlsReport;

/// How a report payload is packed inside its envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportFileType {
	Zip,
	Gzip,
	/// Unknown packing; the decoder sniffs the magic bytes and falls back to the bare payload.
	Probe,
}

impl ReportFileType {
	/// Guesses the packing from the first bytes of a file.
	pub fn sniff(data: &[u8]) -> ReportFileType {
		if data.starts_with(b"PK\x03\x04") {
			ReportFileType::Zip
		} else if data.starts_with(&[0x1f, 0x8b]) {
			ReportFileType::Gzip
		} else {
			ReportFileType::Probe
		}
	}
}

/// The structured format of a decompressed report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportFormat {
	/// DMARC aggregate report
	Xml,
	/// SMTP TLS report
	Json,
}

impl ReportFormat {
	pub fn sniff(payload: &[u8]) -> ReportFormat {
		let first = payload
			.strip_prefix(b"\xef\xbb\xbf")
			.unwrap_or(payload)
			.iter()
			.find(|b| !b.is_ascii_whitespace());
		match first {
			Some(b'{') | Some(b'[') => ReportFormat::Json,
			_ => ReportFormat::Xml,
		}
	}
}

/// A field that senders emit either as a single value or as a list of values.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
	// tried first
	Many(Vec<T>),
	One(T),
}

impl<T> OneOrMany<T> {
	pub fn into_vec(self) -> Vec<T> {
		match self {
			OneOrMany::One(item) => vec![item],
			OneOrMany::Many(items) => items,
		}
	}

	pub fn first(&self) -> Option<&T> {
		match self {
			OneOrMany::One(item) => Some(item),
			OneOrMany::Many(items) => items.first(),
		}
	}
}

impl<T> Default for OneOrMany<T> {
	fn default() -> Self {
		OneOrMany::Many(Vec::new())
	}
}

/// Which pair of tables a report is stored in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReportKind {
	Dmarc,
	Tls,
}

impl ReportKind {
	pub fn report_table(self) -> &'static str {
		match self {
			ReportKind::Dmarc => "report",
			ReportKind::Tls => "tls",
		}
	}

	pub fn record_table(self) -> &'static str {
		match self {
			ReportKind::Dmarc => "rptrecord",
			ReportKind::Tls => "tlsrecord",
		}
	}
}

impl fmt::Display for ReportKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ReportKind::Dmarc => write!(f, "DMARC"),
			ReportKind::Tls => write!(f, "TLS"),
		}
	}
}

/// A fully mapped report, ready to be stored.
#[derive(Debug)]
pub enum Report {
	Dmarc(DmarcReport),
	Tls(TlsReport),
}

impl Report {
	pub fn kind(&self) -> ReportKind {
		match self {
			Report::Dmarc(_) => ReportKind::Dmarc,
			Report::Tls(_) => ReportKind::Tls,
		}
	}

	pub fn report_id(&self) -> &str {
		match self {
			Report::Dmarc(report) => &report.report_id,
			Report::Tls(report) => &report.report_id,
		}
	}

	pub fn domain(&self) -> &str {
		match self {
			Report::Dmarc(report) => &report.policy.domain,
			Report::Tls(report) => &report.policy_domain,
		}
	}

	pub fn org(&self) -> &str {
		match self {
			Report::Dmarc(report) => &report.org,
			Report::Tls(report) => &report.org,
		}
	}

	pub fn record_count(&self) -> usize {
		match self {
			Report::Dmarc(report) => report.records.len(),
			Report::Tls(report) => report.records.len(),
		}
	}
}
