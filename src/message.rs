use lazy_static::lazy_static;
use mailparse::{parse_mail, MailHeaderMap, ParsedMail};
use regex::bytes::Regex;

use super::error::Error;
use super::types::ReportFileType;

lazy_static! {
	// some senders write the header without its hyphen
	static ref CONTENT_TYPE_TYPO: Regex = Regex::new(r"(?m)^ContentType:").unwrap();
}

/// A report attachment found inside a message, still packed.
#[derive(Debug)]
pub struct ReportAttachment {
	pub file_type: ReportFileType,
	pub filename: Option<String>,
	pub data: Vec<u8>,
}

/// What the extractor learned about a message.
#[derive(Debug)]
pub struct Envelope {
	pub subject: String,
	pub report: Option<ReportAttachment>,
}

enum PartMatch {
	/// stops the scan
	Winner(ReportFileType),
	/// remembered; a later part may replace it
	Candidate(ReportFileType),
}

fn filename(part: &ParsedMail) -> Option<String> {
	part.get_content_disposition()
		.params
		.get("filename")
		.or_else(|| part.ctype.params.get("name"))
		.cloned()
}

fn classify(part: &ParsedMail) -> Option<PartMatch> {
	match part.ctype.mimetype.to_ascii_lowercase().as_str() {
		"application/gzip" | "application/x-gzip" | "application/tlsrpt+gzip" => {
			Some(PartMatch::Winner(ReportFileType::Gzip))
		},
		"application/zip" | "application/x-zip-compressed" => {
			Some(PartMatch::Candidate(ReportFileType::Zip))
		},
		"application/octet-stream" => {
			let gzipped = filename(part)
				.map(|name| name.to_ascii_lowercase().ends_with(".gz"))
				.unwrap_or(false);
			if gzipped {
				Some(PartMatch::Candidate(ReportFileType::Gzip))
			} else {
				Some(PartMatch::Candidate(ReportFileType::Zip))
			}
		},
		"text/xml" | "application/xml" | "application/json" | "application/tlsrpt+json" => {
			Some(PartMatch::Candidate(ReportFileType::Probe))
		},
		_ => None,
	}
}

/// Walks the parts of a multipart message in document order.
///
/// Returns the first gzip part immediately; otherwise `candidate` holds the last zip or
/// bare part seen.
fn scan_parts<'a>(
	part: &'a ParsedMail<'a>,
	candidate: &mut Option<(ReportFileType, &'a ParsedMail<'a>)>,
) -> Option<(ReportFileType, &'a ParsedMail<'a>)> {
	for subpart in part.subparts.iter() {
		if subpart.ctype.mimetype.to_ascii_lowercase().starts_with("multipart/") {
			let result = scan_parts(subpart, candidate);
			if result.is_some() {
				return result;
			}
			continue;
		}

		match classify(subpart) {
			Some(PartMatch::Winner(file_type)) => return Some((file_type, subpart)),
			Some(PartMatch::Candidate(file_type)) => *candidate = Some((file_type, subpart)),
			None => log::debug!("skipping part of type {}", subpart.ctype.mimetype),
		}
	}

	None
}

/// Searches the given raw message for a report file.
pub fn find_report(message: &[u8]) -> Result<Envelope, Error> {
	let message = CONTENT_TYPE_TYPO.replace_all(message, &b"Content-Type:"[..]);
	let mail = parse_mail(&message).map_err(|e| Error::Parse(format!("mime: {}", e)))?;
	let subject = mail.headers.get_first_value("Subject").unwrap_or_default();

	let found = if mail.ctype.mimetype.to_ascii_lowercase().starts_with("multipart/") {
		let mut candidate = None;
		scan_parts(&mail, &mut candidate).or(candidate)
	} else {
		match classify(&mail) {
			Some(PartMatch::Winner(file_type)) | Some(PartMatch::Candidate(file_type)) => {
				Some((file_type, &mail))
			},
			None => None,
		}
	};

	let report = match found {
		Some((file_type, part)) => {
			let data = part
				.get_body_raw()
				.map_err(|e| Error::Parse(format!("mime body: {}", e)))?;
			Some(ReportAttachment {
				file_type,
				filename: filename(part),
				data,
			})
		},
		None => None,
	};

	Ok(Envelope { subject, report })
}
