use std::net::IpAddr;

use super::types::{
	Alignment, AuthResult, DkimResult, Disposition, DmarcRecord, DmarcReport, PolicyPublished,
	SpfResult,
};
use super::xml::{self, XmlValue};
use crate::error::{Error, MappingError};
use crate::types::OneOrMany;

/// Folds the results of several signatures or mechanisms into one.
///
/// Any `pass` wins outright. Otherwise the results must all agree, and a disagreement
/// leaves the outcome undecided.
pub fn resolve_results<'a>(results: &[Option<&'a str>]) -> Option<&'a str> {
	if results.iter().any(|result| *result == Some("pass")) {
		return Some("pass");
	}

	let first = *results.first()?;
	for (i, result) in results.iter().enumerate() {
		if results[i + 1..].iter().any(|later| later != result) {
			return None;
		}
	}
	first
}

fn owned(value: Option<&str>) -> Option<String> {
	value.map(str::to_string)
}

fn auth_result<R>(value: Option<&XmlValue>, parse: fn(Option<&str>) -> R) -> AuthResult<R> {
	let value = match value {
		Some(value) => value,
		None => return AuthResult { domain: None, result: parse(None) },
	};

	match value.one_or_many() {
		OneOrMany::One(single) => AuthResult {
			domain: owned(single.text_at(&["domain"])),
			result: parse(single.text_at(&["result"])),
		},
		OneOrMany::Many(items) => {
			let domains: Vec<&str> = items
				.iter()
				.map(|item| item.text_at(&["domain"]).unwrap_or(""))
				.collect();
			let results: Vec<Option<&str>> = items.iter().map(|item| item.text_at(&["result"])).collect();
			AuthResult {
				domain: Some(domains.join("/")),
				result: parse(resolve_results(&results)),
			}
		},
	}
}

fn reasons(value: &XmlValue) -> Option<String> {
	let types: Vec<&str> = value
		.one_or_many()
		.into_vec()
		.into_iter()
		.map(|reason| reason.text_at(&["type"]).unwrap_or(""))
		.collect();
	let joined = types.join("/");
	if joined.is_empty() {
		None
	} else {
		Some(joined)
	}
}

impl DmarcRecord {
	pub fn from_xml(record: &XmlValue) -> Result<DmarcRecord, MappingError> {
		if !record.is_map() {
			return Err(MappingError::NotAnObject("record"));
		}

		let source_ip = record.text_at(&["row", "source_ip"]).map(str::trim).unwrap_or("");
		if source_ip.is_empty() {
			return Err(MappingError::EmptySourceIp);
		}
		let source_ip: IpAddr = source_ip
			.parse()
			.map_err(|_| MappingError::InvalidIp(source_ip.to_string()))?;

		let auth_results = match record.get("auth_results") {
			Some(auth_results) if auth_results.is_map() => auth_results,
			_ => return Err(MappingError::AuthResultsNotObject),
		};

		let evaluated = record.path(&["row", "policy_evaluated"]);
		let evaluated_text = |key: &str| evaluated.and_then(|e| e.text_at(&[key]));

		Ok(DmarcRecord {
			source_ip,
			count: record
				.text_at(&["row", "count"])
				.and_then(|count| count.trim().parse().ok())
				.unwrap_or(0),
			disposition: Disposition::parse(evaluated_text("disposition")),
			reason: evaluated.and_then(|e| e.get("reason")).and_then(reasons),
			dkim_align: Alignment::parse(evaluated_text("dkim")),
			spf_align: Alignment::parse(evaluated_text("spf")),
			header_from: owned(record.text_at(&["identifiers", "header_from"])),
			dkim: auth_result(auth_results.get("dkim"), DkimResult::parse),
			spf: auth_result(auth_results.get("spf"), SpfResult::parse),
		})
	}
}

fn required<'a>(value: &'a XmlValue, keys: &[&str]) -> Result<&'a str, Error> {
	value
		.text_at(keys)
		.map(str::trim)
		.filter(|text| !text.is_empty())
		.ok_or_else(|| Error::Parse(format!("missing {}", keys.join("/"))))
}

fn epoch(value: &XmlValue, keys: &[&str]) -> Result<u64, Error> {
	let text = required(value, keys)?;
	text.parse()
		.map_err(|_| Error::Parse(format!("{} is not a timestamp: '{}'", keys.join("/"), text)))
}

impl DmarcReport {
	/// Parses a DMARC aggregate report document.
	pub fn parse(data: &[u8]) -> Result<DmarcReport, Error> {
		let (root_name, root) = xml::parse(data)?;
		if !root.is_map() {
			return Err(Error::Parse(format!("<{}> is not a DMARC report", root_name)));
		}

		let metadata = match root.get("report_metadata") {
			Some(metadata) if metadata.is_map() => metadata,
			_ => return Err(Error::Parse("missing report_metadata".to_string())),
		};

		// some senders list several policies; only the first one counts
		let policy = match root.get("policy_published").map(|p| p.one_or_many()) {
			Some(policies) => match policies.first() {
				Some(policy) if policy.is_map() => *policy,
				_ => return Err(Error::Parse("policy_published is not an object".to_string())),
			},
			None => return Err(Error::Parse("missing policy_published".to_string())),
		};

		let report_id = required(metadata, &["report_id"])?.to_string();

		let records = match root.get("record") {
			Some(record @ XmlValue::Map(_)) | Some(record @ XmlValue::List(_)) => record
				.one_or_many()
				.into_vec()
				.into_iter()
				.map(DmarcRecord::from_xml)
				.collect(),
			Some(_) => {
				log::error!("report {}: record is neither an object nor a list, no rows", report_id);
				Vec::new()
			},
			None => {
				log::warn!("report {} has no records", report_id);
				Vec::new()
			},
		};

		Ok(DmarcReport {
			org: metadata.text_at(&["org_name"]).unwrap_or("").to_string(),
			email: owned(metadata.text_at(&["email"])),
			extra_contact_info: owned(metadata.text_at(&["extra_contact_info"])),
			begin: epoch(metadata, &["date_range", "begin"])?,
			end: epoch(metadata, &["date_range", "end"])?,
			policy: PolicyPublished {
				domain: policy.text_at(&["domain"]).unwrap_or("").to_string(),
				adkim: owned(policy.text_at(&["adkim"])),
				aspf: owned(policy.text_at(&["aspf"])),
				p: owned(policy.text_at(&["p"])),
				sp: owned(policy.text_at(&["sp"])),
				pct: policy.text_at(&["pct"]).and_then(|pct| pct.trim().parse().ok()),
			},
			raw_xml: String::from_utf8_lossy(data).into_owned(),
			report_id,
			records,
		})
	}
}
