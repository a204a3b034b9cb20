use flate2::read::GzDecoder;
use std::io::{prelude::*, Cursor};
use zip;

use super::error::Error;
use super::types::ReportFileType;

/// Largest decompressed report accepted.
const MAX_REPORT_SIZE: u64 = 64 * 1024 * 1024;

fn read_limited<R: Read>(reader: R, what: &str, limit: u64) -> Result<Vec<u8>, Error> {
	let mut result = Vec::new();
	reader
		.take(limit + 1)
		.read_to_end(&mut result)
		.map_err(|e| Error::Decode(format!("{}: {}", what, e)))?;
	if result.len() as u64 > limit {
		return Err(Error::Decode(format!("{}: report is larger than {} bytes", what, limit)));
	}
	Ok(result)
}

/// Given a report type and the raw data in bytes, decompresses the report into its payload bytes.
///
/// An archive that decompresses to nothing is reported as a decode error.
pub fn read_report(report_type: ReportFileType, data: &[u8]) -> Result<Vec<u8>, Error> {
	read_report_within(report_type, data, MAX_REPORT_SIZE)
}

fn read_report_within(report_type: ReportFileType, data: &[u8], limit: u64) -> Result<Vec<u8>, Error> {
	let report_type = match report_type {
		ReportFileType::Probe => ReportFileType::sniff(data),
		known => known,
	};

	let result = match report_type {
		ReportFileType::Gzip => read_limited(GzDecoder::new(Cursor::new(data)), "gzip", limit)?,
		ReportFileType::Zip => {
			let mut archive = zip::ZipArchive::new(Cursor::new(data))
				.map_err(|e| Error::Decode(format!("zip: {}", e)))?;

			if archive.len() == 0 {
				return Err(Error::Decode("zip: archive has no files".to_string()));
			}
			if archive.len() > 1 {
				log::debug!("zip archive has {} files, using the first one", archive.len());
			}

			let report_file = archive.by_index(0)
				.map_err(|e| Error::Decode(format!("zip: {}", e)))?;
			read_limited(report_file, "zip", limit)?
		},
		ReportFileType::Probe => data.to_vec(),
	};

	if result.is_empty() {
		return Err(Error::Decode(format!("{:?} archive decompressed to zero bytes", report_type)));
	}

	Ok(result)
}
