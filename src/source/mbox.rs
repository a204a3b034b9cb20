use std::fs;
use std::path::PathBuf;

use log::{debug, info};
use mbox_reader::MboxFile;

use super::Source;
use crate::db::ReportStore;
use crate::error::Error;
use crate::pipeline::{Action, Pipeline};

/// Drops the `From ` separator line of one mbox segment.
fn strip_from_line(segment: &[u8]) -> Option<&[u8]> {
	segment
		.iter()
		.position(|b| *b == b'\n')
		.map(|idx| &segment[idx + 1..])
}

/// Splits the file at the given message starts.
fn segments<'a>(data: &'a [u8], starts: &[usize]) -> Vec<&'a [u8]> {
	let mut bounds = Vec::with_capacity(starts.len() + 2);
	bounds.push(0);
	bounds.extend(starts.iter().copied().filter(|start| *start > 0 && *start <= data.len()));
	bounds.push(data.len());
	bounds.windows(2).map(|pair| &data[pair[0]..pair[1]]).collect()
}

/// Messages of an mbox file. Nothing is ever removed from the file.
pub struct MboxSource {
	path: PathBuf,
}

impl MboxSource {
	pub fn new(path: PathBuf) -> MboxSource {
		MboxSource { path }
	}
}

impl Source for MboxSource {
	fn describe(&self) -> String {
		format!("mbox {}", self.path.display())
	}

	fn run<S: ReportStore>(&mut self, pipeline: &mut Pipeline<S>) -> Result<(), Error> {
		let data = fs::read(&self.path)?;
		if data.is_empty() {
			info!("{}: empty", self.describe());
			return Ok(());
		}
		// the reader only yields a message once it sees the next one start, so the
		// offsets are collected and the file is cut up here, last message included
		let mailbox = MboxFile::from_file(&self.path)?;
		let starts: Vec<usize> = mailbox.iter().map(|entry| entry.offset()).collect();

		let mut count = 0;
		for (index, segment) in segments(&data, &starts).into_iter().enumerate() {
			let label = format!("{}#{}", self.path.display(), index + 1);
			let message = match strip_from_line(segment) {
				Some(message) if !message.iter().all(u8::is_ascii_whitespace) => message,
				_ => {
					debug!("{}: empty entry", label);
					continue;
				},
			};
			let outcome = pipeline.process_message(message, &label);
			if pipeline.action(outcome) == Action::Delete {
				debug!("{}: left in place, mbox items are never removed", label);
			}
			count += 1;
		}
		info!("{}: {} messages", self.describe(), count);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::archive::tests::gzip_bytes;
	use crate::db::memory::MemoryStore;
	use crate::db::{Storage, StorageOptions};
	use crate::dmarc::parse::tests::{record_xml, report_xml};
	use crate::message::tests::{single, Part};
	use crate::pipeline::PipelineOptions;
	use std::io::Write;
	use tempfile::NamedTempFile;

	fn mbox(ids: &[&str]) -> NamedTempFile {
		let mut file = NamedTempFile::new().unwrap();
		for id in ids {
			let archive = gzip_bytes(report_xml(id, &record_xml("192.0.2.1", 1, "")).as_bytes());
			let message = single(
				id,
				&Part {
					content_type: "application/gzip",
					filename: Some("report.xml.gz"),
					data: &archive,
				},
			);
			file.write_all(b"From reports@example.net Thu Jan  2 00:00:00 2020\n").unwrap();
			file.write_all(&message).unwrap();
			file.write_all(b"\n\n").unwrap();
		}
		file.flush().unwrap();
		file
	}

	fn read(ids: &[&str]) -> Pipeline<MemoryStore> {
		let file = mbox(ids);
		let storage = Storage::new(MemoryStore::default(), StorageOptions::default());
		let mut pipeline = Pipeline::new(storage, PipelineOptions { delete_reports: true, delete_failed: true });
		MboxSource::new(file.path().to_path_buf()).run(&mut pipeline).unwrap();
		assert!(file.path().exists());
		pipeline
	}

	#[test]
	fn reads_a_single_message() {
		let pipeline = read(&["m1"]);
		assert_eq!(pipeline.summary().seen, 1);
		assert_eq!(pipeline.summary().stored, 1);
	}

	#[test]
	fn reads_every_message() {
		let mut pipeline = read(&["m1", "m2", "m3"]);
		assert_eq!(pipeline.summary().seen, 3);
		assert_eq!(pipeline.summary().stored, 3);
		assert_eq!(pipeline.summary().deleted, 0);

		let ids: Vec<_> = pipeline
			.storage_mut()
			.store_mut()
			.tables
			.reports
			.iter()
			.map(|report| report.report_id.clone())
			.collect();
		assert_eq!(ids, vec!["m1", "m2", "m3"]);
	}

	#[test]
	fn empty_file_has_no_messages() {
		let file = NamedTempFile::new().unwrap();
		let storage = Storage::new(MemoryStore::default(), StorageOptions::default());
		let mut pipeline = Pipeline::new(storage, PipelineOptions::default());
		MboxSource::new(file.path().to_path_buf()).run(&mut pipeline).unwrap();
		assert_eq!(pipeline.summary().seen, 0);
	}

	#[test]
	fn segments_cover_the_whole_file() {
		let data = b"From a\nx\nFrom b\ny\n";
		assert_eq!(segments(data, &[9]), vec![&b"From a\nx\n"[..], &b"From b\ny\n"[..]]);
		assert_eq!(strip_from_line(b"From a\nx\n"), Some(&b"x\n"[..]));
		assert_eq!(segments(data, &[]), vec![&data[..]]);
	}
}
