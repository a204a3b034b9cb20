use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use super::Source;
use crate::db::ReportStore;
use crate::error::Error;
use crate::pipeline::{Action, Outcome, Pipeline};
use crate::types::{ReportFileType, ReportFormat};

/// How the files given on the command line are read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileMode {
	Email,
	Xml,
	Json,
	/// zip or gzip
	Archive,
	/// decided per file from its first bytes
	Auto,
}

impl FileMode {
	pub fn sniff(data: &[u8]) -> FileMode {
		if ReportFileType::sniff(data) != ReportFileType::Probe {
			return FileMode::Archive;
		}
		match data
			.strip_prefix(b"\xef\xbb\xbf")
			.unwrap_or(data)
			.iter()
			.find(|b| !b.is_ascii_whitespace())
		{
			Some(b'<') => FileMode::Xml,
			Some(b'{') => FileMode::Json,
			_ => FileMode::Email,
		}
	}
}

/// Regular files below `paths`, directories expanded one level in name order.
pub fn expand(paths: &[PathBuf]) -> Result<Vec<PathBuf>, Error> {
	let mut files = Vec::new();
	for path in paths {
		if path.is_dir() {
			let mut entries: Vec<PathBuf> = fs::read_dir(path)?
				.filter_map(|entry| entry.ok().map(|entry| entry.path()))
				.filter(|entry| entry.is_file())
				.collect();
			entries.sort();
			files.extend(entries);
		} else {
			files.push(path.clone());
		}
	}
	Ok(files)
}

/// Report files on disk; a file is deleted when its outcome says so.
pub struct FileSource {
	mode: FileMode,
	paths: Vec<PathBuf>,
}

impl FileSource {
	pub fn new(mode: FileMode, paths: Vec<PathBuf>) -> FileSource {
		FileSource { mode, paths }
	}

	fn process<S: ReportStore>(&self, pipeline: &mut Pipeline<S>, path: &Path, data: &[u8]) -> Outcome {
		let label = path.display().to_string();
		let mode = match self.mode {
			FileMode::Auto => {
				let mode = FileMode::sniff(data);
				debug!("{}: reading as {:?}", label, mode);
				mode
			},
			mode => mode,
		};
		match mode {
			FileMode::Email => pipeline.process_message(data, &label),
			FileMode::Xml => pipeline.process_payload(data, Some(ReportFormat::Xml), &label),
			FileMode::Json => pipeline.process_payload(data, Some(ReportFormat::Json), &label),
			FileMode::Archive | FileMode::Auto => pipeline.process_archive(data, &label),
		}
	}
}

impl Source for FileSource {
	fn describe(&self) -> String {
		format!("{} {:?} path(s)", self.paths.len(), self.mode)
	}

	fn run<S: ReportStore>(&mut self, pipeline: &mut Pipeline<S>) -> Result<(), Error> {
		let files = expand(&self.paths)?;
		info!("{} files to read", files.len());
		for path in files {
			let data = match fs::read(&path) {
				Ok(data) => data,
				Err(err) => {
					warn!("{}: could not read: {}", path.display(), err);
					continue;
				},
			};

			let outcome = self.process(pipeline, &path, &data);
			if pipeline.action(outcome) == Action::Delete {
				match fs::remove_file(&path) {
					Ok(()) => pipeline.record_deleted(&path.display().to_string()),
					Err(err) => warn!("{}: could not delete: {}", path.display(), err),
				}
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::archive::tests::{gzip_bytes, zip_bytes};
	use crate::db::memory::MemoryStore;
	use crate::db::{Storage, StorageOptions};
	use crate::dmarc::parse::tests::{record_xml, report_xml};
	use crate::pipeline::PipelineOptions;
	use crate::tlsrpt::parse::tests::{report_json, DETAILS};
	use crate::types::ReportKind;
	use tempfile::TempDir;

	fn pipeline(options: PipelineOptions) -> Pipeline<MemoryStore> {
		Pipeline::new(Storage::new(MemoryStore::default(), StorageOptions::default()), options)
	}

	#[test]
	fn sniffs_files() {
		assert_eq!(FileMode::sniff(&gzip_bytes(b"x")), FileMode::Archive);
		assert_eq!(FileMode::sniff(&zip_bytes("a.xml", b"x")), FileMode::Archive);
		assert_eq!(FileMode::sniff(b"\n<?xml version=\"1.0\"?>"), FileMode::Xml);
		assert_eq!(FileMode::sniff(b"{\"report-id\": \"1\"}"), FileMode::Json);
		assert_eq!(FileMode::sniff(b"From: a@example.com\r\n"), FileMode::Email);
	}

	#[test]
	fn directory_in_name_order() {
		let scratch = TempDir::new().unwrap();
		let dir = scratch.path();
		fs::write(dir.join("b.xml"), "").unwrap();
		fs::write(dir.join("a.xml"), "").unwrap();
		fs::create_dir(dir.join("nested")).unwrap();

		let files = expand(&[dir.to_path_buf()]).unwrap();
		assert_eq!(files, vec![dir.join("a.xml"), dir.join("b.xml")]);
	}

	#[test]
	fn auto_mode_reads_every_kind() {
		let scratch = TempDir::new().unwrap();
		let dir = scratch.path();
		let xml = report_xml("x1", &record_xml("192.0.2.1", 1, ""));
		fs::write(dir.join("1.xml"), &xml).unwrap();
		fs::write(dir.join("2.xml.gz"), gzip_bytes(report_xml("x2", &record_xml("192.0.2.1", 1, "")).as_bytes())).unwrap();
		fs::write(dir.join("3.json"), report_json("t1", 300, DETAILS)).unwrap();
		fs::write(dir.join("4.txt"), "not a report").unwrap();

		let mut pipeline = pipeline(PipelineOptions::default());
		FileSource::new(FileMode::Auto, vec![dir.to_path_buf()]).run(&mut pipeline).unwrap();

		let tables = &pipeline.storage_mut().store_mut().tables;
		assert_eq!(tables.reports(ReportKind::Dmarc).len(), 2);
		assert_eq!(tables.reports(ReportKind::Tls).len(), 1);
		assert_eq!(tables.records(ReportKind::Tls).len(), 2);
		assert_eq!(pipeline.summary().invalid, 1);
		assert!(dir.join("1.xml").exists());
	}

	#[test]
	fn deletes_stored_files_when_asked() {
		let scratch = TempDir::new().unwrap();
		let dir = scratch.path();
		let path = dir.join("report.xml");
		fs::write(&path, report_xml("d1", &record_xml("192.0.2.1", 1, ""))).unwrap();
		let bad = dir.join("bad.xml");
		fs::write(&bad, "<feedback>").unwrap();

		let mut pipeline = pipeline(PipelineOptions { delete_reports: true, delete_failed: false });
		FileSource::new(FileMode::Xml, vec![path.clone(), bad.clone()]).run(&mut pipeline).unwrap();

		assert!(!path.exists());
		assert!(bad.exists());
		assert_eq!(pipeline.summary().deleted, 1);
	}
}
