use std::fmt;

use bitflags::bitflags;
use log::{debug, error, info, warn};

use super::archive;
use super::db::{ReportStore, Storage, StoreOutcome};
use super::dmarc::types::DmarcReport;
use super::error::Error;
use super::message;
use super::tlsrpt::types::TlsReport;
use super::types::{Report, ReportFileType, ReportFormat};

bitflags! {
	/// Result flags of one input item.
	pub struct Outcome: u8 {
		/// the item held a report that parsed
		const VALID = 1;
		/// the item may be removed from its source
		const DELETE = 2;
		/// storing the report failed; keep the item for another run
		const DB_ERROR = 4;
	}
}

impl Outcome {
	/// A database error always keeps the item.
	pub fn should_delete(self) -> bool {
		self.contains(Outcome::DELETE) && !self.contains(Outcome::DB_ERROR)
	}
}

/// What a source does with an item once it has been processed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
	Delete,
	/// stored, or already stored; move to the processed folder if there is one
	Processed,
	/// not a report; move to the error folder if there is one
	Failed,
	/// leave in place to be picked up again
	Retry,
}

#[derive(Clone, Debug, Default)]
pub struct PipelineOptions {
	pub delete_reports: bool,
	pub delete_failed: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
	pub seen: usize,
	pub stored: usize,
	pub existing: usize,
	pub invalid: usize,
	pub failed: usize,
	pub deleted: usize,
}

impl fmt::Display for Summary {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{} items: {} stored, {} already present, {} not reports, {} failed, {} deleted",
			self.seen, self.stored, self.existing, self.invalid, self.failed, self.deleted
		)
	}
}

/// Takes input items through extraction, mapping and storage.
pub struct Pipeline<S> {
	storage: Storage<S>,
	options: PipelineOptions,
	summary: Summary,
}

impl<S: ReportStore> Pipeline<S> {
	pub fn new(storage: Storage<S>, options: PipelineOptions) -> Pipeline<S> {
		Pipeline {
			storage,
			options,
			summary: Summary::default(),
		}
	}

	pub fn summary(&self) -> &Summary {
		&self.summary
	}

	pub fn storage_mut(&mut self) -> &mut Storage<S> {
		&mut self.storage
	}

	/// Processes a raw mail message.
	pub fn process_message(&mut self, data: &[u8], label: &str) -> Outcome {
		self.summary.seen += 1;
		let payload = message::find_report(data).and_then(|envelope| {
			debug!("{}: subject '{}'", label, envelope.subject);
			match envelope.report {
				Some(attachment) => {
					debug!(
						"{}: found {:?} attachment {}",
						label,
						attachment.file_type,
						attachment.filename.as_deref().unwrap_or("(unnamed)")
					);
					archive::read_report(attachment.file_type, &attachment.data)
				},
				None => Err(Error::Parse(format!("no report attachment in '{}'", envelope.subject))),
			}
		});
		self.finish(payload, None, label)
	}

	/// Processes a zip or gzip file.
	pub fn process_archive(&mut self, data: &[u8], label: &str) -> Outcome {
		self.summary.seen += 1;
		let payload = match ReportFileType::sniff(data) {
			ReportFileType::Probe => Err(Error::Decode("neither a zip nor a gzip archive".to_string())),
			file_type => archive::read_report(file_type, data),
		};
		self.finish(payload, None, label)
	}

	/// Processes a bare report document; `format` is sniffed when not given.
	pub fn process_payload(&mut self, data: &[u8], format: Option<ReportFormat>, label: &str) -> Outcome {
		self.summary.seen += 1;
		self.finish(Ok(data.to_vec()), format, label)
	}

	fn finish(&mut self, payload: Result<Vec<u8>, Error>, format: Option<ReportFormat>, label: &str) -> Outcome {
		let report = payload.and_then(|payload| {
			match format.unwrap_or_else(|| ReportFormat::sniff(&payload)) {
				ReportFormat::Xml => DmarcReport::parse(&payload).map(Report::Dmarc),
				ReportFormat::Json => TlsReport::parse(&payload).map(Report::Tls),
			}
		});

		let report = match report {
			Ok(report) => report,
			Err(err) => {
				warn!("{}: not a valid report: {}", label, err);
				self.summary.invalid += 1;
				return if self.options.delete_failed {
					Outcome::DELETE
				} else {
					Outcome::empty()
				};
			},
		};

		debug!(
			"{}: {} report {} from {} with {} records",
			label,
			report.kind(),
			report.report_id(),
			report.org(),
			report.record_count()
		);

		match self.storage.store(&report) {
			Ok(outcome) => {
				match outcome {
					StoreOutcome::Stored => self.summary.stored += 1,
					StoreOutcome::AlreadyExists => self.summary.existing += 1,
				}
				Outcome::VALID | Outcome::DELETE
			},
			Err(err) => {
				error!("{}: could not store report {}: {}", label, report.report_id(), err);
				self.summary.failed += 1;
				Outcome::VALID | Outcome::DB_ERROR
			},
		}
	}

	/// Decides what the source does with an item.
	pub fn action(&self, outcome: Outcome) -> Action {
		if outcome.contains(Outcome::DB_ERROR) {
			return Action::Retry;
		}
		let valid = outcome.contains(Outcome::VALID);
		if outcome.should_delete() && (!valid || self.options.delete_reports) {
			return Action::Delete;
		}
		if valid {
			Action::Processed
		} else {
			Action::Failed
		}
	}

	pub fn record_deleted(&mut self, label: &str) {
		info!("{}: deleted", label);
		self.summary.deleted += 1;
	}
}
