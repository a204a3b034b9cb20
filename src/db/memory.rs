//! A `ReportStore` kept in memory, with transaction snapshots.

use super::ReportStore;
use crate::dmarc::types::{DmarcRecord, DmarcReport};
use crate::error::Error;
use crate::tlsrpt::types::{TlsFailureRecord, TlsReport};
use crate::types::ReportKind;

#[derive(Clone, Debug)]
pub struct StoredReport {
	pub kind: ReportKind,
	pub serial: u64,
	pub report_id: String,
	pub domain: String,
	pub raw: String,
}

#[derive(Clone, Debug)]
pub struct StoredRecord {
	pub kind: ReportKind,
	pub serial: u64,
	pub count: u64,
	/// spf and dkim alignment of DMARC rows
	pub alignment: Option<(String, String)>,
}

#[derive(Clone, Debug, Default)]
pub struct Tables {
	pub reports: Vec<StoredReport>,
	pub records: Vec<StoredRecord>,
}

impl Tables {
	pub fn reports(&self, kind: ReportKind) -> Vec<&StoredReport> {
		self.reports.iter().filter(|report| report.kind == kind).collect()
	}

	pub fn records(&self, kind: ReportKind) -> Vec<&StoredRecord> {
		self.records.iter().filter(|record| record.kind == kind).collect()
	}
}

#[derive(Default)]
pub struct MemoryStore {
	pub tables: Tables,
	snapshot: Option<Tables>,
	savepoints: Vec<(String, Tables)>,
	next_serial: u64,
	/// makes every statement fail, like a lost connection
	pub broken: bool,
	/// number of upcoming `delete_records` calls that fail
	pub failing_deletes: usize,
	/// a statement failed inside the transaction; nothing else runs until it is rolled back
	aborted: bool,
}

impl MemoryStore {
	pub fn in_transaction(&self) -> bool {
		self.snapshot.is_some()
	}

	fn check(&self) -> Result<(), Error> {
		if self.broken {
			return Err(Error::Database("connection lost".to_string()));
		}
		if self.aborted {
			return Err(Error::Database("current transaction is aborted".to_string()));
		}
		Ok(())
	}

	fn fail(&mut self, reason: &str) -> Error {
		if self.in_transaction() {
			self.aborted = true;
		}
		Error::Database(reason.to_string())
	}

	fn insert_report(&mut self, kind: ReportKind, report_id: &str, domain: &str, raw: &str) -> Result<u64, Error> {
		self.check()?;
		self.next_serial += 1;
		self.tables.reports.push(StoredReport {
			kind,
			serial: self.next_serial,
			report_id: report_id.to_string(),
			domain: domain.to_string(),
			raw: raw.to_string(),
		});
		Ok(self.next_serial)
	}

	fn insert_record(
		&mut self,
		kind: ReportKind,
		serial: u64,
		count: u64,
		alignment: Option<(String, String)>,
	) -> Result<(), Error> {
		self.check()?;
		self.tables.records.push(StoredRecord {
			kind,
			serial,
			count,
			alignment,
		});
		Ok(())
	}
}

impl ReportStore for MemoryStore {
	fn begin(&mut self) -> Result<(), Error> {
		self.check()?;
		self.snapshot = Some(self.tables.clone());
		self.savepoints.clear();
		Ok(())
	}

	fn commit(&mut self) -> Result<(), Error> {
		self.check()?;
		self.snapshot = None;
		Ok(())
	}

	fn rollback(&mut self) -> Result<(), Error> {
		if let Some(snapshot) = self.snapshot.take() {
			self.tables = snapshot;
		}
		self.savepoints.clear();
		self.aborted = false;
		Ok(())
	}

	fn savepoint(&mut self, name: &str) -> Result<(), Error> {
		self.check()?;
		self.savepoints.push((name.to_string(), self.tables.clone()));
		Ok(())
	}

	fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), Error> {
		let position = self
			.savepoints
			.iter()
			.rposition(|(saved, _)| saved == name)
			.ok_or_else(|| Error::Database(format!("no savepoint {}", name)))?;
		self.savepoints.truncate(position + 1);
		self.tables = self.savepoints[position].1.clone();
		self.aborted = false;
		Ok(())
	}

	fn release_savepoint(&mut self, name: &str) -> Result<(), Error> {
		self.check()?;
		if let Some(position) = self.savepoints.iter().rposition(|(saved, _)| saved == name) {
			self.savepoints.truncate(position);
		}
		Ok(())
	}

	fn find_report(&mut self, kind: ReportKind, report_id: &str, domain: &str) -> Result<Option<u64>, Error> {
		self.check()?;
		Ok(self
			.tables
			.reports
			.iter()
			.find(|report| report.kind == kind && report.report_id == report_id && report.domain == domain)
			.map(|report| report.serial))
	}

	fn delete_records(&mut self, kind: ReportKind, serial: u64) -> Result<(), Error> {
		self.check()?;
		if self.failing_deletes > 0 {
			self.failing_deletes -= 1;
			return Err(self.fail("lock wait timeout"));
		}
		self.tables.records.retain(|record| !(record.kind == kind && record.serial == serial));
		Ok(())
	}

	fn delete_report(&mut self, kind: ReportKind, serial: u64) -> Result<(), Error> {
		self.check()?;
		self.tables.reports.retain(|report| !(report.kind == kind && report.serial == serial));
		Ok(())
	}

	fn insert_dmarc_report(&mut self, report: &DmarcReport, raw_xml: &str) -> Result<u64, Error> {
		self.insert_report(ReportKind::Dmarc, &report.report_id, &report.policy.domain, raw_xml)
	}

	fn insert_dmarc_record(&mut self, serial: u64, record: &DmarcRecord) -> Result<(), Error> {
		let alignment = (record.spf_align.as_str().to_string(), record.dkim_align.as_str().to_string());
		self.insert_record(ReportKind::Dmarc, serial, u64::from(record.count), Some(alignment))
	}

	fn insert_tls_report(&mut self, report: &TlsReport, raw_json: &str) -> Result<u64, Error> {
		self.insert_report(ReportKind::Tls, &report.report_id, &report.policy_domain, raw_json)
	}

	fn insert_tls_record(&mut self, serial: u64, record: &TlsFailureRecord) -> Result<(), Error> {
		self.insert_record(ReportKind::Tls, serial, record.count, None)
	}
}
