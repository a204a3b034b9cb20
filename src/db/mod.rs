use std::convert::TryFrom;
use std::io::prelude::*;
use std::net::IpAddr;

use flate2::write::GzEncoder;
use flate2::Compression;
use log::{error, info, warn};

use crate::dmarc::types::{DmarcRecord, DmarcReport};
use crate::error::{Error, MappingError};
use crate::tlsrpt::types::{TlsFailureRecord, TlsReport};
use crate::types::{Report, ReportKind};

pub mod backend;
pub mod conn;
#[cfg(test)]
pub mod memory;
pub mod schema;
pub mod store;

/// A bound statement parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
	Int(Option<i64>),
	Text(Option<String>),
}

impl From<&str> for SqlValue {
	fn from(value: &str) -> Self {
		SqlValue::Text(Some(value.to_string()))
	}
}

impl From<Option<&str>> for SqlValue {
	fn from(value: Option<&str>) -> Self {
		SqlValue::Text(value.map(str::to_string))
	}
}

impl From<u32> for SqlValue {
	fn from(value: u32) -> Self {
		SqlValue::Int(Some(i64::from(value)))
	}
}

impl TryFrom<u64> for SqlValue {
	type Error = MappingError;

	fn try_from(value: u64) -> Result<Self, Self::Error> {
		i64::try_from(value)
			.map(|value| SqlValue::Int(Some(value)))
			.map_err(|_| MappingError::Malformed(format!("{} does not fit a signed 64-bit column", value)))
	}
}

impl From<Option<u8>> for SqlValue {
	fn from(value: Option<u8>) -> Self {
		SqlValue::Int(value.map(i64::from))
	}
}

/// Runs statements against one server connection.
pub trait SqlConn {
	/// Returns the number of affected rows.
	fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, Error>;

	/// Runs an INSERT and returns the key the server generated for it.
	fn insert(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, Error>;

	fn query_id(&mut self, sql: &str, params: &[SqlValue]) -> Result<Option<u64>, Error>;

	fn query_text(&mut self, sql: &str, params: &[SqlValue]) -> Result<Option<String>, Error>;

	fn query_pairs(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<(String, String)>, Error>;
}

/// Row-level operations the ingestion transaction is built from.
pub trait ReportStore {
	fn begin(&mut self) -> Result<(), Error>;
	fn commit(&mut self) -> Result<(), Error>;
	fn rollback(&mut self) -> Result<(), Error>;

	/// Marks a point inside the open transaction that a failed statement can be undone to.
	fn savepoint(&mut self, name: &str) -> Result<(), Error>;
	/// Undoes everything since the savepoint and leaves the transaction usable.
	fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), Error>;
	fn release_savepoint(&mut self, name: &str) -> Result<(), Error>;

	/// Serial of a stored report with this id and domain.
	fn find_report(&mut self, kind: ReportKind, report_id: &str, domain: &str) -> Result<Option<u64>, Error>;
	fn delete_records(&mut self, kind: ReportKind, serial: u64) -> Result<(), Error>;
	fn delete_report(&mut self, kind: ReportKind, serial: u64) -> Result<(), Error>;

	fn insert_dmarc_report(&mut self, report: &DmarcReport, raw_xml: &str) -> Result<u64, Error>;
	fn insert_dmarc_record(&mut self, serial: u64, record: &DmarcRecord) -> Result<(), Error>;
	fn insert_tls_report(&mut self, report: &TlsReport, raw_json: &str) -> Result<u64, Error>;
	fn insert_tls_record(&mut self, serial: u64, record: &TlsFailureRecord) -> Result<(), Error>;
}

/// How an IP address lands in a type-tagged column pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IpColumn {
	V4(u32),
	V6([u8; 16]),
}

impl From<IpAddr> for IpColumn {
	fn from(ip: IpAddr) -> Self {
		match ip {
			IpAddr::V4(ip) => IpColumn::V4(u32::from(ip)),
			IpAddr::V6(ip) => IpColumn::V6(ip.octets()),
		}
	}
}

#[derive(Clone, Debug)]
pub struct StorageOptions {
	pub replace: bool,
	pub compress_xml: bool,
	pub compress_json: bool,
	pub max_size_xml: usize,
	pub max_size_json: usize,
}

impl Default for StorageOptions {
	fn default() -> Self {
		StorageOptions {
			replace: false,
			compress_xml: false,
			compress_json: false,
			max_size_xml: 50000,
			max_size_json: 50000,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreOutcome {
	Stored,
	/// Not an error: the report was stored by an earlier run.
	AlreadyExists,
}

/// Gzips and base64-encodes the raw report when asked to, and blanks it when it is too
/// large to keep.
pub fn raw_payload(raw: &str, compress: bool, max_size: usize) -> Result<String, Error> {
	let raw = if compress {
		let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
		encoder.write_all(raw.as_bytes())?;
		base64::encode(&encoder.finish()?)
	} else {
		raw.to_string()
	};

	if raw.len() > max_size {
		warn!("raw report is {} bytes, over the limit of {}; storing it empty", raw.len(), max_size);
		return Ok(String::new());
	}
	Ok(raw)
}

const CLEANUP_SAVEPOINT: &str = "replace_cleanup";

/// Stores whole reports, one transaction per report.
pub struct Storage<S> {
	store: S,
	options: StorageOptions,
}

impl<S: ReportStore> Storage<S> {
	pub fn new(store: S, options: StorageOptions) -> Storage<S> {
		Storage { store, options }
	}

	pub fn store_mut(&mut self) -> &mut S {
		&mut self.store
	}

	fn raw(&self, report: &Report) -> Result<String, Error> {
		match report {
			Report::Dmarc(report) => raw_payload(&report.raw_xml, self.options.compress_xml, self.options.max_size_xml),
			Report::Tls(report) => raw_payload(&report.raw_json, self.options.compress_json, self.options.max_size_json),
		}
	}

	/// Writes the report and all of its rows, or nothing at all.
	pub fn store(&mut self, report: &Report) -> Result<StoreOutcome, Error> {
		let kind = report.kind();
		let existing = self.store.find_report(kind, report.report_id(), report.domain())?;
		if existing.is_some() && !self.options.replace {
			info!("{} report {} from {} is already stored", kind, report.report_id(), report.org());
			return Ok(StoreOutcome::AlreadyExists);
		}

		let raw = self.raw(report)?;

		self.store.begin()?;
		let written = self
			.write(report, &raw, existing)
			.and_then(|rows| self.store.commit().map(|_| rows));
		match written {
			Ok(rows) => {
				info!(
					"stored {} report {} from {} for {} ({} rows)",
					kind,
					report.report_id(),
					report.org(),
					report.domain(),
					rows
				);
				Ok(StoreOutcome::Stored)
			},
			Err(err) => {
				error!("{} report {} rolled back: {}", kind, report.report_id(), err);
				if let Err(rollback_err) = self.store.rollback() {
					error!("rollback failed: {}", rollback_err);
				}
				Err(err)
			},
		}
	}

	/// Runs one replace-mode delete behind a savepoint. A failed delete is logged and undone,
	/// and the transaction carries on.
	fn cleanup(
		&mut self,
		kind: ReportKind,
		serial: u64,
		what: &str,
		delete: fn(&mut S, ReportKind, u64) -> Result<(), Error>,
	) -> Result<(), Error> {
		self.store.savepoint(CLEANUP_SAVEPOINT)?;
		match delete(&mut self.store, kind, serial) {
			Ok(()) => self.store.release_savepoint(CLEANUP_SAVEPOINT),
			Err(err) => {
				warn!("could not delete {} of {} serial {}: {}", what, kind, serial, err);
				self.store.rollback_to_savepoint(CLEANUP_SAVEPOINT)
			},
		}
	}

	fn write(&mut self, report: &Report, raw: &str, replacing: Option<u64>) -> Result<usize, Error> {
		let kind = report.kind();
		if let Some(serial) = replacing {
			info!("replacing {} report {} (serial {})", kind, report.report_id(), serial);
			self.cleanup(kind, serial, "rows", S::delete_records)?;
			self.cleanup(kind, serial, "report", S::delete_report)?;
		}

		match report {
			Report::Dmarc(report) => {
				let serial = self.store.insert_dmarc_report(report, raw)?;
				for record in &report.records {
					let record = record.as_ref().map_err(|err| Error::Mapping(err.clone()))?;
					self.store.insert_dmarc_record(serial, record)?;
				}
				Ok(report.records.len())
			},
			Report::Tls(report) => {
				let serial = self.store.insert_tls_report(report, raw)?;
				for record in &report.records {
					let record = record.as_ref().map_err(|err| Error::Mapping(err.clone()))?;
					self.store.insert_tls_record(serial, record)?;
				}
				Ok(report.records.len())
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::memory::MemoryStore;
	use super::*;
	use crate::dmarc::parse::tests::{dkim_xml, record_xml, report_xml};
	use flate2::read::GzDecoder;
	use std::io::Read;
	use std::net::{Ipv4Addr, Ipv6Addr};

	fn ip_addr(column: &IpColumn) -> IpAddr {
		match column {
			IpColumn::V4(ip) => IpAddr::from(Ipv4Addr::from(*ip)),
			IpColumn::V6(ip) => IpAddr::from(*ip),
		}
	}

	fn dmarc(report_id: &str, records: &str) -> Report {
		Report::Dmarc(DmarcReport::parse(report_xml(report_id, records).as_bytes()).unwrap())
	}

	#[test]
	fn ipv4_roundtrip() {
		for text in &["66.249.80.0", "0.0.0.0", "255.255.255.255", "192.0.2.1"] {
			let ip: IpAddr = text.parse().unwrap();
			let column = IpColumn::from(ip);
			match column {
				IpColumn::V4(value) => assert_eq!(Ipv4Addr::from(value).to_string(), *text),
				IpColumn::V6(_) => panic!("expected an integer"),
			}
			assert_eq!(ip_addr(&column), ip);
		}
		assert_eq!(IpColumn::from("66.249.80.0".parse::<IpAddr>().unwrap()), IpColumn::V4(1123635200));
	}

	#[test]
	fn ipv6_roundtrip() {
		for text in &["2001:db8::1", "::1", "fe80::1ff:fe23:4567:890a"] {
			let ip: IpAddr = text.parse().unwrap();
			let column = IpColumn::from(ip);
			match &column {
				IpColumn::V6(bytes) => {
					let decoded = hex::decode(hex::encode(bytes)).unwrap();
					let mut octets = [0u8; 16];
					octets.copy_from_slice(&decoded);
					assert_eq!(Ipv6Addr::from(octets).to_string(), *text);
				},
				IpColumn::V4(_) => panic!("expected a blob"),
			}
			assert_eq!(ip_addr(&column), ip);
		}
	}

	#[test]
	fn oversized_counts_are_mapping_errors() {
		assert_eq!(SqlValue::try_from(7u64), Ok(SqlValue::Int(Some(7))));
		assert_eq!(SqlValue::try_from(i64::MAX as u64), Ok(SqlValue::Int(Some(i64::MAX))));
		assert!(matches!(SqlValue::try_from(u64::MAX), Err(MappingError::Malformed(_))));
	}

	#[test]
	fn raw_payload_limits_and_compression() {
		assert_eq!(raw_payload("<feedback/>", false, 100).unwrap(), "<feedback/>");
		assert_eq!(raw_payload("<feedback/>", false, 5).unwrap(), "");

		let compressed = raw_payload("<feedback/>", true, 1000).unwrap();
		let mut decoded = String::new();
		GzDecoder::new(&base64::decode(&compressed).unwrap()[..])
			.read_to_string(&mut decoded)
			.unwrap();
		assert_eq!(decoded, "<feedback/>");
	}

	#[test]
	fn stores_once() {
		let mut storage = Storage::new(MemoryStore::default(), StorageOptions::default());
		let report = dmarc("1", &record_xml("192.0.2.1", 2, &dkim_xml("example.com", "pass")));
		assert_eq!(storage.store(&report).unwrap(), StoreOutcome::Stored);
		assert_eq!(storage.store(&report).unwrap(), StoreOutcome::AlreadyExists);
		assert_eq!(storage.store_mut().tables.reports.len(), 1);
		assert_eq!(storage.store_mut().tables.records.len(), 1);
	}

	#[test]
	fn bad_row_rolls_back_everything() {
		let mut storage = Storage::new(MemoryStore::default(), StorageOptions::default());
		let records = format!("{}{}", record_xml("192.0.2.1", 1, ""), record_xml("192.0.2.300", 1, ""));
		let err = storage.store(&dmarc("1", &records)).unwrap_err();
		assert!(matches!(err, Error::Mapping(MappingError::InvalidIp(_))));
		assert!(storage.store_mut().tables.reports.is_empty());
		assert!(storage.store_mut().tables.records.is_empty());
		assert!(!storage.store_mut().in_transaction());
	}

	#[test]
	fn replace_swaps_rows() {
		let options = StorageOptions { replace: true, ..StorageOptions::default() };
		let mut storage = Storage::new(MemoryStore::default(), options);
		storage.store(&dmarc("1", &record_xml("192.0.2.1", 2, ""))).unwrap();
		storage.store(&dmarc("1", &record_xml("192.0.2.1", 5, ""))).unwrap();

		let tables = &storage.store_mut().tables;
		assert_eq!(tables.reports.len(), 1);
		assert_eq!(tables.records.len(), 1);
		assert_eq!(tables.records[0].count, 5);
		assert_eq!(tables.records[0].serial, tables.reports[0].serial);
	}

	#[test]
	fn failed_replace_keeps_old_report() {
		let options = StorageOptions { replace: true, ..StorageOptions::default() };
		let mut storage = Storage::new(MemoryStore::default(), options);
		storage.store(&dmarc("1", &record_xml("192.0.2.1", 2, ""))).unwrap();
		assert!(storage.store(&dmarc("1", &record_xml("", 5, ""))).is_err());

		let tables = &storage.store_mut().tables;
		assert_eq!(tables.reports.len(), 1);
		assert_eq!(tables.records[0].count, 2);
	}

	#[test]
	fn failed_cleanup_does_not_abort_replace() {
		let options = StorageOptions { replace: true, ..StorageOptions::default() };
		let mut storage = Storage::new(MemoryStore::default(), options);
		storage.store(&dmarc("1", &record_xml("192.0.2.1", 2, ""))).unwrap();

		storage.store_mut().failing_deletes = 1;
		assert_eq!(storage.store(&dmarc("1", &record_xml("192.0.2.1", 5, ""))).unwrap(), StoreOutcome::Stored);

		let store = storage.store_mut();
		assert!(!store.in_transaction());
		assert_eq!(store.tables.reports.len(), 1);
		assert_eq!(store.tables.reports[0].serial, 2);
		// the old rows stay behind when their delete fails
		assert_eq!(store.tables.records.len(), 2);
		assert_eq!(store.tables.records[1].count, 5);
		assert_eq!(store.tables.records[1].serial, 2);
	}

	#[test]
	fn oversized_raw_is_blanked() {
		let options = StorageOptions { max_size_xml: 10, ..StorageOptions::default() };
		let mut storage = Storage::new(MemoryStore::default(), options);
		storage.store(&dmarc("1", &record_xml("192.0.2.1", 2, ""))).unwrap();
		assert_eq!(storage.store_mut().tables.reports[0].raw, "");
	}
}
