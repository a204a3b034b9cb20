use std::convert::TryFrom;
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use log::info;

use super::backend::{self, Backend};
use super::{schema, IpColumn, ReportStore, SqlConn, SqlValue};
use crate::config::{DatabaseBackend, DatabaseConfig};
use crate::dmarc::types::{DmarcRecord, DmarcReport};
use crate::error::Error;
use crate::oauth::AccessTokenProvider;
use crate::tlsrpt::types::{TlsFailureRecord, TlsReport};
use crate::types::ReportKind;

/// An INSERT statement under construction.
pub struct Insert<'b> {
	backend: &'b dyn Backend,
	table: &'static str,
	columns: Vec<&'static str>,
	values: Vec<String>,
	params: Vec<SqlValue>,
}

impl<'b> Insert<'b> {
	pub fn new(backend: &'b dyn Backend, table: &'static str) -> Insert<'b> {
		Insert {
			backend,
			table,
			columns: Vec::new(),
			values: Vec::new(),
			params: Vec::new(),
		}
	}

	fn bind(&mut self, value: SqlValue) -> String {
		self.params.push(value);
		self.backend.placeholder(self.params.len(), &self.params[self.params.len() - 1])
	}

	pub fn value(mut self, column: &'static str, value: impl Into<SqlValue>) -> Self {
		let placeholder = self.bind(value.into());
		self.columns.push(column);
		self.values.push(placeholder);
		self
	}

	pub fn epoch(mut self, column: &'static str, seconds: impl Into<SqlValue>) -> Self {
		let placeholder = self.bind(seconds.into());
		self.columns.push(column);
		self.values.push(self.backend.epoch_to_timestamp(&placeholder));
		self
	}

	pub fn timestamp(mut self, column: &'static str, text: &str) -> Self {
		let placeholder = self.bind(SqlValue::from(text));
		self.columns.push(column);
		self.values.push(self.backend.text_to_timestamp(&placeholder));
		self
	}

	/// IPv4 goes into `v4_column` as an integer, IPv6 into `v6_column` as a literal.
	pub fn ip(mut self, v4_column: &'static str, v6_column: &'static str, ip: Option<IpAddr>) -> Self {
		match ip.map(IpColumn::from) {
			Some(IpColumn::V4(value)) => self.value(v4_column, value),
			Some(IpColumn::V6(bytes)) => {
				self.columns.push(v6_column);
				self.values.push(self.backend.hex_literal(&bytes));
				self
			},
			None => self,
		}
	}

	pub fn build(&self) -> (String, Vec<SqlValue>) {
		let columns: Vec<String> = self.columns.iter().map(|c| self.backend.quote_ident(c)).collect();
		let sql = format!(
			"INSERT INTO {} ({}) VALUES ({})",
			self.backend.quote_ident(self.table),
			columns.join(", "),
			self.values.join(", ")
		);
		(sql, self.params.clone())
	}

	/// Like `build`, asking the server for the generated `key`.
	pub fn build_returning(&self, key: &str) -> (String, Vec<SqlValue>) {
		let (sql, params) = self.build();
		(format!("{}{}", sql, self.backend.returning(key)), params)
	}
}

/// A `ReportStore` backed by a MySQL or Postgres connection.
pub struct SqlStore {
	conn: Box<dyn SqlConn>,
	backend: Box<dyn Backend>,
}

impl SqlStore {
	pub fn new(conn: Box<dyn SqlConn>, backend: Box<dyn Backend>) -> SqlStore {
		SqlStore { conn, backend }
	}

	pub fn connect(config: &DatabaseConfig) -> Result<SqlStore, Error> {
		let conn: Box<dyn SqlConn> = match config.backend {
			DatabaseBackend::Mysql => {
				let opts = mysql::OptsBuilder::new()
					.ip_or_hostname(Some(config.host.clone()))
					.tcp_port(config.port())
					.user(Some(config.username.clone()))
					.pass(Some(config.password.clone()))
					.db_name(Some(config.database.clone()));
				Box::new(mysql::Conn::new(opts)?)
			},
			DatabaseBackend::Postgres => {
				let client = postgres::Config::new()
					.host(&config.host)
					.port(config.port())
					.user(&config.username)
					.password(&config.password)
					.dbname(&config.database)
					.connect(postgres::NoTls)?;
				Box::new(client)
			},
		};
		info!(
			"connected to {} database {} on {}:{}",
			config.backend.name(),
			config.database,
			config.host,
			config.port()
		);
		Ok(SqlStore::new(conn, backend::for_config(config.backend)))
	}

	pub fn ensure_schema(&mut self) -> Result<usize, Error> {
		schema::ensure_schema(self.conn.as_mut(), self.backend.as_ref())
	}

	fn delete(&mut self, table: &str, serial: u64) -> Result<(), Error> {
		let params = [SqlValue::try_from(serial)?];
		let sql = format!(
			"DELETE FROM {} WHERE {} = {}",
			self.backend.quote_ident(table),
			self.backend.quote_ident("serial"),
			self.backend.placeholder(1, &params[0])
		);
		let deleted = self.conn.execute(&sql, &params)?;
		info!("deleted {} rows from {} for serial {}", deleted, table, serial);
		Ok(())
	}
}

impl ReportStore for SqlStore {
	fn begin(&mut self) -> Result<(), Error> {
		let begin = self.backend.begin_statement();
		self.conn.execute(begin, &[])?;
		Ok(())
	}

	fn commit(&mut self) -> Result<(), Error> {
		self.conn.execute("COMMIT", &[])?;
		Ok(())
	}

	fn rollback(&mut self) -> Result<(), Error> {
		self.conn.execute("ROLLBACK", &[])?;
		Ok(())
	}

	fn savepoint(&mut self, name: &str) -> Result<(), Error> {
		let sql = self.backend.savepoint(name);
		self.conn.execute(&sql, &[])?;
		Ok(())
	}

	fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), Error> {
		let sql = self.backend.rollback_to_savepoint(name);
		self.conn.execute(&sql, &[])?;
		Ok(())
	}

	fn release_savepoint(&mut self, name: &str) -> Result<(), Error> {
		let sql = self.backend.release_savepoint(name);
		self.conn.execute(&sql, &[])?;
		Ok(())
	}

	fn find_report(&mut self, kind: ReportKind, report_id: &str, domain: &str) -> Result<Option<u64>, Error> {
		let params = [SqlValue::from(report_id), SqlValue::from(domain)];
		let b = self.backend.as_ref();
		let sql = format!(
			"SELECT {} FROM {} WHERE {} = {} AND {} = {}",
			b.quote_ident("serial"),
			b.quote_ident(kind.report_table()),
			b.quote_ident("reportid"),
			b.placeholder(1, &params[0]),
			b.quote_ident("domain"),
			b.placeholder(2, &params[1])
		);
		self.conn.query_id(&sql, &params)
	}

	fn delete_records(&mut self, kind: ReportKind, serial: u64) -> Result<(), Error> {
		self.delete(kind.record_table(), serial)
	}

	fn delete_report(&mut self, kind: ReportKind, serial: u64) -> Result<(), Error> {
		self.delete(kind.report_table(), serial)
	}

	fn insert_dmarc_report(&mut self, report: &DmarcReport, raw_xml: &str) -> Result<u64, Error> {
		let policy = &report.policy;
		let insert = Insert::new(self.backend.as_ref(), "report")
			.epoch("mindate", SqlValue::try_from(report.begin)?)
			.epoch("maxdate", SqlValue::try_from(report.end)?)
			.value("domain", policy.domain.as_str())
			.value("org", report.org.as_str())
			.value("reportid", report.report_id.as_str())
			.value("email", report.email.as_deref())
			.value("extra_contact_info", report.extra_contact_info.as_deref())
			.value("policy_adkim", policy.adkim.as_deref())
			.value("policy_aspf", policy.aspf.as_deref())
			.value("policy_p", policy.p.as_deref())
			.value("policy_sp", policy.sp.as_deref())
			.value("policy_pct", policy.pct)
			.value("raw_xml", raw_xml);
		let (sql, params) = insert.build_returning("serial");
		self.conn.insert(&sql, &params)
	}

	fn insert_dmarc_record(&mut self, serial: u64, record: &DmarcRecord) -> Result<(), Error> {
		let insert = Insert::new(self.backend.as_ref(), "rptrecord")
			.value("serial", SqlValue::try_from(serial)?)
			.ip("ip", "ip6", Some(record.source_ip))
			.value("rcount", record.count)
			.value("disposition", record.disposition.as_str())
			.value("reason", record.reason.as_deref())
			.value("dkimdomain", record.dkim.domain.as_deref())
			.value("dkimresult", record.dkim.result.as_str())
			.value("spfdomain", record.spf.domain.as_deref())
			.value("spfresult", record.spf.result.as_str())
			.value("spf_align", record.spf_align.as_str())
			.value("dkim_align", record.dkim_align.as_str())
			.value("identifier_hfrom", record.header_from.as_deref());
		let (sql, params) = insert.build();
		self.conn.execute(&sql, &params)?;
		Ok(())
	}

	fn insert_tls_report(&mut self, report: &TlsReport, raw_json: &str) -> Result<u64, Error> {
		let insert = Insert::new(self.backend.as_ref(), "tls")
			.timestamp("mindate", &report.begin)
			.timestamp("maxdate", &report.end)
			.value("domain", report.policy_domain.as_str())
			.value("org", report.org.as_str())
			.value("reportid", report.report_id.as_str())
			.value("email", report.email.as_deref())
			.value("policy_mode", report.policy_mode.as_str())
			.value("summary_success", SqlValue::try_from(report.success)?)
			.value("summary_failure", SqlValue::try_from(report.failure)?)
			.value("raw_json", raw_json);
		let (sql, params) = insert.build_returning("serial");
		self.conn.insert(&sql, &params)
	}

	fn insert_tls_record(&mut self, serial: u64, record: &TlsFailureRecord) -> Result<(), Error> {
		let insert = Insert::new(self.backend.as_ref(), "tlsrecord")
			.value("serial", SqlValue::try_from(serial)?)
			.ip("send_ip", "send_ip6", record.send_ip)
			.ip("recv_ip", "recv_ip6", record.recv_ip)
			.value("recv_mx", record.recv_mx.as_deref())
			.value("type", record.result_type.as_str())
			.value("count", SqlValue::try_from(record.count)?);
		let (sql, params) = insert.build();
		self.conn.execute(&sql, &params)?;
		Ok(())
	}
}

impl AccessTokenProvider for SqlStore {
	fn access_token(&mut self, account: &str) -> Result<String, Error> {
		let now = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map(|elapsed| elapsed.as_secs())
			.unwrap_or(0);
		let params = [SqlValue::from(account), SqlValue::try_from(now)?];
		let b = self.backend.as_ref();
		let sql = format!(
			"SELECT {} FROM {} WHERE {} = {} AND {} = 1 AND {} > {}",
			b.quote_ident("access_token"),
			b.quote_ident("oauth"),
			b.quote_ident("account"),
			b.placeholder(1, &params[0]),
			b.quote_ident("valid"),
			b.quote_ident("expires"),
			b.placeholder(2, &params[1])
		);
		self.conn
			.query_text(&sql, &params)?
			.filter(|token| !token.is_empty())
			.ok_or_else(|| Error::Transport(format!("no valid cached access token for {}", account)))
	}
}
