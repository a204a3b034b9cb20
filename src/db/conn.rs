//! `SqlConn` for the mysql and postgres client crates.

use log::debug;
use mysql::prelude::*;
use postgres::types::ToSql;

use super::{SqlConn, SqlValue};
use crate::error::Error;

fn mysql_params(params: &[SqlValue]) -> mysql::Params {
	if params.is_empty() {
		return mysql::Params::Empty;
	}
	mysql::Params::Positional(
		params
			.iter()
			.map(|param| match param {
				SqlValue::Int(Some(value)) => mysql::Value::Int(*value),
				SqlValue::Text(Some(value)) => mysql::Value::Bytes(value.as_bytes().to_vec()),
				SqlValue::Int(None) | SqlValue::Text(None) => mysql::Value::NULL,
			})
			.collect(),
	)
}

impl SqlConn for mysql::Conn {
	fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, Error> {
		debug!("mysql: {}", sql);
		if params.is_empty() {
			self.query_drop(sql)?;
		} else {
			self.exec_drop(sql, mysql_params(params))?;
		}
		Ok(self.affected_rows())
	}

	fn insert(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, Error> {
		debug!("mysql: {}", sql);
		self.exec_drop(sql, mysql_params(params))?;
		Ok(self.last_insert_id())
	}

	fn query_id(&mut self, sql: &str, params: &[SqlValue]) -> Result<Option<u64>, Error> {
		debug!("mysql: {}", sql);
		Ok(self.exec_first::<u64, _, _>(sql, mysql_params(params))?)
	}

	fn query_text(&mut self, sql: &str, params: &[SqlValue]) -> Result<Option<String>, Error> {
		debug!("mysql: {}", sql);
		let value = self.exec_first::<Option<String>, _, _>(sql, mysql_params(params))?;
		Ok(value.flatten())
	}

	fn query_pairs(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<(String, String)>, Error> {
		debug!("mysql: {}", sql);
		Ok(self.exec::<(String, String), _, _>(sql, mysql_params(params))?)
	}
}

fn postgres_params(params: &[SqlValue]) -> Vec<Box<dyn ToSql + Sync>> {
	params
		.iter()
		.map(|param| -> Box<dyn ToSql + Sync> {
			match param {
				SqlValue::Int(value) => Box::new(*value),
				SqlValue::Text(value) => Box::new(value.clone()),
			}
		})
		.collect()
}

fn postgres_refs(params: &[Box<dyn ToSql + Sync>]) -> Vec<&(dyn ToSql + Sync)> {
	params.iter().map(|param| param.as_ref()).collect()
}

fn unsigned(value: i64) -> Result<u64, Error> {
	if value < 0 {
		return Err(Error::Database(format!("unexpected negative key {}", value)));
	}
	Ok(value as u64)
}

impl SqlConn for postgres::Client {
	fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, Error> {
		debug!("postgres: {}", sql);
		if params.is_empty() {
			self.batch_execute(sql)?;
			return Ok(0);
		}
		let params = postgres_params(params);
		Ok(postgres::Client::execute(self, sql, &postgres_refs(&params))?)
	}

	fn insert(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, Error> {
		debug!("postgres: {}", sql);
		let params = postgres_params(params);
		let row = self.query_one(sql, &postgres_refs(&params))?;
		unsigned(row.try_get::<_, i64>(0)?)
	}

	fn query_id(&mut self, sql: &str, params: &[SqlValue]) -> Result<Option<u64>, Error> {
		debug!("postgres: {}", sql);
		let params = postgres_params(params);
		match self.query_opt(sql, &postgres_refs(&params))? {
			Some(row) => Ok(Some(unsigned(row.try_get::<_, i64>(0)?)?)),
			None => Ok(None),
		}
	}

	fn query_text(&mut self, sql: &str, params: &[SqlValue]) -> Result<Option<String>, Error> {
		debug!("postgres: {}", sql);
		let params = postgres_params(params);
		match self.query_opt(sql, &postgres_refs(&params))? {
			Some(row) => Ok(row.try_get::<_, Option<String>>(0)?),
			None => Ok(None),
		}
	}

	fn query_pairs(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<(String, String)>, Error> {
		debug!("postgres: {}", sql);
		let params = postgres_params(params);
		self.query(sql, &postgres_refs(&params))?
			.iter()
			.map(|row| Ok((row.try_get::<_, String>(0)?, row.try_get::<_, String>(1)?)))
			.collect()
	}
}
