use crate::config::DatabaseBackend;

use super::schema::ColumnType;
use super::SqlValue;

/// The SQL spelling that differs between database servers.
pub trait Backend {
	fn name(&self) -> &'static str;

	/// Placeholder for the `index`th (1-based) bound parameter.
	fn placeholder(&self, index: usize, value: &SqlValue) -> String;

	fn quote_ident(&self, name: &str) -> String;

	fn column_type(&self, ty: ColumnType) -> String;

	/// Appended to the definition of an auto-numbered column.
	fn serial_clause(&self) -> &'static str;

	fn table_options(&self) -> &'static str;

	fn epoch_to_timestamp(&self, expr: &str) -> String;

	fn text_to_timestamp(&self, expr: &str) -> String;

	fn hex_literal(&self, bytes: &[u8]) -> String;

	/// Name of the information schema column holding a column's type.
	fn column_type_column_name(&self) -> &'static str;

	/// Lists `(name, type)` of a table's columns; binds the table name as the only parameter.
	fn columns_query(&self) -> String;

	fn add_column_statement(&self, table: &str, definition: &str, after: Option<&str>) -> String;

	fn modify_column_statement(&self, table: &str, column: &str, ty: &str, definition: &str) -> String;

	/// Suffix making an INSERT hand back the generated key, when the server needs one.
	fn returning(&self, column: &str) -> String;

	fn begin_statement(&self) -> &'static str;

	fn savepoint(&self, name: &str) -> String {
		format!("SAVEPOINT {}", self.quote_ident(name))
	}

	fn rollback_to_savepoint(&self, name: &str) -> String {
		format!("ROLLBACK TO SAVEPOINT {}", self.quote_ident(name))
	}

	fn release_savepoint(&self, name: &str) -> String {
		format!("RELEASE SAVEPOINT {}", self.quote_ident(name))
	}
}

pub fn for_config(backend: DatabaseBackend) -> Box<dyn Backend> {
	match backend {
		DatabaseBackend::Mysql => Box::new(MySql),
		DatabaseBackend::Postgres => Box::new(Postgres),
	}
}

pub struct MySql;

impl Backend for MySql {
	fn name(&self) -> &'static str {
		"mysql"
	}

	fn placeholder(&self, _index: usize, _value: &SqlValue) -> String {
		"?".to_string()
	}

	fn quote_ident(&self, name: &str) -> String {
		format!("`{}`", name)
	}

	fn column_type(&self, ty: ColumnType) -> String {
		match ty {
			ColumnType::Serial | ColumnType::UnsignedInt => "int unsigned".to_string(),
			ColumnType::TinyUnsigned => "tinyint unsigned".to_string(),
			ColumnType::BigInt => "bigint".to_string(),
			ColumnType::VarChar(len) => format!("varchar({})", len),
			ColumnType::Text => "text".to_string(),
			ColumnType::LongText => "mediumtext".to_string(),
			ColumnType::Timestamp => "datetime".to_string(),
			ColumnType::Binary16 => "binary(16)".to_string(),
			ColumnType::Enum(values) => {
				let values: Vec<String> = values.iter().map(|v| format!("'{}'", v)).collect();
				format!("enum({})", values.join(","))
			},
		}
	}

	fn serial_clause(&self) -> &'static str {
		"AUTO_INCREMENT"
	}

	fn table_options(&self) -> &'static str {
		"ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"
	}

	fn epoch_to_timestamp(&self, expr: &str) -> String {
		format!("FROM_UNIXTIME({})", expr)
	}

	fn text_to_timestamp(&self, expr: &str) -> String {
		expr.to_string()
	}

	fn hex_literal(&self, bytes: &[u8]) -> String {
		format!("X'{}'", hex::encode(bytes))
	}

	fn column_type_column_name(&self) -> &'static str {
		"COLUMN_TYPE"
	}

	fn columns_query(&self) -> String {
		format!(
			"SELECT COLUMN_NAME, {} FROM information_schema.COLUMNS WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION",
			self.column_type_column_name()
		)
	}

	fn add_column_statement(&self, table: &str, definition: &str, after: Option<&str>) -> String {
		let position = match after {
			Some(column) => format!("AFTER {}", self.quote_ident(column)),
			None => "FIRST".to_string(),
		};
		format!("ALTER TABLE {} ADD COLUMN {} {}", self.quote_ident(table), definition, position)
	}

	fn modify_column_statement(&self, table: &str, _column: &str, _ty: &str, definition: &str) -> String {
		format!("ALTER TABLE {} MODIFY COLUMN {}", self.quote_ident(table), definition)
	}

	fn returning(&self, _column: &str) -> String {
		String::new()
	}

	fn begin_statement(&self) -> &'static str {
		"START TRANSACTION"
	}
}

pub struct Postgres;

impl Backend for Postgres {
	fn name(&self) -> &'static str {
		"postgres"
	}

	// explicit casts keep the parameter types independent of the column types
	fn placeholder(&self, index: usize, value: &SqlValue) -> String {
		match value {
			SqlValue::Int(_) => format!("${}::bigint", index),
			SqlValue::Text(_) => format!("${}::text", index),
		}
	}

	fn quote_ident(&self, name: &str) -> String {
		format!("\"{}\"", name)
	}

	fn column_type(&self, ty: ColumnType) -> String {
		match ty {
			ColumnType::Serial | ColumnType::UnsignedInt | ColumnType::BigInt => "bigint".to_string(),
			ColumnType::TinyUnsigned => "smallint".to_string(),
			ColumnType::VarChar(len) => format!("character varying({})", len),
			ColumnType::Text | ColumnType::LongText => "text".to_string(),
			ColumnType::Timestamp => "timestamp without time zone".to_string(),
			ColumnType::Binary16 => "bytea".to_string(),
			ColumnType::Enum(_) => "character varying(16)".to_string(),
		}
	}

	fn serial_clause(&self) -> &'static str {
		"GENERATED BY DEFAULT AS IDENTITY"
	}

	fn table_options(&self) -> &'static str {
		""
	}

	fn epoch_to_timestamp(&self, expr: &str) -> String {
		format!("TO_TIMESTAMP({}) AT TIME ZONE 'UTC'", expr)
	}

	fn text_to_timestamp(&self, expr: &str) -> String {
		format!("CAST({} AS timestamp)", expr)
	}

	fn hex_literal(&self, bytes: &[u8]) -> String {
		format!("'\\x{}'::bytea", hex::encode(bytes))
	}

	fn column_type_column_name(&self) -> &'static str {
		"data_type"
	}

	fn columns_query(&self) -> String {
		format!(
			"SELECT column_name::text, {}::text FROM information_schema.columns WHERE table_schema = current_schema() AND table_name = $1::text ORDER BY ordinal_position",
			self.column_type_column_name()
		)
	}

	fn add_column_statement(&self, table: &str, definition: &str, _after: Option<&str>) -> String {
		format!("ALTER TABLE {} ADD COLUMN {}", self.quote_ident(table), definition)
	}

	fn modify_column_statement(&self, table: &str, column: &str, ty: &str, _definition: &str) -> String {
		format!(
			"ALTER TABLE {} ALTER COLUMN {} TYPE {}",
			self.quote_ident(table),
			self.quote_ident(column),
			ty
		)
	}

	fn returning(&self, column: &str) -> String {
		format!(" RETURNING {}", self.quote_ident(column))
	}

	fn begin_statement(&self) -> &'static str {
		"BEGIN"
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn placeholders() {
		assert_eq!(MySql.placeholder(3, &SqlValue::Int(Some(1))), "?");
		assert_eq!(Postgres.placeholder(1, &SqlValue::Int(None)), "$1::bigint");
		assert_eq!(Postgres.placeholder(2, &SqlValue::Text(None)), "$2::text");
	}

	#[test]
	fn hex_literals() {
		let bytes = [0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
		assert_eq!(MySql.hex_literal(&bytes), "X'20010db8000000000000000000000001'");
		assert_eq!(Postgres.hex_literal(&bytes), "'\\x20010db8000000000000000000000001'::bytea");
	}

	#[test]
	fn timestamps() {
		assert_eq!(MySql.epoch_to_timestamp("?"), "FROM_UNIXTIME(?)");
		assert_eq!(Postgres.epoch_to_timestamp("$1::bigint"), "TO_TIMESTAMP($1::bigint) AT TIME ZONE 'UTC'");
		assert_eq!(Postgres.text_to_timestamp("$2::text"), "CAST($2::text AS timestamp)");
	}

	#[test]
	fn column_statements() {
		assert_eq!(
			MySql.add_column_statement("report", "`email` varchar(255) NULL", Some("reportid")),
			"ALTER TABLE `report` ADD COLUMN `email` varchar(255) NULL AFTER `reportid`"
		);
		assert_eq!(
			MySql.add_column_statement("report", "`serial` int unsigned NOT NULL AUTO_INCREMENT", None),
			"ALTER TABLE `report` ADD COLUMN `serial` int unsigned NOT NULL AUTO_INCREMENT FIRST"
		);
		assert_eq!(
			Postgres.modify_column_statement("tls", "policy_mode", "character varying(20)", "ignored"),
			"ALTER TABLE \"tls\" ALTER COLUMN \"policy_mode\" TYPE character varying(20)"
		);
		assert_eq!(
			MySql.column_type(ColumnType::Enum(&["fail", "pass", "unknown"])),
			"enum('fail','pass','unknown')"
		);
	}
}
