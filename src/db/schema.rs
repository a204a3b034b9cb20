//! Declared tables, and the statements that bring a database in line with them.

use std::collections::HashMap;

use lazy_static::lazy_static;
use log::info;
use regex::Regex;

use super::backend::Backend;
use super::{SqlConn, SqlValue};
use crate::dmarc::types::{Alignment, DkimResult, Disposition, SpfResult};
use crate::error::Error;

lazy_static! {
	static ref DISPLAY_WIDTH: Regex = Regex::new(r"\b(tinyint|smallint|mediumint|int|bigint)\(\d+\)").unwrap();
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
	/// auto-numbered primary key
	Serial,
	UnsignedInt,
	TinyUnsigned,
	BigInt,
	VarChar(u16),
	Text,
	LongText,
	Timestamp,
	Binary16,
	Enum(&'static [&'static str]),
}

#[derive(Debug)]
pub struct Column {
	pub name: &'static str,
	pub ty: ColumnType,
	pub nullable: bool,
}

const fn null(name: &'static str, ty: ColumnType) -> Column {
	Column { name, ty, nullable: true }
}

const fn not_null(name: &'static str, ty: ColumnType) -> Column {
	Column { name, ty, nullable: false }
}

#[derive(Debug)]
pub struct Table {
	pub name: &'static str,
	pub columns: &'static [Column],
	pub primary_key: &'static [&'static str],
	pub unique: &'static [&'static [&'static str]],
	pub indexes: &'static [&'static [&'static str]],
}

pub static TABLES: &[Table] = &[
	Table {
		name: "report",
		columns: &[
			not_null("serial", ColumnType::Serial),
			not_null("mindate", ColumnType::Timestamp),
			not_null("maxdate", ColumnType::Timestamp),
			not_null("domain", ColumnType::VarChar(255)),
			not_null("org", ColumnType::VarChar(255)),
			not_null("reportid", ColumnType::VarChar(255)),
			null("email", ColumnType::VarChar(255)),
			null("extra_contact_info", ColumnType::VarChar(255)),
			null("policy_adkim", ColumnType::VarChar(20)),
			null("policy_aspf", ColumnType::VarChar(20)),
			null("policy_p", ColumnType::VarChar(20)),
			null("policy_sp", ColumnType::VarChar(20)),
			null("policy_pct", ColumnType::TinyUnsigned),
			null("raw_xml", ColumnType::LongText),
		],
		primary_key: &["serial"],
		unique: &[&["domain", "reportid"]],
		indexes: &[],
	},
	Table {
		name: "rptrecord",
		columns: &[
			not_null("id", ColumnType::Serial),
			not_null("serial", ColumnType::UnsignedInt),
			null("ip", ColumnType::UnsignedInt),
			null("ip6", ColumnType::Binary16),
			not_null("rcount", ColumnType::UnsignedInt),
			null("disposition", ColumnType::Enum(Disposition::VALUES)),
			null("reason", ColumnType::VarChar(255)),
			null("dkimdomain", ColumnType::VarChar(255)),
			null("dkimresult", ColumnType::Enum(DkimResult::VALUES)),
			null("spfdomain", ColumnType::VarChar(255)),
			null("spfresult", ColumnType::Enum(SpfResult::VALUES)),
			not_null("spf_align", ColumnType::Enum(Alignment::VALUES)),
			not_null("dkim_align", ColumnType::Enum(Alignment::VALUES)),
			null("identifier_hfrom", ColumnType::VarChar(255)),
		],
		primary_key: &["id"],
		unique: &[],
		indexes: &[&["serial", "ip"], &["serial", "ip6"]],
	},
	Table {
		name: "tls",
		columns: &[
			not_null("serial", ColumnType::Serial),
			not_null("mindate", ColumnType::Timestamp),
			not_null("maxdate", ColumnType::Timestamp),
			not_null("domain", ColumnType::VarChar(255)),
			not_null("org", ColumnType::VarChar(255)),
			not_null("reportid", ColumnType::VarChar(255)),
			null("email", ColumnType::VarChar(255)),
			null("policy_mode", ColumnType::VarChar(20)),
			not_null("summary_success", ColumnType::UnsignedInt),
			not_null("summary_failure", ColumnType::UnsignedInt),
			null("raw_json", ColumnType::LongText),
		],
		primary_key: &["serial"],
		unique: &[&["domain", "reportid"]],
		indexes: &[],
	},
	Table {
		name: "tlsrecord",
		columns: &[
			not_null("id", ColumnType::Serial),
			not_null("serial", ColumnType::UnsignedInt),
			null("send_ip", ColumnType::UnsignedInt),
			null("send_ip6", ColumnType::Binary16),
			null("recv_ip", ColumnType::UnsignedInt),
			null("recv_ip6", ColumnType::Binary16),
			null("recv_mx", ColumnType::VarChar(255)),
			null("type", ColumnType::VarChar(255)),
			not_null("count", ColumnType::UnsignedInt),
		],
		primary_key: &["id"],
		unique: &[],
		indexes: &[&["serial"]],
	},
	Table {
		name: "oauth",
		columns: &[
			not_null("account", ColumnType::VarChar(255)),
			null("access_token", ColumnType::Text),
			not_null("expires", ColumnType::BigInt),
			not_null("valid", ColumnType::TinyUnsigned),
		],
		primary_key: &["account"],
		unique: &[],
		indexes: &[],
	},
];

pub fn column_definition(backend: &dyn Backend, column: &Column) -> String {
	let mut definition = format!(
		"{} {} {}",
		backend.quote_ident(column.name),
		backend.column_type(column.ty),
		if column.nullable { "NULL" } else { "NOT NULL" }
	);
	if column.ty == ColumnType::Serial {
		definition.push(' ');
		definition.push_str(backend.serial_clause());
	}
	definition
}

fn column_list(backend: &dyn Backend, columns: &[&str]) -> String {
	columns
		.iter()
		.map(|column| backend.quote_ident(column))
		.collect::<Vec<_>>()
		.join(", ")
}

pub fn create_table_statements(backend: &dyn Backend, table: &Table) -> Vec<String> {
	let mut definitions: Vec<String> = table
		.columns
		.iter()
		.map(|column| column_definition(backend, column))
		.collect();
	definitions.push(format!("PRIMARY KEY ({})", column_list(backend, table.primary_key)));
	for unique in table.unique {
		definitions.push(format!("UNIQUE ({})", column_list(backend, unique)));
	}

	let mut statements = vec![format!(
		"CREATE TABLE {} ({}) {}",
		backend.quote_ident(table.name),
		definitions.join(", "),
		backend.table_options()
	)
	.trim_end()
	.to_string()];

	for index in table.indexes {
		statements.push(format!(
			"CREATE INDEX {} ON {} ({})",
			backend.quote_ident(&format!("{}_{}_idx", table.name, index.join("_"))),
			backend.quote_ident(table.name),
			column_list(backend, index)
		));
	}

	statements
}

fn normalize_type(ty: &str) -> String {
	let ty = ty.trim().to_ascii_lowercase();
	DISPLAY_WIDTH.replace_all(&ty, "$1").into_owned()
}

/// Whether a server-reported column type satisfies the declared one.
pub fn type_matches(declared: &str, reported: &str) -> bool {
	normalize_type(declared).starts_with(&normalize_type(reported))
}

pub fn alter_table_statements(backend: &dyn Backend, table: &Table, existing: &[(String, String)]) -> Vec<String> {
	let existing: HashMap<String, &str> = existing
		.iter()
		.map(|(name, ty)| (name.to_ascii_lowercase(), ty.as_str()))
		.collect();

	let mut statements = Vec::new();
	let mut previous: Option<&str> = None;
	for column in table.columns {
		let declared = backend.column_type(column.ty);
		match existing.get(column.name) {
			None => statements.push(backend.add_column_statement(
				table.name,
				&column_definition(backend, column),
				previous,
			)),
			Some(reported) if !type_matches(&declared, reported) => {
				statements.push(backend.modify_column_statement(
					table.name,
					column.name,
					&declared,
					&column_definition(backend, column),
				))
			},
			Some(_) => (),
		}
		previous = Some(column.name);
	}
	statements
}

/// Statements needed for one table given the columns the server reports for it.
pub fn plan_table(backend: &dyn Backend, table: &Table, existing: &[(String, String)]) -> Vec<String> {
	if existing.is_empty() {
		create_table_statements(backend, table)
	} else {
		alter_table_statements(backend, table, existing)
	}
}

/// Creates missing tables and columns and fixes column types. Returns the number of
/// statements issued, which is zero when the schema is already current.
pub fn ensure_schema(conn: &mut dyn SqlConn, backend: &dyn Backend) -> Result<usize, Error> {
	let mut issued = 0;
	for table in TABLES {
		let existing = conn.query_pairs(&backend.columns_query(), &[SqlValue::from(table.name)])?;
		for statement in plan_table(backend, table, &existing) {
			info!("schema: {}", statement);
			conn.execute(&statement, &[])?;
			issued += 1;
		}
	}
	Ok(issued)
}
