use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::db::StorageOptions;
use crate::error::Error;
use crate::pipeline::PipelineOptions;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Config {
	pub database: DatabaseConfig,

	#[serde(default)]
	pub options: Options,

	pub dmarc: ImapConfig,

	pub tlsrpt: ImapConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
	Mysql,
	Postgres,
}

impl DatabaseBackend {
	pub fn name(self) -> &'static str {
		match self {
			DatabaseBackend::Mysql => "mysql",
			DatabaseBackend::Postgres => "postgres",
		}
	}

	pub fn default_port(self) -> u16 {
		match self {
			DatabaseBackend::Mysql => 3306,
			DatabaseBackend::Postgres => 5432,
		}
	}
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DatabaseConfig {
	pub backend: DatabaseBackend,
	pub host: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub port: Option<u16>,
	pub username: String,
	pub password: String,
	pub database: String,
}

impl DatabaseConfig {
	pub fn port(&self) -> u16 {
		self.port.unwrap_or_else(|| self.backend.default_port())
	}
}

impl Default for DatabaseConfig {
	fn default() -> Self {
		DatabaseConfig {
			backend: DatabaseBackend::Mysql,
			host: "localhost".to_string(),
			port: None,
			username: "username".to_string(),
			password: "password123".to_string(),
			database: "dmarc".to_string(),
		}
	}
}

fn default_max_size() -> usize {
	50000
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Options {
	#[serde(default)]
	pub replace: bool,
	#[serde(default)]
	pub delete_reports: bool,
	#[serde(default)]
	pub delete_failed: bool,
	#[serde(default)]
	pub raw_xml_compress: bool,
	#[serde(default)]
	pub raw_json_compress: bool,
	#[serde(default = "default_max_size")]
	pub max_size_xml: usize,
	#[serde(default = "default_max_size")]
	pub max_size_json: usize,
}

impl Default for Options {
	fn default() -> Self {
		Options {
			replace: false,
			delete_reports: false,
			delete_failed: false,
			raw_xml_compress: false,
			raw_json_compress: false,
			max_size_xml: default_max_size(),
			max_size_json: default_max_size(),
		}
	}
}

impl Options {
	pub fn storage(&self) -> StorageOptions {
		StorageOptions {
			replace: self.replace,
			compress_xml: self.raw_xml_compress,
			compress_json: self.raw_json_compress,
			max_size_xml: self.max_size_xml,
			max_size_json: self.max_size_json,
		}
	}

	pub fn pipeline(&self) -> PipelineOptions {
		PipelineOptions {
			delete_reports: self.delete_reports,
			delete_failed: self.delete_failed,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
	Login,
	Xoauth2,
}

impl Default for AuthMethod {
	fn default() -> Self {
		AuthMethod::Login
	}
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ImapConfig {
	pub enabled: bool,
	pub host: String,
	pub port: u16,
	pub tls: bool,
	pub username: String,
	pub password: String,
	pub folder: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub processed_folder: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error_folder: Option<String>,
	#[serde(default)]
	pub auth: AuthMethod,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub access_token: Option<String>,
}

impl ImapConfig {
	fn example(username: &str) -> ImapConfig {
		ImapConfig {
			enabled: false,
			host: "localhost".to_string(),
			port: 993,
			tls: true,
			username: username.to_string(),
			password: "password123".to_string(),
			folder: "INBOX".to_string(),
			processed_folder: None,
			error_folder: None,
			auth: AuthMethod::Login,
			access_token: None,
		}
	}
}

impl Default for ImapConfig {
	fn default() -> Self {
		ImapConfig::example("reports@dmarc.some-cool-address.invalid")
	}
}

impl Config {
	pub fn example() -> Config {
		Config {
			database: DatabaseConfig::default(),
			options: Options::default(),
			dmarc: ImapConfig::example("reports@dmarc.some-cool-address.invalid"),
			tlsrpt: ImapConfig::example("reports@tlsrpt.some-cool-address.invalid"),
		}
	}

	pub fn parse(text: &str) -> Result<Config, Error> {
		toml::from_str(text).map_err(|e| Error::Parse(format!("config: {}", e)))
	}

	/// Reads the config file, first writing the example one if there is none.
	pub fn load(path: &Path) -> Result<Config, Error> {
		if !path.exists() {
			info!("could not find {}, creating default", path.display());
			let text = toml::to_string(&Config::example()).map_err(|e| Error::Parse(format!("config: {}", e)))?;
			fs::write(path, text)?;
		}

		Config::parse(&fs::read_to_string(path)?)
	}
}
