use std::io::{Read, Write};
use std::net::TcpStream;

use imap_proto::types::Envelope;
use log::{debug, info, warn};
use native_tls::TlsConnector;

use super::Source;
use crate::config::{AuthMethod, ImapConfig};
use crate::db::ReportStore;
use crate::error::Error;
use crate::oauth::XOAuth2;
use crate::pipeline::{Action, Pipeline};

fn subject(envelope: Option<&Envelope>) -> String {
	envelope
		.and_then(|envelope| envelope.subject)
		.map(|subject| String::from_utf8_lossy(subject).into_owned())
		.unwrap_or_default()
}

/// One IMAP folder holding report messages.
pub struct ImapSource {
	name: &'static str,
	config: ImapConfig,
	access_token: Option<String>,
}

impl ImapSource {
	pub fn new(name: &'static str, config: ImapConfig, access_token: Option<String>) -> ImapSource {
		ImapSource {
			name,
			config,
			access_token,
		}
	}

	fn authenticate<T: Read + Write>(&self, client: imap::Client<T>) -> Result<imap::Session<T>, Error> {
		let session = match self.config.auth {
			AuthMethod::Login => client.login(&self.config.username, &self.config.password),
			AuthMethod::Xoauth2 => {
				let access_token = self
					.access_token
					.clone()
					.ok_or_else(|| Error::Transport(format!("{}: no access token for XOAUTH2", self.name)))?;
				let auth = XOAuth2 {
					user: self.config.username.clone(),
					access_token,
				};
				client.authenticate("XOAUTH2", &auth)
			},
		};
		session.map_err(|e| e.0.into())
	}

	fn ensure_folder<T: Read + Write>(&self, session: &mut imap::Session<T>, folder: &str) -> Result<(), Error> {
		if session.list(None, Some(folder))?.is_empty() {
			info!("{}: creating folder {}", self.name, folder);
			session.create(folder)?;
		}
		Ok(())
	}

	fn mark_deleted<T: Read + Write>(&self, session: &mut imap::Session<T>, uid: u32) -> Result<(), Error> {
		session.uid_store(uid.to_string(), "+FLAGS (\\Deleted)")?;
		Ok(())
	}

	/// Copies the message away, then marks the original. Returns whether it was moved.
	fn move_to<T: Read + Write>(
		&self,
		session: &mut imap::Session<T>,
		uid: u32,
		folder: Option<&str>,
		label: &str,
	) -> Result<bool, Error> {
		let folder = match folder {
			Some(folder) => folder,
			None => return Ok(false),
		};
		session.uid_copy(uid.to_string(), folder)?;
		self.mark_deleted(session, uid)?;
		info!("{}: moved to {}", label, folder);
		Ok(true)
	}

	fn drain<T: Read + Write, S: ReportStore>(
		&self,
		session: &mut imap::Session<T>,
		pipeline: &mut Pipeline<S>,
	) -> Result<(), Error> {
		let folders = [&self.config.processed_folder, &self.config.error_folder];
		for folder in folders.iter().filter_map(|folder| folder.as_deref()) {
			self.ensure_folder(session, folder)?;
		}

		let mailbox = session.select(&self.config.folder)?;
		info!("{}: {} messages in {}", self.name, mailbox.exists, self.config.folder);

		let mut uids: Vec<u32> = session.uid_search("ALL")?.into_iter().collect();
		uids.sort_unstable();

		let mut removed = 0;
		for uid in uids {
			let fetches = session.uid_fetch(uid.to_string(), "(ENVELOPE RFC822)")?;
			let fetch = match fetches.iter().next() {
				Some(fetch) => fetch,
				None => {
					warn!("{}: uid {} vanished", self.name, uid);
					continue;
				},
			};
			let label = format!(
				"{}/{} uid {} '{}'",
				self.config.host,
				self.config.folder,
				uid,
				subject(fetch.envelope())
			);
			let body = match fetch.body() {
				Some(body) => body,
				None => {
					warn!("{}: no message body", label);
					continue;
				},
			};

			let outcome = pipeline.process_message(body, &label);
			let gone = match pipeline.action(outcome) {
				Action::Delete => {
					self.mark_deleted(session, uid)?;
					pipeline.record_deleted(&label);
					true
				},
				Action::Processed => self.move_to(session, uid, self.config.processed_folder.as_deref(), &label)?,
				Action::Failed => self.move_to(session, uid, self.config.error_folder.as_deref(), &label)?,
				Action::Retry => {
					debug!("{}: kept for the next run", label);
					false
				},
			};
			if gone {
				removed += 1;
			}
		}

		if removed > 0 {
			session.expunge()?;
			info!("{}: expunged {} messages", self.name, removed);
		}
		Ok(())
	}

	fn finish<T: Read + Write, S: ReportStore>(
		&self,
		client: imap::Client<T>,
		pipeline: &mut Pipeline<S>,
	) -> Result<(), Error> {
		let mut session = self.authenticate(client)?;
		let result = self.drain(&mut session, pipeline);
		if let Err(err) = session.logout() {
			warn!("{}: logout failed: {}", self.name, err);
		}
		result
	}
}

impl Source for ImapSource {
	fn describe(&self) -> String {
		format!("{} {}@{}:{}", self.name, self.config.username, self.config.host, self.config.port)
	}

	fn run<S: ReportStore>(&mut self, pipeline: &mut Pipeline<S>) -> Result<(), Error> {
		let address = (self.config.host.as_str(), self.config.port);
		if self.config.tls {
			let tls = TlsConnector::builder().build()?;
			let client = imap::connect(address, &self.config.host, &tls)?;
			self.finish(client, pipeline)
		} else {
			let mut client = imap::Client::new(TcpStream::connect(address)?);
			client.read_greeting()?;
			self.finish(client, pipeline)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn describes_account() {
		let source = ImapSource::new("dmarc", ImapConfig::default(), None);
		assert_eq!(source.describe(), "dmarc reports@dmarc.some-cool-address.invalid@localhost:993");
	}

	#[test]
	fn missing_subject_is_empty() {
		assert_eq!(subject(None), "");
	}
}
