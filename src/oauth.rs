//! Access tokens for IMAP accounts using XOAUTH2.

use crate::error::Error;

/// Hands out a current access token for a mail account.
pub trait AccessTokenProvider {
	fn access_token(&mut self, account: &str) -> Result<String, Error>;
}

/// A token written into the configuration file.
pub struct StaticToken(pub String);

impl AccessTokenProvider for StaticToken {
	fn access_token(&mut self, _account: &str) -> Result<String, Error> {
		Ok(self.0.clone())
	}
}

/// SASL XOAUTH2 initial response.
pub struct XOAuth2 {
	pub user: String,
	pub access_token: String,
}

impl XOAuth2 {
	pub fn response(&self) -> String {
		format!("user={}\x01auth=Bearer {}\x01\x01", self.user, self.access_token)
	}
}

impl imap::Authenticator for XOAuth2 {
	type Response = String;

	fn process(&self, _challenge: &[u8]) -> Self::Response {
		self.response()
	}
}

/// Prefers the configured token; falls back to the cache.
pub fn resolve_token(
	configured: Option<&str>,
	cache: &mut dyn AccessTokenProvider,
	account: &str,
) -> Result<String, Error> {
	match configured {
		Some(token) if !token.is_empty() => StaticToken(token.to_string()).access_token(account),
		_ => cache.access_token(account),
	}
}
