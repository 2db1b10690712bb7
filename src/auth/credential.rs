//! Credential record held by the token store.

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Lifecycle status of a [`CredentialRecord`] at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialStatus {
	/// Access token is usable and outside the requested buffer.
	Active,
	/// Access token is still valid but expires within the requested buffer.
	ExpiringSoon,
	/// Access token has passed its expiry instant.
	Expired,
}

/// Access token plus the optional refresh token and expiry issued alongside it.
///
/// A record without `expires_at` never expires.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
	/// Bearer token attached to outgoing requests.
	pub access_token: TokenSecret,
	/// Token exchanged for a new access token during refresh.
	pub refresh_token: Option<TokenSecret>,
	/// Expiry instant of the access token.
	pub expires_at: Option<OffsetDateTime>,
}
impl CredentialRecord {
	/// Creates a record that never expires and carries no refresh token.
	pub fn new(access_token: impl Into<String>) -> Self {
		Self { access_token: TokenSecret::new(access_token), refresh_token: None, expires_at: None }
	}

	/// Attaches a refresh token.
	pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Sets an absolute expiry instant.
	pub fn with_expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets the expiry relative to `now`.
	pub fn with_expires_in(self, now: OffsetDateTime, lifetime: Duration) -> Self {
		self.with_expires_at(now + lifetime)
	}

	/// Computes the status at `now`, treating anything within `buffer` of expiry as expiring.
	pub fn status_at(&self, now: OffsetDateTime, buffer: Duration) -> CredentialStatus {
		match self.expires_at {
			None => CredentialStatus::Active,
			Some(expires_at) if now >= expires_at => CredentialStatus::Expired,
			Some(expires_at) if expires_at - now <= buffer => CredentialStatus::ExpiringSoon,
			Some(_) => CredentialStatus::Active,
		}
	}

	/// Returns `true` once the access token has expired at `now`.
	pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
		matches!(self.status_at(now, Duration::ZERO), CredentialStatus::Expired)
	}

	/// Returns `true` if the access token expires within `buffer` of `now` (or already has).
	pub fn is_expiring_within(&self, now: OffsetDateTime, buffer: Duration) -> bool {
		!matches!(self.status_at(now, buffer), CredentialStatus::Active)
	}

	/// Returns `true` when a refresh token is present.
	pub fn is_refreshable(&self) -> bool {
		self.refresh_token.is_some()
	}
}
impl Debug for CredentialRecord {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialRecord")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("expires_at", &self.expires_at)
			.finish()
	}
}
