//! Client-level error types shared across the token store, refresh coordinator, retry engine,
//! and request coordinator.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical client error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Network-level failure without an HTTP status; always eligible for retry.
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Upstream answered with a non-success status.
	#[error("Request failed with HTTP status {status}.")]
	HttpStatus {
		/// HTTP status code returned by the server.
		status: u16,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
		/// Leading bytes of the response body, decoded lossily.
		body_preview: Option<String>,
	},
	/// Response body could not be decoded; never retried.
	#[error(transparent)]
	Parse(#[from] ParseError),
	/// Server rejected the attached credentials with HTTP 401.
	#[error("Credentials were rejected by {url}.")]
	AuthExpired {
		/// URL that answered with 401.
		url: String,
	},
	/// Credential refresh failed; the caller must re-authenticate.
	#[error("Credential refresh failed, re-authentication is required: {0}")]
	RefreshFailed(#[from] RefreshError),
	/// Local admission control rejected the request.
	#[error("Too many concurrent requests (limit {limit}).")]
	ConcurrencyLimit {
		/// Configured maximum of simultaneously in-flight requests.
		limit: usize,
	},
	/// Request was cancelled by the caller.
	#[error("Request `{request_id}` was cancelled.")]
	Cancelled {
		/// Identifier of the cancelled request.
		request_id: String,
	},
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Credential persistence failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StorageError,
	),
	/// An interceptor refused to let the request or response through.
	#[error("Interceptor rejected the exchange: {reason}.")]
	Rejected {
		/// Interceptor-supplied reason string.
		reason: String,
	},
}
impl Error {
	/// Returns the HTTP status carried by the error, if any.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::HttpStatus { status, .. } => Some(*status),
			Self::AuthExpired { .. } => Some(401),
			Self::Parse(ParseError::Json { status, .. }) => *status,
			_ => None,
		}
	}

	/// Returns the Retry-After hint carried by the error, if any.
	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::HttpStatus { retry_after, .. } => *retry_after,
			_ => None,
		}
	}

	/// Returns `true` for error kinds that must never be retried regardless of policy.
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			Self::Parse(_)
				| Self::RefreshFailed(_)
				| Self::ConcurrencyLimit { .. }
				| Self::Cancelled { .. }
				| Self::Config(_)
				| Self::Storage(_)
				| Self::Rejected { .. }
		)
	}

	/// Returns `true` when the caller must log in again before retrying.
	pub fn requires_reauthentication(&self) -> bool {
		matches!(self, Self::RefreshFailed(_) | Self::AuthExpired { .. })
	}
}

/// Configuration and validation failures raised by the client.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// A relative request path was used without a configured base URL.
	#[error("Request path `{path}` is relative but no base URL is configured.")]
	MissingBaseUrl {
		/// Path supplied by the caller.
		path: String,
	},
	/// A URL could not be parsed or joined.
	#[error("URL `{value}` is invalid.")]
	InvalidUrl {
		/// Offending input.
		value: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Request body could not be serialized.
	#[error("Request body could not be serialized.")]
	BodySerialize(#[source] serde_json::Error),
	/// Retry configuration is out of range.
	#[error("Retry configuration is invalid: {reason}.")]
	InvalidRetry {
		/// Which constraint failed.
		reason: &'static str,
	},
	/// Concurrency limit must allow at least one request.
	#[error("The concurrency limit must be at least 1.")]
	InvalidConcurrencyLimit,
	/// Cache must be able to hold at least one entry.
	#[error("The cache size must be at least 1.")]
	InvalidCacheSize,
	/// A duration setting must be positive.
	#[error("The {setting} duration must be positive.")]
	NonPositiveDuration {
		/// Setting label.
		setting: &'static str,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling {url}.")]
	Network {
		/// Target URL of the failed call.
		url: String,
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred during transport.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(url: impl Into<String>, src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Network { url: url.into(), source: Box::new(src) }
	}
}

/// Response decoding failures.
#[derive(Debug, ThisError)]
pub enum ParseError {
	/// Response body is not the expected JSON shape.
	#[error("Response body is malformed JSON.")]
	Json {
		/// Structured parsing failure naming the failing path.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
}

/// Refresh failure delivered to every waiter of one refresh cycle.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum RefreshError {
	/// No refresh token is available.
	#[error("No refresh token is available.")]
	MissingRefreshToken,
	/// Refresh endpoint refused the refresh token.
	#[error("Refresh endpoint rejected the refresh token: {reason}.")]
	Rejected {
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Server- or client-supplied reason string.
		reason: String,
	},
	/// Refresh endpoint answered with an undecodable body.
	#[error("Refresh endpoint returned a malformed body: {message}.")]
	Malformed {
		/// Decoder message.
		message: String,
	},
	/// Refresh call failed at the network level.
	#[error("Refresh endpoint is unreachable: {message}.")]
	Network {
		/// Transport message.
		message: String,
	},
	/// Refresh cycle ended without producing an outcome, e.g. its task panicked or the
	/// runtime shut down.
	#[error("Refresh cycle was interrupted: {message}.")]
	Interrupted {
		/// Task failure message.
		message: String,
	},
}
