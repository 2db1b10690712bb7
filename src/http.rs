//! Transport primitives for outgoing API calls.
//!
//! The module exposes the [`Transport`] trait, the crate-owned [`TransportRequest`] and
//! [`ApiResponse`] types, and the default reqwest-backed [`ReqwestTransport`]. Transports only
//! move bytes: they never retry, never attach credentials, and never interpret status codes.
//! Everything above the wire lives in [`ApiClient`](crate::client::ApiClient).

// std
use std::ops::Deref;
// crates.io
use serde::de::DeserializeOwned;
use time::format_description::well_known::Rfc2822;
// self
use crate::{
	_prelude::*,
	client::Method,
	error::{ParseError, TransportError},
};

/// Boxed future returned by [`Transport::execute`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<ApiResponse, TransportError>> + 'a + Send>>;

/// Header carrying the per-request identifier.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Abstraction over HTTP stacks capable of executing one request.
///
/// Implementations must be `Send + Sync + 'static` so a single transport can be shared by
/// every request the client issues. Dropping the returned future must abort the underlying
/// call; the client relies on this for cancellation.
pub trait Transport
where
	Self: 'static + Send + Sync,
{
	/// Executes `request` and returns the raw response, whatever its status.
	fn execute(&self, request: TransportRequest) -> TransportFuture<'_>;
}

/// Fully resolved outgoing request handed to a [`Transport`].
#[derive(Clone, Debug)]
pub struct TransportRequest {
	/// HTTP method.
	pub method: Method,
	/// Absolute URL including the query string.
	pub url: Url,
	/// Request headers keyed by lowercase name.
	pub headers: BTreeMap<String, String>,
	/// Serialized request body.
	pub body: Option<Vec<u8>>,
	/// Caller-visible identifier used for tracing.
	pub request_id: String,
}
impl TransportRequest {
	/// Creates a request without headers or body.
	pub fn new(method: Method, url: Url, request_id: impl Into<String>) -> Self {
		Self { method, url, headers: BTreeMap::new(), body: None, request_id: request_id.into() }
	}

	/// Sets a header, normalizing the name to lowercase.
	pub fn set_header(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
		self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());
	}

	/// Returns a header value by case-insensitive name.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
	}
}

/// Response returned by a [`Transport`] and, after interpretation, by the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiResponse {
	/// HTTP status code.
	pub status: u16,
	/// Response headers keyed by lowercase name.
	pub headers: BTreeMap<String, String>,
	/// Raw response body.
	pub body: Vec<u8>,
}
impl ApiResponse {
	/// Creates a response with the given status and body.
	pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
		Self { status, headers: BTreeMap::new(), body: body.into() }
	}

	/// Adds a header, normalizing the name to lowercase.
	pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
		self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());

		self
	}

	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Returns a header value by case-insensitive name.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
	}

	/// Parses the `Retry-After` header into a duration relative to `now`.
	pub fn retry_after(&self, now: OffsetDateTime) -> Option<Duration> {
		parse_retry_after(self.header("retry-after")?, now)
	}

	/// Decodes the body as JSON, reporting the failing path on error.
	pub fn json<T>(&self) -> Result<T, ParseError>
	where
		T: DeserializeOwned,
	{
		let mut deserializer = serde_json::Deserializer::from_slice(&self.body);

		serde_path_to_error::deserialize(&mut deserializer)
			.map_err(|source| ParseError::Json { source, status: Some(self.status) })
	}

	/// Returns up to `limit` bytes of the body decoded lossily.
	pub fn body_preview(&self, limit: usize) -> Option<String> {
		if self.body.is_empty() {
			return None;
		}

		let end = self.body.len().min(limit);

		Some(String::from_utf8_lossy(&self.body[..end]).into_owned())
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
#[cfg(feature = "reqwest")]
#[derive(Clone, Default)]
pub struct ReqwestTransport(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	async fn execute_inner(&self, request: TransportRequest) -> Result<ApiResponse, TransportError> {
		let url = request.url.to_string();
		let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
			.map_err(|e| TransportError::network(&url, e))?;
		let mut builder = self.0.request(method, request.url);

		for (name, value) in &request.headers {
			builder = builder.header(name.as_str(), value.as_str());
		}
		if let Some(body) = request.body {
			builder = builder.body(body);
		}

		let response = builder.send().await.map_err(|e| TransportError::network(&url, e))?;
		let status = response.status().as_u16();
		let headers = response
			.headers()
			.iter()
			.filter_map(|(name, value)| {
				value.to_str().ok().map(|value| (name.as_str().to_owned(), value.to_owned()))
			})
			.collect();
		let body = response.bytes().await.map_err(|e| TransportError::network(&url, e))?.to_vec();

		Ok(ApiResponse { status, headers, body })
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestTransport {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestTransport {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Transport for ReqwestTransport {
	fn execute(&self, request: TransportRequest) -> TransportFuture<'_> {
		Box::pin(self.execute_inner(request))
	}
}

fn parse_retry_after(raw: &str, now: OffsetDateTime) -> Option<Duration> {
	let raw = raw.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - now;

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}
