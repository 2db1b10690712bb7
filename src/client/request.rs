//! Request descriptors and HTTP methods.

// self
use crate::{_prelude::*, error::ConfigError, retry::RetryOverride};

/// HTTP methods understood by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
	/// `GET`
	Get,
	/// `HEAD`
	Head,
	/// `OPTIONS`
	Options,
	/// `POST`
	Post,
	/// `PUT`
	Put,
	/// `PATCH`
	Patch,
	/// `DELETE`
	Delete,
}
impl Method {
	/// Returns the canonical upper-case method name.
	pub const fn as_str(self) -> &'static str {
		match self {
			Method::Get => "GET",
			Method::Head => "HEAD",
			Method::Options => "OPTIONS",
			Method::Post => "POST",
			Method::Put => "PUT",
			Method::Patch => "PATCH",
			Method::Delete => "DELETE",
		}
	}

	/// Returns `true` for methods whose successful responses may be cached.
	pub const fn is_cacheable(self) -> bool {
		matches!(self, Method::Get)
	}

	/// Returns `true` for read-only methods whose cache key is the URL alone.
	pub const fn is_safe(self) -> bool {
		matches!(self, Method::Get | Method::Head | Method::Options)
	}
}
impl Display for Method {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
impl FromStr for Method {
	type Err = UnknownMethod;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_uppercase().as_str() {
			"GET" => Ok(Method::Get),
			"HEAD" => Ok(Method::Head),
			"OPTIONS" => Ok(Method::Options),
			"POST" => Ok(Method::Post),
			"PUT" => Ok(Method::Put),
			"PATCH" => Ok(Method::Patch),
			"DELETE" => Ok(Method::Delete),
			_ => Err(UnknownMethod(s.to_owned())),
		}
	}
}

/// Error returned when parsing an unsupported method name.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Unsupported HTTP method `{0}`.")]
pub struct UnknownMethod(pub String);

/// One logical request as described by the caller.
///
/// `target` is either an absolute URL or a path joined onto the configured base URL.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
	/// HTTP method.
	pub method: Method,
	/// Absolute URL or path relative to the base URL.
	pub target: String,
	/// Extra query pairs appended after any query already present in `target`.
	pub query: Vec<(String, String)>,
	/// Extra request headers.
	pub headers: BTreeMap<String, String>,
	/// Serialized request body.
	pub body: Option<Vec<u8>>,
	/// Sends without credentials and without the 401 refresh path.
	pub skip_auth: bool,
	/// Bypasses the response cache for both lookup and store.
	pub skip_cache: bool,
	/// Cache TTL override for this request.
	pub cache_ttl: Option<Duration>,
	/// Retry settings merged over the client default.
	pub retry: Option<RetryOverride>,
	/// Caller-chosen request identifier; generated when absent.
	pub request_id: Option<String>,
}
impl RequestDescriptor {
	/// Creates a descriptor for `method` + `target`.
	pub fn new(method: Method, target: impl Into<String>) -> Self {
		Self {
			method,
			target: target.into(),
			query: Vec::new(),
			headers: BTreeMap::new(),
			body: None,
			skip_auth: false,
			skip_cache: false,
			cache_ttl: None,
			retry: None,
			request_id: None,
		}
	}

	/// Shorthand for a `GET` descriptor.
	pub fn get(target: impl Into<String>) -> Self {
		Self::new(Method::Get, target)
	}

	/// Shorthand for a `POST` descriptor.
	pub fn post(target: impl Into<String>) -> Self {
		Self::new(Method::Post, target)
	}

	/// Shorthand for a `PUT` descriptor.
	pub fn put(target: impl Into<String>) -> Self {
		Self::new(Method::Put, target)
	}

	/// Shorthand for a `PATCH` descriptor.
	pub fn patch(target: impl Into<String>) -> Self {
		Self::new(Method::Patch, target)
	}

	/// Shorthand for a `DELETE` descriptor.
	pub fn delete(target: impl Into<String>) -> Self {
		Self::new(Method::Delete, target)
	}

	/// Appends a query pair.
	pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.query.push((name.into(), value.into()));

		self
	}

	/// Sets a header; names are stored lowercase.
	pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
		self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());

		self
	}

	/// Sets a raw body.
	pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
		self.body = Some(body.into());

		self
	}

	/// Serializes `value` as the JSON body and sets the content type.
	pub fn json<T>(self, value: &T) -> Result<Self>
	where
		T: ?Sized + Serialize,
	{
		let body = serde_json::to_vec(value).map_err(ConfigError::BodySerialize)?;

		Ok(self.header("content-type", "application/json").body(body))
	}

	/// Sends without credentials.
	pub fn skip_auth(mut self) -> Self {
		self.skip_auth = true;

		self
	}

	/// Bypasses the response cache.
	pub fn skip_cache(mut self) -> Self {
		self.skip_cache = true;

		self
	}

	/// Overrides the cache TTL for this request.
	pub fn cache_ttl(mut self, ttl: Duration) -> Self {
		self.cache_ttl = Some(ttl);

		self
	}

	/// Overrides retry settings for this request.
	pub fn retry(mut self, retry: RetryOverride) -> Self {
		self.retry = Some(retry);

		self
	}

	/// Pins the request identifier.
	pub fn request_id(mut self, id: impl Into<String>) -> Self {
		self.request_id = Some(id.into());

		self
	}

	/// Resolves `target` against `base` and appends the extra query pairs.
	pub fn resolve_url(&self, base: Option<&Url>) -> Result<Url, ConfigError> {
		let mut url = match Url::parse(&self.target) {
			Ok(url) => url,
			Err(url::ParseError::RelativeUrlWithoutBase) => {
				let base =
					base.ok_or_else(|| ConfigError::MissingBaseUrl { path: self.target.clone() })?;

				base.join(&self.target).map_err(|source| ConfigError::InvalidUrl {
					value: self.target.clone(),
					source,
				})?
			},
			Err(source) => return Err(ConfigError::InvalidUrl { value: self.target.clone(), source }),
		};

		if !self.query.is_empty() {
			url.query_pairs_mut().extend_pairs(self.query.iter());
		}

		Ok(url)
	}
}
