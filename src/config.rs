//! Client configuration with validated builders.

// self
use crate::{
	_prelude::*,
	cache::CacheConfig,
	error::ConfigError,
	retry::RetryConfig,
	store::TokenStoreOptions,
};

/// Credential handling settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthConfig {
	/// Refresh endpoint; relative values resolve against [`ClientConfig::base_url`].
	pub refresh_endpoint: String,
	/// Whether the store arms a refresh timer ahead of expiry.
	pub auto_refresh: bool,
	/// Lead time before expiry at which a token counts as expiring soon.
	pub refresh_buffer: Duration,
	/// Storage key for the persisted credential backup.
	pub storage_key: String,
}
impl AuthConfig {
	/// Default refresh endpoint path.
	pub const DEFAULT_REFRESH_ENDPOINT: &'static str = "/auth/refresh";

	/// Sets the refresh endpoint.
	pub fn with_refresh_endpoint(mut self, endpoint: impl Into<String>) -> Self {
		self.refresh_endpoint = endpoint.into();

		self
	}

	/// Enables or disables the auto-refresh timer.
	pub fn with_auto_refresh(mut self, enabled: bool) -> Self {
		self.auto_refresh = enabled;

		self
	}

	/// Sets the refresh lead time.
	pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
		self.refresh_buffer = buffer;

		self
	}

	/// Sets the storage key.
	pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
		self.storage_key = key.into();

		self
	}

	/// Resolves the refresh endpoint against `base`.
	pub fn refresh_url(&self, base: Option<&Url>) -> Result<Url, ConfigError> {
		match Url::parse(&self.refresh_endpoint) {
			Ok(url) => Ok(url),
			Err(url::ParseError::RelativeUrlWithoutBase) => base
				.ok_or_else(|| ConfigError::MissingBaseUrl { path: self.refresh_endpoint.clone() })?
				.join(&self.refresh_endpoint)
				.map_err(|source| ConfigError::InvalidUrl { value: self.refresh_endpoint.clone(), source }),
			Err(source) => Err(ConfigError::InvalidUrl { value: self.refresh_endpoint.clone(), source }),
		}
	}

	pub(crate) fn store_options(&self) -> TokenStoreOptions {
		TokenStoreOptions {
			storage_key: self.storage_key.clone(),
			auto_refresh: self.auto_refresh,
			refresh_buffer: self.refresh_buffer,
		}
	}
}
impl Default for AuthConfig {
	fn default() -> Self {
		Self {
			refresh_endpoint: Self::DEFAULT_REFRESH_ENDPOINT.into(),
			auto_refresh: true,
			refresh_buffer: TokenStoreOptions::DEFAULT_REFRESH_BUFFER,
			storage_key: TokenStoreOptions::DEFAULT_STORAGE_KEY.into(),
		}
	}
}

/// Top-level [`ApiClient`](crate::client::ApiClient) configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
	/// Base URL joined with relative request targets.
	pub base_url: Option<Url>,
	/// Maximum simultaneously in-flight logical requests.
	pub max_concurrent: usize,
	/// Process-wide retry defaults.
	pub retry: RetryConfig,
	/// Response cache settings.
	pub cache: CacheConfig,
	/// Credential handling settings.
	pub auth: AuthConfig,
}
impl ClientConfig {
	/// Default concurrency cap.
	pub const DEFAULT_MAX_CONCURRENT: usize = 10;

	/// Creates a configuration rooted at `base_url`.
	pub fn new(base_url: impl AsRef<str>) -> Result<Self, ConfigError> {
		let value = base_url.as_ref();
		let base_url = Url::parse(value)
			.map_err(|source| ConfigError::InvalidUrl { value: value.to_owned(), source })?;

		Ok(Self { base_url: Some(base_url), ..Default::default() })
	}

	/// Sets the concurrency cap.
	pub fn with_max_concurrent(mut self, limit: usize) -> Self {
		self.max_concurrent = limit;

		self
	}

	/// Replaces the retry defaults.
	pub fn with_retry(mut self, retry: RetryConfig) -> Self {
		self.retry = retry;

		self
	}

	/// Replaces the cache settings.
	pub fn with_cache(mut self, cache: CacheConfig) -> Self {
		self.cache = cache;

		self
	}

	/// Replaces the credential settings.
	pub fn with_auth(mut self, auth: AuthConfig) -> Self {
		self.auth = auth;

		self
	}

	/// Checks every nested setting.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.max_concurrent == 0 {
			return Err(ConfigError::InvalidConcurrencyLimit);
		}
		if self.cache.max_size == 0 {
			return Err(ConfigError::InvalidCacheSize);
		}
		if !self.cache.default_ttl.is_positive() {
			return Err(ConfigError::NonPositiveDuration { setting: "cache TTL" });
		}
		if self.auth.refresh_buffer.is_negative() {
			return Err(ConfigError::NonPositiveDuration { setting: "refresh buffer" });
		}

		self.retry.validate()
	}
}
impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			base_url: None,
			max_concurrent: Self::DEFAULT_MAX_CONCURRENT,
			retry: RetryConfig::default(),
			cache: CacheConfig::default(),
			auth: AuthConfig::default(),
		}
	}
}
