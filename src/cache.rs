//! TTL response cache with oldest-first eviction.

// std
use std::sync::atomic::{AtomicBool, Ordering};
// crates.io
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, client::Method, clock::Clock, obs};

/// Derives the cache key for a request.
///
/// Safe methods key on the normalized URL alone (query included). Other methods also fold
/// in the method name and a SHA-256 digest of the body so distinct bodies never collide.
pub fn cache_key(method: Method, url: &Url, body: Option<&[u8]>) -> String {
	if method.is_safe() {
		return url.as_str().to_owned();
	}

	let digest = Sha256::digest(body.unwrap_or_default());

	format!("{method} {url} #{}", URL_SAFE_NO_PAD.encode(digest))
}

/// Sizing and expiry settings for a [`ResponseCache`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
	/// Whether lookups and stores are active.
	pub enabled: bool,
	/// TTL used when a store does not specify one.
	pub default_ttl: Duration,
	/// Maximum number of entries kept.
	pub max_size: usize,
}
impl CacheConfig {
	/// Default TTL.
	pub const DEFAULT_TTL: Duration = Duration::minutes(5);
	/// Default capacity.
	pub const DEFAULT_MAX_SIZE: usize = 100;

	/// Sets the default TTL.
	pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
		self.default_ttl = ttl;

		self
	}

	/// Sets the capacity.
	pub fn with_max_size(mut self, max_size: usize) -> Self {
		self.max_size = max_size;

		self
	}

	/// Enables or disables the cache.
	pub fn with_enabled(mut self, enabled: bool) -> Self {
		self.enabled = enabled;

		self
	}
}
impl Default for CacheConfig {
	fn default() -> Self {
		Self { enabled: true, default_ttl: Self::DEFAULT_TTL, max_size: Self::DEFAULT_MAX_SIZE }
	}
}

/// Request details stored alongside a cached payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheMetadata {
	/// URL of the cached request.
	pub url: String,
	/// Method of the cached request.
	pub method: Method,
	/// TTL the entry was stored with.
	pub ttl: Duration,
}

/// One cached payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry<V> {
	/// Key the entry is stored under.
	pub key: String,
	/// Cached value.
	pub payload: V,
	/// Insertion instant.
	pub created_at: OffsetDateTime,
	/// Instant after which the entry is no longer served.
	pub expires_at: OffsetDateTime,
	/// Request details.
	pub metadata: CacheMetadata,
}
impl<V> CacheEntry<V> {
	/// Returns `true` while the entry may be served at `now`.
	pub fn is_fresh_at(&self, now: OffsetDateTime) -> bool {
		now < self.expires_at
	}
}

struct Slot<V> {
	entry: CacheEntry<V>,
	seq: u64,
}

struct CacheState<V> {
	slots: HashMap<String, Slot<V>>,
	next_seq: u64,
}

/// Bounded key/value cache with per-entry TTL.
///
/// Expired entries are purged lazily: a `get` drops the entry it finds expired and a `put`
/// sweeps every expired entry before enforcing capacity. When the table still exceeds
/// `max_size`, the entry with the smallest `created_at` (insertion order breaks ties) is
/// evicted with a linear scan.
pub struct ResponseCache<V = crate::http::ApiResponse> {
	clock: Arc<dyn Clock>,
	default_ttl: Duration,
	max_size: usize,
	enabled: AtomicBool,
	state: Mutex<CacheState<V>>,
}
impl<V> ResponseCache<V>
where
	V: Clone,
{
	/// Creates a cache driven by `clock`.
	pub fn new(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
		Self {
			clock,
			default_ttl: config.default_ttl,
			max_size: config.max_size.max(1),
			enabled: AtomicBool::new(config.enabled),
			state: Mutex::new(CacheState { slots: HashMap::new(), next_seq: 0 }),
		}
	}

	/// Returns the entry for `key` if it is still fresh; an expired entry is removed.
	pub fn get(&self, key: &str) -> Option<CacheEntry<V>> {
		if !self.is_enabled() {
			return None;
		}

		let now = self.clock.now();
		let mut state = self.state.lock();
		let fresh = match state.slots.get(key).map(|slot| slot.entry.is_fresh_at(now)) {
			Some(true) => state.slots.get(key).map(|slot| slot.entry.clone()),
			Some(false) => {
				state.slots.remove(key);

				None
			},
			None => None,
		};

		obs::record_cache_lookup(fresh.is_some());

		fresh
	}

	/// Stores `payload` under `key` for `ttl` (or the default TTL).
	pub fn put(&self, key: impl Into<String>, payload: V, ttl: Option<Duration>, url: &str, method: Method) {
		if !self.is_enabled() {
			return;
		}

		let key = key.into();
		let ttl = ttl.unwrap_or(self.default_ttl);
		let now = self.clock.now();
		let mut state = self.state.lock();
		let seq = state.next_seq;

		state.next_seq += 1;
		state.slots.retain(|_, slot| slot.entry.is_fresh_at(now));
		state.slots.insert(
			key.clone(),
			Slot {
				entry: CacheEntry {
					key,
					payload,
					created_at: now,
					expires_at: now + ttl,
					metadata: CacheMetadata { url: url.to_owned(), method, ttl },
				},
				seq,
			},
		);

		while state.slots.len() > self.max_size {
			let oldest = state
				.slots
				.iter()
				.min_by_key(|(_, slot)| (slot.entry.created_at, slot.seq))
				.map(|(key, _)| key.clone());

			match oldest {
				Some(key) => {
					state.slots.remove(&key);
				},
				None => break,
			}
		}
	}

	/// Removes `key`; returns `true` when something was removed.
	pub fn invalidate(&self, key: &str) -> bool {
		self.state.lock().slots.remove(key).is_some()
	}

	/// Removes every key starting with `prefix`; returns how many were removed.
	pub fn invalidate_prefix(&self, prefix: &str) -> usize {
		let mut state = self.state.lock();
		let before = state.slots.len();

		state.slots.retain(|key, _| !key.starts_with(prefix));

		before - state.slots.len()
	}

	/// Removes every entry.
	pub fn clear(&self) {
		self.state.lock().slots.clear();
	}

	/// Turns lookups and stores on or off. Disabling also drops every entry.
	pub fn set_enabled(&self, enabled: bool) {
		self.enabled.store(enabled, Ordering::Release);

		if !enabled {
			self.clear();
		}
	}

	/// Returns whether the cache is active.
	pub fn is_enabled(&self) -> bool {
		self.enabled.load(Ordering::Acquire)
	}

	/// Returns the number of stored entries, expired ones included until purged.
	pub fn len(&self) -> usize {
		self.state.lock().slots.len()
	}

	/// Returns `true` when nothing is stored.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Returns the configured capacity.
	pub fn max_size(&self) -> usize {
		self.max_size
	}

	/// Returns the stored keys in no particular order.
	pub fn keys(&self) -> Vec<String> {
		self.state.lock().slots.keys().cloned().collect()
	}
}
impl<V> Debug for ResponseCache<V> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ResponseCache")
			.field("entries", &self.state.lock().slots.len())
			.field("max_size", &self.max_size)
			.field("default_ttl", &self.default_ttl)
			.field("enabled", &self.enabled.load(Ordering::Relaxed))
			.finish()
	}
}
