//! Credential ownership: the in-memory [`TokenStore`], its reload-durable backup, and the
//! auto-refresh timer.

pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

// crates.io
use tokio::{runtime::Handle, task::JoinHandle};
// self
use crate::{
	_prelude::*,
	auth::{CredentialRecord, TokenSecret},
	clock::Clock,
	events::{ClientEvent, EventBus},
	obs,
};

/// Key/value persistence surface used to back up credentials across restarts.
///
/// Implementations are synchronous so a read-modify-write on the [`TokenStore`] completes
/// within one critical section.
pub trait CredentialStorage
where
	Self: Send + Sync,
{
	/// Returns the value stored under `key`, if any.
	fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

	/// Stores `value` under `key`, replacing any previous value.
	fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

	/// Removes `key`; removing a missing key succeeds.
	fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

/// Error type produced by [`CredentialStorage`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StorageError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage medium.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Behavior knobs for a [`TokenStore`].
#[derive(Clone, Debug)]
pub struct TokenStoreOptions {
	/// Storage key under which the credential backup is written.
	pub storage_key: String,
	/// Whether to arm a timer that publishes [`ClientEvent::RefreshNeeded`] before expiry.
	pub auto_refresh: bool,
	/// Lead time before expiry at which the timer fires.
	pub refresh_buffer: Duration,
}
impl TokenStoreOptions {
	/// Default storage key.
	pub const DEFAULT_STORAGE_KEY: &'static str = "api_client_core.credentials";
	/// Default lead time before expiry.
	pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::minutes(5);
}
impl Default for TokenStoreOptions {
	fn default() -> Self {
		Self {
			storage_key: Self::DEFAULT_STORAGE_KEY.into(),
			auto_refresh: true,
			refresh_buffer: Self::DEFAULT_REFRESH_BUFFER,
		}
	}
}

#[derive(Default)]
struct TokenState {
	record: Option<CredentialRecord>,
	timer: Option<JoinHandle<()>>,
}

/// Sole owner of the current [`CredentialRecord`].
///
/// Every mutation runs inside one lock section so expiry checks and timer rescheduling can
/// never interleave with another caller. Persistence failures are logged and swallowed.
pub struct TokenStore {
	storage: Arc<dyn CredentialStorage>,
	clock: Arc<dyn Clock>,
	events: EventBus,
	options: TokenStoreOptions,
	state: Mutex<TokenState>,
}
impl TokenStore {
	/// Creates a store and restores any unexpired record found in `storage`.
	///
	/// Records that already expired, or that cannot be decoded, are discarded and removed from
	/// storage.
	pub fn open(
		storage: Arc<dyn CredentialStorage>,
		clock: Arc<dyn Clock>,
		events: EventBus,
		options: TokenStoreOptions,
	) -> Self {
		let store = Self { storage, clock, events, options, state: Default::default() };

		if let Some(record) = store.restore() {
			let mut state = store.state.lock();

			state.record = Some(record);
			store.reschedule(&mut state);
		}

		store
	}

	/// Stores `record`, backs it up, and re-arms the auto-refresh timer.
	pub fn set(&self, record: CredentialRecord) {
		let expires_at = record.expires_at;

		{
			let mut state = self.state.lock();

			self.persist(&record);
			state.record = Some(record);
			self.reschedule(&mut state);
		}

		self.events.publish(ClientEvent::TokenUpdated { expires_at });
	}

	/// Returns the access token, clearing all state if it has expired.
	pub fn get_access_token(&self) -> Option<TokenSecret> {
		let now = self.clock.now();
		let mut state = self.state.lock();
		let record = state.record.as_ref()?;

		if !record.is_expired_at(now) {
			return Some(record.access_token.clone());
		}

		self.clear_locked(&mut state);
		drop(state);
		self.events.publish(ClientEvent::TokenCleared);

		None
	}

	/// Returns the access token only while it is unexpired, without clearing anything.
	pub fn valid_access_token(&self) -> Option<TokenSecret> {
		let now = self.clock.now();

		self.state
			.lock()
			.record
			.as_ref()
			.filter(|record| !record.is_expired_at(now))
			.map(|record| record.access_token.clone())
	}

	/// Returns the refresh token, if one is stored.
	pub fn get_refresh_token(&self) -> Option<TokenSecret> {
		self.state.lock().record.as_ref().and_then(|record| record.refresh_token.clone())
	}

	/// Returns `true` when an unexpired access token is stored.
	pub fn has_valid_token(&self) -> bool {
		self.valid_access_token().is_some()
	}

	/// Returns the expiry of the stored access token.
	pub fn expires_at(&self) -> Option<OffsetDateTime> {
		self.state.lock().record.as_ref().and_then(|record| record.expires_at)
	}

	/// Returns `true` when the stored token expires within `buffer` (or already has).
	///
	/// A missing record or a record without expiry is never expiring.
	pub fn is_expiring_soon(&self, buffer: Duration) -> bool {
		let now = self.clock.now();

		self.state.lock().record.as_ref().is_some_and(|record| record.is_expiring_within(now, buffer))
	}

	/// Returns a copy of the stored record without side effects.
	pub fn record(&self) -> Option<CredentialRecord> {
		self.state.lock().record.clone()
	}

	/// Replaces only the expiry instant and re-arms the timer. Returns `false` when empty.
	pub fn update_expiry(&self, expires_at: OffsetDateTime) -> bool {
		{
			let mut state = self.state.lock();
			let Some(record) = state.record.as_mut() else {
				return false;
			};

			record.expires_at = Some(expires_at);

			let snapshot = record.clone();

			self.persist(&snapshot);
			self.reschedule(&mut state);
		}

		self.events.publish(ClientEvent::TokenUpdated { expires_at: Some(expires_at) });

		true
	}

	/// Wipes memory and storage and cancels the auto-refresh timer.
	pub fn clear(&self) {
		self.clear_locked(&mut self.state.lock());
		self.events.publish(ClientEvent::TokenCleared);
	}

	/// Returns `true` while an auto-refresh timer is armed.
	pub fn is_refresh_scheduled(&self) -> bool {
		self.state.lock().timer.as_ref().is_some_and(|timer| !timer.is_finished())
	}

	/// Returns the options this store was opened with.
	pub fn options(&self) -> &TokenStoreOptions {
		&self.options
	}

	fn restore(&self) -> Option<CredentialRecord> {
		let raw = match self.storage.get_item(&self.options.storage_key) {
			Ok(raw) => raw?,
			Err(e) => {
				obs::record_storage_failure("restore", &e);

				return None;
			},
		};

		match serde_json::from_str::<CredentialRecord>(&raw) {
			Ok(record) if !record.is_expired_at(self.clock.now()) => Some(record),
			Ok(_) => {
				self.forget_backup();

				None
			},
			Err(e) => {
				obs::record_storage_failure(
					"restore",
					&StorageError::Serialization { message: e.to_string() },
				);
				self.forget_backup();

				None
			},
		}
	}

	fn persist(&self, record: &CredentialRecord) {
		let result = serde_json::to_string(record)
			.map_err(|e| StorageError::Serialization { message: e.to_string() })
			.and_then(|raw| self.storage.set_item(&self.options.storage_key, &raw));

		if let Err(e) = result {
			obs::record_storage_failure("persist", &e);
		}
	}

	fn forget_backup(&self) {
		if let Err(e) = self.storage.remove_item(&self.options.storage_key) {
			obs::record_storage_failure("remove", &e);
		}
	}

	fn clear_locked(&self, state: &mut TokenState) {
		state.record = None;

		if let Some(timer) = state.timer.take() {
			timer.abort();
		}

		self.forget_backup();
	}

	fn reschedule(&self, state: &mut TokenState) {
		if let Some(timer) = state.timer.take() {
			timer.abort();
		}
		if !self.options.auto_refresh {
			return;
		}

		let Some(expires_at) = state.record.as_ref().and_then(|record| record.expires_at) else {
			return;
		};
		let Ok(runtime) = Handle::try_current() else {
			obs::record_timer_skipped("no tokio runtime");

			return;
		};
		let delay = refresh_delay(expires_at - self.clock.now(), self.options.refresh_buffer);
		let events = self.events.clone();

		state.timer = Some(runtime.spawn(async move {
			tokio::time::sleep(delay).await;
			events.publish(ClientEvent::RefreshNeeded);
		}));
	}
}
/// Time until the auto-refresh signal for a token with `lifetime` left.
///
/// The lead is the refresh buffer, shortened to half the remaining lifetime so a freshly issued
/// short-lived token never signals immediately. An already expired token signals at once.
fn refresh_delay(lifetime: Duration, buffer: Duration) -> std::time::Duration {
	let lead = buffer.min(lifetime / 2);

	(lifetime - lead).max(Duration::ZERO).unsigned_abs()
}

impl Drop for TokenStore {
	fn drop(&mut self) {
		if let Some(timer) = self.state.get_mut().timer.take() {
			timer.abort();
		}
	}
}
impl Debug for TokenStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let state = self.state.lock();

		f.debug_struct("TokenStore")
			.field("record", &state.record)
			.field("timer_armed", &state.timer.is_some())
			.field("options", &self.options)
			.finish()
	}
}
