//! Durable file-backed [`CredentialStorage`] that survives process restarts.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	store::{CredentialStorage, StorageError},
};

/// Persists a JSON object of key/value pairs after each mutation.
#[derive(Clone, Debug)]
pub struct FileStorage {
	path: PathBuf,
	inner: Arc<RwLock<BTreeMap<String, String>>>,
}
impl FileStorage {
	/// Opens (or creates) storage at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot = Self::load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	/// Returns the backing file path.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_snapshot(path: &Path) -> Result<BTreeMap<String, String>, StorageError> {
		if !path.exists() {
			return Ok(BTreeMap::new());
		}

		let bytes = fs::read(path).map_err(|e| StorageError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		if bytes.is_empty() {
			return Ok(BTreeMap::new());
		}

		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization {
			message: format!("Failed to parse {}: {e}", path.display()),
		})
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StorageError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StorageError::Backend {
				message: format!("Failed to create storage directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn persist_locked(&self, contents: &BTreeMap<String, String>) -> Result<(), StorageError> {
		Self::ensure_parent_exists(&self.path)?;

		let serialized =
			serde_json::to_vec_pretty(contents).map_err(|e| StorageError::Serialization {
				message: format!("Failed to serialize storage snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StorageError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StorageError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StorageError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StorageError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}
}
impl CredentialStorage for FileStorage {
	fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
		Ok(self.inner.read().get(key).cloned())
	}

	fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
		let mut guard = self.inner.write();

		guard.insert(key.to_owned(), value.to_owned());

		self.persist_locked(&guard)
	}

	fn remove_item(&self, key: &str) -> Result<(), StorageError> {
		let mut guard = self.inner.write();

		if guard.remove(key).is_none() {
			return Ok(());
		}

		self.persist_locked(&guard)
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// self
	use super::*;
	use crate::{
		auth::CredentialRecord,
		clock::{Clock, ManualClock},
		events::EventBus,
		store::{TokenStore, TokenStoreOptions},
	};

	fn temp_path() -> PathBuf {
		let unique = format!(
			"api_client_core_file_storage_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	#[test]
	fn values_survive_reopen() {
		let path = temp_path();
		let storage = FileStorage::open(&path).expect("Failed to open file storage.");

		storage.set_item("a", "1").expect("Failed to write key a.");
		storage.set_item("b", "2").expect("Failed to write key b.");
		storage.remove_item("a").expect("Failed to remove key a.");
		drop(storage);

		let reopened = FileStorage::open(&path).expect("Failed to reopen file storage.");

		assert_eq!(reopened.get_item("a").expect("Read should succeed."), None);
		assert_eq!(reopened.get_item("b").expect("Read should succeed."), Some("2".into()));

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary storage file {}: {e}", path.display())
		});
	}

	#[test]
	fn token_store_restores_from_file_after_restart() {
		let path = temp_path();
		let clock = Arc::new(ManualClock::default());
		let record = CredentialRecord::new("durable-access")
			.with_refresh_token("durable-refresh")
			.with_expires_in(clock.now(), Duration::hours(1));

		{
			let storage = Arc::new(FileStorage::open(&path).expect("Failed to open file storage."));
			let store = TokenStore::open(
				storage,
				clock.clone(),
				EventBus::default(),
				TokenStoreOptions::default(),
			);

			store.set(record.clone());
		}

		let storage = Arc::new(FileStorage::open(&path).expect("Failed to reopen file storage."));
		let store =
			TokenStore::open(storage, clock, EventBus::default(), TokenStoreOptions::default());

		assert_eq!(store.record(), Some(record));

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary storage file {}: {e}", path.display())
		});
	}
}
