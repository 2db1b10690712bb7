//! Thread-safe in-memory [`CredentialStorage`] for tests and ephemeral sessions.

// self
use crate::{
	_prelude::*,
	store::{CredentialStorage, StorageError},
};

/// Storage backend that keeps values in-process; contents vanish with the process.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage(Arc<RwLock<HashMap<String, String>>>);
impl MemoryStorage {
	/// Returns the number of stored keys.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when nothing is stored.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}
}
impl CredentialStorage for MemoryStorage {
	fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
		Ok(self.0.read().get(key).cloned())
	}

	fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
		self.0.write().insert(key.to_owned(), value.to_owned());

		Ok(())
	}

	fn remove_item(&self, key: &str) -> Result<(), StorageError> {
		self.0.write().remove(key);

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn set_get_remove_cycle() {
		let storage = MemoryStorage::default();

		assert!(storage.is_empty());
		assert_eq!(storage.get_item("k").expect("Read should succeed."), None);

		storage.set_item("k", "v1").expect("Write should succeed.");
		storage.set_item("k", "v2").expect("Overwrite should succeed.");

		assert_eq!(storage.get_item("k").expect("Read should succeed."), Some("v2".into()));
		assert_eq!(storage.len(), 1);

		storage.remove_item("k").expect("Remove should succeed.");
		storage.remove_item("k").expect("Removing a missing key should succeed.");

		assert!(storage.is_empty());
	}
}
