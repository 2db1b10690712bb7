//! Typed publish/subscribe channel for token and refresh notifications.
//!
//! [`EventBus::subscribe`] returns a [`Subscription`] handle; dropping the handle (or calling
//! [`Subscription::unsubscribe`]) removes the listener, so listeners never outlive the
//! component that registered them.

// std
use std::sync::{
	Weak,
	atomic::{AtomicU64, Ordering},
};
// self
use crate::{_prelude::*, refresh::RefreshState};

type Listener = Arc<dyn Fn(&ClientEvent) + Send + Sync>;
type ListenerMap = Mutex<BTreeMap<u64, Listener>>;

/// Notifications published by the token store and refresh coordinator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
	/// The auto-refresh timer fired; credentials should be refreshed.
	RefreshNeeded,
	/// A new credential record was stored.
	TokenUpdated {
		/// Expiry of the stored access token.
		expires_at: Option<OffsetDateTime>,
	},
	/// Credentials were removed.
	TokenCleared,
	/// The refresh coordinator changed state.
	RefreshStateChanged(RefreshState),
}

/// Shared fan-out channel. Cloning yields another handle to the same listener set.
#[derive(Clone, Default)]
pub struct EventBus {
	listeners: Arc<ListenerMap>,
	next_id: Arc<AtomicU64>,
}
impl EventBus {
	/// Registers `listener` and returns the handle that keeps it alive.
	pub fn subscribe<F>(&self, listener: F) -> Subscription
	where
		F: 'static + Fn(&ClientEvent) + Send + Sync,
	{
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);

		self.listeners.lock().insert(id, Arc::new(listener));

		Subscription { id, listeners: Arc::downgrade(&self.listeners) }
	}

	/// Delivers `event` to every registered listener.
	///
	/// Listeners run after the registry lock is released, so they may subscribe, unsubscribe,
	/// or publish again.
	pub fn publish(&self, event: ClientEvent) {
		let listeners = self.listeners.lock().values().cloned().collect::<Vec<_>>();

		for listener in listeners {
			listener(&event);
		}
	}

	/// Returns the number of registered listeners.
	pub fn listener_count(&self) -> usize {
		self.listeners.lock().len()
	}
}
impl Debug for EventBus {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("EventBus").field("listeners", &self.listener_count()).finish()
	}
}

/// Handle returned by [`EventBus::subscribe`]; removes the listener when dropped.
#[must_use = "dropping a Subscription unsubscribes the listener immediately"]
pub struct Subscription {
	id: u64,
	listeners: Weak<ListenerMap>,
}
impl Subscription {
	/// Removes the listener now.
	pub fn unsubscribe(self) {
		drop(self);
	}
}
impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(listeners) = self.listeners.upgrade() {
			listeners.lock().remove(&self.id);
		}
	}
}
impl Debug for Subscription {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("Subscription").field(&self.id).finish()
	}
}
