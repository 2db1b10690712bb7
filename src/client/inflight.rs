//! Admission control and cancellation handles for running requests.

// crates.io
use futures::future::{AbortHandle, AbortRegistration};
// self
use crate::{_prelude::*, client::Method, error::Error, obs};

/// Snapshot of one running logical request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InFlightRequest {
	/// Request identifier, also sent as `x-request-id`.
	pub id: String,
	/// Resolved request URL.
	pub url: String,
	/// HTTP method.
	pub method: Method,
	/// Admission time.
	pub started_at: OffsetDateTime,
}

struct Slot {
	request: InFlightRequest,
	abort: AbortHandle,
}

#[derive(Default)]
struct Table {
	next: u64,
	entries: HashMap<u64, Slot>,
}

/// Bounded table of running requests.
///
/// Admission and the cancel-all sweep share one lock, so a request is either drained by the
/// sweep or admitted after it, never both.
pub(crate) struct InFlightTable {
	limit: usize,
	table: Mutex<Table>,
}
impl InFlightTable {
	pub(crate) fn new(limit: usize) -> Arc<Self> {
		Arc::new(Self { limit, table: Mutex::new(Table::default()) })
	}

	pub(crate) fn limit(&self) -> usize {
		self.limit
	}

	/// Registers `request`, or rejects it when the table is full.
	pub(crate) fn admit(
		self: &Arc<Self>,
		request: InFlightRequest,
	) -> Result<(InFlightGuard, AbortRegistration)> {
		let mut table = self.table.lock();

		if table.entries.len() >= self.limit {
			return Err(Error::ConcurrencyLimit { limit: self.limit });
		}

		let (abort, registration) = AbortHandle::new_pair();
		let key = table.next;

		table.next += 1;
		table.entries.insert(key, Slot { request, abort });

		Ok((InFlightGuard { table: Arc::clone(self), key }, registration))
	}

	/// Aborts every request carrying `id`; returns how many were found.
	pub(crate) fn cancel(&self, id: &str) -> usize {
		let cancelled = {
			let mut table = self.table.lock();
			let keys = table
				.entries
				.iter()
				.filter(|(_, slot)| slot.request.id == id)
				.map(|(key, _)| *key)
				.collect::<Vec<_>>();

			keys.into_iter().filter_map(|key| table.entries.remove(&key)).collect::<Vec<_>>()
		};

		for slot in &cancelled {
			slot.abort.abort();
			obs::record_cancellation(&slot.request.id);
		}

		cancelled.len()
	}

	/// Drains the table and aborts every drained request.
	pub(crate) fn cancel_all(&self) -> usize {
		let drained = {
			let mut table = self.table.lock();

			table.entries.drain().map(|(_, slot)| slot).collect::<Vec<_>>()
		};

		for slot in &drained {
			slot.abort.abort();
			obs::record_cancellation(&slot.request.id);
		}

		drained.len()
	}

	pub(crate) fn len(&self) -> usize {
		self.table.lock().entries.len()
	}

	pub(crate) fn snapshot(&self) -> Vec<InFlightRequest> {
		let mut requests =
			self.table.lock().entries.values().map(|slot| slot.request.clone()).collect::<Vec<_>>();

		requests.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));

		requests
	}
}

/// Removes its entry from the table when the request finishes.
pub(crate) struct InFlightGuard {
	table: Arc<InFlightTable>,
	key: u64,
}
impl Drop for InFlightGuard {
	fn drop(&mut self) {
		self.table.table.lock().entries.remove(&self.key);
	}
}
