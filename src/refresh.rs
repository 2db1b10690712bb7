//! Single-flight credential refresh.
//!
//! [`RefreshCoordinator`] keeps at most one refresh cycle in flight. The first caller that
//! needs a fresh token stores a shared future in the coordinator; every later caller clones
//! that same future instead of starting another call, so all of them resume with the token
//! produced by that one cycle. A successful cycle writes the new record into the
//! [`TokenStore`]; a failed cycle clears it and hands the same [`RefreshError`] to every
//! waiter. Either way the coordinator returns to idle before the waiters resume.
//!
//! On a tokio runtime the cycle runs as its own task, so dropping or cancelling every waiter
//! never leaves it half-finished. Without a runtime it runs inside whichever waiter polls it.

mod metrics;

pub use metrics::RefreshMetrics;

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::runtime::Handle;
// self
use crate::{
	_prelude::*,
	auth::{CredentialRecord, TokenSecret},
	client::{Method, generate_request_id},
	clock::Clock,
	error::{ParseError, RefreshError},
	events::{ClientEvent, EventBus, Subscription},
	http::{Transport, TransportRequest},
	obs::{self, OpKind, OpOutcome, OpSpan},
	store::TokenStore,
};

/// Shared handle to a running refresh cycle.
pub type PendingRefresh = Shared<BoxFuture<'static, Result<TokenSecret, RefreshError>>>;

/// Boxed future returned by [`Refresher::refresh`].
pub type RefreshFuture<'a> =
	Pin<Box<dyn Future<Output = Result<RefreshGrant, RefreshError>> + 'a + Send>>;

/// Observable refresh coordinator state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RefreshState {
	/// No refresh is running.
	Idle,
	/// A refresh cycle is running; new callers join it.
	Refreshing,
	/// The last cycle failed; published right before returning to [`RefreshState::Idle`].
	Failed,
}
impl RefreshState {
	/// Returns a stable label suitable for logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			RefreshState::Idle => "idle",
			RefreshState::Refreshing => "refreshing",
			RefreshState::Failed => "failed",
		}
	}
}
impl Display for RefreshState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Credentials returned by a successful refresh call.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshGrant {
	/// New access token.
	pub access_token: TokenSecret,
	/// Rotated refresh token, when the server issued one.
	pub refresh_token: Option<TokenSecret>,
	/// Lifetime of the new access token.
	pub expires_in: Option<Duration>,
}
impl RefreshGrant {
	/// Creates a grant carrying only an access token.
	pub fn new(access_token: impl Into<String>) -> Self {
		Self { access_token: TokenSecret::new(access_token), refresh_token: None, expires_in: None }
	}

	/// Attaches a rotated refresh token.
	pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Sets the lifetime of the new access token.
	pub fn with_expires_in(mut self, lifetime: Duration) -> Self {
		self.expires_in = Some(lifetime);

		self
	}

	/// Builds the record to store, keeping `previous_refresh` when no rotation happened.
	pub fn into_record(self, now: OffsetDateTime, previous_refresh: TokenSecret) -> CredentialRecord {
		CredentialRecord {
			access_token: self.access_token,
			refresh_token: Some(self.refresh_token.unwrap_or(previous_refresh)),
			expires_at: self.expires_in.map(|lifetime| now + lifetime),
		}
	}
}
impl Debug for RefreshGrant {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshGrant")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("expires_in", &self.expires_in)
			.finish()
	}
}

/// Exchanges a refresh token for new credentials.
pub trait Refresher
where
	Self: Send + Sync,
{
	/// Performs one refresh call. Implementations must not retry internally.
	fn refresh<'a>(&'a self, refresh_token: &'a TokenSecret) -> RefreshFuture<'a>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequestBody<'a> {
	refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponseBody {
	#[serde(default)]
	success: bool,
	token: Option<String>,
	refresh_token: Option<String>,
	expires_in: Option<i64>,
}

/// [`Refresher`] speaking the JSON refresh contract over a [`Transport`].
///
/// Sends `POST <endpoint> {"refreshToken": ...}` and expects
/// `{"success": true, "token": ..., "refreshToken"?: ..., "expiresIn"?: <seconds>}`.
pub struct HttpRefresher<T>
where
	T: ?Sized + Transport,
{
	transport: Arc<T>,
	endpoint: Url,
}
impl<T> HttpRefresher<T>
where
	T: ?Sized + Transport,
{
	/// Creates a refresher posting to `endpoint` through `transport`.
	pub fn new(transport: Arc<T>, endpoint: Url) -> Self {
		Self { transport, endpoint }
	}

	/// Returns the refresh endpoint.
	pub fn endpoint(&self) -> &Url {
		&self.endpoint
	}

	async fn exchange(&self, refresh_token: &TokenSecret) -> Result<RefreshGrant, RefreshError> {
		let body = serde_json::to_vec(&RefreshRequestBody { refresh_token: refresh_token.expose() })
			.map_err(|e| RefreshError::Malformed { message: e.to_string() })?;
		let mut request =
			TransportRequest::new(Method::Post, self.endpoint.clone(), generate_request_id());

		request.set_header("content-type", "application/json");
		request.body = Some(body);

		let response = self
			.transport
			.execute(request)
			.await
			.map_err(|e| RefreshError::Network { message: e.to_string() })?;

		if !response.is_success() {
			return Err(RefreshError::Rejected {
				status: Some(response.status),
				reason: format!("refresh endpoint answered HTTP {}", response.status),
			});
		}

		let payload = response.json::<RefreshResponseBody>().map_err(|e| match e {
			ParseError::Json { source, .. } => RefreshError::Malformed { message: source.to_string() },
		})?;
		let token = match (payload.success, payload.token) {
			(true, Some(token)) if !token.is_empty() => token,
			_ => {
				return Err(RefreshError::Rejected {
					status: Some(response.status),
					reason: "refresh response did not carry a token".into(),
				});
			},
		};
		let mut grant = RefreshGrant::new(token);

		if let Some(rotated) = payload.refresh_token.filter(|value| !value.is_empty()) {
			grant = grant.with_refresh_token(rotated);
		}
		if let Some(secs) = payload.expires_in {
			if secs <= 0 {
				return Err(RefreshError::Malformed {
					message: format!("expiresIn must be positive, got {secs}"),
				});
			}

			grant = grant.with_expires_in(Duration::seconds(secs));
		}

		Ok(grant)
	}
}
impl<T> Refresher for HttpRefresher<T>
where
	T: ?Sized + Transport,
{
	fn refresh<'a>(&'a self, refresh_token: &'a TokenSecret) -> RefreshFuture<'a> {
		Box::pin(self.exchange(refresh_token))
	}
}
impl<T> Debug for HttpRefresher<T>
where
	T: ?Sized + Transport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("HttpRefresher").field("endpoint", &self.endpoint.as_str()).finish()
	}
}

enum Slot {
	Idle,
	Refreshing { cycle: u64, pending: PendingRefresh },
}

enum Trigger<'a> {
	Explicit,
	Rejected(Option<&'a TokenSecret>),
}

enum Ticket {
	Ready(TokenSecret),
	Wait(PendingRefresh),
}

/// Guarantees at most one in-flight credential refresh.
pub struct RefreshCoordinator {
	tokens: Arc<TokenStore>,
	refresher: Arc<dyn Refresher>,
	clock: Arc<dyn Clock>,
	events: EventBus,
	metrics: Arc<RefreshMetrics>,
	next_cycle: AtomicU64,
	slot: Mutex<Slot>,
}
impl RefreshCoordinator {
	/// Creates a coordinator refreshing credentials held by `tokens`.
	pub fn new(
		tokens: Arc<TokenStore>,
		refresher: Arc<dyn Refresher>,
		clock: Arc<dyn Clock>,
		events: EventBus,
	) -> Arc<Self> {
		Arc::new(Self {
			tokens,
			refresher,
			clock,
			events,
			metrics: Default::default(),
			next_cycle: AtomicU64::new(0),
			slot: Mutex::new(Slot::Idle),
		})
	}

	/// Returns the current state tag.
	pub fn state(&self) -> RefreshState {
		match *self.slot.lock() {
			Slot::Idle => RefreshState::Idle,
			Slot::Refreshing { .. } => RefreshState::Refreshing,
		}
	}

	/// Returns the running cycle, if any, so callers can await its token.
	pub fn pending(&self) -> Option<PendingRefresh> {
		match &*self.slot.lock() {
			Slot::Idle => None,
			Slot::Refreshing { pending, .. } => {
				self.metrics.record_join();

				Some(pending.clone())
			},
		}
	}

	/// Returns the refresh counters.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.metrics
	}

	/// Joins the running cycle or starts a new one.
	pub async fn refresh_once(self: &Arc<Self>) -> Result<TokenSecret, RefreshError> {
		self.join_or_start(Trigger::Explicit).await
	}

	/// Refreshes after the server rejected `rejected`.
	///
	/// When no cycle is running and the store already holds a valid token other than the
	/// rejected one, that token is returned without another refresh call.
	pub async fn refresh_after_rejection(
		self: &Arc<Self>,
		rejected: Option<&TokenSecret>,
	) -> Result<TokenSecret, RefreshError> {
		self.join_or_start(Trigger::Rejected(rejected)).await
	}

	/// Refreshes whenever the store publishes [`ClientEvent::RefreshNeeded`].
	///
	/// The listener holds only a weak reference and is removed when the returned
	/// [`Subscription`] is dropped. Signals are ignored without a refresh token or a tokio
	/// runtime.
	pub fn watch(self: &Arc<Self>, events: &EventBus) -> Subscription {
		let coordinator = Arc::downgrade(self);

		events.subscribe(move |event| {
			if !matches!(event, ClientEvent::RefreshNeeded) {
				return;
			}

			let Some(coordinator) = coordinator.upgrade() else {
				return;
			};

			if coordinator.tokens.get_refresh_token().is_none() {
				return;
			}

			let Ok(runtime) = Handle::try_current() else {
				obs::record_timer_skipped("no tokio runtime for refresh");

				return;
			};

			runtime.spawn(async move {
				// Outcome is logged by the cycle itself.
				let _ = coordinator.refresh_once().await;
			});
		})
	}

	async fn join_or_start(self: &Arc<Self>, trigger: Trigger<'_>) -> Result<TokenSecret, RefreshError> {
		let ticket = {
			let mut slot = self.slot.lock();

			match &*slot {
				Slot::Refreshing { pending, .. } => {
					self.metrics.record_join();

					Ticket::Wait(pending.clone())
				},
				Slot::Idle => match self.reusable_token(&trigger) {
					Some(token) => {
						self.metrics.record_reuse();

						Ticket::Ready(token)
					},
					None => {
						let cycle = self.next_cycle.fetch_add(1, Ordering::Relaxed) + 1;
						let pending = self.start_cycle(cycle);

						*slot = Slot::Refreshing { cycle, pending: pending.clone() };

						Ticket::Wait(pending)
					},
				},
			}
		};

		match ticket {
			Ticket::Ready(token) => Ok(token),
			Ticket::Wait(pending) => pending.await,
		}
	}

	fn start_cycle(self: &Arc<Self>, cycle: u64) -> PendingRefresh {
		let run = Arc::clone(self).run_cycle(cycle);
		let Ok(runtime) = Handle::try_current() else {
			return run.boxed().shared();
		};
		let coordinator = Arc::downgrade(self);

		runtime
			.spawn(run)
			.map(move |joined| {
				joined.unwrap_or_else(|e| {
					if let Some(coordinator) = coordinator.upgrade() {
						coordinator.release(cycle);
					}

					Err(RefreshError::Interrupted { message: e.to_string() })
				})
			})
			.boxed()
			.shared()
	}

	/// Returns the slot to idle if `cycle` still owns it.
	fn release(&self, cycle: u64) {
		let mut slot = self.slot.lock();

		if matches!(&*slot, Slot::Refreshing { cycle: current, .. } if *current == cycle) {
			*slot = Slot::Idle;
		}
	}

	fn reusable_token(&self, trigger: &Trigger<'_>) -> Option<TokenSecret> {
		let Trigger::Rejected(rejected) = trigger else {
			return None;
		};

		self.tokens.valid_access_token().filter(|current| Some(current) != *rejected)
	}

	async fn run_cycle(self: Arc<Self>, cycle: u64) -> Result<TokenSecret, RefreshError> {
		const KIND: OpKind = OpKind::Refresh;

		let span = OpSpan::new(KIND, "refresh_cycle");

		self.events.publish(ClientEvent::RefreshStateChanged(RefreshState::Refreshing));
		obs::record_op_outcome(KIND, OpOutcome::Attempt);
		self.metrics.record_cycle();

		let result = span
			.instrument(async {
				let refresh_token =
					self.tokens.get_refresh_token().ok_or(RefreshError::MissingRefreshToken)?;
				let grant = self.refresher.refresh(&refresh_token).await?;
				let record = grant.into_record(self.clock.now(), refresh_token);
				let access_token = record.access_token.clone();

				self.tokens.set(record);

				Ok::<_, RefreshError>(access_token)
			})
			.await;

		match &result {
			Ok(_) => self.metrics.record_success(),
			Err(_) => {
				self.tokens.clear();
				self.metrics.record_failure();
			},
		}

		obs::record_refresh_result(cycle, result.as_ref().map(|_| ()));

		self.release(cycle);

		if result.is_err() {
			self.events.publish(ClientEvent::RefreshStateChanged(RefreshState::Failed));
			obs::record_op_outcome(KIND, OpOutcome::Failure);
		} else {
			obs::record_op_outcome(KIND, OpOutcome::Success);
		}

		self.events.publish(ClientEvent::RefreshStateChanged(RefreshState::Idle));

		result
	}
}
impl Debug for RefreshCoordinator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshCoordinator")
			.field("state", &self.state())
			.field("metrics", &self.metrics)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::AtomicUsize;
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::{
		clock::ManualClock,
		store::{MemoryStorage, TokenStoreOptions},
	};

	struct ScriptedRefresher {
		calls: AtomicUsize,
		delay: std::time::Duration,
		outcome: Result<RefreshGrant, RefreshError>,
	}
	impl ScriptedRefresher {
		fn succeeding(token: &str) -> Self {
			Self::succeeding_for(token, Duration::hours(1))
		}

		fn succeeding_for(token: &str, lifetime: Duration) -> Self {
			Self {
				calls: AtomicUsize::new(0),
				delay: std::time::Duration::from_millis(50),
				outcome: Ok(RefreshGrant::new(token).with_expires_in(lifetime)),
			}
		}

		fn failing() -> Self {
			Self {
				calls: AtomicUsize::new(0),
				delay: std::time::Duration::from_millis(50),
				outcome: Err(RefreshError::Rejected {
					status: Some(401),
					reason: "refresh token revoked".into(),
				}),
			}
		}
	}
	impl Refresher for ScriptedRefresher {
		fn refresh<'a>(&'a self, _refresh_token: &'a TokenSecret) -> RefreshFuture<'a> {
			Box::pin(async move {
				self.calls.fetch_add(1, Ordering::SeqCst);
				tokio::time::sleep(self.delay).await;

				self.outcome.clone()
			})
		}
	}

	struct Harness {
		tokens: Arc<TokenStore>,
		refresher: Arc<ScriptedRefresher>,
		coordinator: Arc<RefreshCoordinator>,
		events: EventBus,
		clock: Arc<ManualClock>,
	}

	fn harness(refresher: ScriptedRefresher) -> Harness {
		harness_with(refresher, TokenStoreOptions { auto_refresh: false, ..Default::default() })
	}

	fn harness_with(refresher: ScriptedRefresher, options: TokenStoreOptions) -> Harness {
		let clock = Arc::new(ManualClock::new(macros::datetime!(2025-06-01 09:00 UTC)));
		let events = EventBus::default();
		let tokens = Arc::new(TokenStore::open(
			Arc::new(MemoryStorage::default()),
			clock.clone(),
			events.clone(),
			options,
		));
		let refresher = Arc::new(refresher);
		let coordinator =
			RefreshCoordinator::new(tokens.clone(), refresher.clone(), clock.clone(), events.clone());

		tokens.set(
			CredentialRecord::new("old-access")
				.with_refresh_token("old-refresh")
				.with_expires_in(clock.now(), Duration::seconds(30)),
		);

		Harness { tokens, refresher, coordinator, events, clock }
	}

	#[tokio::test(start_paused = true)]
	async fn concurrent_callers_share_one_cycle() {
		let h = harness(ScriptedRefresher::succeeding("new-access"));
		let results = futures::future::join_all(
			(0..8).map(|_| {
				let coordinator = h.coordinator.clone();

				async move { coordinator.refresh_once().await }
			}),
		)
		.await;

		assert_eq!(h.refresher.calls.load(Ordering::SeqCst), 1);
		assert_eq!(h.coordinator.metrics().cycles(), 1);
		assert_eq!(h.coordinator.metrics().joins(), 7);

		for result in results {
			assert_eq!(result.expect("Every waiter should receive the token.").expose(), "new-access");
		}

		let record = h.tokens.record().expect("Refreshed record should be stored.");

		assert_eq!(record.refresh_token.map(|t| t.expose().to_owned()), Some("old-refresh".into()));
		assert_eq!(record.expires_at, Some(h.clock.now() + Duration::hours(1)));
		assert_eq!(h.coordinator.state(), RefreshState::Idle);
	}

	#[tokio::test(start_paused = true)]
	async fn failure_reaches_every_waiter_and_clears_store() {
		let h = harness(ScriptedRefresher::failing());
		let states = Arc::new(Mutex::new(Vec::new()));
		let sink = states.clone();
		let _sub = h.events.subscribe(move |event| {
			if let ClientEvent::RefreshStateChanged(state) = event {
				sink.lock().push(*state);
			}
		});
		let (a, b) = tokio::join!(h.coordinator.refresh_once(), h.coordinator.refresh_once());
		let a = a.expect_err("First waiter should see the failure.");
		let b = b.expect_err("Second waiter should see the failure.");

		assert_eq!(a, b);
		assert_eq!(h.refresher.calls.load(Ordering::SeqCst), 1);
		assert!(h.tokens.record().is_none());
		assert_eq!(h.coordinator.state(), RefreshState::Idle);
		assert_eq!(
			*states.lock(),
			vec![RefreshState::Refreshing, RefreshState::Failed, RefreshState::Idle]
		);
	}

	#[tokio::test(start_paused = true)]
	async fn later_cycle_starts_cleanly_after_failure() {
		let h = harness(ScriptedRefresher::failing());

		h.coordinator.refresh_once().await.expect_err("Scripted refresh fails.");

		let err = h.coordinator.refresh_once().await.expect_err("No refresh token remains.");

		assert_eq!(err, RefreshError::MissingRefreshToken);
		assert_eq!(h.refresher.calls.load(Ordering::SeqCst), 1);
		assert_eq!(h.coordinator.metrics().cycles(), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn rejection_reuses_token_refreshed_in_between() {
		let h = harness(ScriptedRefresher::succeeding("new-access"));
		let stale = TokenSecret::new("old-access");

		h.coordinator.refresh_once().await.expect("Initial refresh should succeed.");

		let token = h
			.coordinator
			.refresh_after_rejection(Some(&stale))
			.await
			.expect("Rejection after a finished refresh should reuse the new token.");

		assert_eq!(token.expose(), "new-access");
		assert_eq!(h.refresher.calls.load(Ordering::SeqCst), 1);
		assert_eq!(h.coordinator.metrics().reuses(), 1);

		let current = TokenSecret::new("new-access");

		h.coordinator
			.refresh_after_rejection(Some(&current))
			.await
			.expect("Rejecting the current token should refresh again.");

		assert_eq!(h.refresher.calls.load(Ordering::SeqCst), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn pending_hands_out_the_running_cycle() {
		let h = harness(ScriptedRefresher::succeeding("new-access"));

		assert!(h.coordinator.pending().is_none());

		let coordinator = h.coordinator.clone();
		let first = tokio::spawn(async move { coordinator.refresh_once().await });

		tokio::task::yield_now().await;

		let pending = h.coordinator.pending().expect("A cycle should be running.");

		assert_eq!(h.coordinator.state(), RefreshState::Refreshing);
		assert_eq!(pending.await.expect("Joined cycle should succeed.").expose(), "new-access");
		assert_eq!(
			first.await.expect("Task should not panic.").expect("Cycle should succeed.").expose(),
			"new-access"
		);
	}

	#[tokio::test(start_paused = true)]
	async fn watch_refreshes_on_signal() {
		let h = harness(ScriptedRefresher::succeeding("timer-access"));
		let _watch = h.coordinator.watch(&h.events);

		h.events.publish(ClientEvent::RefreshNeeded);
		tokio::time::sleep(std::time::Duration::from_millis(100)).await;

		assert_eq!(h.refresher.calls.load(Ordering::SeqCst), 1);
		assert_eq!(
			h.tokens.valid_access_token().map(|t| t.expose().to_owned()),
			Some("timer-access".into())
		);
	}

	#[tokio::test(start_paused = true)]
	async fn abandoned_waiter_does_not_stall_the_cycle() {
		let h = harness(ScriptedRefresher::succeeding("new-access"));
		let abandoned = tokio::time::timeout(
			std::time::Duration::from_millis(5),
			h.coordinator.refresh_once(),
		)
		.await;

		assert!(abandoned.is_err());
		assert_eq!(h.coordinator.state(), RefreshState::Refreshing);

		tokio::time::sleep(std::time::Duration::from_millis(100)).await;

		assert_eq!(h.coordinator.state(), RefreshState::Idle);
		assert_eq!(h.refresher.calls.load(Ordering::SeqCst), 1);
		assert_eq!(
			h.tokens.valid_access_token().map(|t| t.expose().to_owned()),
			Some("new-access".into())
		);
	}

	#[tokio::test(start_paused = true)]
	async fn short_lived_tokens_do_not_retrigger_the_timer() {
		let h = harness_with(
			ScriptedRefresher::succeeding_for("short", Duration::seconds(60)),
			TokenStoreOptions::default(),
		);
		let _watch = h.coordinator.watch(&h.events);

		h.tokens.set(
			CredentialRecord::new("seed")
				.with_refresh_token("seed-refresh")
				.with_expires_in(h.clock.now(), Duration::seconds(60)),
		);
		tokio::time::sleep(std::time::Duration::from_millis(100)).await;

		assert_eq!(h.refresher.calls.load(Ordering::SeqCst), 0);

		tokio::time::sleep(std::time::Duration::from_secs(31)).await;

		assert_eq!(h.refresher.calls.load(Ordering::SeqCst), 1);

		tokio::time::sleep(std::time::Duration::from_secs(1)).await;

		assert_eq!(h.refresher.calls.load(Ordering::SeqCst), 1);
		assert_eq!(h.coordinator.state(), RefreshState::Idle);
	}

	#[test]
	fn grant_rotation_replaces_refresh_token() {
		let now = macros::datetime!(2025-06-01 09:00 UTC);
		let record = RefreshGrant::new("a")
			.with_refresh_token("rotated")
			.into_record(now, TokenSecret::new("previous"));

		assert_eq!(record.refresh_token.map(|t| t.expose().to_owned()), Some("rotated".into()));
		assert_eq!(record.expires_at, None);
	}
}
