//! Request coordination: credentials, retries, caching, admission, and cancellation.
//!
//! [`ApiClient::send`] drives one logical request through an explicit attempt loop:
//!
//! 1. A cacheable `GET` is answered from the [`ResponseCache`] when a fresh entry exists.
//! 2. The request is admitted into the bounded in-flight table (or rejected with
//!    [`Error::ConcurrencyLimit`]) and receives its cancel handle and request id.
//! 3. Credentials are resolved: a running refresh is awaited, an expired or soon-expiring
//!    token is refreshed first, and a refresh failure ends the request before any network
//!    call.
//! 4. A `401` triggers exactly one refresh and one resend; a second `401` surfaces
//!    [`Error::AuthExpired`].
//! 5. Other failures ask [`should_retry`]; a granted retry sleeps only this request.
//! 6. A successful cacheable response is stored before the request leaves the in-flight
//!    table.

mod inflight;
mod request;

pub use inflight::InFlightRequest;
pub use request::*;

// crates.io
use futures::future::{Abortable, Aborted};
use rand::Rng;
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::{CredentialRecord, TokenSecret},
	cache::{ResponseCache, cache_key},
	clock::{Clock, SystemClock},
	config::ClientConfig,
	events::{ClientEvent, EventBus, Subscription},
	ext::{InterceptorChain, RequestInterceptor, ResponseInterceptor},
	http::{ApiResponse, REQUEST_ID_HEADER, Transport, TransportRequest},
	obs::{self, OpKind, OpOutcome, OpSpan},
	refresh::{HttpRefresher, RefreshCoordinator, Refresher},
	retry::{RetryDecision, should_retry},
	store::{CredentialStorage, MemoryStorage, TokenStore},
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestTransport;
use inflight::InFlightTable;

/// Bytes of an error body kept in [`Error::HttpStatus`].
const BODY_PREVIEW_LIMIT: usize = 512;

/// Client alias using the reqwest transport.
#[cfg(feature = "reqwest")]
pub type ReqwestApiClient = ApiClient<ReqwestTransport>;

/// Generates a request identifier of the form `req-<16 hex digits>`.
pub fn generate_request_id() -> String {
	format!("req-{:016x}", rand::rng().random::<u64>())
}

/// Wires a transport, credential storage, clock, and refresher into an [`ApiClient`].
pub struct ApiClientBuilder<T>
where
	T: ?Sized + Transport,
{
	transport: Arc<T>,
	config: ClientConfig,
	storage: Option<Arc<dyn CredentialStorage>>,
	clock: Option<Arc<dyn Clock>>,
	refresher: Option<Arc<dyn Refresher>>,
	events: Option<EventBus>,
}
impl<T> ApiClientBuilder<T>
where
	T: ?Sized + Transport,
{
	/// Starts a builder around `transport` with default configuration.
	pub fn new(transport: Arc<T>) -> Self {
		Self {
			transport,
			config: ClientConfig::default(),
			storage: None,
			clock: None,
			refresher: None,
			events: None,
		}
	}

	/// Replaces the configuration.
	pub fn config(mut self, config: ClientConfig) -> Self {
		self.config = config;

		self
	}

	/// Persists credentials in `storage` instead of process memory.
	pub fn storage(mut self, storage: Arc<dyn CredentialStorage>) -> Self {
		self.storage = Some(storage);

		self
	}

	/// Overrides the wall clock used for expiry and TTL checks.
	pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = Some(clock);

		self
	}

	/// Overrides the refresher; defaults to [`HttpRefresher`] on the configured endpoint.
	pub fn refresher(mut self, refresher: Arc<dyn Refresher>) -> Self {
		self.refresher = Some(refresher);

		self
	}

	/// Shares an existing event bus.
	pub fn events(mut self, events: EventBus) -> Self {
		self.events = Some(events);

		self
	}

	/// Validates the configuration and assembles the client.
	pub fn build(self) -> Result<ApiClient<T>> {
		self.config.validate()?;

		let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
		let events = self.events.unwrap_or_default();
		let storage = self.storage.unwrap_or_else(|| Arc::new(MemoryStorage::default()));
		let refresher: Arc<dyn Refresher> = match self.refresher {
			Some(refresher) => refresher,
			None => {
				let endpoint = self.config.auth.refresh_url(self.config.base_url.as_ref())?;

				Arc::new(HttpRefresher::new(self.transport.clone(), endpoint))
			},
		};
		let tokens = Arc::new(TokenStore::open(
			storage,
			clock.clone(),
			events.clone(),
			self.config.auth.store_options(),
		));
		let refresh = RefreshCoordinator::new(tokens.clone(), refresher, clock.clone(), events.clone());
		let auto_refresh = self.config.auth.auto_refresh.then(|| refresh.watch(&events));
		let cache = Arc::new(ResponseCache::new(&self.config.cache, clock.clone()));
		let in_flight = InFlightTable::new(self.config.max_concurrent);

		Ok(ApiClient {
			transport: self.transport,
			config: self.config,
			clock,
			events,
			tokens,
			cache,
			refresh,
			in_flight,
			interceptors: InterceptorChain::default(),
			_auto_refresh: auto_refresh,
		})
	}
}
#[cfg(feature = "reqwest")]
impl ApiClientBuilder<ReqwestTransport> {
	/// Starts a builder on a default reqwest transport.
	pub fn reqwest() -> Self {
		Self::new(Arc::new(ReqwestTransport::default()))
	}
}

/// Resilient API client.
///
/// All state is owned by the instance, so separate clients never share credentials, cache
/// entries, or in-flight requests.
pub struct ApiClient<T>
where
	T: ?Sized + Transport,
{
	transport: Arc<T>,
	config: ClientConfig,
	clock: Arc<dyn Clock>,
	events: EventBus,
	tokens: Arc<TokenStore>,
	cache: Arc<ResponseCache>,
	refresh: Arc<RefreshCoordinator>,
	in_flight: Arc<InFlightTable>,
	interceptors: InterceptorChain,
	_auto_refresh: Option<Subscription>,
}
impl<T> ApiClient<T>
where
	T: ?Sized + Transport,
{
	/// Starts an [`ApiClientBuilder`].
	pub fn builder(transport: Arc<T>) -> ApiClientBuilder<T> {
		ApiClientBuilder::new(transport)
	}

	/// Sends one logical request, including any refresh, retries, and cache handling.
	pub async fn send(&self, descriptor: RequestDescriptor) -> Result<ApiResponse> {
		const KIND: OpKind = OpKind::Send;

		let span = OpSpan::new(KIND, "send");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span.instrument(self.send_inner(descriptor)).await;
		let outcome = if result.is_ok() { OpOutcome::Success } else { OpOutcome::Failure };

		obs::record_op_outcome(KIND, outcome);

		result
	}

	/// Sends `descriptor` and decodes a successful body as JSON.
	pub async fn send_json<R>(&self, descriptor: RequestDescriptor) -> Result<R>
	where
		R: DeserializeOwned,
	{
		let response = self.send(descriptor).await?;

		Ok(response.json()?)
	}

	/// Cancels the running request with `request_id`. Returns `false` when none matched.
	pub fn cancel(&self, request_id: &str) -> bool {
		self.in_flight.cancel(request_id) > 0
	}

	/// Cancels every running request and returns how many were cancelled.
	pub fn cancel_all(&self) -> usize {
		self.in_flight.cancel_all()
	}

	/// Lists running requests, oldest first.
	pub fn in_flight(&self) -> Vec<InFlightRequest> {
		self.in_flight.snapshot()
	}

	/// Returns the number of running requests.
	pub fn in_flight_count(&self) -> usize {
		self.in_flight.len()
	}

	/// Returns the access token, clearing stored credentials if it has expired.
	pub fn get_access_token(&self) -> Option<TokenSecret> {
		self.tokens.get_access_token()
	}

	/// Returns `true` when an unexpired access token is stored.
	pub fn has_valid_token(&self) -> bool {
		self.tokens.has_valid_token()
	}

	/// Stores credentials obtained by a login outside this client.
	pub fn set_token(&self, record: CredentialRecord) {
		self.tokens.set(record);
	}

	/// Forgets stored credentials.
	pub fn clear_token(&self) {
		self.tokens.clear();
	}

	/// Subscribes to client events.
	pub fn subscribe<F>(&self, listener: F) -> Subscription
	where
		F: 'static + Send + Sync + Fn(&ClientEvent),
	{
		self.events.subscribe(listener)
	}

	/// Appends a request interceptor.
	pub fn add_request_interceptor<I>(&self, interceptor: I)
	where
		I: 'static + RequestInterceptor,
	{
		self.interceptors.push_request(Arc::new(interceptor));
	}

	/// Appends a response interceptor.
	pub fn add_response_interceptor<I>(&self, interceptor: I)
	where
		I: 'static + ResponseInterceptor,
	{
		self.interceptors.push_response(Arc::new(interceptor));
	}

	/// Returns the configuration.
	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	/// Returns the transport.
	pub fn transport(&self) -> &Arc<T> {
		&self.transport
	}

	/// Returns the credential store.
	pub fn tokens(&self) -> &Arc<TokenStore> {
		&self.tokens
	}

	/// Returns the response cache.
	pub fn cache(&self) -> &Arc<ResponseCache> {
		&self.cache
	}

	/// Returns the refresh coordinator.
	pub fn refresh(&self) -> &Arc<RefreshCoordinator> {
		&self.refresh
	}

	/// Returns the event bus.
	pub fn events(&self) -> &EventBus {
		&self.events
	}

	async fn send_inner(&self, descriptor: RequestDescriptor) -> Result<ApiResponse> {
		let url = descriptor.resolve_url(self.config.base_url.as_ref())?;
		let cache_key = self
			.is_cacheable(&descriptor)
			.then(|| cache_key(descriptor.method, &url, descriptor.body.as_deref()));

		if let Some(entry) = cache_key.as_deref().and_then(|key| self.cache.get(key)) {
			return Ok(entry.payload);
		}

		let request_id = descriptor.request_id.clone().unwrap_or_else(generate_request_id);
		let (_guard, registration) = self.in_flight.admit(InFlightRequest {
			id: request_id.clone(),
			url: url.to_string(),
			method: descriptor.method,
			started_at: self.clock.now(),
		})?;
		let attempts = self.run_attempts(&descriptor, &url, &request_id);
		let response = match Abortable::new(attempts, registration).await {
			Ok(result) => result?,
			Err(Aborted) => return Err(Error::Cancelled { request_id }),
		};

		if let Some(key) = cache_key {
			self.cache.put(
				key,
				response.clone(),
				descriptor.cache_ttl,
				url.as_str(),
				descriptor.method,
			);
		}

		Ok(response)
	}

	fn is_cacheable(&self, descriptor: &RequestDescriptor) -> bool {
		descriptor.method.is_cacheable() && !descriptor.skip_cache && self.cache.is_enabled()
	}

	async fn run_attempts(
		&self,
		descriptor: &RequestDescriptor,
		url: &Url,
		request_id: &str,
	) -> Result<ApiResponse> {
		let retry = match &descriptor.retry {
			Some(overrides) => self.config.retry.merged(overrides),
			None => self.config.retry.clone(),
		};
		let mut attempt = 1;
		let mut refreshed_after_rejection = false;
		let mut token = self.authorize(descriptor).await?;

		loop {
			let error = match self.execute_once(descriptor, url, request_id, token.as_ref()).await {
				Ok(response) => return Ok(response),
				Err(e) => e,
			};

			if matches!(error, Error::AuthExpired { .. })
				&& !descriptor.skip_auth
				&& !refreshed_after_rejection
			{
				refreshed_after_rejection = true;
				token = Some(self.refresh.refresh_after_rejection(token.as_ref()).await?);

				continue;
			}

			match should_retry(&error, descriptor.method, attempt, &retry) {
				RetryDecision::Retry { delay } => {
					obs::record_retry(request_id, descriptor.method, attempt, delay, &error);
					tokio::time::sleep(delay.max(Duration::ZERO).unsigned_abs()).await;

					attempt += 1;
					token = self.authorize(descriptor).await?;
				},
				RetryDecision::Stop(_) => return Err(error),
			}
		}
	}

	/// Resolves the token to attach, refreshing first when it is unusable.
	async fn authorize(&self, descriptor: &RequestDescriptor) -> Result<Option<TokenSecret>> {
		if descriptor.skip_auth {
			return Ok(None);
		}
		if let Some(pending) = self.refresh.pending() {
			return Ok(Some(pending.await?));
		}

		let Some(record) = self.tokens.record() else {
			return Ok(None);
		};
		let now = self.clock.now();
		let stale = record.is_expired_at(now)
			|| (record.is_refreshable()
				&& record.is_expiring_within(now, self.config.auth.refresh_buffer));

		if stale {
			return Ok(Some(self.refresh.refresh_once().await?));
		}

		Ok(Some(record.access_token))
	}

	async fn execute_once(
		&self,
		descriptor: &RequestDescriptor,
		url: &Url,
		request_id: &str,
		token: Option<&TokenSecret>,
	) -> Result<ApiResponse> {
		let mut request = TransportRequest::new(descriptor.method, url.clone(), request_id);

		request.headers = descriptor.headers.clone();
		request.body = descriptor.body.clone();

		if let Some(token) = token {
			request.set_header("authorization", token.bearer());
		}

		request.set_header(REQUEST_ID_HEADER, request_id);
		self.interceptors.apply_request(&mut request)?;

		let mut response = self.transport.execute(request.clone()).await?;

		self.interceptors.apply_response(&request, &mut response)?;

		if response.is_success() {
			return Ok(response);
		}
		if response.status == 401 {
			return Err(Error::AuthExpired { url: url.to_string() });
		}

		Err(Error::HttpStatus {
			status: response.status,
			retry_after: response.retry_after(self.clock.now()),
			body_preview: response.body_preview(BODY_PREVIEW_LIMIT),
		})
	}
}
impl<T> Debug for ApiClient<T>
where
	T: ?Sized + Transport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let (request_interceptors, response_interceptors) = self.interceptors.counts();

		f.debug_struct("ApiClient")
			.field("base_url", &self.config.base_url.as_ref().map(Url::as_str))
			.field("in_flight", &self.in_flight.len())
			.field("max_concurrent", &self.in_flight.limit())
			.field("cached", &self.cache.len())
			.field("refresh", &self.refresh.state())
			.field("request_interceptors", &request_interceptors)
			.field("response_interceptors", &response_interceptors)
			.finish()
	}
}
