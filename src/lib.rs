//! Resilient API client core: bearer credentials with single-flight refresh, bounded retries,
//! TTL response caching, and cancellable in-flight requests in one crate built for production.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod ext;
pub mod http;
pub mod obs;
pub mod refresh;
pub mod retry;
pub mod store;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for tests; enabled via `cfg(test)` or the `test`
	//! crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		clock::ManualClock,
		error::TransportError,
		http::{ApiResponse, Transport, TransportFuture, TransportRequest},
	};

	type Handler =
		dyn Fn(&TransportRequest) -> Result<ApiResponse, TransportError> + Send + Sync;

	/// In-process [`Transport`] answering every request through a closure.
	///
	/// Every request is logged before the optional latency elapses, so in-progress calls are
	/// already visible to [`ScriptedTransport::calls`].
	pub struct ScriptedTransport {
		handler: Box<Handler>,
		latency: std::time::Duration,
		log: Mutex<Vec<TransportRequest>>,
	}
	impl ScriptedTransport {
		/// Creates a transport that answers with `handler`.
		pub fn new<F>(handler: F) -> Self
		where
			F: 'static + Send + Sync + Fn(&TransportRequest) -> Result<ApiResponse, TransportError>,
		{
			Self { handler: Box::new(handler), latency: Default::default(), log: Default::default() }
		}

		/// Delays every answer by `latency` (tokio time, so paused clocks apply).
		pub fn with_latency(mut self, latency: std::time::Duration) -> Self {
			self.latency = latency;

			self
		}

		/// Returns every request seen so far, in arrival order.
		pub fn calls(&self) -> Vec<TransportRequest> {
			self.log.lock().clone()
		}

		/// Returns the number of requests seen so far.
		pub fn call_count(&self) -> usize {
			self.log.lock().len()
		}

		/// Returns the number of requests whose URL path equals `path`.
		pub fn calls_to(&self, path: &str) -> usize {
			self.log.lock().iter().filter(|request| request.url.path() == path).count()
		}
	}
	impl Transport for ScriptedTransport {
		fn execute(&self, request: TransportRequest) -> TransportFuture<'_> {
			Box::pin(async move {
				self.log.lock().push(request.clone());

				if !self.latency.is_zero() {
					tokio::time::sleep(self.latency).await;
				}

				(self.handler)(&request)
			})
		}
	}

	/// Builds a JSON response with the given status.
	pub fn json_response(status: u16, body: serde_json::Value) -> ApiResponse {
		ApiResponse::new(status, body.to_string().into_bytes())
			.with_header("content-type", "application/json")
	}

	/// Builds a network failure for `request`.
	pub fn network_failure(request: &TransportRequest) -> TransportError {
		TransportError::network(request.url.as_str(), std::io::Error::other("connection reset"))
	}

	/// Returns a manual clock frozen at a fixed instant.
	pub fn manual_clock() -> Arc<ManualClock> {
		Arc::new(ManualClock::new(time::macros::datetime!(2025-06-01 09:00 UTC)))
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		hash::Hash,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
