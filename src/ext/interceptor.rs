//! Request and response interceptor contracts.

// self
use crate::{
	_prelude::*,
	http::{ApiResponse, TransportRequest},
};

/// Adjusts an outgoing request right before it reaches the transport.
///
/// Credentials and the request id are already attached. Returning an error aborts the
/// logical request without a transport call; the error is not retried unless it is
/// retryable by policy.
pub trait RequestInterceptor
where
	Self: Send + Sync,
{
	/// Inspects or mutates `request`.
	fn on_request(&self, request: &mut TransportRequest) -> Result<()>;
}
impl<F> RequestInterceptor for F
where
	F: Send + Sync + Fn(&mut TransportRequest) -> Result<()>,
{
	fn on_request(&self, request: &mut TransportRequest) -> Result<()> {
		self(request)
	}
}

/// Observes or adjusts a raw response before the client interprets its status.
pub trait ResponseInterceptor
where
	Self: Send + Sync,
{
	/// Inspects or mutates `response` produced for `request`.
	fn on_response(&self, request: &TransportRequest, response: &mut ApiResponse) -> Result<()>;
}
impl<F> ResponseInterceptor for F
where
	F: Send + Sync + Fn(&TransportRequest, &mut ApiResponse) -> Result<()>,
{
	fn on_response(&self, request: &TransportRequest, response: &mut ApiResponse) -> Result<()> {
		self(request, response)
	}
}

/// Ordered interceptor lists shared by every request of one client.
#[derive(Default)]
pub(crate) struct InterceptorChain {
	requests: RwLock<Vec<Arc<dyn RequestInterceptor>>>,
	responses: RwLock<Vec<Arc<dyn ResponseInterceptor>>>,
}
impl InterceptorChain {
	pub(crate) fn push_request(&self, interceptor: Arc<dyn RequestInterceptor>) {
		self.requests.write().push(interceptor);
	}

	pub(crate) fn push_response(&self, interceptor: Arc<dyn ResponseInterceptor>) {
		self.responses.write().push(interceptor);
	}

	/// Runs request interceptors in registration order, stopping at the first error.
	pub(crate) fn apply_request(&self, request: &mut TransportRequest) -> Result<()> {
		let chain = self.requests.read().clone();

		chain.iter().try_for_each(|interceptor| interceptor.on_request(request))
	}

	/// Runs response interceptors in registration order, stopping at the first error.
	pub(crate) fn apply_response(
		&self,
		request: &TransportRequest,
		response: &mut ApiResponse,
	) -> Result<()> {
		let chain = self.responses.read().clone();

		chain.iter().try_for_each(|interceptor| interceptor.on_response(request, response))
	}

	pub(crate) fn counts(&self) -> (usize, usize) {
		(self.requests.read().len(), self.responses.read().len())
	}
}
