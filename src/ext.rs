//! Extension points for callers that need to observe or adjust traffic.
//!
//! Interceptors run inside the client's attempt loop, once per transport call, so a retried
//! request passes through them again.

pub mod interceptor;

pub use interceptor::*;
