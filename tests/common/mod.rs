//! Shared fixtures for reqwest-backed integration tests.

#![allow(dead_code)]

// std
use std::{path::PathBuf, sync::Arc};
// crates.io
use httpmock::MockServer;
use time::Duration;
// self
use api_client_core::{
	client::{ApiClient, ReqwestApiClient},
	config::{AuthConfig, ClientConfig},
	http::ReqwestTransport,
	reqwest::Client,
	retry::RetryConfig,
	store::CredentialStorage,
};

/// Builds a reqwest transport that accepts the self-signed certificates produced by
/// `httpmock`.
pub fn insecure_transport() -> ReqwestTransport {
	let client = Client::builder()
		.danger_accept_invalid_certs(true)
		.danger_accept_invalid_hostnames(true)
		.build()
		.expect("Failed to build insecure Reqwest client for tests.");

	ReqwestTransport::with_client(client)
}

/// Configuration rooted at the mock server with short backoff and no refresh timer.
pub fn config(server: &MockServer) -> ClientConfig {
	ClientConfig::new(server.base_url())
		.expect("Mock server base URL should parse.")
		.with_retry(RetryConfig::default().with_base_delay(Duration::milliseconds(10)))
		.with_auth(AuthConfig::default().with_auto_refresh(false))
}

/// Builds a client with in-memory credentials.
pub fn client(config: ClientConfig) -> ReqwestApiClient {
	ApiClient::builder(Arc::new(insecure_transport()))
		.config(config)
		.build()
		.expect("Client fixture should build.")
}

/// Builds a client persisting credentials in `storage`.
pub fn client_with_storage(
	config: ClientConfig,
	storage: Arc<dyn CredentialStorage>,
) -> ReqwestApiClient {
	ApiClient::builder(Arc::new(insecure_transport()))
		.config(config)
		.storage(storage)
		.build()
		.expect("Client fixture should build.")
}

/// Returns a unique path under the system temp directory.
pub fn temp_path(label: &str) -> PathBuf {
	let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();

	std::env::temp_dir()
		.join(format!("api-client-core-{label}-{}-{nanos}", std::process::id()))
		.join("credentials.json")
}
