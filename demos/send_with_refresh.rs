//! Demonstrates a client whose access token is rejected once: the first `401` triggers a
//! single refresh against the mock refresh endpoint, the request is resent with the new
//! token, and the successful `GET` is then served from the response cache.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
// self
use api_client_core::{
	auth::CredentialRecord,
	client::{ApiClient, RequestDescriptor},
	config::{AuthConfig, ClientConfig},
	events::ClientEvent,
	http::ReqwestTransport,
	reqwest::Client,
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let refresh_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/auth/refresh");
			then.status(200).header("content-type", "application/json").body(
				"{\"success\":true,\"token\":\"demo-fresh\",\"refreshToken\":\"demo-refresh-2\",\"expiresIn\":900}",
			);
		})
		.await;
	let _rejected = server
		.mock_async(|when, then| {
			when.method(GET).path("/projects").header("authorization", "Bearer demo-stale");
			then.status(401);
		})
		.await;
	let projects_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/projects").header("authorization", "Bearer demo-fresh");
			then.status(200)
				.header("content-type", "application/json")
				.body("[{\"id\":1,\"name\":\"atlas\"},{\"id\":2,\"name\":\"borealis\"}]");
		})
		.await;
	let transport = ReqwestTransport::with_client(
		Client::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()?,
	);
	let config = ClientConfig::new(server.base_url())?
		.with_auth(AuthConfig::default().with_auto_refresh(false));
	let client = ApiClient::builder(Arc::new(transport)).config(config).build()?;
	let _events = client.subscribe(|event| match event {
		ClientEvent::RefreshStateChanged(state) => println!("refresh state: {state}"),
		ClientEvent::TokenUpdated { expires_at } => println!("token updated, expires at {expires_at:?}"),
		other => println!("event: {other:?}"),
	});

	client.set_token(CredentialRecord::new("demo-stale").with_refresh_token("demo-refresh-1"));

	let projects =
		client.send_json::<serde_json::Value>(RequestDescriptor::get("/projects")).await?;

	println!("projects: {projects}");

	let cached = client.send_json::<serde_json::Value>(RequestDescriptor::get("/projects")).await?;

	println!("cached copy matches: {}", cached == projects);
	println!("refresh metrics: {:?}", client.refresh().metrics());

	refresh_mock.assert_async().await;
	projects_mock.assert_async().await;

	Ok(())
}
