#![cfg(feature = "reqwest")]

mod common;

// crates.io
use httpmock::prelude::*;
use serde_json::json;
use time::{Duration, OffsetDateTime};
// self
use api_client_core::{
	auth::CredentialRecord,
	client::RequestDescriptor,
	error::{Error, RefreshError},
	http::REQUEST_ID_HEADER,
	retry::RetryOverride,
};

#[tokio::test]
async fn bearer_and_request_id_reach_the_server_and_gets_are_cached() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/profile")
				.header("authorization", "Bearer access-1")
				.header_exists(REQUEST_ID_HEADER);
			then.status(200).header("content-type", "application/json").body("{\"name\":\"ada\"}");
		})
		.await;
	let client = common::client(common::config(&server));

	client.set_token(
		CredentialRecord::new("access-1")
			.with_refresh_token("refresh-1")
			.with_expires_at(OffsetDateTime::now_utc() + Duration::hours(1)),
	);

	let first = client
		.send_json::<serde_json::Value>(RequestDescriptor::get("/profile"))
		.await
		.expect("First request should reach the server.");
	let second = client
		.send_json::<serde_json::Value>(RequestDescriptor::get("/profile"))
		.await
		.expect("Second request should be served from the cache.");

	assert_eq!(first, json!({ "name": "ada" }));
	assert_eq!(first, second);

	mock.assert_async().await;
}

#[tokio::test]
async fn concurrent_rejections_refresh_once_and_resend() {
	let server = MockServer::start_async().await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST).path("/auth/refresh").json_body(json!({ "refreshToken": "refresh-1" }));
			then.status(200)
				.header("content-type", "application/json")
				.delay(std::time::Duration::from_millis(50))
				.body(
					"{\"success\":true,\"token\":\"fresh\",\"refreshToken\":\"refresh-2\",\"expiresIn\":3600}",
				);
		})
		.await;
	let _stale = server
		.mock_async(|when, then| {
			when.method(GET).path("/orders").header("authorization", "Bearer stale");
			then.status(401);
		})
		.await;
	let fresh = server
		.mock_async(|when, then| {
			when.method(GET).path("/orders").header("authorization", "Bearer fresh");
			then.status(200).header("content-type", "application/json").body("[]");
		})
		.await;
	let client = common::client(common::config(&server));

	client.set_token(
		CredentialRecord::new("stale")
			.with_refresh_token("refresh-1")
			.with_expires_at(OffsetDateTime::now_utc() + Duration::hours(1)),
	);

	let results = futures::future::join_all(
		(0..5).map(|_| client.send(RequestDescriptor::get("/orders").skip_cache())),
	)
	.await;

	for result in results {
		assert_eq!(result.expect("Every request should recover after the refresh.").status, 200);
	}

	refresh.assert_async().await;
	fresh.assert_hits_async(5).await;

	let record = client.tokens().record().expect("Refreshed credentials should be stored.");

	assert_eq!(record.access_token.expose(), "fresh");
	assert_eq!(record.refresh_token.as_ref().map(|t| t.expose()), Some("refresh-2"));
	assert!(record.expires_at.is_some_and(|at| at > OffsetDateTime::now_utc() + Duration::minutes(59)));
}

#[tokio::test]
async fn rejected_refresh_surfaces_reauthentication_and_clears_credentials() {
	let server = MockServer::start_async().await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST).path("/auth/refresh");
			then.status(401).header("content-type", "application/json").body("{\"success\":false}");
		})
		.await;
	let _orders = server
		.mock_async(|when, then| {
			when.method(GET).path("/orders");
			then.status(401);
		})
		.await;
	let client = common::client(common::config(&server));

	client.set_token(CredentialRecord::new("revoked").with_refresh_token("refresh-revoked"));

	let err = client
		.send(RequestDescriptor::get("/orders"))
		.await
		.expect_err("A rejected refresh should fail the request.");

	assert!(matches!(err, Error::RefreshFailed(RefreshError::Rejected { status: Some(401), .. })));
	assert!(err.requires_reauthentication());
	assert!(!client.has_valid_token());
	assert!(client.tokens().record().is_none());

	refresh.assert_async().await;
}

#[tokio::test]
async fn transient_statuses_are_retried_until_the_budget_is_spent() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/busy");
			then.status(503).body("try later");
		})
		.await;
	let client = common::client(common::config(&server));
	let err = client
		.send(RequestDescriptor::get("/busy").retry(RetryOverride::default().max_retries(2)))
		.await
		.expect_err("Every attempt answers 503.");

	assert_eq!(err.status(), Some(503));
	assert!(matches!(err, Error::HttpStatus { body_preview: Some(ref body), .. } if body == "try later"));

	mock.assert_hits_async(3).await;
}

#[tokio::test]
async fn posts_are_not_retried_or_cached() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/orders").json_body(json!({ "sku": "widget" }));
			then.status(502);
		})
		.await;
	let client = common::client(common::config(&server));
	let descriptor = RequestDescriptor::post("/orders")
		.json(&json!({ "sku": "widget" }))
		.expect("Body fixture should serialize.");
	let err = client.send(descriptor).await.expect_err("POST should surface the 502.");

	assert_eq!(err.status(), Some(502));
	assert!(client.cache().is_empty());

	mock.assert_async().await;
}

#[tokio::test]
async fn unreachable_hosts_surface_transport_errors() {
	let config = api_client_core::config::ClientConfig::new("http://127.0.0.1:9/")
		.expect("Fixture URL should parse.");
	let client = common::client(config);
	let err = client
		.send(RequestDescriptor::get("/ping").retry(RetryOverride::default().max_retries(0)))
		.await
		.expect_err("Nothing listens on the discard port.");

	assert!(matches!(err, Error::Transport(_)));
	assert_eq!(client.in_flight_count(), 0);
}
