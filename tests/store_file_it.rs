#![cfg(feature = "reqwest")]

mod common;

// std
use std::sync::Arc;
// crates.io
use httpmock::prelude::*;
use time::{Duration, OffsetDateTime};
// self
use api_client_core::{
	auth::CredentialRecord,
	client::RequestDescriptor,
	store::{FileStorage, TokenStoreOptions},
};

#[tokio::test]
async fn credentials_survive_a_client_restart() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/me").header("authorization", "Bearer durable");
			then.status(204);
		})
		.await;
	let path = common::temp_path("restart");

	{
		let storage = Arc::new(FileStorage::open(&path).expect("File storage should open."));
		let client = common::client_with_storage(common::config(&server), storage);

		client.set_token(
			CredentialRecord::new("durable")
				.with_refresh_token("refresh-durable")
				.with_expires_at(OffsetDateTime::now_utc() + Duration::hours(1)),
		);
	}

	let storage = Arc::new(FileStorage::open(&path).expect("File storage should reopen."));
	let client = common::client_with_storage(common::config(&server), storage);

	assert!(client.has_valid_token());

	client.send(RequestDescriptor::get("/me")).await.expect("Restored token should be sent.");
	mock.assert_async().await;

	let _ = std::fs::remove_dir_all(path.parent().expect("Temp path should have a parent."));
}

#[tokio::test]
async fn expired_backups_are_discarded_on_restart() {
	let path = common::temp_path("expired");
	let storage = FileStorage::open(&path).expect("File storage should open.");
	let record = CredentialRecord::new("old")
		.with_expires_at(OffsetDateTime::now_utc() - Duration::minutes(1));

	api_client_core::store::CredentialStorage::set_item(
		&storage,
		TokenStoreOptions::DEFAULT_STORAGE_KEY,
		&serde_json::to_string(&record).expect("Record should serialize."),
	)
	.expect("Backup should be written.");

	let server = MockServer::start_async().await;
	let storage = Arc::new(FileStorage::open(&path).expect("File storage should reopen."));
	let client = common::client_with_storage(common::config(&server), storage.clone());

	assert!(!client.has_valid_token());
	assert_eq!(
		api_client_core::store::CredentialStorage::get_item(
			storage.as_ref(),
			TokenStoreOptions::DEFAULT_STORAGE_KEY,
		)
		.expect("Storage should be readable."),
		None
	);

	let _ = std::fs::remove_dir_all(path.parent().expect("Temp path should have a parent."));
}
