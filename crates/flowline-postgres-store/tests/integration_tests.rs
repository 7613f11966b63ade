//! Integration tests for `PostgresManifestStore`.
//!
//! These tests require a running PostgreSQL instance.
//!
//! ```bash
//! docker-compose -f docker-compose.postgres.yml up -d
//! POSTGRES_CONNECTION_STRING="host=localhost port=5432 user=postgres password=postgres dbname=flowline" \
//!     cargo test --package flowline-postgres-store -- --ignored
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use flowline::ids::DatasetId;
use flowline::manifest_store::ManifestStore;
use flowline::model::{Dataset, DatasetStatus, WriteFormat};
use flowline_postgres_store::PostgresManifestStore;

fn get_connection_string() -> String {
    std::env::var("POSTGRES_CONNECTION_STRING").unwrap_or_else(|_| {
        "host=localhost port=5432 user=postgres password=postgres dbname=flowline".to_string()
    })
}

fn sample_dataset() -> Dataset {
    let now = chrono::Utc::now();
    Dataset {
        id: DatasetId::new(),
        slug: format!("events-{}", uuid::Uuid::new_v4()),
        name: "events".to_string(),
        status: DatasetStatus::Active,
        write_format: WriteFormat::Parquet,
        default_storage_target_id: None,
        metadata: serde_json::Value::Null,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
#[ignore = "requires running PostgreSQL (run with --ignored)"]
async fn create_and_fetch_dataset_round_trips() {
    let store = PostgresManifestStore::new(&get_connection_string())
        .await
        .expect("failed to connect to PostgreSQL manifest store");

    let dataset = sample_dataset();
    let created = store.create_dataset(dataset.clone()).await.expect("create_dataset failed");
    assert_eq!(created.slug, dataset.slug);

    let fetched = store.get_dataset(dataset.id).await.expect("get_dataset failed");
    assert_eq!(fetched.id, dataset.id);
    assert_eq!(fetched.status, DatasetStatus::Active);
}

#[tokio::test]
#[ignore = "requires running PostgreSQL (run with --ignored)"]
async fn duplicate_slug_is_rejected_as_conflict() {
    let store = PostgresManifestStore::new(&get_connection_string())
        .await
        .expect("failed to connect to PostgreSQL manifest store");

    let mut dataset = sample_dataset();
    store.create_dataset(dataset.clone()).await.expect("first create_dataset failed");

    dataset.id = DatasetId::new();
    let err = store.create_dataset(dataset).await.expect_err("duplicate slug should conflict");
    assert_eq!(err.kind, flowline::error::ErrorKind::Conflict);
}
