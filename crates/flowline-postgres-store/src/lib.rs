//! PostgreSQL-backed manifest store for `flowline`.
//!
//! Provides a durable, transactional implementation of
//! [`flowline::manifest_store::ManifestStore`] (C1) backed by
//! `tokio-postgres`, for deployments that have outgrown the in-memory
//! reference store (`flowline::manifest_store::memory::InMemoryManifestStore`).
//!
//! # Example
//!
//! ```rust,ignore
//! use flowline_postgres_store::PostgresManifestStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let connection_string = "host=localhost user=postgres password=postgres dbname=flowline";
//!     let store = PostgresManifestStore::new(connection_string).await?;
//!     Ok(())
//! }
//! ```
//!
//! # See Also
//!
//! - [`flowline::manifest_store::ManifestStore`] - The trait this implements.
//! - [PostgreSQL Documentation](https://www.postgresql.org/docs/)

mod error;

pub use error::Error;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use flowline::error::{FlowError, FlowResult};
use flowline::ids::{DatasetId, ManifestId, PartitionId, SchemaVersionId, StorageTargetId};
use flowline::manifest_store::{
    ManifestStore, ManifestWithPartitions, NewManifest, PartitionQueryFilter,
    ReplacePartitions,
};
use flowline::model::manifest::deep_merge;
use flowline::model::{
    Dataset, DatasetStatus, Manifest, ManifestStatus, Partition, SchemaField,
    SchemaVersion, StorageTarget, TimeRange, WriteFormat,
};
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};

/// Validate a PostgreSQL identifier (table/column name fragment).
///
/// Identifiers must start with a letter or underscore, contain only
/// letters, digits, and underscores, and be at most 63 characters (the
/// PostgreSQL limit for unquoted identifiers).
fn validate_identifier(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::InvalidIdentifier("identifier cannot be empty".to_string()));
    }
    if name.len() > 63 {
        return Err(Error::InvalidIdentifier(format!(
            "identifier '{name}' exceeds maximum length of 63 characters"
        )));
    }
    let mut chars = name.chars();
    #[allow(clippy::unwrap_used)] // checked non-empty above
    let first = chars.next().unwrap();
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(Error::InvalidIdentifier(format!(
            "identifier '{name}' must start with a letter or underscore"
        )));
    }
    for c in chars {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(Error::InvalidIdentifier(format!(
                "identifier '{name}' contains invalid character '{c}'"
            )));
        }
    }
    Ok(())
}

fn is_unique_violation(e: &tokio_postgres::Error) -> bool {
    e.code() == Some(&tokio_postgres::error::SqlState::UNIQUE_VIOLATION)
}

/// PostgreSQL-backed manifest store.
///
/// Stores datasets, schema versions, manifests, partitions, storage
/// targets, and ingestion-batch idempotency entries across six tables,
/// each named `{prefix}_<entity>`. The `tokio_postgres::Client` is
/// serialized behind a [`tokio::sync::Mutex`] so the store can be shared
/// as `Arc<dyn ManifestStore>` without requiring connection pooling at
/// this layer; a production deployment typically fronts this with a
/// pool (e.g. `deadpool-postgres`) and swaps in one client per checkout.
pub struct PostgresManifestStore {
    client: Mutex<Client>,
    prefix: String,
}

impl PostgresManifestStore {
    /// Connect and initialize the schema under the default table prefix
    /// (`flowline`).
    pub async fn new(connection_string: &str) -> Result<Self, Error> {
        Self::with_table_prefix(connection_string, "flowline").await
    }

    /// Connect and initialize the schema under a custom table prefix.
    ///
    /// # Errors
    /// Returns [`Error::InvalidIdentifier`] if `prefix` is not a valid SQL
    /// identifier fragment.
    pub async fn with_table_prefix(connection_string: &str, prefix: &str) -> Result<Self, Error> {
        validate_identifier(prefix)?;

        info!("connecting to PostgreSQL manifest store");
        let (client, connection) = tokio_postgres::connect(connection_string, NoTls)
            .await
            .map_err(|e| {
                error!("failed to connect to PostgreSQL: {e}");
                Error::Postgres(e)
            })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {e}");
            }
        });

        let store = Self {
            client: Mutex::new(client),
            prefix: prefix.to_string(),
        };
        store.initialize_schema().await?;
        Ok(store)
    }

    fn table(&self, entity: &str) -> String {
        format!("{}_{}", self.prefix, entity)
    }

    async fn initialize_schema(&self) -> Result<(), Error> {
        let storage_targets = self.table("storage_targets");
        let datasets = self.table("datasets");
        let schema_versions = self.table("schema_versions");
        let manifests = self.table("manifests");
        let partitions = self.table("partitions");
        let ingestion_batches = self.table("ingestion_batches");

        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {storage_targets} (
                id UUID PRIMARY KEY,
                kind TEXT NOT NULL,
                config JSONB NOT NULL
            );
            CREATE TABLE IF NOT EXISTS {datasets} (
                id UUID PRIMARY KEY,
                slug TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                write_format TEXT NOT NULL,
                default_storage_target_id UUID,
                metadata JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );
            CREATE TABLE IF NOT EXISTS {schema_versions} (
                id UUID PRIMARY KEY,
                dataset_id UUID NOT NULL REFERENCES {datasets}(id),
                version BIGINT NOT NULL,
                checksum TEXT,
                fields JSONB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{schema_versions}_dataset ON {schema_versions} (dataset_id);
            CREATE TABLE IF NOT EXISTS {manifests} (
                id UUID PRIMARY KEY,
                dataset_id UUID NOT NULL REFERENCES {datasets}(id),
                version BIGINT NOT NULL,
                status TEXT NOT NULL,
                schema_version_id UUID NOT NULL,
                parent_manifest_id UUID,
                manifest_shard TEXT NOT NULL,
                summary JSONB NOT NULL,
                statistics JSONB NOT NULL,
                metadata JSONB NOT NULL,
                partition_count BIGINT NOT NULL,
                total_rows BIGINT NOT NULL,
                total_bytes BIGINT NOT NULL,
                published_at TIMESTAMPTZ
            );
            CREATE INDEX IF NOT EXISTS idx_{manifests}_dataset_shard ON {manifests} (dataset_id, manifest_shard);
            CREATE TABLE IF NOT EXISTS {partitions} (
                id UUID PRIMARY KEY,
                dataset_id UUID NOT NULL REFERENCES {datasets}(id),
                manifest_id UUID NOT NULL REFERENCES {manifests}(id),
                partition_key JSONB NOT NULL,
                storage_target_id UUID NOT NULL,
                file_format TEXT NOT NULL,
                file_path TEXT NOT NULL,
                file_size_bytes BIGINT,
                row_count BIGINT,
                start_time TIMESTAMPTZ NOT NULL,
                end_time TIMESTAMPTZ NOT NULL,
                checksum TEXT,
                table_name TEXT NOT NULL,
                lifecycle JSONB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{partitions}_manifest ON {partitions} (manifest_id);
            CREATE INDEX IF NOT EXISTS idx_{partitions}_time_range ON {partitions} (dataset_id, start_time, end_time);
            CREATE TABLE IF NOT EXISTS {ingestion_batches} (
                dataset_id UUID NOT NULL,
                idempotency_key TEXT NOT NULL,
                manifest_id UUID NOT NULL,
                PRIMARY KEY (dataset_id, idempotency_key)
            );
            "#
        );

        let client = self.client.lock().await;
        client.batch_execute(&ddl).await.map_err(|e| {
            error!("failed to initialize manifest store schema: {e}");
            Error::Postgres(e)
        })?;
        debug!("manifest store schema initialized: prefix={}", self.prefix);
        Ok(())
    }

    fn dataset_from_row(row: &Row) -> Result<Dataset, Error> {
        let status_str: String = row.get("status");
        let write_format_str: String = row.get("write_format");
        Ok(Dataset {
            id: DatasetId(row.get("id")),
            slug: row.get("slug"),
            name: row.get("name"),
            status: parse_dataset_status(&status_str)?,
            write_format: parse_write_format(&write_format_str)?,
            default_storage_target_id: row
                .get::<_, Option<uuid::Uuid>>("default_storage_target_id")
                .map(StorageTargetId),
            metadata: row.get("metadata"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn schema_version_from_row(row: &Row) -> Result<SchemaVersion, Error> {
        let fields_json: serde_json::Value = row.get("fields");
        let fields: Vec<SchemaField> = serde_json::from_value(fields_json)?;
        Ok(SchemaVersion {
            id: SchemaVersionId(row.get("id")),
            dataset_id: DatasetId(row.get("dataset_id")),
            version: row.get("version"),
            checksum: row.get("checksum"),
            fields,
        })
    }

    fn manifest_from_row(row: &Row) -> Result<Manifest, Error> {
        let status_str: String = row.get("status");
        Ok(Manifest {
            id: ManifestId(row.get("id")),
            dataset_id: DatasetId(row.get("dataset_id")),
            version: row.get("version"),
            status: parse_manifest_status(&status_str)?,
            schema_version_id: SchemaVersionId(row.get("schema_version_id")),
            parent_manifest_id: row.get::<_, Option<uuid::Uuid>>("parent_manifest_id").map(ManifestId),
            manifest_shard: row.get("manifest_shard"),
            summary: row.get("summary"),
            statistics: row.get("statistics"),
            metadata: row.get("metadata"),
            partition_count: row.get("partition_count"),
            total_rows: row.get("total_rows"),
            total_bytes: row.get("total_bytes"),
            published_at: row.get("published_at"),
        })
    }

    fn partition_from_row(row: &Row) -> Result<Partition, Error> {
        let partition_key_json: serde_json::Value = row.get("partition_key");
        let partition_key: BTreeMap<String, String> = serde_json::from_value(partition_key_json)?;
        Ok(Partition {
            id: PartitionId(row.get("id")),
            dataset_id: DatasetId(row.get("dataset_id")),
            manifest_id: ManifestId(row.get("manifest_id")),
            partition_key,
            storage_target_id: StorageTargetId(row.get("storage_target_id")),
            file_format: row.get("file_format"),
            file_path: row.get("file_path"),
            file_size_bytes: row.get("file_size_bytes"),
            row_count: row.get("row_count"),
            start_time: row.get("start_time"),
            end_time: row.get("end_time"),
            checksum: row.get("checksum"),
            table_name: row.get("table_name"),
            lifecycle: row.get("lifecycle"),
        })
    }
}

fn parse_dataset_status(s: &str) -> Result<DatasetStatus, Error> {
    match s {
        "active" => Ok(DatasetStatus::Active),
        "inactive" => Ok(DatasetStatus::Inactive),
        other => Err(Error::Generic(format!("unknown dataset status '{other}'"))),
    }
}

fn dataset_status_str(status: DatasetStatus) -> &'static str {
    match status {
        DatasetStatus::Active => "active",
        DatasetStatus::Inactive => "inactive",
    }
}

fn parse_write_format(s: &str) -> Result<WriteFormat, Error> {
    match s {
        "duckdb" => Ok(WriteFormat::Duckdb),
        "parquet" => Ok(WriteFormat::Parquet),
        other => Err(Error::Generic(format!("unknown write format '{other}'"))),
    }
}

fn write_format_str(format: WriteFormat) -> &'static str {
    match format {
        WriteFormat::Duckdb => "duckdb",
        WriteFormat::Parquet => "parquet",
    }
}

fn parse_manifest_status(s: &str) -> Result<ManifestStatus, Error> {
    match s {
        "draft" => Ok(ManifestStatus::Draft),
        "published" => Ok(ManifestStatus::Published),
        "superseded" => Ok(ManifestStatus::Superseded),
        other => Err(Error::Generic(format!("unknown manifest status '{other}'"))),
    }
}

fn manifest_status_str(status: ManifestStatus) -> &'static str {
    match status {
        ManifestStatus::Draft => "draft",
        ManifestStatus::Published => "published",
        ManifestStatus::Superseded => "superseded",
    }
}

#[async_trait]
impl ManifestStore for PostgresManifestStore {
    async fn upsert_storage_target(&self, target: StorageTarget) -> FlowResult<StorageTarget> {
        let table = self.table("storage_targets");
        let client = self.client.lock().await;
        client
            .execute(
                &format!(
                    "INSERT INTO {table} (id, kind, config) VALUES ($1, $2, $3)
                     ON CONFLICT (id) DO UPDATE SET kind = EXCLUDED.kind, config = EXCLUDED.config"
                ),
                &[&target.id.0, &target.kind, &target.config],
            )
            .await
            .map_err(|e| FlowError::from(Error::Postgres(e)))?;
        Ok(target)
    }

    async fn create_dataset(&self, dataset: Dataset) -> FlowResult<Dataset> {
        let table = self.table("datasets");
        let client = self.client.lock().await;
        let result = client
            .execute(
                &format!(
                    "INSERT INTO {table}
                     (id, slug, name, status, write_format, default_storage_target_id, metadata, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
                ),
                &[
                    &dataset.id.0,
                    &dataset.slug,
                    &dataset.name,
                    &dataset_status_str(dataset.status),
                    &write_format_str(dataset.write_format),
                    &dataset.default_storage_target_id.map(|id| id.0),
                    &dataset.metadata,
                    &dataset.created_at,
                    &dataset.updated_at,
                ],
            )
            .await;

        match result {
            Ok(_) => Ok(dataset),
            Err(e) if is_unique_violation(&e) => Err(FlowError::from(Error::Conflict(format!(
                "dataset '{}' already exists",
                dataset.slug
            )))),
            Err(e) => Err(FlowError::from(Error::Postgres(e))),
        }
    }

    async fn update_dataset(
        &self,
        dataset_id: DatasetId,
        patch: serde_json::Value,
        if_match: Option<DateTime<Utc>>,
    ) -> FlowResult<Dataset> {
        let table = self.table("datasets");
        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(|e| FlowError::from(Error::Postgres(e)))?;

        let row = tx
            .query_opt(&format!("SELECT * FROM {table} WHERE id = $1 FOR UPDATE"), &[&dataset_id.0])
            .await
            .map_err(|e| FlowError::from(Error::Postgres(e)))?
            .ok_or_else(|| FlowError::from(Error::NotFound("dataset not found".to_string())))?;
        let current = Self::dataset_from_row(&row).map_err(FlowError::from)?;

        if let Some(expected) = if_match {
            if current.updated_at.trunc_subsecs(3) != expected.trunc_subsecs(3) {
                return Err(FlowError::from(Error::ConcurrentUpdate(
                    "dataset was modified since ifMatch was read".to_string(),
                )));
            }
        }

        let mut as_value = serde_json::to_value(&current).map_err(Error::from).map_err(FlowError::from)?;
        deep_merge(&mut as_value, &patch);
        let mut updated: Dataset = serde_json::from_value(as_value).map_err(Error::from).map_err(FlowError::from)?;
        updated.updated_at = Utc::now();

        tx.execute(
            &format!(
                "UPDATE {table} SET slug=$2, name=$3, status=$4, write_format=$5,
                 default_storage_target_id=$6, metadata=$7, updated_at=$8 WHERE id=$1"
            ),
            &[
                &updated.id.0,
                &updated.slug,
                &updated.name,
                &dataset_status_str(updated.status),
                &write_format_str(updated.write_format),
                &updated.default_storage_target_id.map(|id| id.0),
                &updated.metadata,
                &updated.updated_at,
            ],
        )
        .await
        .map_err(|e| FlowError::from(Error::Postgres(e)))?;

        tx.commit().await.map_err(|e| FlowError::from(Error::Postgres(e)))?;
        Ok(updated)
    }

    async fn get_dataset(&self, dataset_id: DatasetId) -> FlowResult<Dataset> {
        let table = self.table("datasets");
        let client = self.client.lock().await;
        let row = client
            .query_opt(&format!("SELECT * FROM {table} WHERE id = $1"), &[&dataset_id.0])
            .await
            .map_err(|e| FlowError::from(Error::Postgres(e)))?
            .ok_or_else(|| FlowError::from(Error::NotFound("dataset not found".to_string())))?;
        Self::dataset_from_row(&row).map_err(FlowError::from)
    }

    async fn create_schema_version(
        &self,
        dataset_id: DatasetId,
        fields: Vec<SchemaField>,
        checksum: Option<String>,
    ) -> FlowResult<SchemaVersion> {
        let table = self.table("schema_versions");
        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(|e| FlowError::from(Error::Postgres(e)))?;

        if let Some(checksum) = &checksum {
            if let Some(row) = tx
                .query_opt(
                    &format!("SELECT * FROM {table} WHERE dataset_id = $1 AND checksum = $2"),
                    &[&dataset_id.0, checksum],
                )
                .await
                .map_err(|e| FlowError::from(Error::Postgres(e)))?
            {
                return Self::schema_version_from_row(&row).map_err(FlowError::from);
            }
        }

        let next_version: i64 = tx
            .query_one(
                &format!("SELECT COALESCE(MAX(version), 0) + 1 FROM {table} WHERE dataset_id = $1"),
                &[&dataset_id.0],
            )
            .await
            .map_err(|e| FlowError::from(Error::Postgres(e)))?
            .get(0);

        let fields_json = serde_json::to_value(&fields).map_err(Error::from).map_err(FlowError::from)?;
        let schema_version = SchemaVersion {
            id: SchemaVersionId::new(),
            dataset_id,
            version: next_version,
            checksum,
            fields,
        };

        tx.execute(
            &format!("INSERT INTO {table} (id, dataset_id, version, checksum, fields) VALUES ($1, $2, $3, $4, $5)"),
            &[
                &schema_version.id.0,
                &schema_version.dataset_id.0,
                &schema_version.version,
                &schema_version.checksum,
                &fields_json,
            ],
        )
        .await
        .map_err(|e| FlowError::from(Error::Postgres(e)))?;

        tx.commit().await.map_err(|e| FlowError::from(Error::Postgres(e)))?;
        Ok(schema_version)
    }

    async fn create_dataset_manifest(&self, input: NewManifest) -> FlowResult<ManifestWithPartitions> {
        let manifests = self.table("manifests");
        let partitions_table = self.table("partitions");
        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(|e| FlowError::from(Error::Postgres(e)))?;

        // Serialize manifest creation per dataset: `FOR UPDATE` can't be
        // combined with the aggregate below, so an advisory lock on the
        // dataset id stands in for "lock the rows I'm about to scan".
        tx.execute(
            "SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))",
            &[&input.dataset_id.0],
        )
        .await
        .map_err(|e| FlowError::from(Error::Postgres(e)))?;

        let max_version: i64 = tx
            .query_one(
                &format!("SELECT COALESCE(MAX(version), 0) FROM {manifests} WHERE dataset_id = $1"),
                &[&input.dataset_id.0],
            )
            .await
            .map_err(|e| FlowError::from(Error::Postgres(e)))?
            .get(0);
        if input.version <= max_version {
            return Err(FlowError::from(Error::Conflict(format!(
                "manifest version {} is not greater than current max {max_version}",
                input.version
            ))));
        }

        let manifest_id = ManifestId::new();
        let mut partitions = Vec::with_capacity(input.partitions.len());
        for spec in &input.partitions {
            let partition = Partition {
                id: PartitionId::new(),
                dataset_id: input.dataset_id,
                manifest_id,
                partition_key: spec.partition_key.clone(),
                storage_target_id: spec.storage_target_id,
                file_format: spec.file_format.clone(),
                file_path: spec.file_path.clone(),
                file_size_bytes: spec.file_size_bytes,
                row_count: spec.row_count,
                start_time: spec.start_time,
                end_time: spec.end_time,
                checksum: spec.checksum.clone(),
                table_name: spec.table_name.clone(),
                lifecycle: serde_json::Value::Null,
            };
            let partition_key_json =
                serde_json::to_value(&partition.partition_key).map_err(Error::from).map_err(FlowError::from)?;
            tx.execute(
                &format!(
                    "INSERT INTO {partitions_table}
                     (id, dataset_id, manifest_id, partition_key, storage_target_id, file_format, file_path,
                      file_size_bytes, row_count, start_time, end_time, checksum, table_name, lifecycle)
                     VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)"
                ),
                &[
                    &partition.id.0,
                    &partition.dataset_id.0,
                    &partition.manifest_id.0,
                    &partition_key_json,
                    &partition.storage_target_id.0,
                    &partition.file_format,
                    &partition.file_path,
                    &partition.file_size_bytes,
                    &partition.row_count,
                    &partition.start_time,
                    &partition.end_time,
                    &partition.checksum,
                    &partition.table_name,
                    &partition.lifecycle,
                ],
            )
            .await
            .map_err(|e| FlowError::from(Error::Postgres(e)))?;
            partitions.push(partition);
        }

        let published_at = if input.published { Some(Utc::now()) } else { None };
        let mut manifest = Manifest {
            id: manifest_id,
            dataset_id: input.dataset_id,
            version: input.version,
            status: if input.published { ManifestStatus::Published } else { ManifestStatus::Draft },
            schema_version_id: input.schema_version_id,
            parent_manifest_id: input.parent_manifest_id,
            manifest_shard: input.manifest_shard,
            summary: input.summary,
            statistics: serde_json::Value::Null,
            metadata: input.metadata,
            partition_count: 0,
            total_rows: 0,
            total_bytes: 0,
            published_at,
        };
        manifest.recompute_rollups(&partitions);

        tx.execute(
            &format!(
                "INSERT INTO {manifests}
                 (id, dataset_id, version, status, schema_version_id, parent_manifest_id, manifest_shard,
                  summary, statistics, metadata, partition_count, total_rows, total_bytes, published_at)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)"
            ),
            &[
                &manifest.id.0,
                &manifest.dataset_id.0,
                &manifest.version,
                &manifest_status_str(manifest.status),
                &manifest.schema_version_id.0,
                &manifest.parent_manifest_id.map(|id| id.0),
                &manifest.manifest_shard,
                &manifest.summary,
                &manifest.statistics,
                &manifest.metadata,
                &manifest.partition_count,
                &manifest.total_rows,
                &manifest.total_bytes,
                &manifest.published_at,
            ],
        )
        .await
        .map_err(|e| FlowError::from(Error::Postgres(e)))?;

        if input.published {
            if let Some(parent_id) = input.parent_manifest_id {
                tx.execute(
                    &format!(
                        "UPDATE {manifests} SET status = $2 WHERE id = $1 AND status = $3"
                    ),
                    &[
                        &parent_id.0,
                        &manifest_status_str(ManifestStatus::Superseded),
                        &manifest_status_str(ManifestStatus::Published),
                    ],
                )
                .await
                .map_err(|e| FlowError::from(Error::Postgres(e)))?;
            }
        }

        tx.commit().await.map_err(|e| FlowError::from(Error::Postgres(e)))?;
        Ok(ManifestWithPartitions { manifest, partitions })
    }

    async fn get_manifest(&self, manifest_id: ManifestId) -> FlowResult<ManifestWithPartitions> {
        let manifests = self.table("manifests");
        let partitions_table = self.table("partitions");
        let client = self.client.lock().await;

        let row = client
            .query_opt(&format!("SELECT * FROM {manifests} WHERE id = $1"), &[&manifest_id.0])
            .await
            .map_err(|e| FlowError::from(Error::Postgres(e)))?
            .ok_or_else(|| FlowError::from(Error::NotFound("manifest not found".to_string())))?;
        let manifest = Self::manifest_from_row(&row).map_err(FlowError::from)?;

        let rows = client
            .query(
                &format!("SELECT * FROM {partitions_table} WHERE manifest_id = $1 ORDER BY start_time"),
                &[&manifest_id.0],
            )
            .await
            .map_err(|e| FlowError::from(Error::Postgres(e)))?;
        let partitions = rows
            .iter()
            .map(Self::partition_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(FlowError::from)?;

        Ok(ManifestWithPartitions { manifest, partitions })
    }

    async fn latest_published_manifest(
        &self,
        dataset_id: DatasetId,
        shard: &str,
    ) -> FlowResult<Option<ManifestWithPartitions>> {
        let manifests = self.table("manifests");
        let partitions_table = self.table("partitions");
        let client = self.client.lock().await;

        let row = client
            .query_opt(
                &format!(
                    "SELECT * FROM {manifests} WHERE dataset_id = $1 AND manifest_shard = $2 AND status = $3
                     ORDER BY version DESC LIMIT 1"
                ),
                &[&dataset_id.0, &shard, &manifest_status_str(ManifestStatus::Published)],
            )
            .await
            .map_err(|e| FlowError::from(Error::Postgres(e)))?;

        let Some(row) = row else { return Ok(None) };
        let manifest = Self::manifest_from_row(&row).map_err(FlowError::from)?;
        let rows = client
            .query(
                &format!("SELECT * FROM {partitions_table} WHERE manifest_id = $1 ORDER BY start_time"),
                &[&manifest.id.0],
            )
            .await
            .map_err(|e| FlowError::from(Error::Postgres(e)))?;
        let partitions = rows
            .iter()
            .map(Self::partition_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(FlowError::from)?;

        Ok(Some(ManifestWithPartitions { manifest, partitions }))
    }

    async fn replace_partitions_in_manifest(
        &self,
        manifest_id: ManifestId,
        patch: ReplacePartitions,
    ) -> FlowResult<ManifestWithPartitions> {
        let manifests = self.table("manifests");
        let partitions_table = self.table("partitions");
        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(|e| FlowError::from(Error::Postgres(e)))?;

        let row = tx
            .query_opt(&format!("SELECT * FROM {manifests} WHERE id = $1 FOR UPDATE"), &[&manifest_id.0])
            .await
            .map_err(|e| FlowError::from(Error::Postgres(e)))?
            .ok_or_else(|| FlowError::from(Error::NotFound("manifest not found".to_string())))?;
        let mut manifest = Self::manifest_from_row(&row).map_err(FlowError::from)?;

        for id in &patch.remove {
            tx.execute(&format!("DELETE FROM {partitions_table} WHERE id = $1"), &[&id.0])
                .await
                .map_err(|e| FlowError::from(Error::Postgres(e)))?;
        }

        for spec in &patch.add {
            let partition = Partition {
                id: PartitionId::new(),
                dataset_id: manifest.dataset_id,
                manifest_id,
                partition_key: spec.partition_key.clone(),
                storage_target_id: spec.storage_target_id,
                file_format: spec.file_format.clone(),
                file_path: spec.file_path.clone(),
                file_size_bytes: spec.file_size_bytes,
                row_count: spec.row_count,
                start_time: spec.start_time,
                end_time: spec.end_time,
                checksum: spec.checksum.clone(),
                table_name: spec.table_name.clone(),
                lifecycle: serde_json::Value::Null,
            };
            let partition_key_json =
                serde_json::to_value(&partition.partition_key).map_err(Error::from).map_err(FlowError::from)?;
            tx.execute(
                &format!(
                    "INSERT INTO {partitions_table}
                     (id, dataset_id, manifest_id, partition_key, storage_target_id, file_format, file_path,
                      file_size_bytes, row_count, start_time, end_time, checksum, table_name, lifecycle)
                     VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)"
                ),
                &[
                    &partition.id.0,
                    &partition.dataset_id.0,
                    &partition.manifest_id.0,
                    &partition_key_json,
                    &partition.storage_target_id.0,
                    &partition.file_format,
                    &partition.file_path,
                    &partition.file_size_bytes,
                    &partition.row_count,
                    &partition.start_time,
                    &partition.end_time,
                    &partition.checksum,
                    &partition.table_name,
                    &partition.lifecycle,
                ],
            )
            .await
            .map_err(|e| FlowError::from(Error::Postgres(e)))?;
        }

        deep_merge(
            &mut manifest.summary,
            &serde_json::json!({"lifecycle": patch.summary_patch}),
        );
        deep_merge(
            &mut manifest.metadata,
            &serde_json::json!({"lifecycle": patch.metadata_patch}),
        );

        let rows = tx
            .query(
                &format!("SELECT * FROM {partitions_table} WHERE manifest_id = $1 ORDER BY start_time"),
                &[&manifest_id.0],
            )
            .await
            .map_err(|e| FlowError::from(Error::Postgres(e)))?;
        let partitions = rows
            .iter()
            .map(Self::partition_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(FlowError::from)?;
        manifest.recompute_rollups(&partitions);

        tx.execute(
            &format!(
                "UPDATE {manifests} SET summary=$2, metadata=$3, partition_count=$4, total_rows=$5, total_bytes=$6
                 WHERE id = $1"
            ),
            &[
                &manifest.id.0,
                &manifest.summary,
                &manifest.metadata,
                &manifest.partition_count,
                &manifest.total_rows,
                &manifest.total_bytes,
            ],
        )
        .await
        .map_err(|e| FlowError::from(Error::Postgres(e)))?;

        tx.commit().await.map_err(|e| FlowError::from(Error::Postgres(e)))?;
        Ok(ManifestWithPartitions { manifest, partitions })
    }

    async fn list_partitions_for_query(
        &self,
        dataset_id: DatasetId,
        range: TimeRange,
        filter: PartitionQueryFilter,
    ) -> FlowResult<Vec<Partition>> {
        let manifests = self.table("manifests");
        let partitions_table = self.table("partitions");
        let client = self.client.lock().await;

        let rows = client
            .query(
                &format!(
                    "SELECT p.* FROM {partitions_table} p
                     JOIN {manifests} m ON m.id = p.manifest_id
                     WHERE p.dataset_id = $1 AND m.status = $2
                       AND p.start_time < $3 AND p.end_time > $4
                     ORDER BY p.start_time"
                ),
                &[
                    &dataset_id.0,
                    &manifest_status_str(ManifestStatus::Published),
                    &range.end,
                    &range.start,
                ],
            )
            .await
            .map_err(|e| FlowError::from(Error::Postgres(e)))?;

        let partitions = rows
            .iter()
            .map(Self::partition_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(FlowError::from)?
            .into_iter()
            .filter(|p| p.matches_partition_key(&filter.partition_key))
            .collect();
        Ok(partitions)
    }

    async fn record_ingestion_batch(
        &self,
        dataset_id: DatasetId,
        idempotency_key: String,
        manifest_id: ManifestId,
    ) -> FlowResult<ManifestId> {
        let table = self.table("ingestion_batches");
        let client = self.client.lock().await;

        let row = client
            .query_one(
                &format!(
                    "INSERT INTO {table} (dataset_id, idempotency_key, manifest_id) VALUES ($1, $2, $3)
                     ON CONFLICT (dataset_id, idempotency_key) DO UPDATE SET dataset_id = {table}.dataset_id
                     RETURNING manifest_id"
                ),
                &[&dataset_id.0, &idempotency_key, &manifest_id.0],
            )
            .await
            .map_err(|e| FlowError::from(Error::Postgres(e)))?;
        Ok(ManifestId(row.get(0)))
    }
}
