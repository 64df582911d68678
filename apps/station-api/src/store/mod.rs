//! Persistence seams.
//!
//! Every table the service touches sits behind a small object-safe trait so
//! handlers receive explicitly constructed store handles. Production wiring
//! uses DynamoDB and S3; tests and local development use [`memory`].

pub mod dynamo;
pub mod memory;
pub mod s3;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_types::region::Region;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{StationConfig, StoreBackend};
use crate::models::{ApiKeyEntry, DeviceConfig, LatestSnapshotRecord, TimeSeriesRecord};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{table} unavailable: {message}")]
    Unavailable { table: String, message: String },
    #[error("malformed item in {table}: {message}")]
    Malformed { table: String, message: String },
}

impl StoreError {
    pub fn unavailable(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn malformed(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            table: table.into(),
            message: message.into(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Inclusive range over `timestamp_utc`. An open end means "up to now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesRange {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl SeriesRange {
    pub fn since(start: DateTime<Utc>) -> Self {
        Self { start, end: None }
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && self.end.map_or(true, |end| ts <= end)
    }

    /// A closed range whose end precedes its start matches nothing.
    pub fn is_empty(&self) -> bool {
        self.end.is_some_and(|end| end < self.start)
    }
}

#[async_trait]
pub trait ApiKeyRegistry: Send + Sync {
    async fn get_api_key(&self, api_key: &str) -> StoreResult<Option<ApiKeyEntry>>;
}

#[async_trait]
pub trait DeviceConfigStore: Send + Sync {
    async fn get_device_config(&self, device_id: &str) -> StoreResult<Option<DeviceConfig>>;
}

/// Latest-snapshot and time-series tables.
///
/// Neither write is conditional: concurrent ingestions for one device leave
/// whichever snapshot write landed last, regardless of payload timestamps.
/// Nodes report every few minutes, so this weak ordering is accepted.
#[async_trait]
pub trait MeasurementStore: Send + Sync {
    async fn put_latest(&self, record: &LatestSnapshotRecord) -> StoreResult<()>;

    async fn get_latest(&self, device_id: &str) -> StoreResult<Option<LatestSnapshotRecord>>;

    /// Fixed-key insert; repeating the same `(device_id, timestamp_utc)` overwrites.
    async fn append_series(&self, record: &TimeSeriesRecord) -> StoreResult<()>;

    /// Rows for one device inside `range`, ordered by timestamp.
    async fn query_series(
        &self,
        device_id: &str,
        range: SeriesRange,
    ) -> StoreResult<Vec<TimeSeriesRecord>>;
}

#[async_trait]
pub trait ArtifactSigner: Send + Sync {
    /// Mints a time-limited download reference for `key` inside `location`.
    async fn presign_download(
        &self,
        location: &str,
        key: &str,
        ttl: Duration,
    ) -> StoreResult<String>;
}

#[derive(Clone)]
pub struct Stores {
    pub registry: Arc<dyn ApiKeyRegistry>,
    pub device_configs: Arc<dyn DeviceConfigStore>,
    pub measurements: Arc<dyn MeasurementStore>,
    pub artifacts: Arc<dyn ArtifactSigner>,
}

impl Stores {
    pub fn from_memory(store: Arc<memory::MemoryStore>) -> Self {
        Self {
            registry: store.clone(),
            device_configs: store.clone(),
            measurements: store.clone(),
            artifacts: store,
        }
    }
}

const EXPIRY_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

pub async fn connect(config: &StationConfig) -> Result<Stores> {
    match config.store_backend {
        StoreBackend::Memory => {
            let store = Arc::new(memory::MemoryStore::new());
            if let Some(path) = config.seed_path.as_deref() {
                let seeded = store
                    .load_seed_file(path)
                    .await
                    .with_context(|| format!("failed to seed memory store from {}", path.display()))?;
                tracing::info!(path = %path.display(), records = seeded, "memory store seeded");
            }
            store.spawn_expiry_sweep(EXPIRY_SWEEP_INTERVAL);
            tracing::warn!("using in-memory stores; data is lost on restart");
            Ok(Stores::from_memory(store))
        }
        StoreBackend::DynamoDb => {
            let mut loader = aws_config::defaults(BehaviorVersion::latest());
            if let Some(region) = config.aws_region.clone() {
                loader = loader.region(Region::new(region));
            }
            let sdk_config = loader.load().await;

            let dynamo = Arc::new(dynamo::DynamoStore::new(
                aws_sdk_dynamodb::Client::new(&sdk_config),
                config.tables.clone(),
            ));
            let signer = Arc::new(s3::S3Signer::new(aws_sdk_s3::Client::new(&sdk_config)));
            tracing::info!(
                api_keys = %config.tables.api_keys,
                latest = %config.tables.latest,
                series = %config.tables.series,
                "using DynamoDB stores"
            );
            Ok(Stores {
                registry: dynamo.clone(),
                device_configs: dynamo.clone(),
                measurements: dynamo,
                artifacts: signer,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn series_range_bounds_are_inclusive() {
        let start = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).single().expect("ts");
        let end = Utc.with_ymd_and_hms(2025, 5, 2, 0, 0, 0).single().expect("ts");
        let range = SeriesRange::between(start, end);
        assert!(range.contains(start));
        assert!(range.contains(end));
        assert!(!range.contains(end + chrono::Duration::seconds(1)));
        assert!(!range.contains(start - chrono::Duration::seconds(1)));
        assert!(SeriesRange::since(start).contains(end + chrono::Duration::days(400)));
    }

    #[test]
    fn inverted_range_is_empty() {
        let start = Utc.with_ymd_and_hms(2025, 5, 2, 0, 0, 0).single().expect("ts");
        let end = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).single().expect("ts");
        assert!(SeriesRange::between(start, end).is_empty());
        assert!(!SeriesRange::between(end, start).is_empty());
        assert!(!SeriesRange::between(start, start).is_empty());
        assert!(!SeriesRange::since(start).is_empty());
    }
}
