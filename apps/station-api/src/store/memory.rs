use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::{
    ApiKeyRegistry, ArtifactSigner, DeviceConfigStore, MeasurementStore, SeriesRange, StoreError,
    StoreResult,
};
use crate::models::{ApiKeyEntry, DeviceConfig, LatestSnapshotRecord, TimeSeriesRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    ApiKeys,
    DeviceConfigs,
    Latest,
    Series,
    Artifacts,
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Table::ApiKeys => "api_keys",
            Table::DeviceConfigs => "device_configs",
            Table::Latest => "latest_measurements",
            Table::Series => "measurements",
            Table::Artifacts => "artifacts",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub api_keys: Vec<ApiKeyEntry>,
    #[serde(default)]
    pub device_configs: Vec<DeviceConfig>,
}

#[derive(Debug, Default)]
struct Tables {
    api_keys: HashMap<String, ApiKeyEntry>,
    device_configs: HashMap<String, DeviceConfig>,
    latest: HashMap<String, LatestSnapshotRecord>,
    series: BTreeMap<(String, DateTime<Utc>), TimeSeriesRecord>,
    unavailable: HashSet<Table>,
    unavailable_devices: HashSet<String>,
}

impl Tables {
    fn check(&self, table: Table) -> StoreResult<()> {
        if self.unavailable.contains(&table) {
            return Err(StoreError::unavailable(table.name(), "simulated outage"));
        }
        Ok(())
    }

    fn check_device(&self, table: Table, device_id: &str) -> StoreResult<()> {
        self.check(table)?;
        if self.unavailable_devices.contains(device_id) {
            return Err(StoreError::unavailable(
                table.name(),
                format!("simulated outage for {device_id}"),
            ));
        }
        Ok(())
    }
}

/// Process-local stand-in for every store. Outages can be switched on per
/// table or per device to exercise partial-failure paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_api_key(&self, entry: ApiKeyEntry) {
        let mut tables = self.tables.write().await;
        tables.api_keys.insert(entry.api_key.clone(), entry);
    }

    pub async fn insert_device_config(&self, config: DeviceConfig) {
        let mut tables = self.tables.write().await;
        tables.device_configs.insert(config.device_id.clone(), config);
    }

    pub async fn seed(&self, seed: Seed) -> usize {
        let count = seed.api_keys.len() + seed.device_configs.len();
        let mut tables = self.tables.write().await;
        for entry in seed.api_keys {
            tables.api_keys.insert(entry.api_key.clone(), entry);
        }
        for config in seed.device_configs {
            tables.device_configs.insert(config.device_id.clone(), config);
        }
        count
    }

    pub async fn load_seed_file(&self, path: &Path) -> anyhow::Result<usize> {
        let contents = tokio::fs::read_to_string(path).await?;
        let seed: Seed = serde_json::from_str(&contents)?;
        Ok(self.seed(seed).await)
    }

    pub async fn set_unavailable(&self, table: Table, unavailable: bool) {
        let mut tables = self.tables.write().await;
        if unavailable {
            tables.unavailable.insert(table);
        } else {
            tables.unavailable.remove(&table);
        }
    }

    /// Makes every snapshot and series call for `device_id` fail.
    pub async fn set_device_unavailable(&self, device_id: &str, unavailable: bool) {
        let mut tables = self.tables.write().await;
        if unavailable {
            tables.unavailable_devices.insert(device_id.to_string());
        } else {
            tables.unavailable_devices.remove(device_id);
        }
    }

    pub async fn series_len(&self, device_id: &str) -> usize {
        let tables = self.tables.read().await;
        tables
            .series
            .keys()
            .filter(|(device, _)| device == device_id)
            .count()
    }

    /// Emulates the store's TTL sweep.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut tables = self.tables.write().await;
        let before = tables.series.len();
        let cutoff = now.timestamp();
        tables.series.retain(|_, record| record.expires_at > cutoff);
        before - tables.series.len()
    }

    /// Runs `purge_expired` every `every` until the store is dropped.
    pub fn spawn_expiry_sweep(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let removed = store.purge_expired(Utc::now()).await;
                if removed > 0 {
                    tracing::debug!(removed, "expired series rows purged");
                }
            }
        })
    }
}

#[async_trait]
impl ApiKeyRegistry for MemoryStore {
    async fn get_api_key(&self, api_key: &str) -> StoreResult<Option<ApiKeyEntry>> {
        let tables = self.tables.read().await;
        tables.check(Table::ApiKeys)?;
        Ok(tables.api_keys.get(api_key).cloned())
    }
}

#[async_trait]
impl DeviceConfigStore for MemoryStore {
    async fn get_device_config(&self, device_id: &str) -> StoreResult<Option<DeviceConfig>> {
        let tables = self.tables.read().await;
        tables.check(Table::DeviceConfigs)?;
        Ok(tables.device_configs.get(device_id).cloned())
    }
}

#[async_trait]
impl MeasurementStore for MemoryStore {
    async fn put_latest(&self, record: &LatestSnapshotRecord) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.check_device(Table::Latest, &record.device_id)?;
        tables
            .latest
            .insert(record.device_id.clone(), record.clone());
        Ok(())
    }

    async fn get_latest(&self, device_id: &str) -> StoreResult<Option<LatestSnapshotRecord>> {
        let tables = self.tables.read().await;
        tables.check_device(Table::Latest, device_id)?;
        Ok(tables.latest.get(device_id).cloned())
    }

    async fn append_series(&self, record: &TimeSeriesRecord) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.check_device(Table::Series, &record.device_id)?;
        tables.series.insert(
            (record.device_id.clone(), record.timestamp_utc),
            record.clone(),
        );
        Ok(())
    }

    async fn query_series(
        &self,
        device_id: &str,
        range: SeriesRange,
    ) -> StoreResult<Vec<TimeSeriesRecord>> {
        let tables = self.tables.read().await;
        tables.check_device(Table::Series, device_id)?;
        let lower = (device_id.to_string(), range.start);
        Ok(tables
            .series
            .range(lower..)
            .take_while(|((device, _), _)| device == device_id)
            .filter(|((_, ts), _)| range.contains(*ts))
            .map(|(_, record)| record.clone())
            .collect())
    }
}

#[async_trait]
impl ArtifactSigner for MemoryStore {
    async fn presign_download(
        &self,
        location: &str,
        key: &str,
        ttl: Duration,
    ) -> StoreResult<String> {
        let tables = self.tables.read().await;
        tables.check(Table::Artifacts)?;
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        Ok(format!("memory://{location}/{key}?expires={expires}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Measurement;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn record(device_id: &str, ts: DateTime<Utc>) -> TimeSeriesRecord {
        TimeSeriesRecord {
            device_id: device_id.to_string(),
            timestamp_utc: ts,
            measurement: Measurement::default(),
            expires_at: (ts + ChronoDuration::days(90)).timestamp(),
        }
    }

    #[tokio::test]
    async fn query_series_is_scoped_to_device_and_range() {
        let store = MemoryStore::new();
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).single().expect("ts");
        for offset in 0..5 {
            let ts = base + ChronoDuration::hours(offset);
            store.append_series(&record("a", ts)).await.expect("append a");
            store.append_series(&record("b", ts)).await.expect("append b");
        }

        let rows = store
            .query_series(
                "a",
                SeriesRange::between(base + ChronoDuration::hours(1), base + ChronoDuration::hours(3)),
            )
            .await
            .expect("query");
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| row.device_id == "a"));
        assert!(rows.windows(2).all(|w| w[0].timestamp_utc < w[1].timestamp_utc));
    }

    #[tokio::test]
    async fn same_key_append_overwrites() {
        let store = MemoryStore::new();
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).single().expect("ts");
        store.append_series(&record("a", ts)).await.expect("first");
        store.append_series(&record("a", ts)).await.expect("second");
        assert_eq!(store.series_len("a").await, 1);
    }

    #[tokio::test]
    async fn purge_drops_only_expired_rows() {
        let store = MemoryStore::new();
        let old = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().expect("ts");
        let recent = old + ChronoDuration::days(60);
        store.append_series(&record("a", old)).await.expect("old");
        store.append_series(&record("a", recent)).await.expect("recent");

        let removed = store.purge_expired(old + ChronoDuration::days(91)).await;
        assert_eq!(removed, 1);
        assert_eq!(store.series_len("a").await, 1);
    }

    #[tokio::test]
    async fn simulated_outages_are_scoped() {
        let store = MemoryStore::new();
        store.set_device_unavailable("b", true).await;
        assert!(store.get_latest("a").await.is_ok());
        assert!(matches!(
            store.get_latest("b").await,
            Err(StoreError::Unavailable { .. })
        ));

        store.set_unavailable(Table::ApiKeys, true).await;
        assert!(store.get_api_key("k").await.is_err());
        store.set_unavailable(Table::ApiKeys, false).await;
        assert_eq!(store.get_api_key("k").await.expect("lookup"), None);
    }

    #[tokio::test]
    async fn expiry_sweep_removes_rows_past_their_ttl() {
        let store = Arc::new(MemoryStore::new());
        let old = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).single().expect("ts");
        let fresh = Utc::now();
        store.append_series(&record("a", old)).await.expect("append old");
        store.append_series(&record("a", fresh)).await.expect("append fresh");

        let sweep = store.spawn_expiry_sweep(Duration::from_millis(10));
        for _ in 0..50 {
            if store.series_len("a").await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sweep.abort();

        let rows = store
            .query_series("a", SeriesRange::since(old))
            .await
            .expect("series");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp_utc, fresh);
    }

    #[tokio::test]
    async fn loads_seed_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("seed.json");
        std::fs::write(
            &path,
            r#"{
                "api_keys": [{"api_key": "k1", "device_id": "hub"}],
                "device_configs": [{"device_id": "hub", "nodes": [{"device_id": "node-a"}]}]
            }"#,
        )
        .expect("write seed");

        let store = MemoryStore::new();
        assert_eq!(store.load_seed_file(&path).await.expect("seed"), 2);
        let entry = store.get_api_key("k1").await.expect("lookup").expect("entry");
        assert_eq!(entry.device_id.as_deref(), Some("hub"));
        assert!(store.get_device_config("hub").await.expect("config").is_some());
    }

    #[tokio::test]
    async fn bundled_example_seed_parses() {
        let seed: Seed =
            serde_json::from_str(include_str!("../../seed.example.json")).expect("seed");
        let store = MemoryStore::new();
        assert_eq!(store.seed(seed).await, 3);
        let entry = store
            .get_api_key("dev-node-key")
            .await
            .expect("lookup")
            .expect("entry");
        assert_eq!(
            entry.ota.and_then(|ota| ota.artifact_location).as_deref(),
            Some("firmware")
        );
    }
}
