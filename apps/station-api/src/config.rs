use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_FIRMWARE_KEY_TEMPLATE: &str = "{version}.bin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    DynamoDb,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "dynamodb" | "dynamo" => Ok(Self::DynamoDb),
            "memory" | "in-memory" => Ok(Self::Memory),
            other => bail!("unknown store backend {other:?} (expected dynamodb or memory)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub api_keys: String,
    pub device_configs: String,
    pub latest: String,
    pub series: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            api_keys: "api_keys".to_string(),
            device_configs: "device_configs".to_string(),
            latest: "latest_measurements".to_string(),
            series: "measurements".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StationConfig {
    pub store_backend: StoreBackend,
    pub aws_region: Option<String>,
    pub tables: TableNames,
    pub seed_path: Option<PathBuf>,

    pub firmware_bucket: Option<String>,
    pub firmware_key_template: String,
    pub ota_url_ttl: Duration,

    pub series_retention_days: i64,
    pub rollup_window_hours: i64,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            store_backend: StoreBackend::DynamoDb,
            aws_region: None,
            tables: TableNames::default(),
            seed_path: None,
            firmware_bucket: None,
            firmware_key_template: DEFAULT_FIRMWARE_KEY_TEMPLATE.to_string(),
            ota_url_ttl: Duration::from_secs(3600),
            series_retention_days: 90,
            rollup_window_hours: 24,
        }
    }
}

impl StationConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let store_backend = match env_optional("STATION_STORE_BACKEND") {
            Some(raw) => raw
                .parse::<StoreBackend>()
                .context("invalid STATION_STORE_BACKEND")?,
            None => defaults.store_backend,
        };

        let tables = TableNames {
            api_keys: env_string("STATION_TABLE_API_KEYS", defaults.tables.api_keys),
            device_configs: env_string(
                "STATION_TABLE_DEVICE_CONFIGS",
                defaults.tables.device_configs,
            ),
            latest: env_string("STATION_TABLE_LATEST", defaults.tables.latest),
            series: env_string("STATION_TABLE_SERIES", defaults.tables.series),
        };

        let firmware_key_template = env_string(
            "STATION_FIRMWARE_KEY_TEMPLATE",
            defaults.firmware_key_template,
        );
        if !firmware_key_template.contains("{version}") {
            tracing::warn!(
                template = %firmware_key_template,
                "firmware key template has no {{version}} placeholder"
            );
        }

        let ota_url_ttl = Duration::from_secs(env_u64(
            "STATION_OTA_URL_TTL_SECONDS",
            defaults.ota_url_ttl.as_secs(),
        )?);
        if ota_url_ttl.is_zero() {
            return Err(anyhow!("STATION_OTA_URL_TTL_SECONDS must be positive"));
        }

        let series_retention_days = env_u64(
            "STATION_SERIES_RETENTION_DAYS",
            defaults.series_retention_days as u64,
        )? as i64;
        let rollup_window_hours = env_u64(
            "STATION_ROLLUP_WINDOW_HOURS",
            defaults.rollup_window_hours as u64,
        )? as i64;
        if series_retention_days == 0 || rollup_window_hours == 0 {
            return Err(anyhow!(
                "STATION_SERIES_RETENTION_DAYS and STATION_ROLLUP_WINDOW_HOURS must be positive"
            ));
        }

        Ok(Self {
            store_backend,
            aws_region: env_optional("STATION_AWS_REGION"),
            tables,
            seed_path: env_optional("STATION_SEED_PATH").map(PathBuf::from),
            firmware_bucket: env_optional("STATION_FIRMWARE_BUCKET"),
            firmware_key_template,
            ota_url_ttl,
            series_retention_days,
            rollup_window_hours,
        })
    }

    pub fn series_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.series_retention_days)
    }

    pub fn rollup_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.rollup_window_hours)
    }
}

fn env_string(key: &str, default: String) -> String {
    env_optional(key).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match env_optional(key) {
        Some(value) => value
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        None => Ok(default),
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
