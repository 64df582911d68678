use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};

use super::{
    ApiKeyRegistry, DeviceConfigStore, MeasurementStore, SeriesRange, StoreError, StoreResult,
};
use crate::config::TableNames;
use crate::models::{
    ApiKeyEntry, DeviceConfig, LatestSnapshotRecord, Measurement, Readings, StatusMap,
    TimeSeriesRecord,
};
use crate::time::{format_timestamp, parse_timestamp};

type Item = HashMap<String, AttributeValue>;

const ATTR_API_KEY: &str = "api_key";
const ATTR_DEVICE_ID: &str = "device_id";
const ATTR_TIMESTAMP: &str = "timestamp_utc";
const ATTR_STATUS: &str = "status";
// Name used by the deployed firmware and existing tables.
const ATTR_READINGS: &str = "measurements_v2";
const ATTR_VERSION: &str = "version";
const ATTR_TTL: &str = "ttl";

pub struct DynamoStore {
    client: Client,
    tables: TableNames,
}

impl DynamoStore {
    pub fn new(client: Client, tables: TableNames) -> Self {
        Self { client, tables }
    }

    async fn get_item(&self, table: &str, key_name: &str, key: &str) -> StoreResult<Option<Item>> {
        let output = self
            .client
            .get_item()
            .table_name(table)
            .key(key_name, AttributeValue::S(key.to_string()))
            .send()
            .await
            .map_err(|err| StoreError::unavailable(table, DisplayErrorContext(&err).to_string()))?;
        Ok(output.item().cloned())
    }

    async fn put_item(&self, table: &str, item: Item) -> StoreResult<()> {
        self.client
            .put_item()
            .table_name(table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|err| StoreError::unavailable(table, DisplayErrorContext(&err).to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ApiKeyRegistry for DynamoStore {
    async fn get_api_key(&self, api_key: &str) -> StoreResult<Option<ApiKeyEntry>> {
        let table = &self.tables.api_keys;
        let Some(item) = self.get_item(table, ATTR_API_KEY, api_key).await? else {
            return Ok(None);
        };
        serde_json::from_value(item_to_json(&item))
            .map(Some)
            .map_err(|err| StoreError::malformed(table, err.to_string()))
    }
}

#[async_trait]
impl DeviceConfigStore for DynamoStore {
    async fn get_device_config(&self, device_id: &str) -> StoreResult<Option<DeviceConfig>> {
        let table = &self.tables.device_configs;
        let Some(item) = self.get_item(table, ATTR_DEVICE_ID, device_id).await? else {
            return Ok(None);
        };
        serde_json::from_value(item_to_json(&item))
            .map(Some)
            .map_err(|err| StoreError::malformed(table, err.to_string()))
    }
}

#[async_trait]
impl MeasurementStore for DynamoStore {
    async fn put_latest(&self, record: &LatestSnapshotRecord) -> StoreResult<()> {
        let item = encode_snapshot(record);
        self.put_item(&self.tables.latest, item).await
    }

    async fn get_latest(&self, device_id: &str) -> StoreResult<Option<LatestSnapshotRecord>> {
        let table = &self.tables.latest;
        let Some(item) = self.get_item(table, ATTR_DEVICE_ID, device_id).await? else {
            return Ok(None);
        };
        decode_snapshot(&item)
            .map(Some)
            .map_err(|message| StoreError::malformed(table, message))
    }

    async fn append_series(&self, record: &TimeSeriesRecord) -> StoreResult<()> {
        let item = encode_series(record);
        self.put_item(&self.tables.series, item).await
    }

    async fn query_series(
        &self,
        device_id: &str,
        range: SeriesRange,
    ) -> StoreResult<Vec<TimeSeriesRecord>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let table = &self.tables.series;
        let condition = if range.end.is_some() {
            "device_id = :device_id AND timestamp_utc BETWEEN :start AND :end"
        } else {
            "device_id = :device_id AND timestamp_utc >= :start"
        };

        let mut records = Vec::new();
        let mut start_key: Option<Item> = None;
        loop {
            let mut request = self
                .client
                .query()
                .table_name(table)
                .key_condition_expression(condition)
                .expression_attribute_values(":device_id", AttributeValue::S(device_id.to_string()))
                .expression_attribute_values(":start", AttributeValue::S(format_timestamp(range.start)))
                .set_exclusive_start_key(start_key.take());
            if let Some(end) = range.end {
                request =
                    request.expression_attribute_values(":end", AttributeValue::S(format_timestamp(end)));
            }

            let output = request.send().await.map_err(|err| {
                StoreError::unavailable(table, DisplayErrorContext(&err).to_string())
            })?;
            for item in output.items() {
                let record =
                    decode_series(item).map_err(|message| StoreError::malformed(table, message))?;
                records.push(record);
            }

            match output.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        tracing::debug!(device_id, rows = records.len(), "queried time series");
        Ok(records)
    }
}

pub(crate) fn json_to_attr(value: &JsonValue) -> AttributeValue {
    match value {
        JsonValue::Null => AttributeValue::Null(true),
        JsonValue::Bool(flag) => AttributeValue::Bool(*flag),
        JsonValue::Number(number) => AttributeValue::N(number.to_string()),
        JsonValue::String(text) => AttributeValue::S(text.clone()),
        JsonValue::Array(items) => AttributeValue::L(items.iter().map(json_to_attr).collect()),
        JsonValue::Object(map) => AttributeValue::M(
            map.iter()
                .map(|(key, value)| (key.clone(), json_to_attr(value)))
                .collect(),
        ),
    }
}

pub(crate) fn attr_to_json(attr: &AttributeValue) -> JsonValue {
    match attr {
        AttributeValue::S(text) => JsonValue::String(text.clone()),
        AttributeValue::N(raw) => number_to_json(raw),
        AttributeValue::Bool(flag) => JsonValue::Bool(*flag),
        AttributeValue::Null(_) => JsonValue::Null,
        AttributeValue::M(map) => JsonValue::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), attr_to_json(value)))
                .collect(),
        ),
        AttributeValue::L(items) => JsonValue::Array(items.iter().map(attr_to_json).collect()),
        AttributeValue::Ss(items) => {
            JsonValue::Array(items.iter().cloned().map(JsonValue::String).collect())
        }
        AttributeValue::Ns(items) => {
            JsonValue::Array(items.iter().map(|raw| number_to_json(raw)).collect())
        }
        _ => JsonValue::Null,
    }
}

fn number_to_json(raw: &str) -> JsonValue {
    if let Ok(int) = raw.parse::<i64>() {
        return JsonValue::from(int);
    }
    raw.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(raw.to_string()))
}

fn item_to_json(item: &Item) -> JsonValue {
    JsonValue::Object(
        item.iter()
            .map(|(key, value)| (key.clone(), attr_to_json(value)))
            .collect(),
    )
}

fn map_attr<'a, I>(entries: I) -> AttributeValue
where
    I: IntoIterator<Item = (&'a String, &'a JsonValue)>,
{
    AttributeValue::M(
        entries
            .into_iter()
            .map(|(key, value)| (key.clone(), json_to_attr(value)))
            .collect(),
    )
}

fn encode_measurement(item: &mut Item, measurement: &Measurement) {
    item.insert(ATTR_STATUS.to_string(), map_attr(&measurement.status));
    item.insert(
        ATTR_READINGS.to_string(),
        AttributeValue::M(
            measurement
                .readings
                .iter()
                .map(|(sensor, metrics)| (sensor.clone(), map_attr(metrics)))
                .collect(),
        ),
    );
    if let Some(version) = &measurement.version {
        item.insert(ATTR_VERSION.to_string(), AttributeValue::S(version.clone()));
    }
}

fn encode_snapshot(record: &LatestSnapshotRecord) -> Item {
    let mut item = Item::new();
    item.insert(
        ATTR_DEVICE_ID.to_string(),
        AttributeValue::S(record.device_id.clone()),
    );
    item.insert(
        ATTR_TIMESTAMP.to_string(),
        AttributeValue::S(format_timestamp(record.timestamp_utc)),
    );
    encode_measurement(&mut item, &record.measurement);
    item
}

fn encode_series(record: &TimeSeriesRecord) -> Item {
    let mut item = encode_snapshot(&LatestSnapshotRecord {
        device_id: record.device_id.clone(),
        timestamp_utc: record.timestamp_utc,
        measurement: record.measurement.clone(),
    });
    item.insert(
        ATTR_TTL.to_string(),
        AttributeValue::N(record.expires_at.to_string()),
    );
    item
}

fn required_string<'a>(item: &'a Item, name: &str) -> Result<&'a str, String> {
    match item.get(name) {
        Some(AttributeValue::S(value)) => Ok(value.as_str()),
        Some(_) => Err(format!("{name} is not a string")),
        None => Err(format!("missing {name}")),
    }
}

fn decode_measurement(item: &Item) -> Measurement {
    let status: StatusMap = match item.get(ATTR_STATUS) {
        Some(AttributeValue::M(map)) => map
            .iter()
            .map(|(key, value)| (key.clone(), attr_to_json(value)))
            .collect(),
        _ => StatusMap::new(),
    };

    let mut readings = Readings::new();
    if let Some(AttributeValue::M(sensors)) = item.get(ATTR_READINGS) {
        for (sensor, metrics) in sensors {
            // Sensors that are not maps are not readings; skip them.
            let AttributeValue::M(metrics) = metrics else {
                continue;
            };
            let metrics: BTreeMap<String, JsonValue> = metrics
                .iter()
                .map(|(metric, value)| (metric.clone(), attr_to_json(value)))
                .collect();
            readings.insert(sensor.clone(), metrics);
        }
    }

    let version = match item.get(ATTR_VERSION) {
        Some(AttributeValue::S(version)) => Some(version.clone()),
        Some(AttributeValue::N(version)) => Some(version.clone()),
        _ => None,
    };

    Measurement {
        status,
        readings,
        version,
    }
}

fn decode_snapshot(item: &Item) -> Result<LatestSnapshotRecord, String> {
    let device_id = required_string(item, ATTR_DEVICE_ID)?.to_string();
    let raw_ts = required_string(item, ATTR_TIMESTAMP)?;
    let timestamp_utc =
        parse_timestamp(raw_ts).ok_or_else(|| format!("invalid {ATTR_TIMESTAMP}: {raw_ts}"))?;
    Ok(LatestSnapshotRecord {
        device_id,
        timestamp_utc,
        measurement: decode_measurement(item),
    })
}

fn decode_series(item: &Item) -> Result<TimeSeriesRecord, String> {
    let snapshot = decode_snapshot(item)?;
    let expires_at = match item.get(ATTR_TTL) {
        Some(AttributeValue::N(raw)) => raw
            .parse::<i64>()
            .map_err(|_| format!("invalid {ATTR_TTL}: {raw}"))?,
        _ => 0,
    };
    Ok(TimeSeriesRecord {
        device_id: snapshot.device_id,
        timestamp_utc: snapshot.timestamp_utc,
        measurement: snapshot.measurement,
        expires_at,
    })
}
