use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Sensor name -> metric name -> raw reported value.
pub type Readings = BTreeMap<String, BTreeMap<String, JsonValue>>;

/// Free-form node status map (`wifi: "ok"`, `battery: "error"`, ...).
pub type StatusMap = BTreeMap<String, JsonValue>;

/// Sensor name -> metric name -> min/max over the rollup window.
pub type MinMaxRollup = BTreeMap<String, BTreeMap<String, MinMax>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtaPolicy {
    #[serde(default, deserialize_with = "deserialize_version")]
    pub target_version: Option<String>,
    #[serde(default, alias = "bucket")]
    pub artifact_location: Option<String>,
    #[serde(default, alias = "key_template")]
    pub artifact_key_template: Option<String>,
}

/// One row of the `api_keys` registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyEntry {
    pub api_key: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(
        default,
        rename = "ota_update",
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_policy"
    )]
    pub ota: Option<OtaPolicy>,
}

/// An undecodable policy disables OTA for the key instead of making the
/// credential itself unusable.
fn deserialize_policy<'de, D>(deserializer: D) -> Result<Option<OtaPolicy>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<JsonValue>::deserialize(deserializer)? {
        None | Some(JsonValue::Null) => Ok(None),
        Some(raw) => match serde_json::from_value(raw) {
            Ok(policy) => Ok(Some(policy)),
            Err(err) => {
                tracing::warn!(error = %err, "ignoring malformed OTA policy");
                Ok(None)
            }
        },
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    #[serde(default)]
    pub status: StatusMap,
    #[serde(default)]
    pub readings: Readings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VersionField {
    Text(String),
    Number(serde_json::Number),
}

impl VersionField {
    fn into_string(self) -> String {
        match self {
            VersionField::Text(text) => text,
            VersionField::Number(number) => number.to_string(),
        }
    }
}

fn deserialize_version<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<VersionField>::deserialize(deserializer)?.map(VersionField::into_string))
}

/// Keeps sensors whose entry is an object; anything else is not a reading.
fn sensor_readings(sensors: serde_json::Map<String, JsonValue>) -> Readings {
    sensors
        .into_iter()
        .filter_map(|(sensor, metrics)| match metrics {
            JsonValue::Object(metrics) => Some((sensor, metrics.into_iter().collect())),
            _ => None,
        })
        .collect()
}

/// Wire shape accepted from nodes. Anything not listed here is dropped.
#[derive(Debug, Deserialize)]
struct MeasurementDocument {
    #[serde(default)]
    status: Option<StatusMap>,
    #[serde(default)]
    readings: Option<serde_json::Map<String, JsonValue>>,
    #[serde(default)]
    measurements_v2: Option<serde_json::Map<String, JsonValue>>,
    #[serde(default, deserialize_with = "deserialize_version")]
    version: Option<String>,
}

impl Measurement {
    /// Parses an ingestion body. Deployed firmware reports readings under
    /// `measurements_v2`; `readings` takes precedence when both are sent.
    pub fn from_json_slice(body: &[u8]) -> Result<Self, String> {
        let value: JsonValue =
            serde_json::from_slice(body).map_err(|err| format!("body is not valid JSON: {err}"))?;
        if !value.is_object() {
            return Err("body is not a JSON object".to_string());
        }
        let document: MeasurementDocument = serde_json::from_value(value)
            .map_err(|err| format!("body is not a measurement document: {err}"))?;

        Ok(Self {
            status: document.status.unwrap_or_default(),
            readings: document
                .readings
                .or(document.measurements_v2)
                .map(sensor_readings)
                .unwrap_or_default(),
            version: document.version,
        })
    }
}

/// Current state of a device; overwritten on every ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestSnapshotRecord {
    pub device_id: String,
    pub timestamp_utc: DateTime<Utc>,
    pub measurement: Measurement,
}

/// Append-only history row keyed by `(device_id, timestamp_utc)`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesRecord {
    pub device_id: String,
    pub timestamp_utc: DateTime<Utc>,
    pub measurement: Measurement,
    /// Epoch seconds after which the store may drop the row.
    pub expires_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub device_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device_id: String,
    #[serde(default)]
    pub nodes: Option<Vec<NodeEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<serde_json::Map<String, JsonValue>>,
}

impl DeviceConfig {
    pub fn location_name(&self) -> Option<&str> {
        self.location
            .as_ref()?
            .get("name")?
            .as_str()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FleetMember {
    pub device_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MinMax {
    pub min: f64,
    pub max: f64,
}

impl MinMax {
    pub fn new(value: f64) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    pub fn observe(&mut self, value: f64) {
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drops_unrecognized_fields() {
        let body = br#"{"readings":{"bme":{"temperature":21.4}},"rssi_raw":[1,2],"version":"abc"}"#;
        let measurement = Measurement::from_json_slice(body).expect("parse");
        assert_eq!(measurement.version.as_deref(), Some("abc"));
        assert_eq!(measurement.readings["bme"]["temperature"], json!(21.4));
        assert!(measurement.status.is_empty());
    }

    #[test]
    fn accepts_firmware_readings_key() {
        let body = br#"{"measurements_v2":{"sht31d":{"humidity":"55.2"}},"status":{"wifi":"ok"}}"#;
        let measurement = Measurement::from_json_slice(body).expect("parse");
        assert_eq!(measurement.readings["sht31d"]["humidity"], json!("55.2"));
        assert_eq!(measurement.status["wifi"], json!("ok"));
    }

    #[test]
    fn readings_key_wins_over_legacy_key() {
        let body = br#"{"readings":{"a":{"t":1}},"measurements_v2":{"b":{"t":2}}}"#;
        let measurement = Measurement::from_json_slice(body).expect("parse");
        assert!(measurement.readings.contains_key("a"));
        assert!(!measurement.readings.contains_key("b"));
    }

    #[test]
    fn numeric_version_is_stringified() {
        let measurement = Measurement::from_json_slice(br#"{"version": 12}"#).expect("parse");
        assert_eq!(measurement.version.as_deref(), Some("12"));
    }

    #[test]
    fn rejects_non_documents() {
        assert!(Measurement::from_json_slice(b"not json").is_err());
        assert!(Measurement::from_json_slice(b"[1,2,3]").is_err());
        assert!(Measurement::from_json_slice(br#"{"readings": 5}"#).is_err());
        assert!(Measurement::from_json_slice(br#"{"status": "ok"}"#).is_err());
    }

    #[test]
    fn non_object_sensor_entries_are_skipped() {
        let body = br#"{"readings":{"bme":{"temperature":20.5},"battery":3.7,"sht":null}}"#;
        let measurement = Measurement::from_json_slice(body).expect("parse");
        assert_eq!(measurement.readings.len(), 1);
        assert_eq!(measurement.readings["bme"]["temperature"], json!(20.5));
    }

    #[test]
    fn numeric_target_version_is_stringified() {
        let entry: ApiKeyEntry = serde_json::from_value(json!({
            "api_key": "k",
            "device_id": "node-a",
            "ota_update": {"target_version": 2}
        }))
        .expect("entry");
        assert_eq!(
            entry.ota.and_then(|ota| ota.target_version).as_deref(),
            Some("2")
        );
    }

    #[test]
    fn malformed_ota_policy_keeps_the_credential_usable() {
        let entry: ApiKeyEntry = serde_json::from_value(json!({
            "api_key": "k",
            "device_id": "node-a",
            "ota_update": {"target_version": {"major": 2}, "bucket": ["fw"]}
        }))
        .expect("entry");
        assert_eq!(entry.device_id.as_deref(), Some("node-a"));
        assert_eq!(entry.ota, None);
    }

    #[test]
    fn location_name_ignores_blank_values() {
        let config: DeviceConfig = serde_json::from_value(json!({
            "device_id": "hub",
            "location": {"name": "  "}
        }))
        .expect("config");
        assert_eq!(config.location_name(), None);
    }

    #[test]
    fn ota_policy_accepts_short_field_names() {
        let entry: ApiKeyEntry = serde_json::from_value(json!({
            "api_key": "k",
            "device_id": "node-a",
            "ota_update": {"target_version": "2.0", "bucket": "fw", "key_template": "node-{version}.bin"}
        }))
        .expect("entry");
        let ota = entry.ota.expect("ota");
        assert_eq!(ota.artifact_location.as_deref(), Some("fw"));
        assert_eq!(ota.artifact_key_template.as_deref(), Some("node-{version}.bin"));
    }
}
