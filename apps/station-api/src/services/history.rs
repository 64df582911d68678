use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::form_urlencoded;

use crate::error::ServiceError;
use crate::json::as_finite_f64;
use crate::models::{FleetMember, TimeSeriesRecord};
use crate::services::fleet::Fleet;
use crate::store::{MeasurementStore, SeriesRange};
use crate::time::{format_timestamp, parse_date_bound};

pub const DEFAULT_METRIC: &str = "temperature";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DeviceSelection {
    List(Vec<String>),
    Csv(String),
}

impl DeviceSelection {
    fn into_ids(self) -> Vec<String> {
        let raw = match self {
            DeviceSelection::List(ids) => ids,
            DeviceSelection::Csv(text) => text.split(',').map(str::to_string).collect(),
        };
        raw.into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HistoryRequest {
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub devices: Option<DeviceSelection>,
}

impl HistoryRequest {
    /// Accepts a JSON document or a urlencoded form, picked by content type.
    pub fn parse(content_type: Option<&str>, body: &[u8]) -> Result<Self, ServiceError> {
        let is_form = content_type
            .map(|value| value.trim().to_ascii_lowercase())
            .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));

        if is_form {
            return Ok(Self::from_form(body));
        }
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|err| ServiceError::Validation(format!("invalid history request: {err}")))
    }

    fn from_form(body: &[u8]) -> Self {
        let mut request = Self::default();
        for (key, value) in form_urlencoded::parse(body) {
            let value = value.into_owned();
            match &*key {
                "start_date" => request.start_date = Some(value),
                "end_date" => request.end_date = Some(value),
                "metric" => request.metric = Some(value),
                "devices" => request.devices = Some(DeviceSelection::Csv(value)),
                _ => {}
            }
        }
        request
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    pub start_date: String,
    pub end_date: String,
    pub range: SeriesRange,
    pub metric: String,
    pub devices: Vec<String>,
}

impl HistoryQuery {
    pub fn validate(request: HistoryRequest) -> Result<Self, ServiceError> {
        let non_blank = |value: Option<String>| value.filter(|text| !text.trim().is_empty());
        let (Some(start_date), Some(end_date)) =
            (non_blank(request.start_date), non_blank(request.end_date))
        else {
            return Err(ServiceError::Validation(
                "start_date and end_date are required".to_string(),
            ));
        };

        let start = parse_date_bound(&start_date).map_err(ServiceError::Validation)?;
        let end = parse_date_bound(&end_date).map_err(ServiceError::Validation)?;

        let metric = request
            .metric
            .map(|metric| metric.trim().to_string())
            .filter(|metric| !metric.is_empty())
            .unwrap_or_else(|| DEFAULT_METRIC.to_string());

        Ok(Self {
            start_date,
            end_date,
            range: SeriesRange::between(start, end),
            metric,
            devices: request.devices.map(DeviceSelection::into_ids).unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub timestamp: String,
    pub value: f64,
    pub sensor: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryResponse {
    pub success: bool,
    pub metric: String,
    pub data: BTreeMap<String, Vec<SeriesPoint>>,
    pub start_date: String,
    pub end_date: String,
}

/// Requested ids restricted to what the hub may see, in request order.
/// An empty request selects every available device.
pub fn select_devices(requested: &[String], available: &[FleetMember]) -> Vec<String> {
    if requested.is_empty() {
        return available.iter().map(|member| member.device_id.clone()).collect();
    }
    let mut selected: Vec<String> = Vec::new();
    for id in requested {
        let allowed = available.iter().any(|member| &member.device_id == id);
        if allowed && !selected.contains(id) {
            selected.push(id.clone());
        }
    }
    selected
}

pub fn series_points(records: &[TimeSeriesRecord], metric: &str) -> Vec<SeriesPoint> {
    let mut points: Vec<(DateTime<Utc>, SeriesPoint)> = Vec::new();
    for record in records {
        for (sensor, metrics) in &record.measurement.readings {
            let Some(value) = metrics.get(metric).and_then(as_finite_f64) else {
                continue;
            };
            points.push((
                record.timestamp_utc,
                SeriesPoint {
                    timestamp: format_timestamp(record.timestamp_utc),
                    value,
                    sensor: sensor.clone(),
                },
            ));
        }
    }
    points.sort_by_key(|(ts, _)| *ts);
    points.into_iter().map(|(_, point)| point).collect()
}

pub async fn fetch_history(
    store: &dyn MeasurementStore,
    fleet: &Fleet,
    query: HistoryQuery,
) -> HistoryResponse {
    let devices = select_devices(&query.devices, &fleet.chartable());
    let metric = query.metric.as_str();
    let range = query.range;

    let results = join_all(devices.iter().map(|device_id| async move {
        if range.is_empty() {
            return Vec::new();
        }
        match store.query_series(device_id, range).await {
            Ok(records) => series_points(&records, metric),
            Err(err) => {
                tracing::warn!(device_id = %device_id, error = %err, "history query failed");
                Vec::new()
            }
        }
    }))
    .await;

    let data = devices.into_iter().zip(results).collect();
    HistoryResponse {
        success: true,
        metric: query.metric,
        data,
        start_date: query.start_date,
        end_date: query.end_date,
    }
}
