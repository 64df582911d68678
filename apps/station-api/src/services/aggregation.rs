//! Dashboard fan-out and trailing-window rollups.
//!
//! Each fleet member is read independently. A member whose snapshot is
//! missing or whose lookup fails becomes a `no_data` entry; it never fails
//! the dashboard as a whole.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::json::as_finite_f64;
use crate::models::{
    FleetMember, LatestSnapshotRecord, MinMax, MinMaxRollup, Readings, StatusMap,
    TimeSeriesRecord,
};
use crate::services::fleet::Fleet;
use crate::store::{MeasurementStore, SeriesRange, StoreResult};

/// Metrics folded into rollups. Everything else (signal codes, voltages,
/// counters) is left out.
pub const ROLLUP_METRICS: [&str; 3] = ["temperature", "humidity", "pressure"];

pub fn fold_rollup<'a>(records: impl IntoIterator<Item = &'a TimeSeriesRecord>) -> MinMaxRollup {
    let mut rollup = MinMaxRollup::new();
    for record in records {
        for (sensor, metrics) in &record.measurement.readings {
            for (metric, raw) in metrics {
                if !ROLLUP_METRICS.contains(&metric.as_str()) {
                    continue;
                }
                let Some(value) = as_finite_f64(raw) else {
                    continue;
                };
                rollup
                    .entry(sensor.clone())
                    .or_default()
                    .entry(metric.clone())
                    .and_modify(|pair| pair.observe(value))
                    .or_insert_with(|| MinMax::new(value));
            }
        }
    }
    rollup
}

pub async fn build_rollup(
    store: &dyn MeasurementStore,
    device_id: &str,
    window: chrono::Duration,
    now: DateTime<Utc>,
) -> StoreResult<MinMaxRollup> {
    let records = store
        .query_series(device_id, SeriesRange::since(now - window))
        .await?;
    Ok(fold_rollup(&records))
}

#[derive(Debug)]
pub enum NodeOutcome {
    Data {
        snapshot: LatestSnapshotRecord,
        rollup: Option<MinMaxRollup>,
    },
    Empty,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeView {
    pub device_id: String,
    pub display_name: String,
    #[serde(flatten)]
    pub body: NodeBody,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NodeBody {
    Ok {
        #[serde(serialize_with = "crate::time::serde_seconds::serialize")]
        timestamp_utc: DateTime<Utc>,
        readings: Readings,
        status: StatusMap,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        measurements_min_max: Option<MinMaxRollup>,
    },
    NoData {
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl NodeView {
    pub fn from_outcome(member: FleetMember, outcome: NodeOutcome) -> Self {
        let body = match outcome {
            NodeOutcome::Data { snapshot, rollup } => NodeBody::Ok {
                timestamp_utc: snapshot.timestamp_utc,
                readings: snapshot.measurement.readings,
                status: snapshot.measurement.status,
                version: snapshot.measurement.version,
                measurements_min_max: rollup.filter(|rollup| !rollup.is_empty()),
            },
            NodeOutcome::Empty => NodeBody::NoData { error: None },
            NodeOutcome::Failed(error) => NodeBody::NoData { error: Some(error) },
        };
        Self {
            device_id: member.device_id,
            display_name: member.display_name,
            body,
        }
    }

    pub fn has_data(&self) -> bool {
        matches!(self.body, NodeBody::Ok { .. })
    }
}

/// Node views keyed by device id, emitted in fleet order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeViews(pub Vec<NodeView>);

impl Serialize for NodeViews {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for view in &self.0 {
            map.serialize_entry(&view.device_id, view)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardConfig {
    pub location: serde_json::Map<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub device_id: String,
    #[serde(serialize_with = "crate::time::serde_seconds::serialize")]
    pub timestamp_utc: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<DashboardConfig>,
    pub nodes: NodeViews,
}

async fn collect_node(
    store: &dyn MeasurementStore,
    device_id: &str,
    window: chrono::Duration,
    now: DateTime<Utc>,
) -> NodeOutcome {
    let snapshot = match store.get_latest(device_id).await {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => return NodeOutcome::Empty,
        Err(err) => {
            tracing::warn!(device_id, error = %err, "snapshot lookup failed");
            return NodeOutcome::Failed("Couldn't get measurement".to_string());
        }
    };

    let rollup = match build_rollup(store, device_id, window, now).await {
        Ok(rollup) => Some(rollup),
        Err(err) => {
            tracing::warn!(device_id, error = %err, "rollup query failed");
            None
        }
    };
    NodeOutcome::Data { snapshot, rollup }
}

pub async fn build_dashboard(
    store: &dyn MeasurementStore,
    fleet: &Fleet,
    window: chrono::Duration,
    now: DateTime<Utc>,
) -> Dashboard {
    let members = fleet.members();
    let outcomes = join_all(
        members
            .iter()
            .map(|member| collect_node(store, &member.device_id, window, now)),
    )
    .await;

    let nodes: Vec<NodeView> = members
        .into_iter()
        .zip(outcomes)
        .map(|(member, outcome)| NodeView::from_outcome(member, outcome))
        .collect();

    tracing::debug!(
        device_id = %fleet.hub_id,
        nodes = nodes.len(),
        with_data = nodes.iter().filter(|view| view.has_data()).count(),
        "dashboard assembled"
    );

    Dashboard {
        device_id: fleet.hub_id.clone(),
        timestamp_utc: crate::time::truncate_to_second(now),
        config: fleet
            .config
            .as_ref()
            .and_then(|config| config.location.clone())
            .map(|location| DashboardConfig { location }),
        nodes: NodeViews(nodes),
    }
}
