use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::auth::ResolvedCredential;
use crate::error::ServiceError;
use crate::models::{LatestSnapshotRecord, Measurement, TimeSeriesRecord};
use crate::services::ota::{OtaDirective, OtaNegotiator};
use crate::store::MeasurementStore;
use crate::time::truncate_to_second;

pub const FIRMWARE_STATUS_KEY: &str = "firmware_up_to_date";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestResponse {
    pub device_id: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ota_update: Option<OtaDirective>,
}

pub struct Ingestor<'a> {
    pub measurements: &'a dyn MeasurementStore,
    pub ota: &'a OtaNegotiator,
    pub retention: chrono::Duration,
}

impl Ingestor<'_> {
    /// Stores one measurement for an already-resolved device.
    ///
    /// The snapshot is written before the series row. If the second write
    /// fails the request fails, but the snapshot write is not rolled back.
    pub async fn ingest(
        &self,
        credential: &ResolvedCredential,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<IngestResponse, ServiceError> {
        let device_id = credential.device_id.as_str();
        let mut measurement = Measurement::from_json_slice(body).map_err(ServiceError::Validation)?;

        let ota_update = self
            .ota
            .negotiate(device_id, &credential.entry, measurement.version.as_deref())
            .await;
        if ota_update.as_ref().is_some_and(OtaDirective::is_download) {
            measurement
                .status
                .insert(FIRMWARE_STATUS_KEY.to_string(), JsonValue::from("no"));
        }

        let timestamp_utc = truncate_to_second(now);

        self.measurements
            .put_latest(&LatestSnapshotRecord {
                device_id: device_id.to_string(),
                timestamp_utc,
                measurement: measurement.clone(),
            })
            .await
            .map_err(ServiceError::upstream("Couldn't save latest measurement"))?;

        self.measurements
            .append_series(&TimeSeriesRecord {
                device_id: device_id.to_string(),
                timestamp_utc,
                measurement,
                expires_at: (timestamp_utc + self.retention).timestamp(),
            })
            .await
            .map_err(ServiceError::upstream("Couldn't save measurement"))?;

        tracing::debug!(device_id, timestamp = %timestamp_utc, "measurement stored");

        Ok(IngestResponse {
            device_id: device_id.to_string(),
            status: "ok",
            ota_update,
        })
    }
}
