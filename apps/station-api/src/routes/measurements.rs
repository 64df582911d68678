use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;

use crate::auth::DeviceAuth;
use crate::error::AppResult;
use crate::services::ingest::{IngestResponse, Ingestor};
use crate::state::AppState;

pub(crate) async fn ingest_measurement(
    State(state): State<AppState>,
    DeviceAuth(credential): DeviceAuth,
    body: Bytes,
) -> AppResult<Json<IngestResponse>> {
    let ingestor = Ingestor {
        measurements: state.stores.measurements.as_ref(),
        ota: state.ota.as_ref(),
        retention: state.config.series_retention(),
    };
    let response = ingestor.ingest(&credential, &body, Utc::now()).await?;
    tracing::info!(
        device_id = %response.device_id,
        ota_update = response.ota_update.is_some(),
        "measurement ingested"
    );
    Ok(Json(response))
}

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/measurements",
        post(ingest_measurement).fallback(super::method_not_allowed),
    )
}
