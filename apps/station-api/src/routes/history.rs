use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::auth::DeviceAuth;
use crate::error::{AppResult, ServiceError};
use crate::models::FleetMember;
use crate::services::fleet::resolve_fleet;
use crate::services::history::{fetch_history, HistoryQuery, HistoryRequest, HistoryResponse};
use crate::state::AppState;

pub(crate) async fn query_history(
    State(state): State<AppState>,
    DeviceAuth(credential): DeviceAuth,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<HistoryResponse>> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    let request = HistoryRequest::parse(content_type, &body)?;
    let query = HistoryQuery::validate(request)?;

    let fleet = resolve_fleet(state.stores.device_configs.as_ref(), &credential.device_id)
        .await
        .map_err(ServiceError::upstream("Couldn't get device config"))?;
    let response = fetch_history(state.stores.measurements.as_ref(), &fleet, query).await;
    Ok(Json(response))
}

pub(crate) async fn list_history_devices(
    State(state): State<AppState>,
    DeviceAuth(credential): DeviceAuth,
) -> AppResult<Json<Vec<FleetMember>>> {
    let fleet = resolve_fleet(state.stores.device_configs.as_ref(), &credential.device_id)
        .await
        .map_err(ServiceError::upstream("Couldn't get device config"))?;
    Ok(Json(fleet.chartable()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/history",
            post(query_history).fallback(super::method_not_allowed),
        )
        .route(
            "/history/devices",
            get(list_history_devices).fallback(super::method_not_allowed),
        )
}
