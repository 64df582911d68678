use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;

use crate::auth::DeviceAuth;
use crate::error::{AppResult, ServiceError};
use crate::services::aggregation::{build_dashboard, Dashboard};
use crate::services::fleet::resolve_fleet;
use crate::state::AppState;

pub(crate) async fn get_display(
    State(state): State<AppState>,
    DeviceAuth(credential): DeviceAuth,
) -> AppResult<Json<Dashboard>> {
    let fleet = resolve_fleet(state.stores.device_configs.as_ref(), &credential.device_id)
        .await
        .map_err(ServiceError::upstream("Couldn't get device config"))?;
    let dashboard = build_dashboard(
        state.stores.measurements.as_ref(),
        &fleet,
        state.config.rollup_window(),
        Utc::now(),
    )
    .await;
    Ok(Json(dashboard))
}

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/display",
        get(get_display).fallback(super::method_not_allowed),
    )
}

#[cfg(test)]
mod tests {
    use crate::models::{LatestSnapshotRecord, Measurement};
    use crate::store::memory::Table;
    use crate::store::MeasurementStore;
    use crate::test_support::{json_body, seeded_store, send, test_state, HUB_KEY, NODE_KEY};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;

    fn display(key: &str) -> Request<Body> {
        Request::builder()
            .uri(format!("/api/display?api_key={key}"))
            .body(Body::empty())
            .expect("request")
    }

    #[tokio::test]
    async fn reports_every_configured_node() {
        let store = seeded_store().await;
        let app = crate::routes::router(test_state(store.clone()));
        let (status, _) = send(
            app.clone(),
            Request::builder()
                .method("POST")
                .uri("/api/measurements")
                .header("x-api-key", NODE_KEY)
                .body(Body::from(
                    r#"{"readings":{"bme":{"temperature":"19.0","pressure":1002}},"status":{"wifi":"ok"},"version":"1.0"}"#,
                ))
                .expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(app, display(HUB_KEY)).await;
        assert_eq!(status, StatusCode::OK);
        let body = json_body(&body);
        assert_eq!(body["device_id"], "hub");

        let node_a = &body["nodes"]["node-a"];
        assert_eq!(node_a["state"], "ok");
        assert_eq!(node_a["display_name"], "Greenhouse");
        assert_eq!(node_a["version"], "1.0");
        assert_eq!(node_a["status"]["wifi"], "ok");
        assert_eq!(
            node_a["measurements_min_max"]["bme"],
            json!({"temperature": {"min": 19.0, "max": 19.0}, "pressure": {"min": 1002.0, "max": 1002.0}})
        );

        assert_eq!(
            body["nodes"]["node-b"],
            json!({"device_id": "node-b", "display_name": "Shed", "state": "no_data"})
        );
    }

    #[tokio::test]
    async fn unconfigured_device_sees_only_itself() {
        let store = seeded_store().await;
        store
            .put_latest(&LatestSnapshotRecord {
                device_id: "node-a".to_string(),
                timestamp_utc: chrono::Utc::now(),
                measurement: Measurement::default(),
            })
            .await
            .expect("snapshot");
        let app = crate::routes::router(test_state(store));
        let (status, body) = send(app, display(NODE_KEY)).await;
        assert_eq!(status, StatusCode::OK);
        let body = json_body(&body);
        let nodes = body["nodes"].as_object().expect("nodes");
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes["node-a"]["state"], "ok");
        assert!(nodes["node-a"].get("measurements_min_max").is_none());
    }

    #[tokio::test]
    async fn one_failing_node_does_not_fail_the_dashboard() {
        let store = seeded_store().await;
        store.set_device_unavailable("node-b", true).await;
        let app = crate::routes::router(test_state(store));
        let (status, body) = send(app, display(HUB_KEY)).await;
        assert_eq!(status, StatusCode::OK);
        let body = json_body(&body);
        assert_eq!(body["nodes"]["node-a"]["state"], "no_data");
        assert_eq!(body["nodes"]["node-b"]["state"], "no_data");
        assert!(body["nodes"]["node-b"]["error"].is_string());
    }

    #[tokio::test]
    async fn device_config_outage_is_server_error() {
        let store = seeded_store().await;
        store.set_unavailable(Table::DeviceConfigs, true).await;
        let app = crate::routes::router(test_state(store));
        let (status, body) = send(app, display(HUB_KEY)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(String::from_utf8_lossy(&body), "Couldn't get device config");
    }
}
