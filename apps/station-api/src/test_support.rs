use crate::config::{StationConfig, StoreBackend};
use crate::models::{ApiKeyEntry, DeviceConfig, NodeEntry, OtaPolicy};
use crate::state::AppState;
use crate::store::memory::MemoryStore;
use crate::store::Stores;
use std::sync::Arc;

pub const HUB_KEY: &str = "hub-key";
pub const NODE_KEY: &str = "node-a-key";
pub const ORPHAN_KEY: &str = "orphan-key";

pub fn test_config() -> StationConfig {
    StationConfig {
        store_backend: StoreBackend::Memory,
        firmware_bucket: Some("firmware".to_string()),
        ..StationConfig::default()
    }
}

/// Memory store with a hub, two configured nodes, and a node key whose OTA
/// policy targets `1.0`.
pub async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_api_key(ApiKeyEntry {
            api_key: HUB_KEY.to_string(),
            device_id: Some("hub".to_string()),
            ota: None,
        })
        .await;
    store
        .insert_api_key(ApiKeyEntry {
            api_key: NODE_KEY.to_string(),
            device_id: Some("node-a".to_string()),
            ota: Some(OtaPolicy {
                target_version: Some("1.0".to_string()),
                artifact_location: None,
                artifact_key_template: None,
            }),
        })
        .await;
    store
        .insert_api_key(ApiKeyEntry {
            api_key: ORPHAN_KEY.to_string(),
            device_id: None,
            ota: None,
        })
        .await;
    store
        .insert_device_config(DeviceConfig {
            device_id: "hub".to_string(),
            nodes: Some(vec![
                NodeEntry {
                    device_id: "node-a".to_string(),
                    display_name: Some("Greenhouse".to_string()),
                },
                NodeEntry {
                    device_id: "node-b".to_string(),
                    display_name: Some("Shed".to_string()),
                },
            ]),
            location: None,
        })
        .await;
    store
}

pub fn test_state(store: Arc<MemoryStore>) -> AppState {
    AppState::new(test_config(), Stores::from_memory(store))
}

pub async fn send(
    app: axum::Router,
    request: axum::http::Request<axum::body::Body>,
) -> (axum::http::StatusCode, axum::body::Bytes) {
    use tower::ServiceExt;

    let response = app.oneshot(request).await.expect("response");
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, body)
}

pub fn json_body(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body).expect("json body")
}
