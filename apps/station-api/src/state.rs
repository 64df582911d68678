use crate::config::StationConfig;
use crate::services::ota::{OtaDefaults, OtaNegotiator};
use crate::store::{ApiKeyRegistry, Stores};
use axum::extract::FromRef;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: StationConfig,
    pub stores: Stores,
    pub ota: Arc<OtaNegotiator>,
}

impl AppState {
    pub fn new(config: StationConfig, stores: Stores) -> Self {
        let ota = Arc::new(OtaNegotiator::new(
            stores.artifacts.clone(),
            OtaDefaults::from(&config),
        ));
        Self {
            config,
            stores,
            ota,
        }
    }
}

impl FromRef<AppState> for Arc<dyn ApiKeyRegistry> {
    fn from_ref(state: &AppState) -> Arc<dyn ApiKeyRegistry> {
        state.stores.registry.clone()
    }
}
