use std::collections::HashSet;

use crate::models::{DeviceConfig, FleetMember};
use crate::store::{DeviceConfigStore, StoreResult};

/// A hub's configuration together with the nodes it may view.
#[derive(Debug, Clone, PartialEq)]
pub struct Fleet {
    pub hub_id: String,
    pub config: Option<DeviceConfig>,
    /// Configured nodes in configured order. Empty when the hub has no config
    /// or no `nodes` list.
    pub nodes: Vec<FleetMember>,
}

impl Fleet {
    /// Members to aggregate: the configured nodes, or the hub alone when
    /// nothing is configured. The hub's location name labels the fallback.
    pub fn members(&self) -> Vec<FleetMember> {
        if !self.nodes.is_empty() {
            return self.nodes.clone();
        }
        let display_name = self
            .config
            .as_ref()
            .and_then(DeviceConfig::location_name)
            .unwrap_or(&self.hub_id)
            .to_string();
        vec![FleetMember {
            device_id: self.hub_id.clone(),
            display_name,
        }]
    }

    /// Devices whose history the hub may chart: every configured node plus
    /// the hub itself, without duplicates.
    pub fn chartable(&self) -> Vec<FleetMember> {
        let mut devices = self.members();
        if !devices.iter().any(|member| member.device_id == self.hub_id) {
            devices.push(FleetMember {
                device_id: self.hub_id.clone(),
                display_name: self.hub_id.clone(),
            });
        }
        devices
    }
}

pub async fn resolve_fleet(store: &dyn DeviceConfigStore, device_id: &str) -> StoreResult<Fleet> {
    let config = store.get_device_config(device_id).await?;
    let nodes = config
        .as_ref()
        .and_then(|config| config.nodes.as_ref())
        .map(|nodes| {
            let mut seen = HashSet::new();
            nodes
                .iter()
                .filter(|node| !node.device_id.trim().is_empty())
                // first entry for a repeated id wins
                .filter(|node| seen.insert(node.device_id.as_str()))
                .map(|node| FleetMember {
                    device_id: node.device_id.clone(),
                    display_name: node
                        .display_name
                        .as_deref()
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .unwrap_or(&node.device_id)
                        .to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    if config.is_none() {
        tracing::debug!(device_id, "no device config; fleet falls back to the hub");
    }

    Ok(Fleet {
        hub_id: device_id.to_string(),
        config,
        nodes,
    })
}
