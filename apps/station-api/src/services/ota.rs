//! Firmware rollout gate.
//!
//! A node is `UpToDate` unless its registry entry pins a target version and
//! the reported version differs from it by plain string comparison. Minting
//! the download reference is best-effort: a failure becomes an error
//! directive in the response and never blocks telemetry storage.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::StationConfig;
use crate::models::ApiKeyEntry;
use crate::store::ArtifactSigner;

pub const MINT_FAILURE_MESSAGE: &str = "Could not generate download URL";
const VERSION_PLACEHOLDER: &str = "{version}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtaState {
    UpToDate,
    UpdateAvailable {
        target_version: String,
        location: Option<String>,
        key: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OtaDirective {
    Download { url: String },
    Unavailable { error: String },
}

impl OtaDirective {
    pub fn is_download(&self) -> bool {
        matches!(self, OtaDirective::Download { .. })
    }
}

#[derive(Debug, Clone)]
pub struct OtaDefaults {
    pub location: Option<String>,
    pub key_template: String,
    pub url_ttl: Duration,
}

impl From<&StationConfig> for OtaDefaults {
    fn from(config: &StationConfig) -> Self {
        Self {
            location: config.firmware_bucket.clone(),
            key_template: config.firmware_key_template.clone(),
            url_ttl: config.ota_url_ttl,
        }
    }
}

pub fn artifact_key(template: &str, version: &str) -> String {
    template.replace(VERSION_PLACEHOLDER, version)
}

/// Pure transition rule; no I/O.
pub fn evaluate(entry: &ApiKeyEntry, reported_version: Option<&str>, defaults: &OtaDefaults) -> OtaState {
    let Some(policy) = entry.ota.as_ref() else {
        return OtaState::UpToDate;
    };
    let (Some(target_version), Some(reported)) = (policy.target_version.as_deref(), reported_version)
    else {
        return OtaState::UpToDate;
    };
    if target_version == reported {
        return OtaState::UpToDate;
    }

    let template = policy
        .artifact_key_template
        .as_deref()
        .unwrap_or(&defaults.key_template);
    let location = policy
        .artifact_location
        .clone()
        .or_else(|| defaults.location.clone())
        .filter(|location| !location.trim().is_empty());

    OtaState::UpdateAvailable {
        target_version: target_version.to_string(),
        location,
        key: artifact_key(template, target_version),
    }
}

#[derive(Clone)]
pub struct OtaNegotiator {
    signer: Arc<dyn ArtifactSigner>,
    defaults: OtaDefaults,
}

impl OtaNegotiator {
    pub fn new(signer: Arc<dyn ArtifactSigner>, defaults: OtaDefaults) -> Self {
        Self { signer, defaults }
    }

    pub async fn negotiate(
        &self,
        device_id: &str,
        entry: &ApiKeyEntry,
        reported_version: Option<&str>,
    ) -> Option<OtaDirective> {
        let OtaState::UpdateAvailable {
            target_version,
            location,
            key,
        } = evaluate(entry, reported_version, &self.defaults)
        else {
            return None;
        };

        let Some(location) = location else {
            tracing::warn!(device_id, %target_version, "OTA target set but no artifact location configured");
            return Some(OtaDirective::Unavailable {
                error: MINT_FAILURE_MESSAGE.to_string(),
            });
        };

        match self
            .signer
            .presign_download(&location, &key, self.defaults.url_ttl)
            .await
        {
            Ok(url) => {
                tracing::info!(
                    device_id,
                    reported = reported_version.unwrap_or_default(),
                    %target_version,
                    "offering firmware update"
                );
                Some(OtaDirective::Download { url })
            }
            Err(err) => {
                tracing::warn!(device_id, error = %err, %location, %key, "failed to mint firmware URL");
                Some(OtaDirective::Unavailable {
                    error: MINT_FAILURE_MESSAGE.to_string(),
                })
            }
        }
    }
}
