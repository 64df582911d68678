pub mod api_keys;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use url::form_urlencoded;

use crate::error::AppError;
use crate::models::ApiKeyEntry;
use crate::store::{ApiKeyRegistry, StoreError};

pub use api_keys::resolve_api_key;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const API_KEY_QUERY_PARAM: &str = "api_key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    UnknownKey,
    NoDeviceBound,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::UnknownKey => f.write_str("Invalid API key"),
            InvalidReason::NoDeviceBound => f.write_str("Device ID not found"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("API key missing")]
    MissingCredential,
    #[error("Unauthorized: {reason}")]
    InvalidCredential { reason: InvalidReason },
    #[error("Error checking API key")]
    Lookup(#[source] StoreError),
}

#[derive(Debug, Clone)]
pub struct ResolvedCredential {
    pub device_id: String,
    pub entry: ApiKeyEntry,
}

/// Header first, then the `api_key` query parameter. Blank values are ignored.
pub fn extract_api_key(parts: &Parts) -> Option<String> {
    let from_header = parts
        .headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    if from_header.is_some() {
        return from_header;
    }

    let query = parts.uri.query()?;
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == API_KEY_QUERY_PARAM)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone)]
pub struct DeviceAuth(pub ResolvedCredential);

impl<S> FromRequestParts<S> for DeviceAuth
where
    Arc<dyn ApiKeyRegistry>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let registry = <Arc<dyn ApiKeyRegistry> as FromRef<S>>::from_ref(state);
        let api_key = extract_api_key(parts);

        async move {
            let resolved = resolve_api_key(registry.as_ref(), api_key.as_deref()).await?;
            Ok(DeviceAuth(resolved))
        }
    }
}
