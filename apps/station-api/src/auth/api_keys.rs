use crate::auth::{AuthError, InvalidReason, ResolvedCredential};
use crate::store::ApiKeyRegistry;

/// Maps a presented API key onto the device it is bound to.
///
/// Read-only. The full registry entry travels with the result so the OTA
/// negotiator does not look the key up a second time.
pub async fn resolve_api_key(
    registry: &dyn ApiKeyRegistry,
    api_key: Option<&str>,
) -> Result<ResolvedCredential, AuthError> {
    let api_key = api_key
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(AuthError::MissingCredential)?;

    let entry = registry
        .get_api_key(api_key)
        .await
        .map_err(AuthError::Lookup)?
        .ok_or(AuthError::InvalidCredential {
            reason: InvalidReason::UnknownKey,
        })?;

    let device_id = entry
        .device_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(AuthError::InvalidCredential {
            reason: InvalidReason::NoDeviceBound,
        })?;

    Ok(ResolvedCredential { device_id, entry })
}
