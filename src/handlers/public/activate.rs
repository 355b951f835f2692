use axum::extract::State;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::activation;
use crate::config::GatewayMode;
use crate::crypto::{derive_key, seal};
use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::tiers::TierLimits;
use crate::util::redact;

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub license_key: String,
    pub hardware_id: String,
}

#[derive(Debug, Serialize)]
pub struct ActivateResponse {
    pub success: bool,
    pub tier: String,
    pub expires_at: i64,
    /// Sealed key bundle, base64
    pub encrypted_api_key: String,
    /// AES-GCM nonce, base64
    pub iv: String,
    /// Per-license KDF salt, hex. Together with the license key and
    /// hardware id it lets the client derive the bundle key.
    pub salt: String,
    pub mode: GatewayMode,
    pub limits: TierLimits,
}

pub async fn activate(
    State(state): State<AppState>,
    Json(req): Json<ActivateRequest>,
) -> Result<Json<ActivateResponse>> {
    if state.config.mode == GatewayMode::Direct && state.providers.is_empty() {
        return Err(AppError::Internal(
            "Direct mode has no provider keys configured".into(),
        ));
    }
    let tiers = state.tiers.current();

    let (grant, bundle) = {
        let mut conn = state.db.get()?;
        let grant = activation::activate(&mut conn, &tiers, &req.license_key, &req.hardware_id)?;

        let bundle = match state.config.mode {
            GatewayMode::Direct => {
                json!({
                    "mode": "direct",
                    "keys": state.providers.key_bundle(),
                })
            }
            GatewayMode::Proxy => {
                let credential = queries::replace_proxy_credential(
                    &mut conn,
                    &grant.license.key,
                    req.hardware_id.trim(),
                )?;
                json!({
                    "mode": "proxy",
                    "proxy_key": credential.token,
                    "proxy_url": state.config.proxy_url(),
                })
            }
        };
        (grant, bundle)
    };

    let plaintext = serde_json::to_vec(&bundle)
        .map_err(|e| AppError::Internal(format!("Failed to encode key bundle: {}", e)))?;

    // Argon2id at production cost takes long enough to stall the runtime.
    let license_key = grant.license.key.clone();
    let hardware_id = req.hardware_id.trim().to_string();
    let salt = grant.salt.clone();
    let kdf = state.kdf;
    let sealed = tokio::task::spawn_blocking(move || {
        let key = derive_key(&license_key, &hardware_id, &salt, &kdf)?;
        seal(&key, &plaintext)
    })
    .await
    .map_err(|e| AppError::Internal(format!("Key derivation task failed: {}", e)))??;

    tracing::debug!(
        license = %redact(&grant.license.key),
        mode = %state.config.mode,
        "Issued sealed key bundle"
    );

    Ok(Json(ActivateResponse {
        success: true,
        tier: grant.tier,
        expires_at: grant.license.expires_at,
        encrypted_api_key: sealed.ciphertext_b64(),
        iv: sealed.nonce_b64(),
        salt: grant.salt,
        mode: state.config.mode,
        limits: grant.limits,
    }))
}
