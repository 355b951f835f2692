//! License lifecycle checks and hardware binding.

use rusqlite::Connection;

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{ActivationOutcome, License};
use crate::tiers::{FREE_TIER, ResolvedTier, TierLimits, TierTable};
use crate::util::{now, redact};

/// A successful activation, ready to be turned into a key bundle.
#[derive(Debug, Clone)]
pub struct ActivationGrant {
    pub license: License,
    /// Tier whose limits apply, after any deprecation redirect.
    pub tier: String,
    pub limits: TierLimits,
    pub outcome: ActivationOutcome,
    /// Per-license salt, guaranteed present.
    pub salt: String,
}

/// Limits a license is held to.
///
/// A license on a deprecated tier with a migration target gets the target's
/// limits even before it is migrated. Otherwise the limits stored on the
/// row at issuance win, so editing the tier file never changes what
/// existing customers already bought.
pub fn effective_limits(license: &License, tiers: &TierTable) -> (String, TierLimits) {
    match tiers.resolve(&license.tier) {
        Ok(ResolvedTier {
            name,
            limits,
            redirected: true,
            ..
        }) => (name, limits),
        _ => (license.tier.clone(), license.stored_limits()),
    }
}

/// Load a license and require it to be usable right now.
pub fn require_valid_license(conn: &Connection, license_key: &str) -> Result<License> {
    let license = queries::get_license(conn, license_key)?
        .ok_or_else(|| AppError::Unauthorized("Invalid license key".into()))?;

    if license.is_valid(now()) {
        Ok(license)
    } else if !license.active {
        Err(AppError::Forbidden("License has been deactivated".into()))
    } else {
        Err(AppError::Forbidden("License has expired".into()))
    }
}

/// Require `hardware_id` to be bound to the license.
pub fn require_activation(conn: &Connection, license_key: &str, hardware_id: &str) -> Result<()> {
    match queries::get_activation(conn, license_key, hardware_id)? {
        Some(_) => Ok(()),
        None => Err(AppError::Unauthorized(
            "Device is not activated for this license".into(),
        )),
    }
}

/// Activate `hardware_id` against a license.
///
/// Rejections leave no trace. A success binds the device (unless it was
/// already bound), records a check-in and makes sure the license has a salt.
pub fn activate(
    conn: &mut Connection,
    tiers: &TierTable,
    license_key: &str,
    hardware_id: &str,
) -> Result<ActivationGrant> {
    let license_key = license_key.trim();
    let hardware_id = hardware_id.trim();
    if license_key.is_empty() || hardware_id.is_empty() {
        return Err(AppError::BadRequest(
            "license_key and hardware_id are required".into(),
        ));
    }

    let license = require_valid_license(conn, license_key)?;
    let (tier, limits) = effective_limits(&license, tiers);
    let free = license.tier == FREE_TIER || tier == FREE_TIER;

    let outcome =
        queries::acquire_activation_atomic(conn, license_key, hardware_id, limits.devices, free)
            .inspect_err(|e| {
                tracing::info!(
                    license = %redact(license_key),
                    hardware = %redact(hardware_id),
                    error = %e,
                    "Activation rejected"
                );
            })?;

    let salt = queries::ensure_license_salt(conn, license_key)?;

    if outcome == ActivationOutcome::Created {
        tracing::info!(
            license = %redact(license_key),
            hardware = %redact(hardware_id),
            tier = %tier,
            "Device activated"
        );
    }

    Ok(ActivationGrant {
        license,
        tier,
        limits,
        outcome,
        salt,
    })
}
