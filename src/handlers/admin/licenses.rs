use axum::{extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};

use crate::activation::effective_limits;
use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path};
use crate::models::{ActivationWithCheckin, CreateLicense, License, LicenseState, UsageTotals};
use crate::rate_limit::{UsagePeriod, quota};
use crate::tiers::{TierLimits, TierTable};
use crate::util::{now, redact};

#[derive(Debug, Serialize)]
pub struct LicenseInfo {
    #[serde(flatten)]
    pub license: License,
    pub state: LicenseState,
    pub effective_tier: String,
    pub effective_limits: TierLimits,
    pub activations: Vec<ActivationWithCheckin>,
    pub usage: UsageTotals,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct UpgradeLicense {
    pub tier: String,
}

fn not_found() -> AppError {
    AppError::NotFound("License not found".into())
}

/// Limits of a tier that may still be sold.
fn issuable_limits(tiers: &TierTable, tier: &str) -> Result<TierLimits> {
    let definition = tiers.raw(tier)?;
    if definition.deprecated {
        let replacement = definition.migrate_to.as_deref().unwrap_or("another tier");
        return Err(AppError::Conflict(format!(
            "Tier '{}' is deprecated, use '{}' instead",
            tier, replacement
        )));
    }
    Ok(definition.limits())
}

pub async fn create_license(
    State(state): State<AppState>,
    Json(input): Json<CreateLicense>,
) -> Result<(StatusCode, Json<License>)> {
    let limits = issuable_limits(&state.tiers.current(), &input.tier)?;
    let conn = state.db.get()?;
    let license = queries::create_license(&conn, &input, limits)?;

    tracing::info!(
        license = %redact(&license.key),
        tier = %license.tier,
        period = license.period.as_ref(),
        "License created"
    );
    Ok((StatusCode::CREATED, Json(license)))
}

pub async fn get_license(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<LicenseInfo>> {
    let conn = state.db.get()?;
    let license = queries::get_license(&conn, &key)?.ok_or_else(not_found)?;
    let activations = queries::list_activations(&conn, &key)?;

    let (effective_tier, limits) = effective_limits(&license, &state.tiers.current());
    let status = quota::usage_status(&conn, &key, limits, &UsagePeriod::today())?;

    Ok(Json(LicenseInfo {
        state: license.state(activations.len() as i64, now()),
        effective_tier,
        effective_limits: limits,
        activations,
        usage: UsageTotals {
            daily: status.daily_used,
            monthly: status.monthly_used,
        },
        license,
    }))
}

pub async fn deactivate_license(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ActionResponse>> {
    let mut conn = state.db.get()?;
    if !queries::deactivate_license(&mut conn, &key)? {
        return Err(not_found());
    }
    tracing::info!(license = %redact(&key), "License deactivated");
    Ok(Json(ActionResponse {
        success: true,
        removed: None,
    }))
}

pub async fn reset_license(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ActionResponse>> {
    let mut conn = state.db.get()?;
    if queries::get_license(&conn, &key)?.is_none() {
        return Err(not_found());
    }
    let removed = queries::reset_activations(&mut conn, &key)?;
    tracing::info!(license = %redact(&key), removed, "License activations reset");
    Ok(Json(ActionResponse {
        success: true,
        removed: Some(removed),
    }))
}

pub async fn upgrade_license(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(input): Json<UpgradeLicense>,
) -> Result<Json<License>> {
    let limits = issuable_limits(&state.tiers.current(), &input.tier)?;
    let conn = state.db.get()?;
    if !queries::update_license_tier(&conn, &key, &input.tier, limits)? {
        return Err(not_found());
    }
    tracing::info!(license = %redact(&key), tier = %input.tier, "License tier changed");
    let license = queries::get_license(&conn, &key)?.ok_or_else(not_found)?;
    Ok(Json(license))
}

/// Re-sync stored limits with the tier table, collapsing a deprecated tier
/// onto its replacement, and heal a missing salt.
pub async fn fix_license(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<License>> {
    let conn = state.db.get()?;
    let license = queries::get_license(&conn, &key)?.ok_or_else(not_found)?;

    let resolved = state.tiers.current().resolve(&license.tier)?;
    queries::update_license_tier(&conn, &key, &resolved.name, resolved.limits)?;
    queries::ensure_license_salt(&conn, &key)?;

    tracing::info!(
        license = %redact(&key),
        from = %license.tier,
        to = %resolved.name,
        "License limits re-synced"
    );
    let license = queries::get_license(&conn, &key)?.ok_or_else(not_found)?;
    Ok(Json(license))
}
