use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::models::{CreateLicense, LicensePeriod};
use crate::tiers::FREE_TIER;
use crate::util::redact;

const MAX_EMAIL_LEN: usize = 254;

#[derive(Debug, Deserialize)]
pub struct VerificationRequest {
    pub email: String,
    pub tier: String,
    #[serde(default = "default_period")]
    pub period: LicensePeriod,
}

fn default_period() -> LicensePeriod {
    LicensePeriod::Month
}

#[derive(Debug, Serialize)]
pub struct VerificationSent {
    pub sent: bool,
}

#[derive(Debug, Deserialize)]
pub struct VerificationConfirm {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct IssuedLicense {
    pub license_key: String,
    pub tier: String,
    pub expires_at: i64,
}

fn validate_email(email: &str) -> Result<()> {
    let email = email.trim();
    let well_formed = email.len() <= MAX_EMAIL_LEN
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if well_formed {
        Ok(())
    } else {
        Err(AppError::BadRequest("Invalid email address".into()))
    }
}

/// Start self-service issuance: send a one-time code to the address.
pub async fn request_code(
    State(state): State<AppState>,
    Json(req): Json<VerificationRequest>,
) -> Result<Json<VerificationSent>> {
    validate_email(&req.email)?;

    let tiers = state.tiers.current();
    let tier = tiers.raw(&req.tier)?;
    if tier.deprecated {
        return Err(AppError::Conflict(format!(
            "Tier '{}' is no longer offered",
            req.tier
        )));
    }
    if !tier.self_service {
        return Err(AppError::Forbidden(format!(
            "Tier '{}' cannot be issued through verification",
            req.tier
        )));
    }

    let code = queries::generate_verification_code();
    let email_hash = queries::hash_email(&req.email);
    let ttl_secs = state.config.verification_code_ttl_secs();
    let stored = {
        let mut conn = state.db.get()?;
        queries::create_verification_code(
            &mut conn,
            &email_hash,
            &queries::hash_verification_code(&email_hash, &code),
            &req.tier,
            req.period,
            ttl_secs,
        )?
    };

    state
        .delivery
        .send_verification_code(
            &queries::normalize_email(&req.email),
            &code,
            &req.tier,
            stored.expires_at,
            ttl_secs / 60,
        )
        .await;

    tracing::info!(email = %redact(&req.email), tier = %req.tier, "Verification code issued");
    Ok(Json(VerificationSent { sent: true }))
}

/// Finish self-service issuance: trade a valid code for a new license.
pub async fn confirm_code(
    State(state): State<AppState>,
    Json(req): Json<VerificationConfirm>,
) -> Result<Json<IssuedLicense>> {
    validate_email(&req.email)?;

    let email_hash = queries::hash_email(&req.email);
    let code_hash = queries::hash_verification_code(&email_hash, &req.code);

    let conn = state.db.get()?;
    let code = queries::consume_verification_code(&conn, &email_hash, &code_hash)?
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired verification code".into()))?;

    let tiers = state.tiers.current();
    let tier = tiers.raw(&code.tier)?;
    if tier.deprecated {
        return Err(AppError::Conflict(format!(
            "Tier '{}' is no longer offered",
            code.tier
        )));
    }

    if code.tier == FREE_TIER
        && queries::count_valid_licenses_for_email(&conn, &req.email, FREE_TIER)? > 0
    {
        return Err(AppError::Conflict(
            "This email already has an active free license".into(),
        ));
    }

    let license = queries::create_license(
        &conn,
        &CreateLicense {
            customer_name: None,
            customer_email: Some(req.email.clone()),
            tier: code.tier.clone(),
            period: code.period,
        },
        tier.limits(),
    )?;

    tracing::info!(
        email = %redact(&req.email),
        license = %redact(&license.key),
        tier = %license.tier,
        "License issued through verification"
    );

    Ok(Json(IssuedLicense {
        license_key: license.key,
        tier: license.tier,
        expires_at: license.expires_at,
    }))
}
