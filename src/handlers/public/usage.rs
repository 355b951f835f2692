use axum::extract::State;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::activation::{effective_limits, require_activation, require_valid_license};
use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::rate_limit::{UsagePeriod, quota};
use crate::util::redact;

#[derive(Debug, Deserialize)]
pub struct UsageReport {
    pub license_key: String,
    pub hardware_id: String,
    /// `YYYY-MM-DD`, within a day of the server's UTC date
    pub date: String,
    /// Calls to charge. Zero only reads the current totals.
    #[serde(default)]
    pub scans: i64,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub success: bool,
    pub daily_usage: i64,
    pub monthly_usage: i64,
    pub daily_limit: i64,
    pub monthly_limit: i64,
    pub tier: String,
}

/// Direct-mode usage reporting. The client calls providers itself and
/// reports how many calls it made; the report is refused once it would
/// push the license past a limit.
pub async fn report_usage(
    State(state): State<AppState>,
    Json(report): Json<UsageReport>,
) -> Result<Json<UsageResponse>> {
    if !(0..=quota::MAX_CHARGE).contains(&report.scans) {
        return Err(AppError::BadRequest(format!(
            "scans must be between 0 and {}",
            quota::MAX_CHARGE
        )));
    }
    let date = quota::parse_report_date(&report.date, Utc::now().date_naive())?;
    let period = UsagePeriod::for_date(date);

    let conn = state.db.get()?;
    let license = require_valid_license(&conn, report.license_key.trim())?;
    require_activation(&conn, &license.key, report.hardware_id.trim())?;

    let tiers = state.tiers.current();
    let (tier, limits) = effective_limits(&license, &tiers);

    let status = if report.scans > 0 {
        let status = quota::check(&conn, &license.key, limits, &period, report.scans)?;
        quota::record(
            &conn,
            &license.key,
            report.hardware_id.trim(),
            &period,
            report.scans,
        )?;
        tracing::debug!(
            license = %redact(&license.key),
            scans = report.scans,
            "Recorded usage"
        );
        status.after(report.scans)
    } else {
        quota::usage_status(&conn, &license.key, limits, &period)?
    };

    Ok(Json(UsageResponse {
        success: true,
        daily_usage: status.daily_used,
        monthly_usage: status.monthly_used,
        daily_limit: limits.daily,
        monthly_limit: limits.monthly,
        tier,
    }))
}
