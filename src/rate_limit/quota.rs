//! Daily and monthly call budgets backed by the usage table.
//!
//! Usage rows are keyed by (license, UTC date, hardware). The daily total is
//! the sum over one date; the monthly total sums every date in the calendar
//! month. Checks always run before the counter moves.

use chrono::{Datelike, Days, NaiveDate, NaiveTime, Utc};
use rusqlite::Connection;

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::tiers::{TierLimits, UNLIMITED};

/// Largest number of calls a single charge may carry. Keeps the stored
/// counters far away from integer overflow.
pub const MAX_CHARGE: i64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaWindow {
    Daily,
    Monthly,
}

impl QuotaWindow {
    /// Error code reported to clients.
    pub fn code(&self) -> &'static str {
        match self {
            QuotaWindow::Daily => "daily_limit_exceeded",
            QuotaWindow::Monthly => "monthly_limit_exceeded",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaWindow::Daily => "daily",
            QuotaWindow::Monthly => "monthly",
        }
    }
}

/// A rejected call. Carries what a client needs to back off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaExceeded {
    pub license_key: String,
    pub window: QuotaWindow,
    pub limit: i64,
    pub used: i64,
    /// Unix timestamp at which the window rolls over.
    pub reset_at: i64,
}

impl std::fmt::Display for QuotaExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.window {
            QuotaWindow::Daily => "Daily",
            QuotaWindow::Monthly => "Monthly",
        };
        write!(
            f,
            "{} limit of {} requests reached ({} used)",
            label, self.limit, self.used
        )
    }
}

/// Calendar boundaries for one usage date, all in UTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsagePeriod {
    pub date: NaiveDate,
    month_start: NaiveDate,
    next_month_start: NaiveDate,
}

impl UsagePeriod {
    pub fn for_date(date: NaiveDate) -> Self {
        let month_start = date.with_day(1).unwrap_or(date);
        let next_month_start = if date.month() == 12 {
            NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
        }
        .unwrap_or(NaiveDate::MAX);

        Self {
            date,
            month_start,
            next_month_start,
        }
    }

    pub fn today() -> Self {
        Self::for_date(Utc::now().date_naive())
    }

    /// Storage key for the day, `YYYY-MM-DD`.
    pub fn date_key(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    fn month_range(&self) -> (String, String) {
        (
            self.month_start.format("%Y-%m-%d").to_string(),
            self.next_month_start.format("%Y-%m-%d").to_string(),
        )
    }

    /// Next UTC midnight.
    pub fn day_reset_at(&self) -> i64 {
        let next = self
            .date
            .checked_add_days(Days::new(1))
            .unwrap_or(NaiveDate::MAX);
        midnight(next)
    }

    pub fn month_reset_at(&self) -> i64 {
        midnight(self.next_month_start)
    }
}

fn midnight(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

/// Current consumption against a license's limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaStatus {
    pub limits: TierLimits,
    pub daily_used: i64,
    pub monthly_used: i64,
    pub reset_at: i64,
}

impl QuotaStatus {
    /// Remaining calls today, `None` when the daily limit is unlimited.
    pub fn daily_remaining(&self) -> Option<i64> {
        remaining(self.limits.daily, self.daily_used)
    }

    pub fn monthly_remaining(&self) -> Option<i64> {
        remaining(self.limits.monthly, self.monthly_used)
    }

    /// Same status after `amount` more calls were recorded.
    pub fn after(mut self, amount: i64) -> Self {
        self.daily_used = self.daily_used.saturating_add(amount);
        self.monthly_used = self.monthly_used.saturating_add(amount);
        self
    }
}

/// Whether `amount` more calls stay within `limit`. An overflowing total
/// never fits.
fn fits(limit: i64, used: i64, amount: i64) -> bool {
    limit == UNLIMITED || used.checked_add(amount).is_some_and(|total| total <= limit)
}

fn remaining(limit: i64, used: i64) -> Option<i64> {
    (limit != UNLIMITED).then(|| (limit - used).max(0))
}

/// Read current totals without checking anything.
pub fn usage_status(
    conn: &Connection,
    license_key: &str,
    limits: TierLimits,
    period: &UsagePeriod,
) -> Result<QuotaStatus> {
    let daily_used = queries::daily_usage(conn, license_key, &period.date_key())?;
    let (from, to) = period.month_range();
    let monthly_used = queries::monthly_usage(conn, license_key, &from, &to)?;

    Ok(QuotaStatus {
        limits,
        daily_used,
        monthly_used,
        reset_at: period.day_reset_at(),
    })
}

/// Check that `amount` more calls fit in both windows. Daily is checked first.
pub fn check(
    conn: &Connection,
    license_key: &str,
    limits: TierLimits,
    period: &UsagePeriod,
    amount: i64,
) -> Result<QuotaStatus> {
    if !(0..=MAX_CHARGE).contains(&amount) {
        return Err(AppError::BadRequest(format!(
            "call count must be between 0 and {}",
            MAX_CHARGE
        )));
    }
    let status = usage_status(conn, license_key, limits, period)?;

    if !fits(limits.daily, status.daily_used, amount) {
        return Err(AppError::from(QuotaExceeded {
            license_key: license_key.to_string(),
            window: QuotaWindow::Daily,
            limit: limits.daily,
            used: status.daily_used,
            reset_at: period.day_reset_at(),
        }));
    }

    if !fits(limits.monthly, status.monthly_used, amount) {
        return Err(AppError::from(QuotaExceeded {
            license_key: license_key.to_string(),
            window: QuotaWindow::Monthly,
            limit: limits.monthly,
            used: status.monthly_used,
            reset_at: period.month_reset_at(),
        }));
    }

    Ok(status)
}

/// Charge `amount` calls to (license, date, hardware).
pub fn record(
    conn: &Connection,
    license_key: &str,
    hardware_id: &str,
    period: &UsagePeriod,
    amount: i64,
) -> Result<()> {
    queries::increment_usage(conn, license_key, &period.date_key(), hardware_id, amount)
}

/// Parse a client-reported usage date. Only dates within one day of the
/// server's UTC date are accepted, which absorbs client clock skew across
/// midnight without allowing backfill.
pub fn parse_report_date(raw: &str, today: NaiveDate) -> Result<NaiveDate> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest("date must be formatted as YYYY-MM-DD".into()))?;
    if (date - today).num_days().abs() > 1 {
        return Err(AppError::BadRequest(
            "date must be within one day of the current date".into(),
        ));
    }
    Ok(date)
}
