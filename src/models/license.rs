use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::tiers::TierLimits;

const SECONDS_PER_DAY: i64 = 86400;

/// Billing period encoded in the license key (`LIC-<PERIOD>-XXXX-XXXX`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum LicensePeriod {
    #[serde(alias = "trial")]
    Trial,
    #[serde(alias = "month")]
    Month,
    #[serde(alias = "year")]
    Year,
    #[serde(alias = "life")]
    Life,
}

impl LicensePeriod {
    pub fn days(&self) -> i64 {
        match self {
            LicensePeriod::Trial => 7,
            LicensePeriod::Month => 30,
            LicensePeriod::Year => 365,
            LicensePeriod::Life => 36500,
        }
    }

    /// Expiry timestamp for a license issued at `issued_at`.
    pub fn expiry_from(&self, issued_at: i64) -> i64 {
        issued_at + self.days() * SECONDS_PER_DAY
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct License {
    pub key: String,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub tier: String,
    pub period: LicensePeriod,
    pub expires_at: i64,
    /// -1 = unlimited
    pub daily_limit: i64,
    /// -1 = unlimited
    pub monthly_limit: i64,
    /// -1 = unlimited
    pub max_activations: i64,
    pub active: bool,
    /// Hex-encoded per-license KDF salt. May be absent on legacy rows until
    /// the activation path runs the ensure-salt step.
    #[serde(skip_serializing)]
    pub salt: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl License {
    /// Active and not past expiry. Anything else authorizes nothing.
    pub fn is_valid(&self, now: i64) -> bool {
        self.active && self.expires_at > now
    }

    pub fn stored_limits(&self) -> TierLimits {
        TierLimits::new(self.daily_limit, self.monthly_limit, self.max_activations)
    }

    pub fn state(&self, activation_count: i64, now: i64) -> LicenseState {
        if !self.active {
            LicenseState::Deactivated
        } else if self.expires_at <= now {
            LicenseState::Expired
        } else if activation_count == 0 {
            LicenseState::Issued
        } else {
            LicenseState::Activated
        }
    }
}

/// Lifecycle position of a license row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseState {
    Issued,
    Activated,
    Expired,
    Deactivated,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateLicense {
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    pub tier: String,
    pub period: LicensePeriod,
}
