use serde::Serialize;

use super::LicensePeriod;

/// Pending email verification for self-service license issuance.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationCode {
    pub id: String,
    #[serde(skip_serializing)]
    pub email_hash: String,
    #[serde(skip_serializing)]
    pub code_hash: String,
    pub tier: String,
    pub period: LicensePeriod,
    pub expires_at: i64,
    pub used: bool,
    pub created_at: i64,
}
