use serde::Serialize;

/// A license bound to one hardware fingerprint.
#[derive(Debug, Clone, Serialize)]
pub struct Activation {
    pub license_key: String,
    pub hardware_id: String,
    pub created_at: i64,
}

/// Activation joined with its most recent check-in, for admin views.
#[derive(Debug, Clone, Serialize)]
pub struct ActivationWithCheckin {
    #[serde(flatten)]
    pub activation: Activation,
    pub last_checkin_at: Option<i64>,
}

/// Whether an activation attempt bound a new device or re-used an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationOutcome {
    Created,
    Existing,
}
