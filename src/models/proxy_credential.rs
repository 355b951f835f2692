use serde::Serialize;

/// Bearer token that authorizes forwarded calls for one (license, hardware) pair.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyCredential {
    #[serde(skip_serializing)]
    pub token: String,
    pub license_key: String,
    pub hardware_id: String,
    pub created_at: i64,
}
