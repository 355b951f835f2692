//! Delivery of email verification codes.
//!
//! Supports two modes:
//! 1. POST to a webhook URL (the operator's own mailer picks it up)
//! 2. Disabled (nothing is sent, an entry is logged with the address redacted)

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;

use crate::util::redact;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of attempting to deliver a verification code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryResult {
    /// Data was POSTed to the webhook and accepted
    WebhookCalled,
    /// The webhook could not be reached or rejected the payload
    WebhookFailed,
    /// No webhook configured
    Disabled,
}

/// Webhook payload for a verification code.
#[derive(Debug, Serialize)]
pub struct VerificationPayload<'a> {
    pub event: &'static str,
    pub email: &'a str,
    pub code: &'a str,
    pub tier: &'a str,
    pub expires_at: i64,
    pub expires_in_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct CodeDelivery {
    webhook_url: Option<String>,
    http_client: Client,
}

impl CodeDelivery {
    pub fn new(webhook_url: Option<String>) -> Self {
        let http_client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            webhook_url,
            http_client,
        }
    }

    /// Send a verification code. Failures are logged and reported in the
    /// result but never surface to the requester, so the response does not
    /// reveal whether delivery worked.
    pub async fn send_verification_code(
        &self,
        email: &str,
        code: &str,
        tier: &str,
        expires_at: i64,
        expires_in_minutes: i64,
    ) -> DeliveryResult {
        let Some(webhook_url) = self.webhook_url.as_deref() else {
            tracing::warn!(
                email = %redact(email),
                tier = %tier,
                "No verification webhook configured, code not delivered"
            );
            return DeliveryResult::Disabled;
        };

        let payload = VerificationPayload {
            event: "verification_code_created",
            email,
            code,
            tier,
            expires_at,
            expires_in_minutes,
        };

        let response = self
            .http_client
            .post(webhook_url)
            .header("X-Keygate-Event", payload.event)
            .json(&payload)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(email = %redact(email), "Verification webhook called successfully");
                DeliveryResult::WebhookCalled
            }
            Ok(resp) => {
                tracing::error!(
                    status = %resp.status(),
                    email = %redact(email),
                    "Verification webhook returned error"
                );
                DeliveryResult::WebhookFailed
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to call verification webhook");
                DeliveryResult::WebhookFailed
            }
        }
    }
}
