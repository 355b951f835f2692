use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use strum::{AsRefStr, Display, EnumString};

use crate::crypto::DEFAULT_SIGNATURE_WINDOW_SECS;

/// How activated clients reach upstream providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, AsRefStr, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum GatewayMode {
    /// Clients receive the sealed provider keys and call providers themselves.
    Direct,
    /// Clients receive a proxy credential and call through this server.
    #[default]
    Proxy,
}

/// Where one upstream provider lives and the key used to call it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub base_url: String,
}

impl ProviderSettings {
    fn from_env(prefix: &str, default_base_url: &str) -> Self {
        Self {
            api_key: env::var(format!("{}_API_KEY", prefix))
                .ok()
                .filter(|k| !k.trim().is_empty()),
            base_url: env::var(format!("{}_BASE_URL", prefix))
                .unwrap_or_else(|_| default_base_url.to_string()),
        }
    }

    fn unconfigured(base_url: &str) -> Self {
        Self {
            api_key: None,
            base_url: base_url.to_string(),
        }
    }
}

pub const OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub base_url: String,
    pub database_path: String,
    pub tiers_path: String,
    pub mode: GatewayMode,
    /// Bearer token for `/admin`. Admin routes are not mounted when unset.
    pub admin_token: Option<String>,
    pub rate_limit_per_second: u32,
    pub rate_limit_burst: u32,
    pub rate_limit_sweep_secs: u64,
    pub signature_window_secs: i64,
    pub upstream_timeout_secs: u64,
    pub max_body_bytes: usize,
    /// Honor `X-Forwarded-For` when throttling. Only safe behind a proxy
    /// that overwrites the header.
    pub trust_forwarded_for: bool,
    pub verification_webhook_url: Option<String>,
    pub verification_code_ttl_minutes: i64,
    pub openai: ProviderSettings,
    pub anthropic: ProviderSettings,
    pub gemini: ProviderSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            base_url: "http://127.0.0.1:3000".to_string(),
            database_path: "keygate.db".to_string(),
            tiers_path: "tiers.toml".to_string(),
            mode: GatewayMode::Proxy,
            admin_token: None,
            rate_limit_per_second: 10,
            rate_limit_burst: 20,
            rate_limit_sweep_secs: 300,
            signature_window_secs: DEFAULT_SIGNATURE_WINDOW_SECS,
            upstream_timeout_secs: 60,
            max_body_bytes: 1024 * 1024,
            trust_forwarded_for: false,
            verification_webhook_url: None,
            verification_code_ttl_minutes: 15,
            openai: ProviderSettings::unconfigured(OPENAI_BASE_URL),
            anthropic: ProviderSettings::unconfigured(ANTHROPIC_BASE_URL),
            gemini: ProviderSettings::unconfigured(GEMINI_BASE_URL),
        }
    }
}

fn parse_env<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let host = env::var("HOST").unwrap_or(defaults.host);
        let port: u16 = parse_env("PORT", defaults.port);

        let base_url = env::var("BASE_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let mode = match env::var("GATEWAY_MODE") {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "Unknown GATEWAY_MODE, using proxy");
                GatewayMode::Proxy
            }),
            Err(_) => defaults.mode,
        };

        let trust_forwarded_for = env::var("TRUST_FORWARDED_FOR")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Self {
            host,
            port,
            base_url,
            database_path: env::var("DATABASE_PATH").unwrap_or(defaults.database_path),
            tiers_path: env::var("TIERS_PATH").unwrap_or(defaults.tiers_path),
            mode,
            admin_token: env::var("ADMIN_TOKEN")
                .ok()
                .filter(|t| !t.trim().is_empty()),
            rate_limit_per_second: parse_env(
                "RATE_LIMIT_PER_SECOND",
                defaults.rate_limit_per_second,
            ),
            rate_limit_burst: parse_env("RATE_LIMIT_BURST", defaults.rate_limit_burst),
            rate_limit_sweep_secs: parse_env(
                "RATE_LIMIT_SWEEP_SECS",
                defaults.rate_limit_sweep_secs,
            ),
            signature_window_secs: parse_env(
                "SIGNATURE_WINDOW_SECS",
                defaults.signature_window_secs,
            ),
            upstream_timeout_secs: parse_env(
                "UPSTREAM_TIMEOUT_SECS",
                defaults.upstream_timeout_secs,
            ),
            max_body_bytes: parse_env("MAX_BODY_BYTES", defaults.max_body_bytes),
            trust_forwarded_for,
            verification_webhook_url: env::var("VERIFICATION_WEBHOOK_URL").ok(),
            verification_code_ttl_minutes: parse_env(
                "VERIFICATION_CODE_TTL_MINUTES",
                defaults.verification_code_ttl_minutes,
            ),
            openai: ProviderSettings::from_env("OPENAI", OPENAI_BASE_URL),
            anthropic: ProviderSettings::from_env("ANTHROPIC", ANTHROPIC_BASE_URL),
            gemini: ProviderSettings::from_env("GEMINI", GEMINI_BASE_URL),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs.max(1))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.rate_limit_sweep_secs.max(1))
    }

    pub fn verification_code_ttl_secs(&self) -> i64 {
        self.verification_code_ttl_minutes.max(1) * 60
    }

    /// URL clients use for proxied calls, `<base>/proxy`.
    pub fn proxy_url(&self) -> String {
        format!("{}/proxy", self.base_url.trim_end_matches('/'))
    }
}
