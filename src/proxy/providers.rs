//! Upstream AI providers and how to authenticate against each.

use std::collections::BTreeMap;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

use crate::config::{Config, ProviderSettings};
use crate::error::{AppError, Result};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Client headers passed through to the provider. Everything else,
/// including the client's Authorization header, is dropped.
const FORWARDED_REQUEST_HEADERS: &[&str] = &[
    "content-type",
    "accept",
    "anthropic-version",
    "anthropic-beta",
    "openai-beta",
];

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, AsRefStr, Display,
    EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Gemini,
}

impl Provider {
    /// Insert this provider's authentication headers.
    fn authorize(&self, api_key: &str, headers: &mut HeaderMap) -> Result<()> {
        let key = HeaderValue::from_str(api_key)
            .map_err(|_| AppError::Internal(format!("{} API key is not a valid header", self)))?;
        match self {
            Provider::OpenAi => {
                let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|_| {
                    AppError::Internal("openai API key is not a valid header".into())
                })?;
                headers.insert(axum::http::header::AUTHORIZATION, bearer);
            }
            Provider::Anthropic => {
                headers.insert(HeaderName::from_static("x-api-key"), key);
                headers
                    .entry(HeaderName::from_static("anthropic-version"))
                    .or_insert(HeaderValue::from_static(ANTHROPIC_VERSION));
            }
            Provider::Gemini => {
                headers.insert(HeaderName::from_static("x-goog-api-key"), key);
            }
        }
        Ok(())
    }
}

/// A provider that has an API key configured.
#[derive(Debug, Clone)]
pub struct ProviderEndpoint {
    pub provider: Provider,
    pub base_url: String,
    api_key: String,
}

impl ProviderEndpoint {
    /// Full upstream URL for `path` and an optional raw query string.
    pub fn url(&self, path: &str, query: Option<&str>) -> String {
        let mut url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(q);
        }
        url
    }

    /// Outbound headers: the allowed subset of the client's headers plus
    /// provider authentication.
    pub fn upstream_headers(&self, client_headers: &HeaderMap) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for name in FORWARDED_REQUEST_HEADERS.iter().copied() {
            if let Some(value) = client_headers.get(name) {
                headers.insert(HeaderName::from_static(name), value.clone());
            }
        }
        self.provider.authorize(&self.api_key, &mut headers)?;
        Ok(headers)
    }
}

/// Providers available to this deployment.
#[derive(Debug, Clone, Default)]
pub struct ProviderTable {
    endpoints: BTreeMap<Provider, ProviderEndpoint>,
}

impl ProviderTable {
    pub fn from_config(config: &Config) -> Self {
        let mut table = Self::default();
        for provider in Provider::iter() {
            let settings = match provider {
                Provider::OpenAi => &config.openai,
                Provider::Anthropic => &config.anthropic,
                Provider::Gemini => &config.gemini,
            };
            table.register(provider, settings);
        }
        table
    }

    fn register(&mut self, provider: Provider, settings: &ProviderSettings) {
        if let Some(api_key) = settings.api_key.clone() {
            self.endpoints.insert(
                provider,
                ProviderEndpoint {
                    provider,
                    base_url: settings.base_url.clone(),
                    api_key,
                },
            );
        }
    }

    /// Look up a provider by its path segment. Unknown and unconfigured
    /// providers are both rejected as bad requests.
    pub fn lookup(&self, name: &str) -> Result<&ProviderEndpoint> {
        let provider: Provider = name
            .parse()
            .map_err(|_| AppError::BadRequest(format!("Unknown provider '{}'", name)))?;
        self.endpoints
            .get(&provider)
            .ok_or_else(|| AppError::BadRequest(format!("Provider '{}' is not enabled", name)))
    }

    pub fn names(&self) -> Vec<&str> {
        self.endpoints.keys().map(|p| p.as_ref()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Provider name to API key, the plaintext of a direct-mode bundle.
    pub fn key_bundle(&self) -> BTreeMap<String, String> {
        self.endpoints
            .iter()
            .map(|(p, e)| (p.to_string(), e.api_key.clone()))
            .collect()
    }
}
