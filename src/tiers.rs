//! Pricing tier table.
//!
//! Tiers are loaded from a declarative TOML file:
//!
//! ```toml
//! [tiers.tier-1]
//! name = "Starter (legacy)"
//! daily_limit = 50
//! monthly_limit = 1000
//! max_devices = 2
//! deprecated = true
//! migrate_to = "tier-11"
//!
//! [tiers.tier-11]
//! name = "Starter"
//! daily_limit = 100
//! monthly_limit = 2500
//! max_devices = 2
//! ```
//!
//! A table is validated as a whole; one bad entry rejects the file and the
//! previously loaded table stays in effect. Deprecated tiers redirect to
//! their `migrate_to` target exactly once: `resolve` never follows a chain.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Limit value meaning "no limit".
pub const UNLIMITED: i64 = -1;

/// Tier subject to the single-device-per-hardware rule.
pub const FREE_TIER: &str = "free";

#[derive(Debug, Error)]
pub enum TierError {
    #[error("unknown tier '{0}'")]
    Unknown(String),

    #[error("tier '{0}' is not deprecated")]
    NotDeprecated(String),

    #[error("invalid tier '{tier}': {reason}")]
    Invalid { tier: String, reason: String },

    #[error("tier table defines no tiers")]
    Empty,

    #[error("failed to parse tier table: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read tier table: {0}")]
    Io(#[from] std::io::Error),
}

/// Effective usage limits. `-1` means unlimited for every field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub daily: i64,
    pub monthly: i64,
    pub devices: i64,
}

impl TierLimits {
    pub const fn new(daily: i64, monthly: i64, devices: i64) -> Self {
        Self {
            daily,
            monthly,
            devices,
        }
    }
}

/// One entry of the tier table as written in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierDefinition {
    /// Human-readable label
    #[serde(default)]
    pub name: String,
    pub daily_limit: i64,
    pub monthly_limit: i64,
    pub max_devices: i64,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub price_cents: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    /// Whether licenses for this tier can be issued through email verification
    #[serde(default)]
    pub self_service: bool,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub migrate_to: Option<String>,
}

impl TierDefinition {
    pub fn limits(&self) -> TierLimits {
        TierLimits::new(self.daily_limit, self.monthly_limit, self.max_devices)
    }
}

#[derive(Debug, Deserialize)]
struct TierFile {
    #[serde(default)]
    tiers: BTreeMap<String, TierDefinition>,
}

/// Result of resolving a tier name, after at most one deprecation redirect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedTier {
    /// The name that was asked for
    pub requested: String,
    /// The tier whose limits apply (differs from `requested` when redirected)
    pub name: String,
    pub label: String,
    pub limits: TierLimits,
    pub features: Vec<String>,
    pub redirected: bool,
}

/// An immutable, validated tier table.
#[derive(Debug, Clone, PartialEq)]
pub struct TierTable {
    tiers: BTreeMap<String, TierDefinition>,
}

impl TierTable {
    /// Build a table from definitions, validating every entry.
    pub fn new(tiers: BTreeMap<String, TierDefinition>) -> Result<Self, TierError> {
        validate(&tiers)?;
        Ok(Self { tiers })
    }

    /// The three built-in tiers used when no tier file is present.
    pub fn defaults() -> Self {
        let mut tiers = BTreeMap::new();
        tiers.insert(
            FREE_TIER.to_string(),
            TierDefinition {
                name: "Free".into(),
                daily_limit: 10,
                monthly_limit: 100,
                max_devices: 1,
                features: vec!["basic".into()],
                price_cents: Some(0),
                currency: Some("usd".into()),
                self_service: true,
                deprecated: false,
                migrate_to: None,
            },
        );
        tiers.insert(
            "pro".to_string(),
            TierDefinition {
                name: "Pro".into(),
                daily_limit: 500,
                monthly_limit: 10_000,
                max_devices: 3,
                features: vec!["basic".into(), "priority".into()],
                price_cents: Some(1900),
                currency: Some("usd".into()),
                self_service: false,
                deprecated: false,
                migrate_to: None,
            },
        );
        tiers.insert(
            "business".to_string(),
            TierDefinition {
                name: "Business".into(),
                daily_limit: UNLIMITED,
                monthly_limit: UNLIMITED,
                max_devices: 10,
                features: vec!["basic".into(), "priority".into(), "support".into()],
                price_cents: Some(9900),
                currency: Some("usd".into()),
                self_service: false,
                deprecated: false,
                migrate_to: None,
            },
        );
        Self { tiers }
    }

    pub fn from_toml_str(source: &str) -> Result<Self, TierError> {
        let file: TierFile = toml::from_str(source)?;
        Self::new(file.tiers)
    }

    pub fn load(path: &Path) -> Result<Self, TierError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Effective limits for `name`, following one deprecation redirect.
    pub fn resolve(&self, name: &str) -> Result<ResolvedTier, TierError> {
        let tier = self
            .tiers
            .get(name)
            .ok_or_else(|| TierError::Unknown(name.to_string()))?;

        let (effective_name, effective) = match (tier.deprecated, tier.migrate_to.as_deref()) {
            (true, Some(target)) => match self.tiers.get(target) {
                Some(def) => (target, def),
                None => (name, tier),
            },
            _ => (name, tier),
        };

        Ok(ResolvedTier {
            requested: name.to_string(),
            name: effective_name.to_string(),
            label: effective.name.clone(),
            limits: effective.limits(),
            features: effective.features.clone(),
            redirected: effective_name != name,
        })
    }

    /// The literal definition, with no redirect applied.
    pub fn raw(&self, name: &str) -> Result<&TierDefinition, TierError> {
        self.tiers
            .get(name)
            .ok_or_else(|| TierError::Unknown(name.to_string()))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.tiers.contains_key(name)
    }

    pub fn is_deprecated(&self, name: &str) -> bool {
        self.tiers.get(name).is_some_and(|t| t.deprecated)
    }

    pub fn migration_target(&self, name: &str) -> Result<&str, TierError> {
        let tier = self.raw(name)?;
        match (tier.deprecated, tier.migrate_to.as_deref()) {
            (true, Some(target)) => Ok(target),
            _ => Err(TierError::NotDeprecated(name.to_string())),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TierDefinition)> {
        self.tiers.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

fn invalid(tier: &str, reason: impl Into<String>) -> TierError {
    TierError::Invalid {
        tier: tier.to_string(),
        reason: reason.into(),
    }
}

fn validate(tiers: &BTreeMap<String, TierDefinition>) -> Result<(), TierError> {
    if tiers.is_empty() {
        return Err(TierError::Empty);
    }

    for (key, tier) in tiers {
        if key.trim().is_empty() {
            return Err(invalid(key, "tier key must not be empty"));
        }
        if tier.name.trim().is_empty() {
            return Err(invalid(key, "missing display name"));
        }
        for (field, value) in [
            ("daily_limit", tier.daily_limit),
            ("monthly_limit", tier.monthly_limit),
            ("max_devices", tier.max_devices),
        ] {
            if value < UNLIMITED {
                return Err(invalid(key, format!("{} must be >= -1, got {}", field, value)));
            }
        }

        match (tier.deprecated, tier.migrate_to.as_deref()) {
            (false, Some(_)) => {
                return Err(invalid(key, "migrate_to is set but tier is not deprecated"));
            }
            (true, None) => {
                return Err(invalid(key, "deprecated tier must name a migrate_to target"));
            }
            (true, Some(target)) => {
                if target == key {
                    return Err(invalid(key, "migrate_to must not reference itself"));
                }
                if !tiers.contains_key(target) {
                    return Err(invalid(
                        key,
                        format!("migrate_to references unknown tier '{}'", target),
                    ));
                }
            }
            (false, None) => {}
        }
    }

    Ok(())
}

/// Shared, reloadable handle to the current tier table.
///
/// Readers take a cheap `Arc` snapshot; a reload swaps the whole table at
/// once or not at all.
#[derive(Debug)]
pub struct TierRegistry {
    path: Option<PathBuf>,
    table: RwLock<Arc<TierTable>>,
}

impl TierRegistry {
    pub fn new(table: TierTable) -> Self {
        Self {
            path: None,
            table: RwLock::new(Arc::new(table)),
        }
    }

    /// Load from `path`, falling back to the built-in tiers when the file is
    /// absent or invalid.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let table = match TierTable::load(&path) {
            Ok(table) => {
                tracing::info!(path = %path.display(), tiers = table.len(), "Loaded tier table");
                table
            }
            Err(TierError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No tier file found, using default tiers");
                TierTable::defaults()
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Invalid tier file, using default tiers");
                TierTable::defaults()
            }
        };
        Self {
            path: Some(path),
            table: RwLock::new(Arc::new(table)),
        }
    }

    pub fn current(&self) -> Arc<TierTable> {
        self.table
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Re-read the tier file. On failure the current table is kept.
    pub fn reload(&self) -> Result<Arc<TierTable>, TierError> {
        let Some(path) = &self.path else {
            return Ok(self.current());
        };
        let table = match TierTable::load(path) {
            Ok(table) => Arc::new(table),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Tier reload rejected, keeping previous table");
                return Err(e);
            }
        };
        *self
            .table
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = table.clone();
        tracing::info!(path = %path.display(), tiers = table.len(), "Reloaded tier table");
        Ok(table)
    }
}
