mod from_row;
pub mod queries;

pub use from_row::*;

use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::config::Config;
use crate::crypto::KdfParams;
use crate::delivery::CodeDelivery;
use crate::error::Result;
use crate::proxy::{Forwarder, ProviderTable};
use crate::rate_limit::AddressLimiter;
use crate::tiers::TierRegistry;

pub type DbPool = Pool<SqliteConnectionManager>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub tiers: Arc<TierRegistry>,
    pub address_limiter: Arc<AddressLimiter>,
    pub providers: Arc<ProviderTable>,
    pub forwarder: Forwarder,
    pub delivery: CodeDelivery,
    pub kdf: KdfParams,
}

impl AppState {
    pub fn new(db: DbPool, config: Config, tiers: TierRegistry) -> Result<Self> {
        let address_limiter =
            AddressLimiter::new(config.rate_limit_per_second, config.rate_limit_burst);
        let providers = ProviderTable::from_config(&config);
        let forwarder = Forwarder::new(config.upstream_timeout())?;
        let delivery = CodeDelivery::new(config.verification_webhook_url.clone());

        Ok(Self {
            db,
            config: Arc::new(config),
            tiers: Arc::new(tiers),
            address_limiter: Arc::new(address_limiter),
            providers: Arc::new(providers),
            forwarder,
            delivery,
            kdf: KdfParams::default(),
        })
    }

    /// Override the key-derivation cost. Clients must use the same values.
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }
}

fn configure_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    Ok(())
}

/// Open the pool and make sure the schema exists.
pub fn create_pool(path: &str) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(path).with_init(configure_connection);
    let pool = Pool::builder().max_size(16).build(manager)?;
    let conn = pool.get()?;
    init_db(&conn)?;
    Ok(pool)
}

pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS licenses (
    key TEXT PRIMARY KEY,
    customer_name TEXT,
    customer_email TEXT,
    tier TEXT NOT NULL,
    period TEXT NOT NULL,
    expires_at INTEGER NOT NULL,
    daily_limit INTEGER NOT NULL,
    monthly_limit INTEGER NOT NULL,
    max_activations INTEGER NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    salt TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_licenses_tier ON licenses(tier);
CREATE INDEX IF NOT EXISTS idx_licenses_email ON licenses(customer_email);

CREATE TABLE IF NOT EXISTS activations (
    license_key TEXT NOT NULL REFERENCES licenses(key),
    hardware_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE (license_key, hardware_id)
);
CREATE INDEX IF NOT EXISTS idx_activations_hardware ON activations(hardware_id);

CREATE TABLE IF NOT EXISTS checkins (
    license_key TEXT NOT NULL REFERENCES licenses(key),
    hardware_id TEXT NOT NULL,
    last_seen_at INTEGER NOT NULL,
    PRIMARY KEY (license_key, hardware_id)
);

CREATE TABLE IF NOT EXISTS usage_counters (
    license_key TEXT NOT NULL REFERENCES licenses(key),
    date TEXT NOT NULL,
    hardware_id TEXT NOT NULL,
    count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (license_key, date, hardware_id)
);

CREATE TABLE IF NOT EXISTS proxy_credentials (
    token TEXT PRIMARY KEY,
    license_key TEXT NOT NULL REFERENCES licenses(key),
    hardware_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE (license_key, hardware_id)
);

CREATE TABLE IF NOT EXISTS verification_codes (
    id TEXT PRIMARY KEY,
    email_hash TEXT NOT NULL,
    code_hash TEXT NOT NULL,
    tier TEXT NOT NULL,
    period TEXT NOT NULL,
    expires_at INTEGER NOT NULL,
    used INTEGER NOT NULL DEFAULT 0,
    failed_attempts INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_verification_codes_email ON verification_codes(email_hash);
"#;
