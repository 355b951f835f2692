use rand::Rng;
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::crypto::{generate_proxy_key, generate_salt};
use crate::error::{AppError, Result};
use crate::models::*;
use crate::tiers::{FREE_TIER, TierLimits, UNLIMITED};
use crate::util::{now, redact};

use super::from_row::{
    ACTIVATION_COLS, LICENSE_COLS, PROXY_CREDENTIAL_COLS, VERIFICATION_CODE_COLS, query_all,
    query_one,
};

/// Alphabet for license key segments. Omits 0/O and 1/I.
const KEY_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const KEY_SEGMENT_LEN: usize = 4;
const KEY_INSERT_ATTEMPTS: usize = 5;

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

fn key_segment(rng: &mut impl Rng) -> String {
    (0..KEY_SEGMENT_LEN)
        .map(|_| KEY_ALPHABET[rng.gen_range(0..KEY_ALPHABET.len())] as char)
        .collect()
}

/// Generate a license key of the form `LIC-<PERIOD>-XXXX-XXXX`.
pub fn generate_license_key(period: LicensePeriod) -> String {
    let mut rng = rand::thread_rng();
    format!(
        "LIC-{}-{}-{}",
        period.as_ref(),
        key_segment(&mut rng),
        key_segment(&mut rng)
    )
}

/// Canonical form of an email address: NFKC, trimmed, lowercase.
pub fn normalize_email(email: &str) -> String {
    email.nfkc().collect::<String>().trim().to_lowercase()
}

/// Hash an email address for verification lookups (codes never store PII).
pub fn hash_email(email: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"keygate-email-v1:");
    hasher.update(normalize_email(email).as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash a verification code, bound to the email it was sent to.
pub fn hash_verification_code(email_hash: &str, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(email_hash.as_bytes());
    hasher.update(b"|");
    hasher.update(code.trim().as_bytes());
    hex::encode(hasher.finalize())
}

/// Six random decimal digits.
pub fn generate_verification_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

// ============ Licenses ============

/// Insert a license with limits copied from the tier table and a fresh salt.
pub fn create_license(
    conn: &Connection,
    input: &CreateLicense,
    limits: TierLimits,
) -> Result<License> {
    let created_at = now();
    let email = input.customer_email.as_deref().map(normalize_email);

    for _ in 0..KEY_INSERT_ATTEMPTS {
        let license = License {
            key: generate_license_key(input.period),
            customer_name: input.customer_name.clone(),
            customer_email: email.clone(),
            tier: input.tier.clone(),
            period: input.period,
            expires_at: input.period.expiry_from(created_at),
            daily_limit: limits.daily,
            monthly_limit: limits.monthly,
            max_activations: limits.devices,
            active: true,
            salt: Some(generate_salt()),
            created_at,
            updated_at: created_at,
        };

        let inserted = conn.execute(
            "INSERT INTO licenses (key, customer_name, customer_email, tier, period, expires_at, daily_limit, monthly_limit, max_activations, active, salt, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                &license.key,
                &license.customer_name,
                &license.customer_email,
                &license.tier,
                license.period.as_ref(),
                license.expires_at,
                license.daily_limit,
                license.monthly_limit,
                license.max_activations,
                license.active,
                &license.salt,
                license.created_at,
                license.updated_at,
            ],
        );

        match inserted {
            Ok(_) => return Ok(license),
            Err(e) if is_constraint_violation(&e) => {
                tracing::warn!(license = %redact(&license.key), "License key collision, regenerating");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(AppError::Internal(
        "Could not generate a unique license key".into(),
    ))
}

pub fn get_license(conn: &Connection, key: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE key = ?1", LICENSE_COLS),
        &[&key],
    )
}

/// Count valid licenses on `tier` issued to `email`.
pub fn count_valid_licenses_for_email(
    conn: &Connection,
    email: &str,
    tier: &str,
) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM licenses WHERE customer_email = ?1 AND tier = ?2 AND active = 1 AND expires_at > ?3",
        params![normalize_email(email), tier, now()],
        |row| row.get(0),
    )?)
}

/// Persist a salt for a legacy license that lacks one, then return the
/// stored salt. A concurrent caller may win the write; both see its value.
pub fn ensure_license_salt(conn: &Connection, key: &str) -> Result<String> {
    let updated = conn.execute(
        "UPDATE licenses SET salt = ?1, updated_at = ?2 WHERE key = ?3 AND (salt IS NULL OR salt = '')",
        params![generate_salt(), now(), key],
    )?;
    if updated > 0 {
        tracing::info!(license = %redact(key), "Generated salt for legacy license");
    }

    let salt: Option<String> = conn
        .query_row(
            "SELECT salt FROM licenses WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    salt.ok_or_else(|| AppError::NotFound("License not found".into()))
}

/// Move a license to `tier` and overwrite its stored limits.
pub fn update_license_tier(
    conn: &Connection,
    key: &str,
    tier: &str,
    limits: TierLimits,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE licenses SET tier = ?1, daily_limit = ?2, monthly_limit = ?3, max_activations = ?4, updated_at = ?5 WHERE key = ?6",
        params![tier, limits.daily, limits.monthly, limits.devices, now(), key],
    )?;
    Ok(updated > 0)
}

/// Rewrite every license on `from` to `to` with the target's limits.
pub fn migrate_licenses(
    conn: &Connection,
    from: &str,
    to: &str,
    limits: TierLimits,
) -> Result<usize> {
    let updated = conn.execute(
        "UPDATE licenses SET tier = ?1, daily_limit = ?2, monthly_limit = ?3, max_activations = ?4, updated_at = ?5 WHERE tier = ?6",
        params![to, limits.daily, limits.monthly, limits.devices, now(), from],
    )?;
    Ok(updated)
}

/// Mark a license inactive and revoke its proxy credentials. Rows are kept.
pub fn deactivate_license(conn: &mut Connection, key: &str) -> Result<bool> {
    let tx = conn.transaction()?;
    let updated = tx.execute(
        "UPDATE licenses SET active = 0, updated_at = ?1 WHERE key = ?2",
        params![now(), key],
    )?;
    tx.execute(
        "DELETE FROM proxy_credentials WHERE license_key = ?1",
        params![key],
    )?;
    tx.commit()?;
    Ok(updated > 0)
}

// ============ Activations ============

pub fn get_activation(
    conn: &Connection,
    license_key: &str,
    hardware_id: &str,
) -> Result<Option<Activation>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM activations WHERE license_key = ?1 AND hardware_id = ?2",
            ACTIVATION_COLS
        ),
        &[&license_key, &hardware_id],
    )
}

pub fn count_activations(conn: &Connection, license_key: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM activations WHERE license_key = ?1",
        params![license_key],
        |row| row.get(0),
    )?)
}

/// Activations for a license with the last check-in of each device.
pub fn list_activations(
    conn: &Connection,
    license_key: &str,
) -> Result<Vec<ActivationWithCheckin>> {
    query_all(
        conn,
        "SELECT a.license_key, a.hardware_id, a.created_at, c.last_seen_at
         FROM activations a
         LEFT JOIN checkins c ON c.license_key = a.license_key AND c.hardware_id = a.hardware_id
         WHERE a.license_key = ?1
         ORDER BY a.created_at",
        &[&license_key],
    )
}

/// Bind `hardware_id` to a license, enforcing the device limit and, when
/// `enforce_free_rule` is set, the one-free-license-per-device rule.
///
/// Runs as an IMMEDIATE transaction so two concurrent activations cannot
/// both pass the count check. A rejected attempt writes nothing. A
/// successful one upserts the check-in for the device.
pub fn acquire_activation_atomic(
    conn: &mut Connection,
    license_key: &str,
    hardware_id: &str,
    max_activations: i64,
    enforce_free_rule: bool,
) -> Result<ActivationOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let timestamp = now();

    if enforce_free_rule {
        let conflicting: i64 = tx.query_row(
            "SELECT COUNT(*) FROM activations a
             JOIN licenses l ON l.key = a.license_key
             WHERE a.hardware_id = ?1 AND a.license_key != ?2
               AND l.tier = ?3 AND l.active = 1 AND l.expires_at > ?4",
            params![hardware_id, license_key, FREE_TIER, timestamp],
            |row| row.get(0),
        )?;
        if conflicting > 0 {
            return Err(AppError::Forbidden(
                "This device already has an active free license".into(),
            ));
        }
    }

    let existing = get_activation(&tx, license_key, hardware_id)?;
    let outcome = if existing.is_some() {
        ActivationOutcome::Existing
    } else {
        let count = count_activations(&tx, license_key)?;
        if max_activations != UNLIMITED && count >= max_activations {
            return Err(AppError::Forbidden(format!(
                "Device limit reached ({}/{})",
                count, max_activations
            )));
        }
        tx.execute(
            "INSERT INTO activations (license_key, hardware_id, created_at) VALUES (?1, ?2, ?3)",
            params![license_key, hardware_id, timestamp],
        )?;
        ActivationOutcome::Created
    };

    upsert_checkin(&tx, license_key, hardware_id, timestamp)?;
    tx.commit()?;
    Ok(outcome)
}

/// Remove every device binding and proxy credential for a license.
pub fn reset_activations(conn: &mut Connection, license_key: &str) -> Result<usize> {
    let tx = conn.transaction()?;
    let removed = tx.execute(
        "DELETE FROM activations WHERE license_key = ?1",
        params![license_key],
    )?;
    tx.execute(
        "DELETE FROM proxy_credentials WHERE license_key = ?1",
        params![license_key],
    )?;
    tx.commit()?;
    Ok(removed)
}

pub fn upsert_checkin(
    conn: &Connection,
    license_key: &str,
    hardware_id: &str,
    timestamp: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO checkins (license_key, hardware_id, last_seen_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(license_key, hardware_id) DO UPDATE SET last_seen_at = excluded.last_seen_at",
        params![license_key, hardware_id, timestamp],
    )?;
    Ok(())
}

// ============ Usage ============

/// Add `amount` to the (license, date, hardware) counter in one statement.
pub fn increment_usage(
    conn: &Connection,
    license_key: &str,
    date: &str,
    hardware_id: &str,
    amount: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO usage_counters (license_key, date, hardware_id, count) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(license_key, date, hardware_id) DO UPDATE SET count = count + excluded.count",
        params![license_key, date, hardware_id, amount],
    )?;
    Ok(())
}

pub fn daily_usage(conn: &Connection, license_key: &str, date: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(count), 0) FROM usage_counters WHERE license_key = ?1 AND date = ?2",
        params![license_key, date],
        |row| row.get(0),
    )?)
}

/// Sum of counters with `from <= date < to` (ISO dates compare lexically).
pub fn monthly_usage(conn: &Connection, license_key: &str, from: &str, to: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(count), 0) FROM usage_counters WHERE license_key = ?1 AND date >= ?2 AND date < ?3",
        params![license_key, from, to],
        |row| row.get(0),
    )?)
}

// ============ Proxy credentials ============

/// Mint a credential for (license, hardware), replacing any previous one
/// in the same transaction.
pub fn replace_proxy_credential(
    conn: &mut Connection,
    license_key: &str,
    hardware_id: &str,
) -> Result<ProxyCredential> {
    let credential = ProxyCredential {
        token: generate_proxy_key(),
        license_key: license_key.to_string(),
        hardware_id: hardware_id.to_string(),
        created_at: now(),
    };

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute(
        "DELETE FROM proxy_credentials WHERE license_key = ?1 AND hardware_id = ?2",
        params![license_key, hardware_id],
    )?;
    tx.execute(
        "INSERT INTO proxy_credentials (token, license_key, hardware_id, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            &credential.token,
            &credential.license_key,
            &credential.hardware_id,
            credential.created_at
        ],
    )?;
    tx.commit()?;

    Ok(credential)
}

pub fn get_proxy_credential(conn: &Connection, token: &str) -> Result<Option<ProxyCredential>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM proxy_credentials WHERE token = ?1",
            PROXY_CREDENTIAL_COLS
        ),
        &[&token],
    )
}

// ============ Verification codes ============

/// Wrong guesses a live code tolerates before it is burned.
pub const MAX_CODE_ATTEMPTS: i64 = 5;

/// Store a new code for `email_hash`. Earlier unused codes for the same
/// address are invalidated.
pub fn create_verification_code(
    conn: &mut Connection,
    email_hash: &str,
    code_hash: &str,
    tier: &str,
    period: LicensePeriod,
    ttl_secs: i64,
) -> Result<VerificationCode> {
    let created_at = now();
    let code = VerificationCode {
        id: gen_id(),
        email_hash: email_hash.to_string(),
        code_hash: code_hash.to_string(),
        tier: tier.to_string(),
        period,
        expires_at: created_at + ttl_secs,
        used: false,
        created_at,
    };

    let tx = conn.transaction()?;
    tx.execute(
        "UPDATE verification_codes SET used = 1 WHERE email_hash = ?1 AND used = 0",
        params![email_hash],
    )?;
    tx.execute(
        "INSERT INTO verification_codes (id, email_hash, code_hash, tier, period, expires_at, used, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
        params![
            &code.id,
            &code.email_hash,
            &code.code_hash,
            &code.tier,
            code.period.as_ref(),
            code.expires_at,
            code.created_at
        ],
    )?;
    tx.commit()?;

    Ok(code)
}

/// Atomically claim a live, unused code. Returns None if the code is wrong,
/// expired, or was claimed by a concurrent request. A wrong guess counts
/// against the live code for the address, which is invalidated once it
/// reaches `MAX_CODE_ATTEMPTS`.
pub fn consume_verification_code(
    conn: &Connection,
    email_hash: &str,
    code_hash: &str,
) -> Result<Option<VerificationCode>> {
    let found: Option<VerificationCode> = query_one(
        conn,
        &format!(
            "SELECT {} FROM verification_codes WHERE email_hash = ?1 AND code_hash = ?2 AND used = 0 AND expires_at > ?3",
            VERIFICATION_CODE_COLS
        ),
        &[&email_hash, &code_hash, &now()],
    )?;
    let Some(mut code) = found else {
        conn.execute(
            "UPDATE verification_codes
             SET failed_attempts = failed_attempts + 1,
                 used = CASE WHEN failed_attempts + 1 >= ?2 THEN 1 ELSE used END
             WHERE email_hash = ?1 AND used = 0 AND expires_at > ?3",
            params![email_hash, MAX_CODE_ATTEMPTS, now()],
        )?;
        return Ok(None);
    };

    let claimed = conn.execute(
        "UPDATE verification_codes SET used = 1 WHERE id = ?1 AND used = 0",
        params![&code.id],
    )?;
    if claimed == 0 {
        return Ok(None);
    }
    code.used = true;
    Ok(Some(code))
}

/// Delete used and expired codes.
pub fn purge_verification_codes(conn: &Connection) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM verification_codes WHERE used = 1 OR expires_at <= ?1",
        params![now()],
    )?)
}
