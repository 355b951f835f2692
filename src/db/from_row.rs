//! Row mapping for query results.

use rusqlite::{Connection, OptionalExtension, Row, ToSql, types::Type};

use crate::error::Result;
use crate::models::*;

pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

pub const LICENSE_COLS: &str = "key, customer_name, customer_email, tier, period, expires_at, daily_limit, monthly_limit, max_activations, active, salt, created_at, updated_at";

pub const ACTIVATION_COLS: &str = "license_key, hardware_id, created_at";

pub const PROXY_CREDENTIAL_COLS: &str = "token, license_key, hardware_id, created_at";

pub const VERIFICATION_CODE_COLS: &str =
    "id, email_hash, code_hash, tier, period, expires_at, used, created_at";

fn parse_period(row: &Row, idx: usize) -> rusqlite::Result<LicensePeriod> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl FromRow for License {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(License {
            key: row.get(0)?,
            customer_name: row.get(1)?,
            customer_email: row.get(2)?,
            tier: row.get(3)?,
            period: parse_period(row, 4)?,
            expires_at: row.get(5)?,
            daily_limit: row.get(6)?,
            monthly_limit: row.get(7)?,
            max_activations: row.get(8)?,
            active: row.get(9)?,
            salt: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }
}

impl FromRow for Activation {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Activation {
            license_key: row.get(0)?,
            hardware_id: row.get(1)?,
            created_at: row.get(2)?,
        })
    }
}

impl FromRow for ActivationWithCheckin {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ActivationWithCheckin {
            activation: Activation::from_row(row)?,
            last_checkin_at: row.get(3)?,
        })
    }
}

impl FromRow for ProxyCredential {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ProxyCredential {
            token: row.get(0)?,
            license_key: row.get(1)?,
            hardware_id: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

impl FromRow for VerificationCode {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(VerificationCode {
            id: row.get(0)?,
            email_hash: row.get(1)?,
            code_hash: row.get(2)?,
            tier: row.get(3)?,
            period: parse_period(row, 4)?,
            expires_at: row.get(5)?,
            used: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> Result<Option<T>> {
    Ok(conn.query_row(sql, params, |row| T::from_row(row)).optional()?)
}

pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| T::from_row(row))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
