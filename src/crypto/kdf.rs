//! Per-license key derivation using Argon2id.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{CryptoError, CryptoResult};

/// Size of derived keys in bytes (AES-256).
pub const KEY_SIZE: usize = 32;

/// Size of the per-license salt in bytes (hex-encoded to 64 chars at rest).
pub const SALT_SIZE: usize = 32;

/// A derived encryption key, wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Argon2id cost parameters.
///
/// Clients derive the same key independently, so production parameters are
/// part of the wire contract and must not drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_cost_kib: u32,
    /// Iterations.
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_cost_kib: 64 * 1024,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

/// Generate a fresh per-license salt: 32 random bytes, hex-encoded.
pub fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Derive the sealing key for one (license, hardware) pair.
///
/// The password is `license_key || hardware_id`; the salt is the decoded
/// per-license salt. Identical inputs always yield the identical key.
pub fn derive_key(
    license_key: &str,
    hardware_id: &str,
    salt_hex: &str,
    params: &KdfParams,
) -> CryptoResult<DerivedKey> {
    let salt = hex::decode(salt_hex).map_err(|e| CryptoError::InvalidSalt(e.to_string()))?;
    if salt.len() != SALT_SIZE {
        return Err(CryptoError::InvalidSalt(format!(
            "expected {} bytes, got {}",
            SALT_SIZE,
            salt.len()
        )));
    }

    let argon2_params = Params::new(
        params.memory_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut password = Vec::with_capacity(license_key.len() + hardware_id.len());
    password.extend_from_slice(license_key.as_bytes());
    password.extend_from_slice(hardware_id.as_bytes());

    let mut key_bytes = [0u8; KEY_SIZE];
    let result = argon2
        .hash_password_into(&password, &salt, &mut key_bytes)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()));
    password.zeroize();
    result?;

    let key = DerivedKey::from_bytes(key_bytes);
    key_bytes.zeroize();
    Ok(key)
}
