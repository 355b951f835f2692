//! AES-256-GCM sealing of key bundles.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use rand::RngCore;

use super::{CryptoError, CryptoResult, DerivedKey};

/// Nonce size in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// GCM authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Ciphertext (tag appended) plus the nonce it was sealed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBox {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
}

impl SealedBox {
    pub fn ciphertext_b64(&self) -> String {
        STANDARD.encode(&self.ciphertext)
    }

    pub fn nonce_b64(&self) -> String {
        STANDARD.encode(self.nonce)
    }
}

/// Seal `plaintext` under `key` with a fresh random nonce.
pub fn seal(key: &DerivedKey, plaintext: &[u8]) -> CryptoResult<SealedBox> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Encryption)?;

    Ok(SealedBox { ciphertext, nonce })
}

/// Open a sealed payload. Fails closed: any truncation, malformed nonce or
/// tag mismatch returns an error and never partial plaintext.
pub fn open(key: &DerivedKey, ciphertext: &[u8], nonce: &[u8]) -> CryptoResult<Vec<u8>> {
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::Malformed(format!(
            "nonce must be {} bytes, got {}",
            NONCE_SIZE,
            nonce.len()
        )));
    }
    if ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::Malformed("ciphertext shorter than tag".into()));
    }

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Decryption)
}

/// Open a payload transported as base64 strings (the activation response shape).
pub fn open_b64(key: &DerivedKey, ciphertext_b64: &str, nonce_b64: &str) -> CryptoResult<Vec<u8>> {
    let ciphertext = STANDARD
        .decode(ciphertext_b64)
        .map_err(|e| CryptoError::Malformed(format!("invalid base64 ciphertext: {}", e)))?;
    let nonce = STANDARD
        .decode(nonce_b64)
        .map_err(|e| CryptoError::Malformed(format!("invalid base64 nonce: {}", e)))?;
    open(key, &ciphertext, &nonce)
}
