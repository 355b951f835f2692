//! Key derivation, sealing and request signatures.

mod kdf;
mod seal;
mod signature;
mod token;

pub use kdf::*;
pub use seal::*;
pub use signature::*;
pub use token::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("invalid salt: {0}")]
    InvalidSalt(String),

    #[error("encryption failed")]
    Encryption,

    #[error("decryption failed")]
    Decryption,

    #[error("malformed sealed data: {0}")]
    Malformed(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
