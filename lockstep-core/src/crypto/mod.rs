//! Cryptographic container for the store file.
//!
//! This module provides:
//! - Argon2id key derivation from the user passphrase
//! - The versioned encrypted container (XChaCha20-Poly1305)
//! - Rekeying (decrypt, re-encrypt with fresh salt and nonce)
//!
//! The container layout is bit-exact and identical on disk and on the
//! wire; see [`container`] for the byte map.

pub mod container;
pub mod kdf;

pub use container::{decrypt, encrypt, rekey, Decrypted, CURRENT_VERSION, HEADER_LEN, TAG_LEN};
pub use kdf::{derive_key, KdfAlgorithm, KdfParams, SecretKey, SALT_LEN};

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The header parsed cleanly but the authentication tag did not
    /// verify under the derived key.
    #[error("wrong passphrase")]
    WrongPassphrase,

    /// The container is truncated or structurally invalid.
    #[error("corrupt container: {0}")]
    Corrupt(&'static str),

    /// The version byte belongs to a future format revision.
    #[error("unsupported container version {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
