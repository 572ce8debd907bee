//! Argon2id key derivation for the store passphrase.
//!
//! Defaults: 64 MiB memory, 3 iterations, 2 lanes, 32-byte output.
//! The parameters are carried in the container header so a blob written
//! on one machine can be opened on another with different defaults.

use crate::crypto::{CryptoError, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::Zeroize;

/// Salt length in the v1 container.
pub const SALT_LEN: usize = 32;

/// Encoded length of [`KdfParams`] in the container header.
pub const KDF_PARAMS_LEN: usize = 10;

/// A derived 256-bit symmetric key. Zeroized on drop.
#[derive(Clone)]
pub struct SecretKey {
    key: [u8; 32],
}

impl SecretKey {
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Password hash algorithm identifier as pinned in the container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KdfAlgorithm {
    Argon2id = 0x01,
}

impl KdfAlgorithm {
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0x01 => Ok(KdfAlgorithm::Argon2id),
            // 0x02 is reserved for scrypt but no writer emits it yet
            _ => Err(CryptoError::Corrupt("unknown kdf algorithm id")),
        }
    }
}

/// Parameters for key derivation, encoded into the container header as
/// algorithm id (1 byte), memory in KiB (4 BE), iterations (4 BE) and
/// parallelism (1 byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub algorithm: KdfAlgorithm,
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u8,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            algorithm: KdfAlgorithm::Argon2id,
            memory_kib: 65_536,
            iterations: 3,
            parallelism: 2,
        }
    }
}

impl KdfParams {
    /// Reject parameters outside the range any legitimate writer
    /// produces. Headers are parsed before authentication, so this also
    /// bounds the work an attacker can make us do.
    pub fn validate(&self) -> Result<()> {
        if self.memory_kib < 8 * self.parallelism as u32 {
            return Err(CryptoError::Corrupt("kdf memory cost too low"));
        }
        if self.memory_kib > 4 * 1024 * 1024 {
            return Err(CryptoError::Corrupt("kdf memory cost too high"));
        }
        if self.iterations == 0 || self.iterations > 1024 {
            return Err(CryptoError::Corrupt("kdf iteration count out of range"));
        }
        if self.parallelism == 0 {
            return Err(CryptoError::Corrupt("kdf parallelism out of range"));
        }
        Ok(())
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.algorithm as u8);
        out.extend_from_slice(&self.memory_kib.to_be_bytes());
        out.extend_from_slice(&self.iterations.to_be_bytes());
        out.push(self.parallelism);
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < KDF_PARAMS_LEN {
            return Err(CryptoError::Corrupt("kdf parameter block truncated"));
        }
        let algorithm = KdfAlgorithm::from_id(raw[0])?;
        let memory_kib = u32::from_be_bytes([raw[1], raw[2], raw[3], raw[4]]);
        let iterations = u32::from_be_bytes([raw[5], raw[6], raw[7], raw[8]]);
        let parallelism = raw[9];
        let params = Self {
            algorithm,
            memory_kib,
            iterations,
            parallelism,
        };
        params.validate()?;
        Ok(params)
    }
}

/// Derive the container key from a passphrase and salt.
pub fn derive_key(passphrase: &[u8], salt: &[u8; SALT_LEN], params: &KdfParams) -> Result<SecretKey> {
    params.validate()?;

    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism as u32,
        Some(32),
    )
    .map_err(|e| CryptoError::Kdf(e.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key = [0u8; 32];
    argon2
        .hash_password_into(passphrase, salt, &mut key)
        .map_err(|e| CryptoError::Kdf(e.to_string()))?;

    Ok(SecretKey::from_bytes(key))
}

/// Generate a fresh random salt.
pub fn new_salt() -> [u8; SALT_LEN] {
    rand::random()
}
