//! The versioned encrypted container wrapping the serialized log.
//!
//! Layout (v1, bit-exact, identical on disk and on the wire):
//!
//! ```text
//! offset  len  field
//! 0       1    version      (0x01)
//! 1       32   salt
//! 33      10   kdf params   alg id (1) || memory KiB (4 BE) ||
//!                           iterations (4 BE) || parallelism (1)
//! 43      24   nonce        (XChaCha20-Poly1305)
//! 67      M    ciphertext
//! 67+M    16   auth tag
//! ```
//!
//! The full 67-byte prefix is authenticated as associated data, so a
//! tampered header fails tag verification rather than silently changing
//! derivation parameters.

use crate::crypto::kdf::{self, KdfParams, SecretKey, KDF_PARAMS_LEN, SALT_LEN};
use crate::crypto::{CryptoError, Result};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};

/// The only container version this build reads and writes.
pub const CURRENT_VERSION: u8 = 0x01;

/// Nonce length for XChaCha20-Poly1305.
pub const NONCE_LEN: usize = 24;

/// Poly1305 tag length.
pub const TAG_LEN: usize = 16;

/// Total header length: version || salt || kdf params || nonce.
pub const HEADER_LEN: usize = 1 + SALT_LEN + KDF_PARAMS_LEN + NONCE_LEN;

/// A successfully opened container. The key and salt are retained so the
/// caller can re-encrypt without another derivation pass.
pub struct Decrypted {
    pub version: u8,
    pub key: SecretKey,
    pub salt: [u8; SALT_LEN],
    pub params: KdfParams,
    pub plaintext: Vec<u8>,
}

/// Encrypt `plaintext` under an already-derived key.
///
/// A fresh random nonce is generated per call; the salt and parameters
/// are recorded in the header so [`decrypt`] can re-derive the key.
pub fn encrypt(
    version: u8,
    key: &SecretKey,
    salt: &[u8; SALT_LEN],
    params: &KdfParams,
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    if version != CURRENT_VERSION {
        return Err(CryptoError::UnsupportedVersion(version));
    }

    let nonce_bytes: [u8; NONCE_LEN] = rand::random();

    let mut out = Vec::with_capacity(HEADER_LEN + plaintext.len() + TAG_LEN);
    out.push(version);
    out.extend_from_slice(salt);
    params.encode(&mut out);
    out.extend_from_slice(&nonce_bytes);
    debug_assert_eq!(out.len(), HEADER_LEN);

    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad: &out,
            },
        )
        .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open a container with a passphrase.
///
/// Returns [`CryptoError::WrongPassphrase`] only when the header parsed
/// cleanly and tag verification failed; truncation and structural damage
/// are [`CryptoError::Corrupt`].
pub fn decrypt(passphrase: &[u8], data: &[u8]) -> Result<Decrypted> {
    let (version, salt, params, nonce) = parse_header(data)?;

    let key = kdf::derive_key(passphrase, &salt, &params)?;
    let plaintext = open(&key, &nonce, &data[..HEADER_LEN], &data[HEADER_LEN..])?;

    Ok(Decrypted {
        version,
        key,
        salt,
        params,
        plaintext,
    })
}

/// Re-encrypt a container under a new passphrase.
///
/// The new container gets a fresh salt and nonce; neither is ever
/// reused from the old one.
pub fn rekey(data: &[u8], old_passphrase: &[u8], new_passphrase: &[u8]) -> Result<Vec<u8>> {
    let opened = decrypt(old_passphrase, data)?;

    let salt = kdf::new_salt();
    let key = kdf::derive_key(new_passphrase, &salt, &opened.params)?;
    encrypt(opened.version, &key, &salt, &opened.params, &opened.plaintext)
}

fn parse_header(data: &[u8]) -> Result<(u8, [u8; SALT_LEN], KdfParams, [u8; NONCE_LEN])> {
    if data.is_empty() {
        return Err(CryptoError::Corrupt("empty container"));
    }

    let version = data[0];
    if version == 0 {
        return Err(CryptoError::Corrupt("version byte is zero"));
    }
    if version > CURRENT_VERSION {
        return Err(CryptoError::UnsupportedVersion(version));
    }

    if data.len() < HEADER_LEN + TAG_LEN {
        return Err(CryptoError::Corrupt("container truncated"));
    }

    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&data[1..1 + SALT_LEN]);

    let params = KdfParams::decode(&data[1 + SALT_LEN..1 + SALT_LEN + KDF_PARAMS_LEN])?;

    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&data[1 + SALT_LEN + KDF_PARAMS_LEN..HEADER_LEN]);

    Ok((version, salt, params, nonce))
}

fn open(key: &SecretKey, nonce: &[u8; NONCE_LEN], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::WrongPassphrase)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_params() -> KdfParams {
        KdfParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
            ..KdfParams::default()
        }
    }

    fn seal(passphrase: &[u8], plaintext: &[u8]) -> Vec<u8> {
        let salt = kdf::new_salt();
        let params = fast_params();
        let key = kdf::derive_key(passphrase, &salt, &params).unwrap();
        encrypt(CURRENT_VERSION, &key, &salt, &params, plaintext).unwrap()
    }

    #[test]
    fn round_trip() {
        let ct = seal(b"p", b"attack at dawn");
        let opened = decrypt(b"p", &ct).unwrap();
        assert_eq!(opened.plaintext, b"attack at dawn");
        assert_eq!(opened.version, CURRENT_VERSION);
    }

    #[test]
    fn wrong_passphrase() {
        let ct = seal(b"correct", b"payload");
        assert!(matches!(
            decrypt(b"incorrect", &ct),
            Err(CryptoError::WrongPassphrase)
        ));
        assert!(decrypt(b"correct", &ct).is_ok());
    }

    #[test]
    fn distinct_nonces_per_encrypt() {
        let salt = kdf::new_salt();
        let params = fast_params();
        let key = kdf::derive_key(b"p", &salt, &params).unwrap();

        let a = encrypt(CURRENT_VERSION, &key, &salt, &params, b"same").unwrap();
        let b = encrypt(CURRENT_VERSION, &key, &salt, &params, b"same").unwrap();
        assert_ne!(a[43..67], b[43..67]);
        assert_ne!(a[HEADER_LEN..], b[HEADER_LEN..]);
    }

    #[test]
    fn tampered_header_fails_auth() {
        let mut ct = seal(b"p", b"payload");
        // Flip a salt bit: derivation changes, so this reads as a wrong
        // passphrase rather than corruption.
        ct[5] ^= 0x01;
        assert!(matches!(
            decrypt(b"p", &ct),
            Err(CryptoError::WrongPassphrase)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_auth() {
        let mut ct = seal(b"p", b"payload");
        let n = ct.len();
        ct[n - TAG_LEN - 1] ^= 0xff;
        assert!(matches!(
            decrypt(b"p", &ct),
            Err(CryptoError::WrongPassphrase)
        ));
    }

    #[test]
    fn truncated_is_corrupt() {
        let ct = seal(b"p", b"payload");
        assert!(matches!(
            decrypt(b"p", &ct[..HEADER_LEN - 3]),
            Err(CryptoError::Corrupt(_))
        ));
        assert!(matches!(decrypt(b"p", &[]), Err(CryptoError::Corrupt(_))));
    }

    #[test]
    fn future_version_unsupported() {
        let mut ct = seal(b"p", b"payload");
        ct[0] = 0x02;
        assert!(matches!(
            decrypt(b"p", &ct),
            Err(CryptoError::UnsupportedVersion(0x02))
        ));
    }

    #[test]
    fn rekey_changes_salt_and_keeps_plaintext() {
        let ct = seal(b"old", b"payload");
        let rekeyed = rekey(&ct, b"old", b"new").unwrap();

        assert_ne!(ct[1..33], rekeyed[1..33]);
        assert!(matches!(
            decrypt(b"old", &rekeyed),
            Err(CryptoError::WrongPassphrase)
        ));
        assert_eq!(decrypt(b"new", &rekeyed).unwrap().plaintext, b"payload");
    }
}
