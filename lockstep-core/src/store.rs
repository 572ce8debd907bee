//! Store file lifecycle: init, open, save, rekey.
//!
//! On disk the store is one encrypted container holding the serialized
//! log. Saves are atomic: write a sibling temp file, fsync, rename over
//! the target. The in-memory store stays authoritative throughout; a
//! crash mid-save leaves the previous file intact.

use crate::blob::Blob;
use crate::crypto::{self, KdfParams, SecretKey, CURRENT_VERSION, SALT_LEN};
use crate::txlog::{wire, Log};
use crate::{Error, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// An open store: the blob layer plus the key material needed to write
/// it back.
pub struct StoreFile {
    path: PathBuf,
    passphrase: Zeroizing<String>,
    salt: [u8; SALT_LEN],
    params: KdfParams,
    key: SecretKey,
    version: u8,
    blob: Blob,
}

impl StoreFile {
    /// Create a new store file with a fresh salt. Fails if the path
    /// already exists.
    pub fn create(path: impl Into<PathBuf>, passphrase: &str) -> Result<Self> {
        Self::create_with_params(path, passphrase, KdfParams::default())
    }

    /// Create with explicit KDF parameters (tests use cheap ones).
    pub fn create_with_params(
        path: impl Into<PathBuf>,
        passphrase: &str,
        params: KdfParams,
    ) -> Result<Self> {
        let path = path.into();
        if path.exists() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            )));
        }

        let salt = crypto::kdf::new_salt();
        let key = crypto::derive_key(passphrase.as_bytes(), &salt, &params)?;

        let mut store = Self {
            path,
            passphrase: Zeroizing::new(passphrase.to_string()),
            salt,
            params,
            key,
            version: CURRENT_VERSION,
            blob: Blob::new(),
        };
        store.save()?;
        Ok(store)
    }

    /// Open an existing store: decrypt, parse, migrate legacy values,
    /// materialize.
    pub fn open(path: impl Into<PathBuf>, passphrase: &str) -> Result<Self> {
        let path = path.into();
        let data = fs::read(&path)?;

        let opened = crypto::decrypt(passphrase.as_bytes(), &data)?;
        let txs = wire::parse(&opened.plaintext)?;

        let mut blob = Blob::from_log(Log::from_txs(txs));
        blob.migrate_legacy_known_hosts()?;
        blob.log_mut().update_snapshot()?;

        Ok(Self {
            path,
            passphrase: Zeroizing::new(passphrase.to_string()),
            salt: opened.salt,
            params: opened.params,
            key: opened.key,
            version: opened.version,
            blob,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn blob(&self) -> &Blob {
        &self.blob
    }

    pub fn blob_mut(&mut self) -> &mut Blob {
        &mut self.blob
    }

    /// The passphrase this store was opened with; sync tries it against
    /// peer blobs before prompting.
    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    /// Serialize and encrypt the current log without touching disk, for
    /// pushing to peers.
    pub fn encrypted_payload(&self) -> std::result::Result<Vec<u8>, crypto::CryptoError> {
        let plaintext = wire::serialize(self.blob.log().txs());
        crypto::encrypt(self.version, &self.key, &self.salt, &self.params, &plaintext)
    }

    /// Persist atomically: temp file, fsync, rename.
    pub fn save(&mut self) -> Result<()> {
        let payload = self.encrypted_payload()?;
        atomic_write(&self.path, &payload)?;
        Ok(())
    }

    /// Change the passphrase. A fresh salt is derived; the old one is
    /// never reused. The caller still has to [`save`](Self::save).
    pub fn rekey(&mut self, new_passphrase: &str) -> Result<()> {
        let salt = crypto::kdf::new_salt();
        let key = crypto::derive_key(new_passphrase.as_bytes(), &salt, &self.params)?;
        self.salt = salt;
        self.key = key;
        self.passphrase = Zeroizing::new(new_passphrase.to_string());
        Ok(())
    }
}

// Write-then-rename so no reader ever sees a partial file. The temp
// file takes the target's mode, or 0600 for a new store.
fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("store");
    let tmp_path = match dir {
        Some(dir) => dir.join(format!(".{name}.tmp")),
        None => PathBuf::from(format!(".{name}.tmp")),
    };

    let mut file = fs::File::create(&tmp_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o777)
            .unwrap_or(0o600);
        file.set_permissions(fs::Permissions::from_mode(mode))?;
    }

    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}
