//! Lockstep Core Library
//!
//! This library provides the core functionality for the lockstep secrets
//! store: the transaction log that is the sole source of truth, the
//! snapshot materializer derived from it, the conflict-aware merge used
//! for multi-device synchronization, the encrypted container format, and
//! the scp-over-ssh sync loop.
//!
//! The log is the authoritative state. Every mutation appends a
//! transaction; the queryable key/value snapshot is a pure fold over the
//! sorted log. Two devices converge by unioning their logs and resolving
//! delete/edit conflicts interactively.

pub mod blob;
pub mod crypto;
pub mod export;
pub mod password;
pub mod scp;
pub mod store;
pub mod sync;
pub mod txlog;
pub mod ui;

pub use blob::{Blob, BlobError};
pub use crypto::{decrypt, derive_key, encrypt, CryptoError, KdfParams, SecretKey, CURRENT_VERSION};
pub use export::{export_snapshot, ExportedEntry};
pub use password::{generate_password, GeneratorConfig};
pub use scp::{ScpError, ScpFile};
pub use store::StoreFile;
pub use sync::{SyncEngine, SyncError, SyncOptions, SyncTarget};
pub use txlog::{merge, Conflict, Entry, Log, LogError, Resolution, Snapshot, Tx, TxKind, Value};
pub use ui::{PromptError, UiPort};

use thiserror::Error;

/// Result type for store-level operations
pub type Result<T> = std::result::Result<T, Error>;

/// General error type covering the whole store lifecycle
#[derive(Error, Debug)]
pub enum Error {
    #[error("crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("log error: {0}")]
    Log(#[from] txlog::LogError),

    #[error("blob error: {0}")]
    Blob(#[from] blob::BlobError),

    #[error("sync error: {0}")]
    Sync(#[from] sync::SyncError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
