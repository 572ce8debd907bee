//! Multi-peer synchronization: pull every peer's blob, merge, push the
//! result back.
//!
//! The engine is deliberately sequential. Pulls complete before any
//! push, a push never interleaves with a pull, and per-peer failures are
//! reported and skipped rather than aborting the run. The only fatal
//! outcomes are a user interrupt during conflict resolution and a
//! snapshot that fails to rebuild after the merge.

pub mod engine;
pub mod hostkeys;
pub mod target;

pub use engine::{SyncEngine, SyncOptions, SyncReport};
pub use target::SyncTarget;

use crate::scp::{self, HostKey, ScpError, SshSession};
use crate::txlog::LogError;
use crate::ui::{PromptError, UiPort};
use std::time::Duration;
use thiserror::Error;

/// Errors that end a sync run
#[derive(Error, Debug)]
pub enum SyncError {
    /// The merged log failed to materialize. Continuing would overwrite
    /// good local state with a log we cannot read back; the caller must
    /// exit without saving.
    #[error("snapshot rebuild failed after merge, refusing to touch local state: {0}")]
    PoisonedSnapshot(LogError),

    /// The user ended or interrupted a prompt during conflict
    /// resolution; nothing has been committed.
    #[error("sync aborted: {0}")]
    Aborted(PromptError),

    /// The local store could not be serialized and encrypted for push.
    #[error("cannot prepare payload for push: {0}")]
    Payload(#[from] crate::crypto::CryptoError),

    /// A sync entry is too malformed to even name in a warning.
    #[error("sync entry {name:?} is invalid: {reason}")]
    BadEntry { name: String, reason: String },
}

/// Result type for sync runs
pub type Result<T> = std::result::Result<T, SyncError>;

/// Host-key trust decisions for one peer connection.
///
/// Known hosts pass silently, changed keys are a hard error, and new
/// hosts are put to the user. An accepted host line is held here until
/// the engine persists it into the sync entry.
pub struct HostTrust<'a> {
    known: &'a [String],
    ui: &'a mut dyn UiPort,
    accepted: Option<String>,
}

impl<'a> HostTrust<'a> {
    pub fn new(known: &'a [String], ui: &'a mut dyn UiPort) -> Self {
        Self {
            known,
            ui,
            accepted: None,
        }
    }

    pub fn verify(&mut self, key: &HostKey) -> scp::Result<()> {
        match hostkeys::check(self.known, key) {
            hostkeys::HostCheck::Known => Ok(()),
            hostkeys::HostCheck::Mismatch(reason) => Err(ScpError::HostKey(reason.to_string())),
            hostkeys::HostCheck::Unknown => {
                self.ui.info(&format!(
                    "(ssh) connected to: {} ({})\nverify pubkey: {} {}",
                    key.hostname,
                    key.remote_addr,
                    key.key_type,
                    key.fingerprint()
                ));
                match self.ui.confirm("Save this host (y/N): ") {
                    Ok(true) => {
                        self.accepted = Some(key.line());
                        Ok(())
                    }
                    Ok(false) => Err(ScpError::HostKey("host rejected by user".into())),
                    Err(err) => Err(ScpError::HostKey(format!(
                        "no answer to host trust prompt: {err}"
                    ))),
                }
            }
        }
    }

    /// The host line the user accepted during this connection, if any.
    pub fn take_accepted(&mut self) -> Option<String> {
        self.accepted.take()
    }
}

/// How blobs move to and from a peer. The production implementation is
/// scp over ssh; tests substitute an in-memory peer.
pub trait Transport {
    fn pull(&mut self, target: &SyncTarget, trust: &mut HostTrust<'_>) -> scp::Result<Vec<u8>>;

    fn push(
        &mut self,
        target: &SyncTarget,
        trust: &mut HostTrust<'_>,
        payload: &[u8],
    ) -> scp::Result<()>;
}

/// The scp-over-ssh transport.
pub struct SshTransport {
    pub timeout: Duration,
}

impl Transport for SshTransport {
    fn pull(&mut self, target: &SyncTarget, trust: &mut HostTrust<'_>) -> scp::Result<Vec<u8>> {
        let config = target.ssh_config(self.timeout);
        let session = SshSession::connect(&config, &mut |key| trust.verify(key))?;
        Ok(session.recv(&target.path)?.contents)
    }

    fn push(
        &mut self,
        target: &SyncTarget,
        trust: &mut HostTrust<'_>,
        payload: &[u8],
    ) -> scp::Result<()> {
        let config = target.ssh_config(self.timeout);
        let session = SshSession::connect(&config, &mut |key| trust.verify(key))?;
        session.send(&target.path, 0o600, payload)
    }
}
