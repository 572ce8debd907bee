//! The sync engine: update snapshot, pull all, merge, rebuild, push all.

use crate::blob::KEY_SYNC;
use crate::crypto::{self, CryptoError};
use crate::scp;
use crate::store::StoreFile;
use crate::sync::{HostTrust, Result, SyncError, SyncTarget, Transport};
use crate::txlog::{merge, wire, Conflict, Tx, TxKind};
use crate::ui::UiPort;
use std::collections::HashMap;
use std::time::Duration;

/// Knobs for one sync run.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Push the merged store back to every peer after pulling.
    pub push: bool,
    /// TCP connect and ssh operation timeout.
    pub timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            push: true,
            timeout: Duration::from_secs(30),
        }
    }
}

/// What a sync run did, for the caller to display.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub pulled: usize,
    /// Peers whose remote file does not exist yet (first upload).
    pub first_push: usize,
    /// Peers skipped on error.
    pub skipped: usize,
    pub pushed: usize,
    pub conflicts_resolved: usize,
}

/// Orchestrates the full cycle against a set of scp peers.
///
/// All interaction goes through the [`UiPort`]; all transfers go
/// through the [`Transport`]. Peers are handled strictly one at a time.
pub struct SyncEngine<'a, T: Transport> {
    store: &'a mut StoreFile,
    ui: &'a mut dyn UiPort,
    pub transport: T,
    options: SyncOptions,
}

impl<'a, T: Transport> SyncEngine<'a, T> {
    pub fn new(
        store: &'a mut StoreFile,
        ui: &'a mut dyn UiPort,
        transport: T,
        options: SyncOptions,
    ) -> Self {
        Self {
            store,
            ui,
            transport,
            options,
        }
    }

    /// Run one full sync cycle.
    ///
    /// Per-peer failures are reported and skipped. The run as a whole
    /// fails only on a user abort during conflict resolution or on the
    /// post-merge rebuild failure, in which case local state is
    /// untouched and must not be saved.
    pub fn sync(&mut self) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        self.store
            .blob_mut()
            .log_mut()
            .update_snapshot()
            .map_err(SyncError::PoisonedSnapshot)?;

        let mut targets = self.collect_syncs()?;
        let mut pending_hosts: HashMap<String, String> = HashMap::new();
        let mut pulled_logs: Vec<Vec<Tx>> = Vec::new();

        for target in &mut targets {
            self.ui.info(&format!("pull: {}", target.name));

            let mut trust = HostTrust::new(&target.known_hosts, &mut *self.ui);
            let result = self.transport.pull(target, &mut trust);
            let accepted = trust.take_accepted();

            if let Some(line) = accepted {
                pending_hosts.insert(target.uuid.clone(), line.clone());
                target.known_hosts.push(line);
            }

            let ciphertext = match result {
                Ok(ciphertext) => ciphertext,
                Err(err) if scp::is_not_found(&err) => {
                    self.ui
                        .info(&format!("{}: no remote file yet, first push", target.name));
                    report.first_push += 1;
                    continue;
                }
                Err(err) => {
                    tracing::warn!(peer = %target.name, %err, "pull failed");
                    self.ui
                        .error(&format!("error pulling {:?}: {err}", target.name));
                    report.skipped += 1;
                    continue;
                }
            };

            let plaintext = match self.decrypt_peer(&target.name, &ciphertext) {
                Some(plaintext) => plaintext,
                None => {
                    report.skipped += 1;
                    continue;
                }
            };

            match wire::parse(&plaintext) {
                Ok(txs) => {
                    report.pulled += 1;
                    pulled_logs.push(txs);
                }
                Err(err) => {
                    tracing::warn!(peer = %target.name, %err, "peer log is corrupt");
                    self.ui
                        .error(&format!("failed parsing log {:?}: {err}", target.name));
                    report.skipped += 1;
                }
            }
        }

        if let Some(merged) = self.merge_logs(pulled_logs, &mut report)? {
            let log = self.store.blob_mut().log_mut();
            log.reset_snapshot();
            log.replace(merged);
            log.update_snapshot().map_err(SyncError::PoisonedSnapshot)?;
        }

        for (uuid, line) in pending_hosts.drain() {
            self.store.blob_mut().append_known_hosts(&uuid, &line);
        }

        if !self.options.push {
            return Ok(report);
        }

        // One payload for every peer: serialize and encrypt exactly once.
        let payload = self.store.encrypted_payload()?;

        for target in &mut targets {
            self.ui.info(&format!("push: {}", target.name));

            let mut trust = HostTrust::new(&target.known_hosts, &mut *self.ui);
            let result = self.transport.push(target, &mut trust, &payload);
            let accepted = trust.take_accepted();

            if let Some(line) = accepted {
                self.store.blob_mut().append_known_hosts(&target.uuid, &line);
                target.known_hosts.push(line);
            }

            match result {
                Ok(()) => report.pushed += 1,
                Err(err) => {
                    tracing::warn!(peer = %target.name, %err, "push failed");
                    self.ui
                        .error(&format!("error pushing to {:?}: {err}", target.name));
                }
            }
        }

        Ok(report)
    }

    /// Entries flagged `sync = "true"` that resolve to a usable target.
    /// Malformed ones get a warning and are skipped.
    fn collect_syncs(&mut self) -> Result<Vec<SyncTarget>> {
        let uuids: Vec<String> = {
            let snap = self
                .store
                .blob_mut()
                .log_mut()
                .snapshot()
                .map_err(SyncError::PoisonedSnapshot)?;
            snap.iter()
                .filter(|(_, entry)| entry.scalar(KEY_SYNC) == Some("true"))
                .map(|(uuid, _)| uuid.clone())
                .collect()
        };

        let mut targets = Vec::new();
        for uuid in uuids {
            match SyncTarget::from_entry(self.store.blob_mut(), &uuid) {
                Ok(target) => targets.push(target),
                Err(err) => {
                    tracing::warn!(%uuid, %err, "skipping sync entry");
                    self.ui.error(&format!("{err} (skipping)"));
                }
            }
        }
        Ok(targets)
    }

    /// Decrypt a pulled blob, trying the store passphrase first and then
    /// prompting for a peer-specific one, with a single retry round.
    /// Returns `None` to skip the peer.
    fn decrypt_peer(&mut self, name: &str, ciphertext: &[u8]) -> Option<Vec<u8>> {
        let mut passphrase = self.store.passphrase().to_string();
        let mut prompts = 0;
        loop {
            match crypto::decrypt(passphrase.as_bytes(), ciphertext) {
                Ok(opened) => return Some(opened.plaintext),
                Err(CryptoError::WrongPassphrase) => {
                    if prompts == 2 {
                        self.ui
                            .error(&format!("wrong passphrase for {name:?}, skipping"));
                        return None;
                    }
                    prompts += 1;
                    match self.ui.prompt_hidden(&format!("{name} passphrase: ")) {
                        Ok(input) if !input.is_empty() => passphrase = input,
                        _ => {
                            self.ui.error(&format!("skipping {name:?}"));
                            return None;
                        }
                    }
                }
                Err(err) => {
                    self.ui
                        .error(&format!("failed to decode {name:?}: {err}"));
                    return None;
                }
            }
        }
    }

    /// Fold pulled logs into the local one, resolving conflicts through
    /// the ui. `None` when there was nothing to merge.
    fn merge_logs(
        &mut self,
        pulled: Vec<Vec<Tx>>,
        report: &mut SyncReport,
    ) -> Result<Option<Vec<Tx>>> {
        if pulled.is_empty() {
            return Ok(None);
        }

        let mut current = self.store.blob_mut().log_mut().txs().to_vec();
        let mut conflicts: Vec<Conflict> = Vec::new();

        for txs in &pulled {
            // Resolutions may expose further conflicts, so merge again
            // until every conflict is settled.
            loop {
                let (merged, mut found) = merge(&current, txs, std::mem::take(&mut conflicts));
                if found.iter().all(Conflict::is_resolved) {
                    current = merged;
                    conflicts = found;
                    break;
                }

                let open = found.iter().filter(|c| !c.is_resolved()).count();
                self.ui
                    .info(&format!("{open} conflicts occurred during syncing!"));

                for conflict in found.iter_mut().filter(|c| !c.is_resolved()) {
                    self.describe_conflict(conflict);
                    loop {
                        let line = self
                            .ui
                            .prompt("[R]estore item? [D]elete item? (r/R/d/D): ")
                            .map_err(SyncError::Aborted)?;
                        match line.trim() {
                            "r" | "R" => {
                                conflict.restore();
                                break;
                            }
                            "d" | "D" => {
                                conflict.delete();
                                break;
                            }
                            _ => continue,
                        }
                    }
                    report.conflicts_resolved += 1;
                }
                conflicts = found;
            }
        }

        Ok(Some(current))
    }

    fn describe_conflict(&mut self, conflict: &Conflict) {
        let what = match conflict.set_tx.kind {
            TxKind::Set => format!(
                "a value was set:\n{} = {}",
                conflict.set_tx.key, conflict.set_tx.value
            ),
            TxKind::DeleteKey => format!("key {:?} was deleted", conflict.set_tx.key),
            TxKind::AddList => format!(
                "a {} item was added:\n{}",
                conflict.set_tx.key, conflict.set_tx.value
            ),
            TxKind::DeleteList => format!("a {} item was removed", conflict.set_tx.key),
        };
        self.ui.info(&format!(
            "entry {:?} was deleted at: {}\nbut at {}, {}",
            conflict.delete_tx.uuid,
            format_time(conflict.delete_tx.time),
            format_time(conflict.set_tx.time),
            what
        ));
    }
}

fn format_time(nanos: i64) -> String {
    chrono::DateTime::from_timestamp_nanos(nanos).to_rfc3339()
}
