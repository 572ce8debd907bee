//! Three-way merge of transaction logs.
//!
//! The merge unions two logs, deduplicated by content hash, and scans
//! the result in fold order looking for delete/edit races: a mutation on
//! an entry that the *other* replica has deleted, in either time order.
//! Shared history (a transaction present in both inputs) can never
//! conflict; only transactions exclusive to one side count as that
//! side's divergence.
//!
//! Conflicts are surfaced as data. The caller picks a [`Resolution`] per
//! conflict and re-runs the merge with the carried conflict set until no
//! unresolved conflicts remain; a resolution may expose a further
//! conflict that the dropped transaction was masking, so convergence can
//! take more than one round.

use crate::txlog::{wire, Tx, TxKind};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// How a delete/edit conflict is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Drop the delete; the entry and the mutation survive.
    Restore,
    /// Drop the mutation; the delete stands.
    Delete,
}

/// A delete/edit race between two replicas.
///
/// `delete_tx` is always the entry-level delete; `set_tx` is the
/// mutation that raced it (a set, a list op, or a key-level delete).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub delete_tx: Tx,
    pub set_tx: Tx,
    resolution: Option<Resolution>,
}

impl Conflict {
    /// Keep the entry: the delete is dropped from the merged log.
    pub fn restore(&mut self) {
        self.resolution = Some(Resolution::Restore);
    }

    /// Keep the delete: the mutation is dropped from the merged log.
    pub fn delete(&mut self) {
        self.resolution = Some(Resolution::Delete);
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }
}

type TxHash = [u8; 32];

fn tx_hash(tx: &Tx) -> TxHash {
    let mut buf = Vec::with_capacity(64);
    wire::encode_tx(tx, &mut buf);
    Sha256::digest(&buf).into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Local,
    Remote,
    Both,
}

fn opposed(a: Origin, b: Origin) -> bool {
    matches!(
        (a, b),
        (Origin::Local, Origin::Remote) | (Origin::Remote, Origin::Local)
    )
}

/// Merge two logs, carrying over the conflict set from earlier rounds.
///
/// Returns the merged log and the updated conflict set (carried
/// conflicts, resolved or not, plus any newly detected ones). Resolved
/// conflicts have their losing transaction excluded from the output.
pub fn merge(local: &[Tx], remote: &[Tx], conflicts: Vec<Conflict>) -> (Vec<Tx>, Vec<Conflict>) {
    let local_hashes: HashSet<TxHash> = local.iter().map(tx_hash).collect();
    let remote_hashes: HashSet<TxHash> = remote.iter().map(tx_hash).collect();

    let mut excluded: HashSet<TxHash> = HashSet::new();
    for conflict in &conflicts {
        match conflict.resolution {
            Some(Resolution::Restore) => {
                excluded.insert(tx_hash(&conflict.delete_tx));
            }
            Some(Resolution::Delete) => {
                excluded.insert(tx_hash(&conflict.set_tx));
            }
            None => {}
        }
    }

    let mut union: HashMap<TxHash, Tx> = HashMap::new();
    for tx in local.iter().chain(remote.iter()) {
        let hash = tx_hash(tx);
        if !excluded.contains(&hash) {
            union.entry(hash).or_insert_with(|| tx.clone());
        }
    }

    let mut merged: Vec<Tx> = union.values().cloned().collect();
    merged.sort();

    let origin_of = |tx: &Tx| -> Origin {
        let hash = tx_hash(tx);
        match (local_hashes.contains(&hash), remote_hashes.contains(&hash)) {
            (true, true) => Origin::Both,
            (true, false) => Origin::Local,
            _ => Origin::Remote,
        }
    };

    let known: HashSet<(TxHash, TxHash)> = conflicts
        .iter()
        .map(|c| (tx_hash(&c.delete_tx), tx_hash(&c.set_tx)))
        .collect();

    // Scan state, mirroring the materializer's tombstone handling.
    let mut tombstones: HashMap<String, (Tx, Origin)> = HashMap::new();
    let mut last_mutation: HashMap<String, (Tx, Origin)> = HashMap::new();
    // One conflict per delete per round; further races under the same
    // tombstone surface on the next round if the delete survives.
    let mut reported: HashSet<TxHash> = HashSet::new();
    let mut found: Vec<Conflict> = Vec::new();

    for tx in &merged {
        let origin = origin_of(tx);

        if tx.is_entry_delete() {
            if let Some((mutation, mutation_origin)) = last_mutation.get(&tx.uuid) {
                if mutation.time < tx.time && opposed(origin, *mutation_origin) {
                    let pair = (tx_hash(tx), tx_hash(mutation));
                    if !known.contains(&pair) && !reported.contains(&pair.0) {
                        reported.insert(pair.0);
                        found.push(Conflict {
                            delete_tx: tx.clone(),
                            set_tx: mutation.clone(),
                            resolution: None,
                        });
                    }
                }
            }
            tombstones.insert(tx.uuid.clone(), (tx.clone(), origin));
            // The delete drops every key; earlier mutations are gone.
            last_mutation.remove(&tx.uuid);
        } else {
            if let Some((delete, delete_origin)) = tombstones.get(&tx.uuid) {
                if delete.time < tx.time && opposed(*delete_origin, origin) {
                    let pair = (tx_hash(delete), tx_hash(tx));
                    if !known.contains(&pair) && !reported.contains(&pair.0) {
                        reported.insert(pair.0);
                        found.push(Conflict {
                            delete_tx: delete.clone(),
                            set_tx: tx.clone(),
                            resolution: None,
                        });
                    }
                }
            }
            if tx.kind == TxKind::Set {
                tombstones.remove(&tx.uuid);
            }
            last_mutation.insert(tx.uuid.clone(), (tx.clone(), origin));
        }
    }

    let mut out = conflicts;
    out.extend(found);
    (merged, out)
}
