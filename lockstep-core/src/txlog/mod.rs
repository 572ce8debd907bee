//! The transaction log: the store's sole source of truth.
//!
//! State is never mutated in place. Every change appends a [`Tx`] to the
//! log; the queryable [`Snapshot`] is a pure fold over the log sorted by
//! `(time, uuid, key, kind, index)`. Because the fold is deterministic,
//! two devices that end up with the same set of transactions converge on
//! the same snapshot regardless of the order they learned them in.
//!
//! The log is append-only in normal operation. The only rewrite path is
//! [`merge`], which unions two logs and surfaces delete/edit races as
//! [`Conflict`] values for the caller to resolve.

pub mod merge;
pub mod snapshot;
pub mod wire;

pub use merge::{merge, Conflict, Resolution};
pub use snapshot::{materialize, Entry, ListItem, Snapshot, Value};

use thiserror::Error;
use uuid::Uuid;

/// Errors from parsing or materializing a log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    /// The serialized log could not be parsed.
    #[error("corrupt log at byte {offset}: {reason}")]
    Corrupt { offset: usize, reason: &'static str },

    /// A read targeted a key the entry does not have.
    #[error("key not found: {key}")]
    KeyNotFound { key: String },

    /// A list transaction carries an element id that is not a decimal
    /// integer. Locally minted ids always are; this can only come from a
    /// damaged or hostile peer log.
    #[error("invalid list element id {index:?}")]
    InvalidIndex { index: String },
}

/// Result type for log operations
pub type Result<T> = std::result::Result<T, LogError>;

/// The four transaction kinds. The merge scanner pattern-matches on
/// these; there is no dynamic dispatch anywhere in the fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TxKind {
    Set,
    DeleteKey,
    AddList,
    DeleteList,
}

impl TxKind {
    pub fn wire_byte(self) -> u8 {
        match self {
            TxKind::Set => 0x01,
            TxKind::DeleteKey => 0x02,
            TxKind::AddList => 0x03,
            TxKind::DeleteList => 0x04,
        }
    }

    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(TxKind::Set),
            0x02 => Some(TxKind::DeleteKey),
            0x03 => Some(TxKind::AddList),
            0x04 => Some(TxKind::DeleteList),
            _ => None,
        }
    }
}

/// A single transaction, the log's atom.
///
/// `time` is client-local wall clock in nanoseconds and acts as the
/// primary sort key; the remaining fields are a stable tie-break. `key`
/// is empty only for an entry-level delete. `value` is meaningful for
/// `Set` and `AddList`; `index` for `AddList` (assigned) and
/// `DeleteList` (targeted).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tx {
    pub time: i64,
    pub kind: TxKind,
    pub uuid: String,
    pub key: String,
    pub value: String,
    pub index: String,
}

impl Tx {
    /// True for an entry-level delete, the only transaction that
    /// tombstones a whole entry.
    pub fn is_entry_delete(&self) -> bool {
        self.kind == TxKind::DeleteKey && self.key.is_empty()
    }
}

impl Ord for Tx {
    // (time, uuid, key, kind, index) per the fold's sort contract, with
    // value as a final tie-break so the order is total: two same-instant
    // writes of different values must land deterministically.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (
            self.time,
            &self.uuid,
            &self.key,
            self.kind.wire_byte(),
            &self.index,
            &self.value,
        )
            .cmp(&(
                other.time,
                &other.uuid,
                &other.key,
                other.kind.wire_byte(),
                &other.index,
                &other.value,
            ))
    }
}

impl PartialOrd for Tx {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// The log plus its lazily cached snapshot.
///
/// Mutating operations append a transaction and invalidate the cache;
/// [`Log::snapshot`] rebuilds it on demand.
#[derive(Debug, Default)]
pub struct Log {
    txs: Vec<Tx>,
    cached: Option<Snapshot>,
    // Last minted timestamp, so local transactions are strictly
    // increasing even when the wall clock stalls.
    clock: i64,
}

impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt an existing transaction list, e.g. one parsed from disk.
    pub fn from_txs(txs: Vec<Tx>) -> Self {
        let clock = txs.iter().map(|tx| tx.time).max().unwrap_or(0);
        Self {
            txs,
            cached: None,
            clock,
        }
    }

    pub fn txs(&self) -> &[Tx] {
        &self.txs
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// Replace the whole log, typically with a merge result. The cached
    /// snapshot is dropped.
    pub fn replace(&mut self, txs: Vec<Tx>) {
        self.clock = self.clock.max(txs.iter().map(|tx| tx.time).max().unwrap_or(0));
        self.txs = txs;
        self.cached = None;
    }

    /// Mint a fresh entry identifier. Nothing is appended to the log
    /// until the first mutation against it.
    pub fn new_entry(&mut self) -> String {
        Uuid::new_v4().to_string()
    }

    /// Set a scalar value. Overwrites any previous scalar at that key
    /// and revives a tombstoned entry.
    pub fn set(&mut self, uuid: &str, key: &str, value: &str) {
        let time = self.next_time();
        self.push(Tx {
            time,
            kind: TxKind::Set,
            uuid: uuid.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            index: String::new(),
        });
    }

    /// Append a list element; returns the assigned element id.
    ///
    /// Ids are strictly increasing per (uuid, key) over the entire log
    /// history and are never reused after a delete.
    pub fn append(&mut self, uuid: &str, key: &str, value: &str) -> String {
        let index = self.next_index(uuid, key);
        let time = self.next_time();
        self.push(Tx {
            time,
            kind: TxKind::AddList,
            uuid: uuid.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            index: index.clone(),
        });
        index
    }

    /// Delete a key. An empty `key` deletes the entire entry.
    pub fn delete_key(&mut self, uuid: &str, key: &str) {
        let time = self.next_time();
        self.push(Tx {
            time,
            kind: TxKind::DeleteKey,
            uuid: uuid.to_string(),
            key: key.to_string(),
            value: String::new(),
            index: String::new(),
        });
    }

    /// Delete a single list element by its id.
    pub fn delete_list(&mut self, uuid: &str, key: &str, index: &str) {
        let time = self.next_time();
        self.push(Tx {
            time,
            kind: TxKind::DeleteList,
            uuid: uuid.to_string(),
            key: key.to_string(),
            value: String::new(),
            index: index.to_string(),
        });
    }

    /// Rebuild the cached snapshot from the log. Idempotent.
    pub fn update_snapshot(&mut self) -> Result<()> {
        self.cached = Some(materialize(&self.txs)?);
        Ok(())
    }

    /// Drop the cached snapshot; the next read rebuilds it.
    pub fn reset_snapshot(&mut self) {
        self.cached = None;
    }

    /// The materialized state, rebuilding if necessary.
    pub fn snapshot(&mut self) -> Result<&Snapshot> {
        if self.cached.is_none() {
            self.update_snapshot()?;
        }
        Ok(self.cached.as_ref().unwrap_or(&EMPTY_SNAPSHOT))
    }

    /// Read a single value, failing with [`LogError::KeyNotFound`] when
    /// the entry or key is absent.
    pub fn get(&mut self, uuid: &str, key: &str) -> Result<Value> {
        match self.snapshot()?.get(uuid).and_then(|entry| entry.get(key)) {
            Some(value) => Ok(value.clone()),
            None => Err(LogError::KeyNotFound {
                key: key.to_string(),
            }),
        }
    }

    fn push(&mut self, tx: Tx) {
        self.txs.push(tx);
        self.cached = None;
    }

    fn next_time(&mut self) -> i64 {
        let now = wall_clock_nanos();
        let time = if now > self.clock { now } else { self.clock + 1 };
        self.clock = time;
        time
    }

    // Max element id ever minted for (uuid, key), plus one. Scans the
    // whole history so ids deleted by DELETE_LIST are not reused.
    fn next_index(&self, uuid: &str, key: &str) -> String {
        let max = self
            .txs
            .iter()
            .filter(|tx| tx.kind == TxKind::AddList && tx.uuid == uuid && tx.key == key)
            .filter_map(|tx| tx.index.parse::<u64>().ok())
            .max();
        match max {
            Some(n) => (n + 1).to_string(),
            None => "1".to_string(),
        }
    }
}

static EMPTY_SNAPSHOT: Snapshot = Snapshot::new();

fn wall_clock_nanos() -> i64 {
    let now = chrono::Utc::now();
    now.timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1000))
}
