//! Snapshot materialization: the pure fold from log to state.

use crate::txlog::{LogError, Result, Tx, TxKind};
use std::collections::BTreeMap;
use std::collections::BTreeSet;

/// A materialized value: a scalar string or an ordered list of
/// `(element id, string)` pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Scalar(String),
    List(Vec<ListItem>),
}

impl Value {
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Value::Scalar(s) => Some(s),
            Value::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ListItem]> {
        match self {
            Value::Scalar(_) => None,
            Value::List(items) => Some(items),
        }
    }
}

/// One element of a list value. Element ids are minted strictly
/// increasing per (uuid, key) and survive deletions of other elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    pub index: u64,
    pub value: String,
}

/// A materialized entry: key → value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    values: BTreeMap<String, Value>,
}

impl Entry {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn scalar(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_scalar)
    }

    pub fn list(&self, key: &str) -> Option<&[ListItem]> {
        self.values.get(key).and_then(Value::as_list)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The derived uuid → entry mapping. Never persisted; rebuilt from the
/// log on load and after any rewrite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: BTreeMap<String, Entry>,
}

impl Snapshot {
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, uuid: &str) -> Option<&Entry> {
        self.entries.get(uuid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Entry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fold a log into a snapshot.
///
/// The input is copied and sorted by `(time, uuid, key, kind, index)`
/// first, so the result depends only on the set of transactions, not on
/// the order they arrived in.
pub fn materialize(txs: &[Tx]) -> Result<Snapshot> {
    let mut sorted: Vec<&Tx> = txs.iter().collect();
    sorted.sort();

    let mut entries: BTreeMap<String, Entry> = BTreeMap::new();
    // Tombstoned entries stay in the working table (later list ops may
    // still touch them) but are dropped from the output unless a SET
    // revives them.
    let mut tombstoned: BTreeSet<String> = BTreeSet::new();

    for tx in sorted {
        match tx.kind {
            TxKind::Set => {
                tombstoned.remove(&tx.uuid);
                let entry = entries.entry(tx.uuid.clone()).or_default();
                entry
                    .values
                    .insert(tx.key.clone(), Value::Scalar(tx.value.clone()));
            }
            TxKind::AddList => {
                let index = parse_index(&tx.index)?;
                let entry = entries.entry(tx.uuid.clone()).or_default();
                let slot = entry
                    .values
                    .entry(tx.key.clone())
                    .or_insert_with(|| Value::List(Vec::new()));
                if matches!(slot, Value::Scalar(_)) {
                    *slot = Value::List(Vec::new());
                }
                if let Value::List(items) = slot {
                    let at = items.partition_point(|item| item.index <= index);
                    items.insert(
                        at,
                        ListItem {
                            index,
                            value: tx.value.clone(),
                        },
                    );
                }
            }
            TxKind::DeleteKey => {
                if tx.key.is_empty() {
                    entries.remove(&tx.uuid);
                    tombstoned.insert(tx.uuid.clone());
                } else if let Some(entry) = entries.get_mut(&tx.uuid) {
                    entry.values.remove(&tx.key);
                }
            }
            TxKind::DeleteList => {
                let index = parse_index(&tx.index)?;
                if let Some(Value::List(items)) = entries
                    .get_mut(&tx.uuid)
                    .and_then(|entry| entry.values.get_mut(&tx.key))
                {
                    items.retain(|item| item.index != index);
                }
            }
        }
    }

    for uuid in &tombstoned {
        entries.remove(uuid);
    }

    Ok(Snapshot { entries })
}

fn parse_index(raw: &str) -> Result<u64> {
    raw.parse::<u64>().map_err(|_| LogError::InvalidIndex {
        index: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(time: i64, kind: TxKind, uuid: &str, key: &str, value: &str, index: &str) -> Tx {
        Tx {
            time,
            kind,
            uuid: uuid.into(),
            key: key.into(),
            value: value.into(),
            index: index.into(),
        }
    }

    #[test]
    fn fold_is_order_independent() {
        let txs = vec![
            tx(3, TxKind::Set, "u1", "pass", "final", ""),
            tx(1, TxKind::Set, "u1", "pass", "first", ""),
            tx(2, TxKind::Set, "u1", "user", "alice", ""),
        ];
        let mut reversed = txs.clone();
        reversed.reverse();

        assert_eq!(materialize(&txs).unwrap(), materialize(&reversed).unwrap());
        let snap = materialize(&txs).unwrap();
        assert_eq!(snap.get("u1").unwrap().scalar("pass"), Some("final"));
    }

    #[test]
    fn tombstone_hides_entry_until_set_revives() {
        let mut txs = vec![
            tx(1, TxKind::Set, "u1", "user", "alice", ""),
            tx(2, TxKind::DeleteKey, "u1", "", "", ""),
        ];
        let snap = materialize(&txs).unwrap();
        assert!(snap.get("u1").is_none());

        // A list append does not revive a tombstoned entry.
        txs.push(tx(3, TxKind::AddList, "u1", "notes", "n", "1"));
        let snap = materialize(&txs).unwrap();
        assert!(snap.get("u1").is_none());

        // A set does.
        txs.push(tx(4, TxKind::Set, "u1", "user", "bob", ""));
        let snap = materialize(&txs).unwrap();
        let entry = snap.get("u1").unwrap();
        assert_eq!(entry.scalar("user"), Some("bob"));
        // The hidden append is visible again after the revive.
        assert_eq!(entry.list("notes").unwrap().len(), 1);
    }

    #[test]
    fn key_delete_removes_only_that_key() {
        let txs = vec![
            tx(1, TxKind::Set, "u1", "user", "alice", ""),
            tx(2, TxKind::Set, "u1", "pass", "secret", ""),
            tx(3, TxKind::DeleteKey, "u1", "pass", "", ""),
        ];
        let snap = materialize(&txs).unwrap();
        let entry = snap.get("u1").unwrap();
        assert_eq!(entry.scalar("user"), Some("alice"));
        assert!(entry.get("pass").is_none());
    }

    #[test]
    fn list_keeps_index_order_and_survives_middle_delete() {
        let txs = vec![
            tx(1, TxKind::AddList, "u1", "notes", "n1", "1"),
            tx(2, TxKind::AddList, "u1", "notes", "n2", "2"),
            tx(3, TxKind::AddList, "u1", "notes", "n3", "3"),
            tx(4, TxKind::DeleteList, "u1", "notes", "", "2"),
        ];
        let snap = materialize(&txs).unwrap();
        let items = snap.get("u1").unwrap().list("notes").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!((items[0].index, items[0].value.as_str()), (1, "n1"));
        assert_eq!((items[1].index, items[1].value.as_str()), (3, "n3"));
    }

    #[test]
    fn garbage_index_is_rejected() {
        let txs = vec![tx(1, TxKind::AddList, "u1", "notes", "n", "not-a-number")];
        assert!(matches!(
            materialize(&txs),
            Err(LogError::InvalidIndex { .. })
        ));
    }
}
