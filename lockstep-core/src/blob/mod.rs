//! Conventions layered over the raw transaction log.
//!
//! The log itself knows nothing about what keys mean. This layer
//! reserves a fixed vocabulary (`name`, `user`, `pass`, `sync_url`, ...),
//! provides typed accessors for it, enforces unique entry names, and
//! implements the search used by every command that takes a query.
//!
//! Searches scan the snapshot directly. At the scale this store targets
//! (thousands of entries, not millions) a secondary index would cost
//! more in invalidation bookkeeping than it saves.

use crate::password::{generate_password, GeneratorConfig};
use crate::txlog::{Log, LogError, Value};
use thiserror::Error;

pub const KEY_NAME: &str = "name";
pub const KEY_USER: &str = "user";
pub const KEY_EMAIL: &str = "email";
pub const KEY_PASS: &str = "pass";
pub const KEY_URL: &str = "url";
pub const KEY_TWOFACTOR: &str = "twofactor";
pub const KEY_NOTES: &str = "notes";
pub const KEY_LABELS: &str = "labels";
pub const KEY_SYNC: &str = "sync";
pub const KEY_SYNC_URL: &str = "sync_url";
pub const KEY_PRIV: &str = "priv";
pub const KEY_PUB: &str = "pub";
pub const KEY_KNOWN_HOSTS: &str = "known_hosts";
pub const KEY_UPDATED: &str = "updated";

/// Keys that hold list values rather than scalars.
pub const LIST_KEYS: &[&str] = &[KEY_NOTES, KEY_LABELS, KEY_KNOWN_HOSTS];

/// Errors from the conventions layer
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("an entry named {0:?} already exists")]
    DuplicateName(String),

    #[error("query {query:?} is ambiguous: {}", candidates.join(", "))]
    Ambiguous {
        query: String,
        candidates: Vec<String>,
    },

    #[error("bad argument: {0}")]
    BadArgument(String),

    #[error(transparent)]
    Log(#[from] LogError),
}

/// Result type for blob operations
pub type Result<T> = std::result::Result<T, BlobError>;

/// The conventions layer over a [`Log`].
#[derive(Debug, Default)]
pub struct Blob {
    log: Log,
}

impl Blob {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_log(log: Log) -> Self {
        Self { log }
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut Log {
        &mut self.log
    }

    /// Create a new named entry.
    ///
    /// Names are trimmed and must be unique case-sensitively; `/` inside
    /// a name builds the pseudo-folder hierarchy the search understands.
    pub fn new_entry(&mut self, name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BlobError::BadArgument("entry name is empty".into()));
        }
        if self.uuid_by_name(name)?.is_some() {
            return Err(BlobError::DuplicateName(name.to_string()));
        }

        let uuid = self.log.new_entry();
        self.log.set(&uuid, KEY_NAME, name);
        self.stamp(&uuid);
        Ok(uuid)
    }

    /// Create a sync entry for a transport kind, named
    /// `sync/<kind>/<n>`, flagged `sync=true` with the given url.
    pub fn new_sync(&mut self, kind: &str, sync_url: &str) -> Result<String> {
        let mut n = 1;
        let name = loop {
            let candidate = format!("sync/{kind}/{n}");
            if self.uuid_by_name(&candidate)?.is_none() {
                break candidate;
            }
            n += 1;
        };

        let uuid = self.log.new_entry();
        self.log.set(&uuid, KEY_NAME, &name);
        // Raw sets: bookkeeping fields should not spam `updated`.
        self.log.set(&uuid, KEY_SYNC, "true");
        self.log.set(&uuid, KEY_SYNC_URL, sync_url);
        Ok(uuid)
    }

    /// Resolve a query to a single entry.
    ///
    /// Match order: exact, then case-insensitive exact, then substring
    /// with `/` treated as a folder separator. More than one candidate
    /// in the winning tier is an error carrying the candidate list.
    pub fn find(&mut self, query: &str) -> Result<(String, String)> {
        let matches = self.search(query)?;
        match matches.len() {
            0 => Err(BlobError::KeyNotFound(query.to_string())),
            1 => Ok(matches.into_iter().next().unwrap_or_default()),
            _ => Err(BlobError::Ambiguous {
                query: query.to_string(),
                candidates: matches.into_iter().map(|(_, name)| name).collect(),
            }),
        }
    }

    /// All `(uuid, name)` pairs in the best matching tier for a query.
    /// An empty query lists every named entry.
    pub fn search(&mut self, query: &str) -> Result<Vec<(String, String)>> {
        let named = self.named_entries()?;
        if query.is_empty() {
            return Ok(named);
        }

        let exact: Vec<_> = named
            .iter()
            .filter(|(_, name)| name == query)
            .cloned()
            .collect();
        if !exact.is_empty() {
            return Ok(exact);
        }

        let query_lower = query.to_lowercase();
        let ci_exact: Vec<_> = named
            .iter()
            .filter(|(_, name)| name.to_lowercase() == query_lower)
            .cloned()
            .collect();
        if !ci_exact.is_empty() {
            return Ok(ci_exact);
        }

        Ok(named
            .into_iter()
            .filter(|(_, name)| folder_match(&query_lower, &name.to_lowercase()))
            .collect())
    }

    /// All entries that carry every one of the given labels.
    pub fn search_labels(&mut self, labels: &[&str]) -> Result<Vec<(String, String)>> {
        let mut out = Vec::new();
        for (uuid, name) in self.named_entries()? {
            let have = self.list(&uuid, KEY_LABELS);
            if labels
                .iter()
                .all(|want| have.iter().any(|(_, label)| label == want))
            {
                out.push((uuid, name));
            }
        }
        Ok(out)
    }

    // --- scalar accessors ---

    pub fn name(&mut self, uuid: &str) -> Option<String> {
        self.scalar(uuid, KEY_NAME)
    }

    pub fn scalar(&mut self, uuid: &str, key: &str) -> Option<String> {
        self.log
            .snapshot()
            .ok()
            .and_then(|snap| snap.get(uuid))
            .and_then(|entry| entry.scalar(key))
            .map(str::to_string)
    }

    /// Read a scalar, failing when the entry or key is absent.
    pub fn get_scalar(&mut self, uuid: &str, key: &str) -> Result<String> {
        self.scalar(uuid, key)
            .ok_or_else(|| BlobError::KeyNotFound(key.to_string()))
    }

    /// List elements as `(element id, value)` pairs; empty when absent.
    pub fn list(&mut self, uuid: &str, key: &str) -> Vec<(u64, String)> {
        self.log
            .snapshot()
            .ok()
            .and_then(|snap| snap.get(uuid))
            .and_then(|entry| entry.list(key))
            .map(|items| {
                items
                    .iter()
                    .map(|item| (item.index, item.value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    // --- typed mutations (all stamp `updated`) ---

    /// Set a value on an entry. List keys reject scalar sets.
    pub fn set(&mut self, uuid: &str, key: &str, value: &str) -> Result<()> {
        if key.is_empty() {
            return Err(BlobError::BadArgument("key is empty".into()));
        }
        if key == KEY_UPDATED {
            return Err(BlobError::BadArgument(
                "updated is maintained automatically".into(),
            ));
        }
        if LIST_KEYS.contains(&key) {
            return Err(BlobError::BadArgument(format!(
                "{key} holds a list; use the list commands"
            )));
        }
        if key == KEY_PASS {
            return self.set_pass(uuid, value);
        }
        if key == KEY_TWOFACTOR && !value.starts_with("otpauth://") {
            return Err(BlobError::BadArgument(
                "twofactor must be an otpauth:// uri".into(),
            ));
        }
        if key == KEY_NAME {
            return self.rename(uuid, value);
        }

        self.log.set(uuid, key, value);
        self.stamp(uuid);
        Ok(())
    }

    /// Set the password; an empty value invokes the generator.
    pub fn set_pass(&mut self, uuid: &str, value: &str) -> Result<()> {
        let pass = if value.is_empty() {
            generate_password(&GeneratorConfig::default())
                .map_err(|e| BlobError::BadArgument(e.to_string()))?
        } else {
            value.to_string()
        };
        self.log.set(uuid, KEY_PASS, &pass);
        self.stamp(uuid);
        Ok(())
    }

    /// Rename an entry, preserving name uniqueness.
    pub fn rename(&mut self, uuid: &str, new_name: &str) -> Result<()> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(BlobError::BadArgument("entry name is empty".into()));
        }
        if let Some(existing) = self.uuid_by_name(new_name)? {
            if existing != uuid {
                return Err(BlobError::DuplicateName(new_name.to_string()));
            }
        }
        self.log.set(uuid, KEY_NAME, new_name);
        self.stamp(uuid);
        Ok(())
    }

    /// Delete an entry outright (entry-level tombstone).
    pub fn delete(&mut self, uuid: &str) {
        self.log.delete_key(uuid, "");
    }

    /// Delete a single key from an entry.
    pub fn delete_value(&mut self, uuid: &str, key: &str) -> Result<()> {
        if self.scalar(uuid, key).is_none() && self.list(uuid, key).is_empty() {
            return Err(BlobError::KeyNotFound(key.to_string()));
        }
        self.log.delete_key(uuid, key);
        self.stamp(uuid);
        Ok(())
    }

    pub fn add_note(&mut self, uuid: &str, note: &str) -> Result<u64> {
        self.add_list(uuid, KEY_NOTES, note)
    }

    pub fn add_label(&mut self, uuid: &str, label: &str) -> Result<u64> {
        let label = label.trim();
        if label.is_empty() || label.contains(char::is_whitespace) {
            return Err(BlobError::BadArgument(
                "labels are single non-empty words".into(),
            ));
        }
        self.add_list(uuid, KEY_LABELS, label)
    }

    pub fn remove_note(&mut self, uuid: &str, index: u64) -> Result<()> {
        self.remove_list(uuid, KEY_NOTES, index)
    }

    pub fn remove_label(&mut self, uuid: &str, label: &str) -> Result<()> {
        let found = self
            .list(uuid, KEY_LABELS)
            .into_iter()
            .find(|(_, value)| value == label);
        match found {
            Some((index, _)) => self.remove_list(uuid, KEY_LABELS, index),
            None => Err(BlobError::KeyNotFound(label.to_string())),
        }
    }

    fn add_list(&mut self, uuid: &str, key: &str, value: &str) -> Result<u64> {
        let index = self.log.append(uuid, key, value);
        self.stamp(uuid);
        // Minted locally, always numeric.
        index.parse().map_err(|_| {
            BlobError::Log(LogError::InvalidIndex { index })
        })
    }

    fn remove_list(&mut self, uuid: &str, key: &str, index: u64) -> Result<()> {
        let exists = self
            .list(uuid, key)
            .iter()
            .any(|(id, _)| *id == index);
        if !exists {
            return Err(BlobError::KeyNotFound(format!("{key}[{index}]")));
        }
        self.log.delete_list(uuid, key, &index.to_string());
        self.stamp(uuid);
        Ok(())
    }

    // --- sync bookkeeping (raw, no `updated` stamp) ---

    /// Record an accepted host line against a sync entry.
    pub fn append_known_hosts(&mut self, uuid: &str, line: &str) {
        self.log.append(uuid, KEY_KNOWN_HOSTS, line);
    }

    pub fn known_hosts(&mut self, uuid: &str) -> Vec<String> {
        self.list(uuid, KEY_KNOWN_HOSTS)
            .into_iter()
            .map(|(_, line)| line)
            .collect()
    }

    /// Seconds-since-epoch of the last user mutation, when recorded.
    pub fn updated(&mut self, uuid: &str) -> Option<i64> {
        self.scalar(uuid, KEY_UPDATED)
            .and_then(|raw| raw.parse().ok())
    }

    /// Migrate legacy `known_hosts` values stored as one newline-joined
    /// scalar into the list encoding. Runs once per load; a no-op on
    /// stores that were always list-valued.
    pub fn migrate_legacy_known_hosts(&mut self) -> Result<()> {
        let mut legacy: Vec<(String, Vec<String>)> = Vec::new();
        {
            let snap = self.log.snapshot()?;
            for (uuid, entry) in snap.iter() {
                if let Some(Value::Scalar(joined)) = entry.get(KEY_KNOWN_HOSTS) {
                    let lines = joined
                        .split('\n')
                        .filter(|line| !line.trim().is_empty())
                        .map(str::to_string)
                        .collect();
                    legacy.push((uuid.clone(), lines));
                }
            }
        }

        for (uuid, lines) in legacy {
            tracing::info!(%uuid, "migrating newline-joined known_hosts to list form");
            self.log.delete_key(&uuid, KEY_KNOWN_HOSTS);
            for line in lines {
                self.log.append(&uuid, KEY_KNOWN_HOSTS, &line);
            }
        }
        Ok(())
    }

    // --- internals ---

    fn named_entries(&mut self) -> Result<Vec<(String, String)>> {
        let snap = self.log.snapshot()?;
        Ok(snap
            .iter()
            .filter_map(|(uuid, entry)| {
                entry
                    .scalar(KEY_NAME)
                    .map(|name| (uuid.clone(), name.to_string()))
            })
            .collect())
    }

    fn uuid_by_name(&mut self, name: &str) -> Result<Option<String>> {
        Ok(self
            .named_entries()?
            .into_iter()
            .find(|(_, candidate)| candidate == name)
            .map(|(uuid, _)| uuid))
    }

    fn stamp(&mut self, uuid: &str) {
        // Raw set: routing through set() would recurse into another
        // `updated` write.
        let now = chrono::Utc::now().timestamp();
        self.log.set(uuid, KEY_UPDATED, &now.to_string());
    }
}

// Folder-aware substring match. Both sides are already lowercased; the
// query's `/`-segments must match a consecutive run of the name's
// segments, each by substring.
fn folder_match(query: &str, name: &str) -> bool {
    let q: Vec<&str> = query.split('/').collect();
    let n: Vec<&str> = name.split('/').collect();
    if q.len() > n.len() {
        return false;
    }
    (0..=n.len() - q.len()).any(|start| {
        q.iter()
            .enumerate()
            .all(|(i, seg)| n[start + i].contains(seg))
    })
}
