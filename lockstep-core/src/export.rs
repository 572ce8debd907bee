//! Plaintext JSON export of the materialized snapshot, for backup and
//! for moving off to other tools. The caller is responsible for where
//! the decrypted output lands.

use crate::blob::{
    Blob, KEY_EMAIL, KEY_LABELS, KEY_NOTES, KEY_PASS, KEY_TWOFACTOR, KEY_URL, KEY_USER,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// One entry in the export. Sync machinery (urls, keys, host pins) is
/// deliberately left out; it is device configuration, not a secret the
/// user asked to take elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportedEntry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twofactor: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

/// Export every named entry as pretty-printed JSON, sorted by name.
pub fn export_snapshot(blob: &mut Blob) -> Result<String> {
    let mut entries = Vec::new();
    for (uuid, name) in blob.search("").map_err(Error::Blob)? {
        entries.push(ExportedEntry {
            name,
            user: blob.scalar(&uuid, KEY_USER),
            email: blob.scalar(&uuid, KEY_EMAIL),
            pass: blob.scalar(&uuid, KEY_PASS),
            url: blob.scalar(&uuid, KEY_URL),
            twofactor: blob.scalar(&uuid, KEY_TWOFACTOR),
            notes: blob
                .list(&uuid, KEY_NOTES)
                .into_iter()
                .map(|(_, note)| note)
                .collect(),
            labels: blob
                .list(&uuid, KEY_LABELS)
                .into_iter()
                .map(|(_, label)| label)
                .collect(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    serde_json::to_string_pretty(&entries).map_err(Error::Serialize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_contains_fields_and_skips_sync_config() {
        let mut blob = Blob::new();
        let id = blob.new_entry("github").unwrap();
        blob.set(&id, KEY_USER, "alice").unwrap();
        blob.set_pass(&id, "hunter2").unwrap();
        blob.add_note(&id, "recovery codes in the safe").unwrap();
        blob.add_label(&id, "dev").unwrap();

        let sync = blob.new_sync("scp", "scp://u:p@host/store").unwrap();
        blob.append_known_hosts(&sync, "host 192.0.2.1:22 ssh-ed25519 aa");

        let json = export_snapshot(&mut blob).unwrap();
        let parsed: Vec<ExportedEntry> = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.len(), 2);
        let github = parsed.iter().find(|e| e.name == "github").unwrap();
        assert_eq!(github.user.as_deref(), Some("alice"));
        assert_eq!(github.pass.as_deref(), Some("hunter2"));
        assert_eq!(github.notes, vec!["recovery codes in the safe"]);
        assert_eq!(github.labels, vec!["dev"]);

        assert!(!json.contains("known_hosts"));
        assert!(!json.contains("sync_url"));
    }
}
