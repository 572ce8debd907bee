//! Host-key pinning against the `known_hosts` lines stored on a sync
//! entry.
//!
//! Each line is `<hostname> <remote-addr> <key-type> <hex-sha256>`. A
//! line whose hostname matches but whose key type or hash differs is a
//! hard error: either the server was reinstalled or someone is in the
//! middle, and only the user can tell which.

use crate::scp::HostKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCheck {
    /// Hostname seen before with the same key.
    Known,
    /// Hostname never seen; ask the user.
    Unknown,
    /// Hostname seen before with different key material.
    Mismatch(&'static str),
}

pub fn check(known: &[String], key: &HostKey) -> HostCheck {
    for line in known {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            tracing::warn!(?line, "malformed known_hosts line, ignoring");
            continue;
        }
        if fields[0] != key.hostname {
            continue;
        }
        if fields[2] != key.key_type {
            return HostCheck::Mismatch("known host's key type has changed, could be a mitm attack");
        }
        if fields[3] != key.sha256 {
            return HostCheck::Mismatch("known host's key has changed, could be a mitm attack");
        }
        return HostCheck::Known;
    }
    HostCheck::Unknown
}
