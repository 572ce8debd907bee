//! End-to-end scenarios over the public API.

use lockstep_core::blob::{Blob, KEY_PASS, KEY_SYNC, KEY_SYNC_URL, KEY_USER};
use lockstep_core::crypto::{self, decrypt, derive_key, encrypt, CryptoError, KdfParams,
    CURRENT_VERSION};
use lockstep_core::scp::{self, HostKey, ScpError};
use lockstep_core::sync::{HostTrust, SyncEngine, SyncOptions, SyncTarget, Transport};
use lockstep_core::txlog::{materialize, merge, wire, Tx, TxKind};
use lockstep_core::ui::{PromptError, PromptResult, UiPort};
use lockstep_core::StoreFile;
use std::collections::VecDeque;

fn fast_params() -> KdfParams {
    KdfParams {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
        ..KdfParams::default()
    }
}

fn set(time: i64, uuid: &str, key: &str, value: &str) -> Tx {
    Tx {
        time,
        kind: TxKind::Set,
        uuid: uuid.into(),
        key: key.into(),
        value: value.into(),
        index: String::new(),
    }
}

fn entry_delete(time: i64, uuid: &str) -> Tx {
    Tx {
        time,
        kind: TxKind::DeleteKey,
        uuid: uuid.into(),
        key: String::new(),
        value: String::new(),
        index: String::new(),
    }
}

/// S1: init a store, add an entry, save, reload, read it back.
#[test]
fn s1_init_add_save_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("secrets.store");

    let mut store = StoreFile::create_with_params(&path, "p", fast_params()).unwrap();
    let uuid = store.blob_mut().new_entry("github").unwrap();
    store.blob_mut().set(&uuid, KEY_USER, "alice").unwrap();
    store.blob_mut().set_pass(&uuid, "hunter2").unwrap();
    store.save().unwrap();
    drop(store);

    let mut reloaded = StoreFile::open(&path, "p").unwrap();
    let entries = reloaded.blob_mut().search("").unwrap();
    assert_eq!(entries.len(), 1);

    let (found, name) = reloaded.blob_mut().find("github").unwrap();
    assert_eq!(name, "github");
    assert_eq!(found, uuid);
    assert_eq!(
        reloaded.blob_mut().get_scalar(&uuid, KEY_USER).unwrap(),
        "alice"
    );
    assert_eq!(
        reloaded.blob_mut().get_scalar(&uuid, KEY_PASS).unwrap(),
        "hunter2"
    );
}

/// S2: peer A deletes `x` at t=100, peer B sets `x.pass=y` at t=200.
/// One conflict; Restore keeps the entry with the new pass, Delete
/// drops it.
#[test]
fn s2_conflict_restore_and_delete() {
    let shared = vec![set(1, "x", "name", "x")];
    let mut a = shared.clone();
    a.push(entry_delete(100, "x"));
    let mut b = shared;
    b.push(set(200, "x", "pass", "y"));

    let (_, conflicts) = merge(&a, &b, Vec::new());
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].delete_tx.time, 100);
    assert_eq!(conflicts[0].set_tx.time, 200);

    // Restore
    let mut restored = conflicts.clone();
    restored[0].restore();
    let (merged, _) = merge(&a, &b, restored);
    let snap = materialize(&merged).unwrap();
    let entry = snap.get("x").expect("entry should be restored");
    assert_eq!(entry.scalar("pass"), Some("y"));

    // Delete
    let mut deleted = conflicts;
    deleted[0].delete();
    let (merged, _) = merge(&a, &b, deleted);
    let snap = materialize(&merged).unwrap();
    assert!(snap.get("x").is_none());
}

/// S3: append three notes, delete the middle one by its id, order and
/// original ids survive.
#[test]
fn s3_list_ordering() {
    let mut blob = Blob::new();
    let uuid = blob.new_entry("e").unwrap();

    let n1 = blob.add_note(&uuid, "n1").unwrap();
    let n2 = blob.add_note(&uuid, "n2").unwrap();
    let n3 = blob.add_note(&uuid, "n3").unwrap();
    blob.remove_note(&uuid, n2).unwrap();

    let notes = blob.list(&uuid, "notes");
    assert_eq!(notes.len(), 2);
    assert_eq!(notes[0], (n1, "n1".to_string()));
    assert_eq!(notes[1], (n3, "n3".to_string()));
}

/// S6: wrong passphrase is distinguishable from success, and the right
/// one still works.
#[test]
fn s6_wrong_passphrase() {
    let salt = crypto::kdf::new_salt();
    let params = fast_params();
    let key = derive_key(b"correct horse", &salt, &params).unwrap();
    let blob = encrypt(CURRENT_VERSION, &key, &salt, &params, b"battery staple").unwrap();

    assert!(matches!(
        decrypt(b"correct horse x", &blob),
        Err(CryptoError::WrongPassphrase)
    ));
    assert_eq!(
        decrypt(b"correct horse", &blob).unwrap().plaintext,
        b"battery staple"
    );
}

// --- engine scenarios over the public Transport trait ---

#[derive(Default)]
struct ScriptedUi {
    answers: VecDeque<PromptResult>,
    errors: Vec<String>,
}

impl ScriptedUi {
    fn answering(answers: &[&str]) -> Self {
        Self {
            answers: answers.iter().map(|a| Ok(a.to_string())).collect(),
            errors: Vec::new(),
        }
    }
}

impl UiPort for ScriptedUi {
    fn prompt(&mut self, _msg: &str) -> PromptResult {
        self.answers.pop_front().unwrap_or(Err(PromptError::End))
    }
    fn prompt_hidden(&mut self, msg: &str) -> PromptResult {
        self.prompt(msg)
    }
    fn info(&mut self, _msg: &str) {}
    fn error(&mut self, msg: &str) {
        self.errors.push(msg.to_string());
    }
}

struct FakePeer {
    blob: Option<Vec<u8>>,
    host_key: HostKey,
    pushes: usize,
}

impl FakePeer {
    fn empty() -> Self {
        Self {
            blob: None,
            host_key: HostKey {
                hostname: "peer.example.com".into(),
                remote_addr: "192.0.2.7:22".into(),
                key_type: "ssh-ed25519".into(),
                sha256: "aabbcc".into(),
            },
            pushes: 0,
        }
    }
}

impl Transport for FakePeer {
    fn pull(&mut self, _target: &SyncTarget, trust: &mut HostTrust<'_>) -> scp::Result<Vec<u8>> {
        trust.verify(&self.host_key)?;
        match &self.blob {
            Some(blob) => Ok(blob.clone()),
            None => Err(ScpError::Remote {
                code: 1,
                msg: "scp: store: No such file or directory".into(),
            }),
        }
    }

    fn push(
        &mut self,
        _target: &SyncTarget,
        trust: &mut HostTrust<'_>,
        payload: &[u8],
    ) -> scp::Result<()> {
        trust.verify(&self.host_key)?;
        self.pushes += 1;
        self.blob = Some(payload.to_vec());
        Ok(())
    }
}

fn store_with_peer(dir: &std::path::Path) -> (StoreFile, String) {
    let mut store = StoreFile::create_with_params(dir.join("store"), "p", fast_params()).unwrap();
    let uuid = store.blob_mut().new_entry("sync/scp/1").unwrap();
    store.blob_mut().log_mut().set(&uuid, KEY_SYNC, "true");
    store
        .blob_mut()
        .log_mut()
        .set(&uuid, KEY_SYNC_URL, "scp://alice:pw@peer.example.com/store");
    (store, uuid)
}

/// S4: first contact records the host line; a later connection with a
/// different key type for the same hostname is refused as a possible
/// mitm.
#[test]
fn s4_host_key_trust_then_mitm() {
    let dir = tempfile::tempdir().unwrap();
    let (mut store, uuid) = store_with_peer(dir.path());

    // First pull: unknown host, user accepts.
    let mut ui = ScriptedUi::answering(&["y"]);
    let mut engine = SyncEngine::new(&mut store, &mut ui, FakePeer::empty(), SyncOptions::default());
    let report = engine.sync().unwrap();
    assert_eq!(report.first_push, 1);
    assert_eq!(report.skipped, 0);

    let hosts = store.blob_mut().known_hosts(&uuid);
    assert_eq!(hosts.len(), 1);
    assert!(hosts[0].contains("ssh-ed25519"));

    // Second pull: same hostname, altered key type.
    let mut peer = FakePeer::empty();
    peer.host_key.key_type = "ssh-rsa".into();
    let mut ui = ScriptedUi::default();
    let mut engine = SyncEngine::new(
        &mut store,
        &mut ui,
        peer,
        SyncOptions {
            push: false,
            ..SyncOptions::default()
        },
    );
    let report = engine.sync().unwrap();
    assert_eq!(report.skipped, 1);
    assert!(ui.errors.iter().any(|e| e.contains("mitm")));
}

/// S5: the remote's "no such file" warning is classified as not-found,
/// does not abort the sync, and the following push creates the file.
#[test]
fn s5_first_push_creates_remote_file() {
    let dir = tempfile::tempdir().unwrap();
    let (mut store, uuid) = store_with_peer(dir.path());
    store
        .blob_mut()
        .append_known_hosts(&uuid, "peer.example.com 192.0.2.7:22 ssh-ed25519 aabbcc");

    let secret = store.blob_mut().new_entry("github").unwrap();
    store.blob_mut().set_pass(&secret, "hunter2").unwrap();

    let mut ui = ScriptedUi::default();
    let mut engine = SyncEngine::new(&mut store, &mut ui, FakePeer::empty(), SyncOptions::default());
    let report = engine.sync().unwrap();

    assert_eq!(report.first_push, 1);
    assert_eq!(report.pushed, 1);
    assert_eq!(engine.transport.pushes, 1);

    // The uploaded blob is a valid store readable with our passphrase.
    let uploaded = engine.transport.blob.clone().expect("push stored a blob");
    let opened = decrypt(b"p", &uploaded).unwrap();
    let txs = wire::parse(&opened.plaintext).unwrap();
    let snap = materialize(&txs).unwrap();
    assert!(snap
        .iter()
        .any(|(_, entry)| entry.scalar("name") == Some("github")));
}

/// Two stores, two sync rounds: both ends converge on the union.
#[test]
fn two_device_convergence() {
    let dir = tempfile::tempdir().unwrap();

    let (mut device_a, host_a) = store_with_peer(dir.path());
    device_a
        .blob_mut()
        .append_known_hosts(&host_a, "peer.example.com 192.0.2.7:22 ssh-ed25519 aabbcc");
    let entry_a = device_a.blob_mut().new_entry("from-a").unwrap();
    device_a.blob_mut().set_pass(&entry_a, "aaa").unwrap();

    // Device A pushes to the (empty) peer.
    let mut ui = ScriptedUi::default();
    let mut peer = FakePeer::empty();
    let mut engine = SyncEngine::new(&mut device_a, &mut ui, peer, SyncOptions::default());
    engine.sync().unwrap();
    peer = engine.transport;

    // Device B has its own entry and the same peer + passphrase.
    let dir_b = tempfile::tempdir().unwrap();
    let mut device_b =
        StoreFile::create_with_params(dir_b.path().join("store"), "p", fast_params()).unwrap();
    let host_b = device_b.blob_mut().new_entry("sync/scp/1").unwrap();
    device_b.blob_mut().log_mut().set(&host_b, KEY_SYNC, "true");
    device_b
        .blob_mut()
        .log_mut()
        .set(&host_b, KEY_SYNC_URL, "scp://alice:pw@peer.example.com/store");
    device_b
        .blob_mut()
        .append_known_hosts(&host_b, "peer.example.com 192.0.2.7:22 ssh-ed25519 aabbcc");
    let entry_b = device_b.blob_mut().new_entry("from-b").unwrap();
    device_b.blob_mut().set_pass(&entry_b, "bbb").unwrap();

    // B pulls A's blob, merges, pushes the union.
    let mut ui = ScriptedUi::default();
    let mut engine = SyncEngine::new(&mut device_b, &mut ui, peer, SyncOptions::default());
    let report = engine.sync().unwrap();
    assert_eq!(report.pulled, 1);
    peer = engine.transport;

    assert!(device_b.blob_mut().find("from-a").is_ok());
    assert!(device_b.blob_mut().find("from-b").is_ok());

    // A pulls again and sees B's entry.
    let mut ui = ScriptedUi::default();
    let mut engine = SyncEngine::new(&mut device_a, &mut ui, peer, SyncOptions::default());
    let report = engine.sync().unwrap();
    assert_eq!(report.pulled, 1);

    assert!(device_a.blob_mut().find("from-a").is_ok());
    assert!(device_a.blob_mut().find("from-b").is_ok());
}
