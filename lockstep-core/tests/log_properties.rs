//! Property-based invariants of the log, the materializer, and the
//! merge.

use lockstep_core::txlog::{materialize, merge, Conflict, Log, Tx, TxKind};
use proptest::prelude::*;

fn arb_kind() -> impl Strategy<Value = TxKind> {
    prop_oneof![
        Just(TxKind::Set),
        Just(TxKind::DeleteKey),
        Just(TxKind::AddList),
        Just(TxKind::DeleteList),
    ]
}

// Small pools so generated logs actually collide on entries and keys.
fn arb_tx() -> impl Strategy<Value = Tx> {
    (
        0i64..1_000,
        arb_kind(),
        prop_oneof![Just("u1"), Just("u2"), Just("u3")],
        prop_oneof![Just(""), Just("user"), Just("pass"), Just("notes")],
        "[a-z]{0,6}",
        1u64..6,
    )
        .prop_map(|(time, kind, uuid, key, value, index)| {
            let is_list = matches!(kind, TxKind::AddList | TxKind::DeleteList);
            Tx {
                time,
                kind,
                uuid: uuid.to_string(),
                // List ops need a real key; entry-level deletes need none.
                key: if is_list && key.is_empty() {
                    "notes".to_string()
                } else {
                    key.to_string()
                },
                value,
                index: if is_list {
                    index.to_string()
                } else {
                    String::new()
                },
            }
        })
}

fn arb_log() -> impl Strategy<Value = Vec<Tx>> {
    proptest::collection::vec(arb_tx(), 0..40)
}

// Set-only logs: merges of these can never conflict.
fn arb_edit_log() -> impl Strategy<Value = Vec<Tx>> {
    proptest::collection::vec(
        arb_tx().prop_map(|mut tx| {
            tx.kind = TxKind::Set;
            tx.index = String::new();
            if tx.key.is_empty() {
                tx.key = "user".to_string();
            }
            tx
        }),
        0..30,
    )
}

fn sorted(mut txs: Vec<Tx>) -> Vec<Tx> {
    txs.sort();
    txs.dedup();
    txs
}

proptest! {
    #[test]
    fn replay_is_deterministic(txs in arb_log()) {
        prop_assert_eq!(materialize(&txs).unwrap(), materialize(&txs).unwrap());
    }

    #[test]
    fn snapshot_is_stable_under_permutation(txs in arb_log().prop_shuffle()) {
        let mut resorted = txs.clone();
        resorted.sort();
        prop_assert_eq!(materialize(&txs).unwrap(), materialize(&resorted).unwrap());
    }

    #[test]
    fn merge_is_commutative(a in arb_log(), b in arb_log()) {
        let (m1, c1) = merge(&a, &b, Vec::new());
        let (m2, c2) = merge(&b, &a, Vec::new());
        prop_assert_eq!(m1, m2);
        prop_assert_eq!(c1, c2);
    }

    #[test]
    fn merge_is_idempotent(a in arb_log()) {
        let (merged, conflicts) = merge(&a, &a, Vec::new());
        prop_assert_eq!(merged, sorted(a));
        prop_assert!(conflicts.is_empty());
    }

    #[test]
    fn merge_result_materializes_identically_on_both_sides(a in arb_log(), b in arb_log()) {
        // Whatever conflicts exist, both devices hold the same merged
        // log and therefore the same snapshot.
        let (m1, _) = merge(&a, &b, Vec::new());
        let (m2, _) = merge(&b, &a, Vec::new());
        prop_assert_eq!(materialize(&m1).unwrap(), materialize(&m2).unwrap());
    }

    #[test]
    fn merge_is_associative_for_edit_only_logs(
        a in arb_edit_log(),
        b in arb_edit_log(),
        c in arb_edit_log(),
    ) {
        let no_conflicts = |conflicts: &[Conflict]| conflicts.is_empty();

        let (ab, cs) = merge(&a, &b, Vec::new());
        prop_assert!(no_conflicts(&cs));
        let (ab_c, cs) = merge(&ab, &c, Vec::new());
        prop_assert!(no_conflicts(&cs));

        let (bc, cs) = merge(&b, &c, Vec::new());
        prop_assert!(no_conflicts(&cs));
        let (a_bc, cs) = merge(&a, &bc, Vec::new());
        prop_assert!(no_conflicts(&cs));

        prop_assert_eq!(ab_c, a_bc);
    }

    #[test]
    fn list_indices_are_strictly_monotonic(ops in proptest::collection::vec(any::<bool>(), 1..60)) {
        let mut log = Log::new();
        let uuid = log.new_entry();
        let mut minted: Vec<u64> = Vec::new();

        for append in ops {
            if append || minted.is_empty() {
                let index: u64 = log.append(&uuid, "notes", "x").parse().unwrap();
                if let Some(last) = minted.last() {
                    prop_assert!(index > *last, "index {} not above {}", index, last);
                }
                minted.push(index);
            } else {
                // Deleting must not free the id for reuse.
                let victim = minted[minted.len() / 2];
                log.delete_list(&uuid, "notes", &victim.to_string());
            }
        }
    }
}
