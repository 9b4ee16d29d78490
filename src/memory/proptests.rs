//! Property-based tests for the conversation log

use super::*;
use crate::persistence::{MemoryLocalStore, PersistenceMirror};
use proptest::prelude::*;
use std::sync::Arc;

fn empty_log() -> ConversationLog {
    let mirror = PersistenceMirror::local_only(Arc::new(MemoryLocalStore::new()));
    ConversationLog::new(Arc::new(mirror))
}

#[derive(Debug, Clone)]
enum Op {
    Append(bool),
    Exchange,
    Delete(u64),
    Truncate(u64),
    Trim(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<bool>().prop_map(Op::Append),
        Just(Op::Exchange),
        (0u64..40).prop_map(Op::Delete),
        (0u64..40).prop_map(Op::Truncate),
        (0usize..25).prop_map(Op::Trim),
    ]
}

fn apply(log: &mut ConversationLog, op: &Op) {
    match op {
        Op::Append(user) => {
            let role = if *user { Role::User } else { Role::Assistant };
            log.append(role, "x").unwrap();
        }
        Op::Exchange => {
            log.append_exchange("hi").unwrap();
        }
        Op::Delete(i) => {
            log.delete(*i).unwrap();
        }
        Op::Truncate(t) => {
            log.truncate_from(*t).unwrap();
        }
        Op::Trim(limit) => {
            log.trim(*limit).unwrap();
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_indices_strictly_increase(ops in prop::collection::vec(arb_op(), 0..60)) {
        let mut log = empty_log();
        let mut last_allocated: Option<u64> = None;

        for op in &ops {
            let before = log.next_index();
            apply(&mut log, op);
            let after = log.next_index();

            match op {
                Op::Append(_) => prop_assert_eq!(after, before + 1),
                Op::Exchange => prop_assert_eq!(after, before + 2),
                _ => prop_assert_eq!(after, before),
            }
            if after > before {
                if let Some(prev) = last_allocated {
                    prop_assert!(before > prev);
                }
                last_allocated = Some(after - 1);
            }

            let indices: Vec<u64> = log.turns().iter().map(|t| t.index).collect();
            prop_assert!(indices.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(indices.iter().all(|&i| i < log.next_index()));
        }
    }

    #[test]
    fn prop_trim_idempotent(count in 0usize..40, limit in 0usize..30) {
        let mut log = empty_log();
        for _ in 0..count {
            log.append(Role::User, "x").unwrap();
        }
        log.trim(limit).unwrap();

        let expected = if count > limit { count.min(RETAINED_AFTER_TRIM) } else { count };
        prop_assert_eq!(log.len(), expected);

        let once: Vec<Turn> = log.turns().to_vec();
        if once.len() <= RETAINED_AFTER_TRIM {
            prop_assert_eq!(log.trim(limit).unwrap(), 0);
            prop_assert_eq!(log.turns(), once.as_slice());
        }
    }

    #[test]
    fn prop_rewind_then_append_continues_counter(count in 1u64..30, t in 0u64..30) {
        let mut log = empty_log();
        for _ in 0..count {
            log.append(Role::User, "x").unwrap();
        }
        let counter = log.next_index();
        log.truncate_from(t).unwrap();
        prop_assert!(log.turns().iter().all(|turn| turn.index < t));
        prop_assert_eq!(log.append(Role::User, "y").unwrap(), counter);
    }
}
