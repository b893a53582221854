//! Property-based tests for the message log.
//!
//! Uses proptest to drive arbitrary operation sequences and verify:
//! 1. Ids stay unique whatever arrives in whatever order.
//! 2. An inbound message with a known id never changes the log.
//! 3. Confirming a pending entry keeps the log length.
//! 4. Failed entries stay failed and carry the marker.
//! 5. A history merge loses no live entry it does not hold a copy of.

use std::collections::HashSet;

use proptest::prelude::*;
use unichat::chat::log::{DeliveryStatus, MessageLog, ReconcileOutcome};
use unichat_proto::message::{MessageCandidate, MessageDto};

#[derive(Debug, Clone)]
enum Op {
    ReplaceAll(Vec<MessageDto>),
    MergeHistory(Vec<MessageDto>),
    Append { sender: String, text: String },
    Inbound(MessageDto),
    MarkFailed(usize),
}

/// Small pools so that ids, senders and texts collide often.
fn arb_id() -> impl Strategy<Value = Option<String>> {
    prop::option::of("m[0-9]{1}")
}

fn arb_sender() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["u1".to_string(), "u2".to_string()])
}

fn arb_text() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        "hi".to_string(),
        "hello".to_string(),
        "bye".to_string(),
    ])
}

fn arb_record() -> impl Strategy<Value = MessageDto> {
    (arb_id(), arb_sender(), arb_text()).prop_map(|(id, sender, text)| {
        let dto = MessageDto::new(sender, text);
        match id {
            Some(id) => dto.with_id(id),
            None => dto,
        }
    })
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        1 => prop::collection::vec(arb_record(), 0..6).prop_map(Op::ReplaceAll),
        1 => prop::collection::vec(arb_record(), 0..6).prop_map(Op::MergeHistory),
        3 => (arb_sender(), arb_text()).prop_map(|(sender, text)| Op::Append { sender, text }),
        4 => arb_record().prop_map(Op::Inbound),
        2 => (0usize..16).prop_map(Op::MarkFailed),
    ]
}

fn assert_unique_ids(log: &MessageLog) -> Result<(), TestCaseError> {
    let mut seen = HashSet::new();
    for message in log.messages() {
        prop_assert!(seen.insert(message.id.clone()), "duplicate id {}", message.id);
        prop_assert!(log.get(&message.id).is_some());
    }
    Ok(())
}

fn apply(log: &mut MessageLog, op: Op) -> Result<(), TestCaseError> {
    match op {
        Op::ReplaceAll(records) => log.replace_all(records),
        Op::MergeHistory(records) => {
            let before: Vec<_> = log.messages().to_vec();
            log.merge_history(records);
            for message in before {
                let kept = log.get(&message.id).is_some();
                let confirmed = message.is_pending()
                    && log.messages().iter().any(|m| {
                        !m.is_optimistic
                            && m.sender_id == message.sender_id
                            && m.text == message.text
                    });
                prop_assert!(kept || confirmed, "lost {}", message.id);
            }
        }
        Op::Append { sender, text } => {
            let before = log.len();
            let id = log.append_optimistic(sender, "someone", text);
            prop_assert_eq!(log.len(), before + 1);
            let entry = log.get(&id).cloned();
            prop_assert!(entry.is_some_and(|m| m.is_pending()));
        }
        Op::Inbound(record) => {
            let Ok(candidate) = MessageCandidate::try_from(record) else {
                return Ok(());
            };
            let before = log.clone();
            let had_pending = before.messages().iter().any(|m| {
                m.is_pending() && m.sender_id == candidate.sender_id && m.text == candidate.text
            });
            match log.reconcile_or_append(candidate) {
                ReconcileOutcome::Duplicate => {
                    prop_assert_eq!(log.messages(), before.messages());
                }
                ReconcileOutcome::Reconciled { id } => {
                    prop_assert!(had_pending);
                    prop_assert_eq!(log.len(), before.len());
                    let entry = log.get(&id).cloned();
                    prop_assert!(entry.is_some_and(|m| {
                        m.status == DeliveryStatus::Delivered && !m.is_optimistic
                    }), "reconciled entry must be delivered and non-optimistic");
                }
                ReconcileOutcome::Appended { id } => {
                    prop_assert!(!had_pending);
                    prop_assert_eq!(log.len(), before.len() + 1);
                    let last = log.messages().last().map(|m| m.id.clone());
                    prop_assert_eq!(last, Some(id));
                }
            }
        }
        Op::MarkFailed(index) => {
            let Some(target) = log.messages().get(index).cloned() else {
                return Ok(());
            };
            let changed = log.mark_failed(&target.id);
            prop_assert_eq!(changed, target.status == DeliveryStatus::Sending);
            if changed {
                let entry = log.get(&target.id).cloned();
                prop_assert!(entry.is_some_and(|m| {
                    m.status == DeliveryStatus::Failed && m.text == log.failed_marker()
                }), "failed entry must carry failed status and marker");
            }
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn ids_stay_unique_under_any_sequence(ops in prop::collection::vec(arb_op(), 0..40)) {
        let mut log = MessageLog::new();
        for op in ops {
            apply(&mut log, op)?;
            assert_unique_ids(&log)?;
        }
    }

    #[test]
    fn replaying_history_frames_changes_nothing(
        records in prop::collection::vec(arb_record(), 0..10),
    ) {
        let mut log = MessageLog::new();
        log.replace_all(records.clone());
        let snapshot = log.messages().to_vec();

        for record in records.into_iter().filter(|r| r.id.is_some()) {
            let candidate = MessageCandidate::try_from(record).expect("valid record");
            prop_assert_eq!(log.reconcile_or_append(candidate), ReconcileOutcome::Duplicate);
        }
        prop_assert_eq!(log.messages(), snapshot.as_slice());
    }

    #[test]
    fn failed_entries_never_recover(
        sender in arb_sender(),
        text in arb_text(),
        echoes in prop::collection::vec(arb_record(), 0..8),
    ) {
        let mut log = MessageLog::with_failed_marker("undelivered");
        let id = log.append_optimistic(sender, "someone", text);
        prop_assert!(log.mark_failed(&id));

        for echo in echoes {
            if let Ok(candidate) = MessageCandidate::try_from(echo) {
                log.reconcile_or_append(candidate);
            }
        }
        let entry = log.get(&id).cloned().expect("failed entry kept");
        prop_assert_eq!(entry.status, DeliveryStatus::Failed);
        prop_assert_eq!(entry.text, "undelivered");
        prop_assert!(!log.mark_failed(&id));
    }
}
