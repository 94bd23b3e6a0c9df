// Test-specific lint overrides: property tests use unwrap freely.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::missing_panics_doc)]

//! Property tests for hub membership and fan-out.
//!
//! Random sequences of joins, leaves, and broadcasts are replayed against a
//! live hub and against a simple model. Members never drain their mailboxes,
//! so small capacities force evictions along the way.

use proptest::prelude::*;
use roomcast_relay::hub::{Hub, Member, MemberId};
use roomcast_relay::transport::Payload;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

const SLOTS: usize = 6;

#[derive(Debug, Clone)]
enum Op {
    Join(usize),
    Leave(usize),
    LeaveStranger,
    Forward,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..SLOTS).prop_map(Op::Join),
        2 => (0..SLOTS).prop_map(Op::Leave),
        1 => Just(Op::LeaveStranger),
        4 => Just(Op::Forward),
    ]
}

/// One connection slot in the model.
struct Slot {
    id: MemberId,
    mailbox: mpsc::Receiver<Payload>,
    capacity: usize,
    /// Payloads the model expects to be sitting in the mailbox.
    queued: usize,
    /// Whether the model considers this id a member.
    present: bool,
}

/// Outcome of replaying one sequence.
struct Outcome {
    expected_members: Vec<MemberId>,
    actual_members: Vec<MemberId>,
    /// (expected, actual) queued payloads per present member.
    deliveries: Vec<(usize, usize)>,
    /// Whether each departed member's mailbox reads as closed.
    departed_closed: Vec<bool>,
}

async fn replay(ops: Vec<Op>, capacities: Vec<usize>) -> Outcome {
    let (hub, handle) = Hub::spawn(64);
    let mut slots: Vec<Option<Slot>> = (0..SLOTS).map(|_| None).collect();

    for (n, op) in ops.into_iter().enumerate() {
        match op {
            Op::Join(i) => {
                if slots[i].as_ref().is_some_and(|s| s.present) {
                    continue;
                }
                let id = MemberId::new();
                let (member, mailbox) = Member::with_mailbox(id, capacities[i]);
                hub.join(member).await.unwrap();
                slots[i] = Some(Slot {
                    id,
                    mailbox,
                    capacity: capacities[i],
                    queued: 0,
                    present: true,
                });
            }
            Op::Leave(i) => {
                if let Some(slot) = slots[i].as_mut() {
                    hub.leave(slot.id).await.unwrap();
                    slot.present = false;
                }
            }
            Op::LeaveStranger => hub.leave(MemberId::new()).await.unwrap(),
            Op::Forward => {
                hub.forward(Payload::from(format!("m{n}"))).await.unwrap();
                for slot in slots.iter_mut().flatten().filter(|s| s.present) {
                    if slot.queued < slot.capacity {
                        slot.queued += 1;
                    } else {
                        slot.present = false;
                    }
                }
            }
        }
    }

    let actual_members = hub.members().await.unwrap();
    let mut expected_members: Vec<MemberId> = slots
        .iter()
        .flatten()
        .filter(|s| s.present)
        .map(|s| s.id)
        .collect();
    expected_members.sort_unstable();

    let mut deliveries = Vec::new();
    let mut departed_closed = Vec::new();
    for slot in slots.iter_mut().flatten() {
        let mut received = 0;
        while slot.mailbox.try_recv().is_ok() {
            received += 1;
        }
        if slot.present {
            deliveries.push((slot.queued, received));
        } else {
            departed_closed.push(matches!(
                slot.mailbox.try_recv(),
                Err(TryRecvError::Disconnected)
            ));
        }
    }

    handle.shutdown().await;

    Outcome {
        expected_members,
        actual_members,
        deliveries,
        departed_closed,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn membership_matches_model(
        ops in prop::collection::vec(op_strategy(), 0..80),
        capacities in prop::collection::vec(1usize..5, SLOTS),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let outcome = runtime.block_on(replay(ops, capacities));

        prop_assert_eq!(outcome.actual_members, outcome.expected_members);
        for (expected, actual) in outcome.deliveries {
            prop_assert_eq!(expected, actual);
        }
        for closed in outcome.departed_closed {
            prop_assert!(closed);
        }
    }
}
