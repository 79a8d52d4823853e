//! Property-based tests over simulated schedules.
//!
//! Each case builds a fresh world and drives it with a generated schedule.
//! [`SimWorld::settle`] checks the invariant registry after every step, so a
//! violation anywhere in the schedule fails the case.

use std::{future::Future, time::Duration};

use parley_client::{ClientEvent, DeliveryState};
use parley_harness::{ServerConfig, SimWorld};
use parley_proto::{PushEvent, UserId};
use proptest::prelude::*;

fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(future)
}

#[derive(Debug, Clone)]
enum Op {
    /// The manually delivered client sends.
    Send,
    /// The peer sends.
    PeerSends,
    /// Deliver the oldest held completion.
    ReleaseAck,
    /// Deliver the next held push event.
    ReleasePush,
    /// Let time pass.
    Wait(u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Send),
        2 => Just(Op::PeerSends),
        3 => Just(Op::ReleaseAck),
        3 => Just(Op::ReleasePush),
        1 => (0u64..3_000).prop_map(Op::Wait),
    ]
}

/// Server behaviors that still give the sender an exact or content match.
fn config_strategy() -> impl Strategy<Value = ServerConfig> {
    prop_oneof![
        Just(ServerConfig::default()),
        Just(ServerConfig { push_on_persist: true, ..ServerConfig::default() }),
        Just(ServerConfig { echo_idempotency_keys: false, ..ServerConfig::default() }),
    ]
}

async fn pair(seed: u64, config: ServerConfig) -> (SimWorld, usize, usize) {
    let mut world = SimWorld::with_config(seed, config);
    world.register("me");
    world.register("peer");
    let me = world.add_client();
    let peer = world.add_client();
    world.login(me, "me").await.unwrap();
    world.login(peer, "peer").await.unwrap();
    world.intent(me, ClientEvent::SelectPeer(UserId::new("peer")));
    world.intent(peer, ClientEvent::SelectPeer(UserId::new("me")));
    world.settle().await.unwrap();
    (world, me, peer)
}

async fn send(world: &mut SimWorld, index: usize, text: String) {
    world.intent(index, ClientEvent::EditDraft(text));
    world.intent(index, ClientEvent::SendDraft);
    world.settle().await.unwrap();
}

fn sorted_contents(world: &SimWorld, index: usize) -> Vec<String> {
    let conversation = world.client(index).view().conversation.unwrap();
    let mut contents: Vec<_> = conversation.messages.into_iter().map(|m| m.content).collect();
    contents.sort();
    contents
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whatever order acknowledgements and push events arrive in, both
    /// sides end up with exactly the persisted messages, once each.
    #[test]
    fn prop_ack_and_echo_order_never_duplicates(
        seed in any::<u64>(),
        config in config_strategy(),
        ops in prop::collection::vec(op_strategy(), 1..40),
    ) {
        block_on(async {
            let (mut world, me, peer) = pair(seed, config).await;
            world.client_mut(me).driver_mut().set_manual(true);

            let mut sent = Vec::new();
            for (n, op) in ops.iter().enumerate() {
                match op {
                    Op::Send => {
                        let text = format!("me {n}");
                        sent.push(text.clone());
                        send(&mut world, me, text).await;
                    },
                    Op::PeerSends => {
                        let text = format!("peer {n}");
                        sent.push(text.clone());
                        send(&mut world, peer, text).await;
                    },
                    Op::ReleaseAck => {
                        world.client_mut(me).driver_mut().release_completion();
                        world.settle().await.unwrap();
                    },
                    Op::ReleasePush => {
                        world.client_mut(me).driver_mut().release_push();
                        world.settle().await.unwrap();
                    },
                    Op::Wait(ms) => {
                        world.advance(Duration::from_millis(*ms)).await.unwrap();
                    },
                }
            }

            world.client_mut(me).driver_mut().set_manual(false);
            world.settle().await.unwrap();

            sent.sort();
            prop_assert_eq!(sorted_contents(&world, me), sent.clone());
            prop_assert_eq!(sorted_contents(&world, peer), sent);

            let mine = world.client(me).view().conversation.unwrap();
            prop_assert!(mine.messages.iter().all(|m| m.delivery == DeliveryState::Confirmed));
            Ok(())
        })?;
    }

    /// Every burst of keystrokes produces one `typing:true` followed by one
    /// `typing:false` once the timeout passes after the last keystroke.
    #[test]
    fn prop_typing_bursts_alternate(gaps in prop::collection::vec(0u64..2_500, 1..30)) {
        block_on(async {
            let (mut world, me, _peer) = pair(0, ServerConfig::default()).await;

            let mut draft = String::new();
            for gap in &gaps {
                world.advance(Duration::from_millis(*gap)).await.unwrap();
                draft.push('x');
                world.intent(me, ClientEvent::EditDraft(draft.clone()));
                world.settle().await.unwrap();
            }
            world.advance(Duration::from_secs(5)).await.unwrap();

            let emitted: Vec<bool> = world
                .client(me)
                .driver()
                .emitted()
                .iter()
                .filter_map(|e| match e {
                    PushEvent::Typing(payload) => Some(payload.is_typing),
                    _ => None,
                })
                .collect();

            let bursts = 1 + gaps[1..].iter().filter(|gap| **gap >= 1_000).count();
            prop_assert_eq!(emitted.len(), bursts * 2);
            for pair in emitted.chunks(2) {
                prop_assert_eq!(pair, &[true, false][..]);
            }
            Ok(())
        })?;
    }

    /// Messages from a peer other than the selected one never enter the
    /// open conversation, however selections and sends interleave.
    #[test]
    fn prop_selection_isolates_peers(
        steps in prop::collection::vec((0usize..3, any::<bool>()), 1..30),
    ) {
        block_on(async {
            let mut world = SimWorld::new(11);
            let names = ["alice", "bob", "carol"];
            world.register("me");
            for name in names {
                world.register(name);
            }
            let me = world.add_client();
            world.login(me, "me").await.unwrap();
            let mut others = Vec::new();
            for name in names {
                let index = world.add_client();
                world.login(index, name).await.unwrap();
                world.intent(index, ClientEvent::SelectPeer(UserId::new("me")));
                others.push(index);
            }
            world.settle().await.unwrap();

            for (n, (who, select)) in steps.iter().enumerate() {
                if *select {
                    world.intent(me, ClientEvent::SelectPeer(UserId::new(names[*who])));
                    world.settle().await.unwrap();
                } else {
                    send(&mut world, others[*who], format!("{} {n}", names[*who])).await;
                }
                world.advance(Duration::from_millis(100)).await.unwrap();
            }

            let Some(conversation) = world.client(me).view().conversation else {
                return Ok(());
            };
            let peer = conversation.peer.clone();
            let from_peer = world.server().conversation(&UserId::new("me"), &peer).len();
            prop_assert_eq!(conversation.messages.len(), from_peer);
            Ok(())
        })?;
    }
}
