//! End-to-end scenarios through the production runtime against the
//! simulated server.
//!
//! Every step of every scenario is checked against the standard invariant
//! registry by [`SimWorld::settle`].

use std::time::Duration;

use parley_client::{
    ClientConfig, ClientEvent, ConnectionStatus, DeliveryState, MemoryCredentialStore, SessionStatus,
    StoredCredential, SyncState,
};
use parley_harness::{ServerConfig, SimWorld};
use parley_proto::{PushEvent, UserId};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn id(name: &str) -> UserId {
    UserId::new(name)
}

fn typing_emits(world: &SimWorld, index: usize) -> Vec<bool> {
    world
        .client(index)
        .driver()
        .emitted()
        .iter()
        .filter_map(|e| match e {
            PushEvent::Typing(payload) => Some(payload.is_typing),
            _ => None,
        })
        .collect()
}

/// Two logged-in clients, each with the other's conversation open.
async fn pair(config: ServerConfig) -> Result<(SimWorld, usize, usize), Box<dyn std::error::Error>> {
    let mut world = SimWorld::with_config(7, config);
    world.register("me");
    world.register("peer");
    let me = world.add_client();
    let peer = world.add_client();
    world.login(me, "me").await?;
    world.login(peer, "peer").await?;
    world.intent(me, ClientEvent::SelectPeer(id("peer")));
    world.intent(peer, ClientEvent::SelectPeer(id("me")));
    world.settle().await?;
    Ok((world, me, peer))
}

async fn send(world: &mut SimWorld, index: usize, text: &str) -> TestResult {
    world.intent(index, ClientEvent::EditDraft(text.to_string()));
    world.intent(index, ClientEvent::SendDraft);
    world.settle().await?;
    Ok(())
}

#[tokio::test]
async fn optimistic_send_is_confirmed_and_echo_merged() -> TestResult {
    let mut world = SimWorld::new(1);
    world.register("me");
    world.register("p42");
    let me = world.add_client();
    world.login(me, "me").await?;
    world.intent(me, ClientEvent::SelectPeer(id("p42")));
    world.settle().await?;

    world.advance(Duration::from_millis(100)).await?;
    world.client_mut(me).driver_mut().set_manual(true);
    send(&mut world, me, "hello").await?;

    let conversation = world.client(me).view().conversation.unwrap();
    assert_eq!(conversation.messages.len(), 1);
    assert_eq!(conversation.messages[0].content, "hello");
    assert_eq!(conversation.messages[0].delivery, DeliveryState::Pending);
    assert!(conversation.messages[0].local_id.is_some());

    world.env().advance(Duration::from_millis(50));
    assert!(world.client_mut(me).driver_mut().release_completion());
    world.settle().await?;

    let stored = world.server().messages()[0].id.clone();
    let entry = &world.client(me).client().conversation().unwrap().messages()[0];
    assert_eq!(entry.server_id.as_ref(), Some(&stored));
    assert_eq!(entry.delivery, DeliveryState::Confirmed);

    world.env().advance(Duration::from_millis(10));
    assert!(world.client_mut(me).driver_mut().release_push());
    world.settle().await?;

    let conversation = world.client(me).view().conversation.unwrap();
    assert_eq!(conversation.messages.len(), 1);
    assert_eq!(conversation.messages[0].delivery, DeliveryState::Confirmed);
    Ok(())
}

#[tokio::test]
async fn failed_send_restores_the_draft() -> TestResult {
    let (mut world, me, _peer) = pair(ServerConfig::default()).await?;
    world.server().set_api_offline(true);

    send(&mut world, me, "hello").await?;

    let view = world.client(me).view();
    let conversation = view.conversation.unwrap();
    assert_eq!(conversation.draft, "hello");
    assert_eq!(conversation.messages.len(), 1);
    assert_eq!(conversation.messages[0].delivery, DeliveryState::Failed);
    assert!(view.status_message.unwrap().contains("network failure"));
    assert!(world.server().messages().is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_send_can_be_retried() -> TestResult {
    let (mut world, me, peer) = pair(ServerConfig::default()).await?;
    world.server().set_api_offline(true);
    send(&mut world, me, "hello").await?;
    world.server().set_api_offline(false);

    let local_id = world.client(me).view().conversation.unwrap().messages[0].local_id.unwrap();
    world.intent(me, ClientEvent::Retry(local_id));
    world.settle().await?;

    let mine = world.client(me).view().conversation.unwrap();
    assert_eq!(mine.messages.len(), 1);
    assert_eq!(mine.messages[0].delivery, DeliveryState::Confirmed);
    let theirs = world.client(peer).view().conversation.unwrap();
    assert_eq!(theirs.messages.len(), 1);
    assert_eq!(theirs.messages[0].content, "hello");
    Ok(())
}

#[tokio::test]
async fn restore_with_expired_token_never_connects() -> TestResult {
    let mut world = SimWorld::new(2);
    let user = world.register("me");
    let token = world.server().issue_token(&user.id);
    world.server().revoke_token(&token);

    let store = MemoryCredentialStore::with(StoredCredential { token, user });
    let me = world.add_client_with(store, ClientConfig::default());
    world.intent(me, ClientEvent::Restore);
    world.settle().await?;

    let client = world.client(me);
    assert_eq!(client.client().session_status(), SessionStatus::Anonymous);
    assert!(client.client().session().store().get().is_none());
    assert_eq!(client.driver().transports_opened(), 0);
    Ok(())
}

#[tokio::test]
async fn restore_with_valid_token_connects_once() -> TestResult {
    let mut world = SimWorld::new(3);
    let user = world.register("me");
    let token = world.server().issue_token(&user.id);

    let store = MemoryCredentialStore::with(StoredCredential { token, user });
    let me = world.add_client_with(store, ClientConfig::default());
    world.intent(me, ClientEvent::Restore);
    world.settle().await?;

    assert_eq!(world.client(me).client().session_status(), SessionStatus::Authenticated);
    assert_eq!(world.client(me).client().connection_status(), ConnectionStatus::Connected);
    assert_eq!(world.server().open_connections(&id("me")), 1);
    Ok(())
}

#[tokio::test]
async fn switched_away_peer_stays_out_of_the_new_conversation() -> TestResult {
    let mut world = SimWorld::new(4);
    for name in ["me", "alice", "bob"] {
        world.register(name);
    }
    let me = world.add_client();
    let alice = world.add_client();
    world.login(me, "me").await?;
    world.login(alice, "alice").await?;
    world.intent(alice, ClientEvent::SelectPeer(id("me")));
    world.intent(me, ClientEvent::SelectPeer(id("alice")));
    world.settle().await?;

    world.intent(me, ClientEvent::SelectPeer(id("bob")));
    world.settle().await?;
    send(&mut world, alice, "are you there?").await?;

    let conversation = world.client(me).view().conversation.unwrap();
    assert_eq!(conversation.peer, id("bob"));
    assert_eq!(conversation.state, SyncState::Ready);
    assert!(conversation.messages.is_empty());
    // three session listeners plus three for the open conversation
    assert_eq!(world.client(me).client().connection().subscription_count(), 6);
    Ok(())
}

#[tokio::test]
async fn typing_burst_emits_one_start_and_one_stop() -> TestResult {
    let (mut world, me, peer) = pair(ServerConfig::default()).await?;

    let mut draft = String::new();
    for _ in 0..4 {
        draft.push('x');
        world.intent(me, ClientEvent::EditDraft(draft.clone()));
        world.advance(Duration::from_millis(300)).await?;
    }
    assert_eq!(typing_emits(&world, me), [true]);
    assert!(world.client(peer).view().conversation.unwrap().peer_typing);

    world.advance(Duration::from_millis(1100)).await?;
    assert_eq!(typing_emits(&world, me), [true, false]);
    assert!(!world.client(peer).view().conversation.unwrap().peer_typing);
    Ok(())
}

#[tokio::test]
async fn lost_typing_stop_expires_on_the_receiver() -> TestResult {
    let (mut world, me, peer) = pair(ServerConfig::default()).await?;

    world.intent(me, ClientEvent::EditDraft("x".into()));
    world.settle().await?;
    assert!(world.client(peer).view().conversation.unwrap().peer_typing);

    // the sender disappears before its timeout fires
    world.server().drop_connections(&id("me"));
    world.server().set_refuse_connections(true);
    world.advance(Duration::from_secs(6)).await?;

    assert!(!world.client(peer).view().conversation.unwrap().peer_typing);
    Ok(())
}

#[tokio::test]
async fn reconnect_keeps_a_single_connection() -> TestResult {
    let (mut world, me, _peer) = pair(ServerConfig::default()).await?;

    world.server().drop_connections(&id("me"));
    world.settle().await?;
    assert!(matches!(world.client(me).client().connection_status(), ConnectionStatus::Reconnecting { .. }));

    world.advance(Duration::from_secs(5)).await?;
    assert_eq!(world.client(me).client().connection_status(), ConnectionStatus::Connected);
    assert_eq!(world.client(me).driver().transports_opened(), 2);
    assert_eq!(world.server().open_connections(&id("me")), 1);
    Ok(())
}

#[tokio::test]
async fn new_identity_replaces_the_old_connection() -> TestResult {
    let mut world = SimWorld::new(5);
    world.register("me");
    world.register("other");
    let client = world.add_client();
    world.login(client, "me").await?;
    assert_eq!(world.server().open_connections(&id("me")), 1);

    world.intent(client, ClientEvent::Logout);
    world.settle().await?;
    world.login(client, "other").await?;

    assert_eq!(world.server().open_connections(&id("me")), 0);
    assert_eq!(world.server().open_connections(&id("other")), 1);
    Ok(())
}

#[tokio::test]
async fn relay_sent_during_reconnect_is_delivered_once() -> TestResult {
    let (mut world, me, peer) = pair(ServerConfig::default()).await?;

    world.server().drop_connections(&id("me"));
    world.settle().await?;
    send(&mut world, me, "while offline").await?;
    assert!(world.client(peer).view().conversation.unwrap().messages.is_empty());

    world.advance(Duration::from_secs(5)).await?;

    let theirs = world.client(peer).view().conversation.unwrap();
    assert_eq!(theirs.messages.len(), 1);
    assert_eq!(theirs.messages[0].content, "while offline");
    assert_eq!(world.client(me).view().conversation.unwrap().messages.len(), 1);
    Ok(())
}

#[tokio::test]
async fn both_sides_converge_on_the_same_history() -> TestResult {
    let (mut world, me, peer) = pair(ServerConfig::default()).await?;

    for n in 0..3 {
        send(&mut world, me, &format!("me {n}")).await?;
        world.advance(Duration::from_millis(250)).await?;
        send(&mut world, peer, &format!("peer {n}")).await?;
        world.advance(Duration::from_millis(250)).await?;
    }

    let contents = |index: usize| -> Vec<String> {
        world.client(index).view().conversation.unwrap().messages.into_iter().map(|m| m.content).collect()
    };
    let expected = ["me 0", "peer 0", "me 1", "peer 1", "me 2", "peer 2"];
    assert_eq!(contents(me), expected);
    assert_eq!(contents(peer), expected);
    Ok(())
}

#[tokio::test]
async fn echo_before_ack_yields_one_entry() -> TestResult {
    let config = ServerConfig { push_on_persist: true, ..ServerConfig::default() };
    let (mut world, me, peer) = pair(config).await?;
    world.client_mut(me).driver_mut().set_manual(true);

    send(&mut world, me, "hello").await?;
    // the persist-time echo overtakes the acknowledgement
    assert!(world.client_mut(me).driver_mut().release_push());
    world.settle().await?;
    assert!(world.client_mut(me).driver_mut().release_completion());
    world.client_mut(me).driver_mut().set_manual(false);
    world.settle().await?;

    let mine = world.client(me).view().conversation.unwrap();
    assert_eq!(mine.messages.len(), 1);
    assert_eq!(mine.messages[0].delivery, DeliveryState::Confirmed);
    // persist-time push and client relay reach the peer as one message
    assert_eq!(world.client(peer).view().conversation.unwrap().messages.len(), 1);
    Ok(())
}

#[tokio::test]
async fn echo_without_idempotency_keys_falls_back_to_content() -> TestResult {
    let config = ServerConfig { echo_idempotency_keys: false, ..ServerConfig::default() };
    let (mut world, me, peer) = pair(config).await?;

    send(&mut world, me, "hello").await?;
    send(&mut world, me, "hello").await?;

    let mine = world.client(me).view().conversation.unwrap();
    assert_eq!(mine.messages.len(), 2);
    assert!(mine.messages.iter().all(|m| m.delivery == DeliveryState::Confirmed));
    assert_eq!(world.client(peer).view().conversation.unwrap().messages.len(), 2);
    Ok(())
}

#[tokio::test]
async fn history_loads_in_pages() -> TestResult {
    let mut world = SimWorld::new(6);
    world.register("me");
    world.register("peer");
    for n in 0..60 {
        world.env().advance(Duration::from_secs(1));
        let (from, to) = if n % 2 == 0 { ("me", "peer") } else { ("peer", "me") };
        world.server().seed_message(&id(from), &id(to), &format!("old {n}"));
    }
    let me = world.add_client();
    world.login(me, "me").await?;
    world.intent(me, ClientEvent::SelectPeer(id("peer")));
    world.settle().await?;

    let conversation = world.client(me).view().conversation.unwrap();
    assert_eq!(conversation.messages.len(), 50);
    assert_eq!(conversation.messages[0].content, "old 10");
    assert!(conversation.has_more);

    world.intent(me, ClientEvent::LoadOlder);
    world.settle().await?;

    let conversation = world.client(me).view().conversation.unwrap();
    assert_eq!(conversation.messages.len(), 60);
    assert_eq!(conversation.messages[0].content, "old 0");
    assert!(!conversation.has_more);
    Ok(())
}

#[tokio::test]
async fn revoked_token_ends_the_session() -> TestResult {
    let (mut world, me, _peer) = pair(ServerConfig::default()).await?;
    let token = world.client(me).client().session().token().unwrap().to_string();
    world.server().revoke_token(&token);

    send(&mut world, me, "hello").await?;

    let view = world.client(me).view();
    assert_eq!(view.session, SessionStatus::Anonymous);
    assert_eq!(view.connection, ConnectionStatus::Disconnected);
    assert!(view.conversation.is_none());
    assert_eq!(world.server().open_connections(&id("me")), 0);
    Ok(())
}

#[tokio::test]
async fn presence_follows_logins_and_logouts() -> TestResult {
    let (mut world, me, peer) = pair(ServerConfig::default()).await?;
    assert_eq!(world.client(me).view().online, [id("peer")]);

    world.intent(peer, ClientEvent::Logout);
    world.settle().await?;

    assert!(world.client(me).view().online.is_empty());
    Ok(())
}

#[tokio::test]
async fn receiver_timeline_snapshot() -> TestResult {
    let (mut world, me, peer) = pair(ServerConfig::default()).await?;
    send(&mut world, me, "hi").await?;
    world.advance(Duration::from_millis(100)).await?;
    send(&mut world, peer, "yo").await?;

    let conversation = world.client(peer).snapshot().conversation.ok_or("no open conversation")?;
    insta::assert_json_snapshot!(conversation, {
        ".messages[].local_id" => "[local_id]",
        ".messages[].server_id" => "[server_id]",
        ".messages[].created_at" => "[created_at]",
        ".messages[].arrival" => "[arrival]",
    }, @r#"
    {
      "peer": "me",
      "messages": [
        {
          "local_id": "[local_id]",
          "server_id": "[server_id]",
          "sender": "me",
          "recipient": "peer",
          "content": "hi",
          "created_at": "[created_at]",
          "arrival": "[arrival]",
          "delivery": "confirmed"
        },
        {
          "local_id": "[local_id]",
          "server_id": "[server_id]",
          "sender": "peer",
          "recipient": "me",
          "content": "yo",
          "created_at": "[created_at]",
          "arrival": "[arrival]",
          "delivery": "confirmed"
        }
      ]
    }
    "#);
    Ok(())
}
