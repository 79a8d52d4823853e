//! Checks registered by [`InvariantRegistry::standard`](super::InvariantRegistry::standard).

use std::collections::HashSet;

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// Conversation entries are sorted by timestamp, ties by arrival.
pub struct ChronologicalOrder;

impl Invariant for ChronologicalOrder {
    fn name(&self) -> &'static str {
        "chronological_order"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let Some(conversation) = &client.conversation else {
                continue;
            };
            for window in conversation.messages.windows(2) {
                let (a, b) = (&window[0], &window[1]);
                if (a.created_at, a.arrival) > (b.created_at, b.arrival) {
                    return Err(Violation::on(
                        self.name(),
                        client,
                        format!(
                            "{:?}@{} (arrival {}) listed before {:?}@{} (arrival {})",
                            a.content, a.created_at, a.arrival, b.content, b.created_at, b.arrival
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// No two entries share a server id or a local id.
///
/// A duplicate means an echo, a replayed history page or a relayed copy was
/// appended instead of merged.
pub struct NoDuplicateMessages;

impl Invariant for NoDuplicateMessages {
    fn name(&self) -> &'static str {
        "no_duplicate_messages"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let Some(conversation) = &client.conversation else {
                continue;
            };
            let mut server_ids = HashSet::new();
            let mut local_ids = HashSet::new();
            for message in &conversation.messages {
                if let Some(id) = &message.server_id {
                    if !server_ids.insert(id) {
                        return Err(Violation::on(self.name(), client, format!("server id {id} appears twice")));
                    }
                }
                if let Some(id) = message.local_id {
                    if !local_ids.insert(id) {
                        return Err(Violation::on(self.name(), client, format!("local id {id} appears twice")));
                    }
                }
            }
        }
        Ok(())
    }
}

/// A client holds at most one open push connection.
pub struct SingleConnection;

impl Invariant for SingleConnection {
    fn name(&self) -> &'static str {
        "single_connection"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            if client.open_connections > 1 {
                let message = format!("{} open connections", client.open_connections);
                return Err(Violation::on(self.name(), client, message));
            }
        }
        Ok(())
    }
}

/// Every entry of a conversation is between its owner and its peer.
pub struct PeerIsolation;

impl Invariant for PeerIsolation {
    fn name(&self) -> &'static str {
        "peer_isolation"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let (Some(owner), Some(conversation)) = (&client.owner, &client.conversation) else {
                continue;
            };
            let peer = &conversation.peer;
            for message in &conversation.messages {
                let outgoing = message.sender == *owner && message.recipient == *peer;
                let incoming = message.sender == *peer && message.recipient == *owner;
                if !outgoing && !incoming {
                    return Err(Violation::on(
                        self.name(),
                        client,
                        format!("holds {} to {}: {:?}", message.sender, message.recipient, message.content),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Confirmed entries sent from this client carry their canonical id.
///
/// Received entries may lack one when the server omits it.
pub struct ConfirmedHaveServerIds;

impl Invariant for ConfirmedHaveServerIds {
    fn name(&self) -> &'static str {
        "confirmed_have_server_ids"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let Some(conversation) = &client.conversation else {
                continue;
            };
            if let Some(message) =
                conversation.messages.iter().find(|m| m.local_id.is_some() && m.delivery == "confirmed" && m.server_id.is_none())
            {
                return Err(Violation::on(
                    self.name(),
                    client,
                    format!("confirmed {:?} has no server id", message.content),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use parley_proto::{LocalId, ServerMessageId, UserId};

    use super::*;
    use crate::{ClientSnapshot, ConversationSnapshot, MessageSnapshot};

    fn entry(sender: &str, recipient: &str, secs: i64, arrival: u64) -> MessageSnapshot {
        MessageSnapshot {
            local_id: None,
            server_id: Some(ServerMessageId::new(format!("m{arrival}"))),
            sender: UserId::new(sender),
            recipient: UserId::new(recipient),
            content: format!("text {arrival}"),
            created_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            arrival,
            delivery: "confirmed",
        }
    }

    fn state(messages: Vec<MessageSnapshot>) -> SystemSnapshot {
        SystemSnapshot::single(ClientSnapshot {
            id: 0,
            owner: Some(UserId::new("me")),
            open_connections: 1,
            conversation: Some(ConversationSnapshot { peer: UserId::new("peer"), messages }),
        })
    }

    #[test]
    fn out_of_order_entries_violate_ordering() {
        let ok = state(vec![entry("me", "peer", 1, 0), entry("peer", "me", 1, 1), entry("me", "peer", 2, 2)]);
        assert!(ChronologicalOrder.check(&ok).is_ok());

        let bad = state(vec![entry("me", "peer", 2, 0), entry("peer", "me", 1, 1)]);
        assert!(ChronologicalOrder.check(&bad).is_err());
    }

    #[test]
    fn repeated_server_id_is_a_duplicate() {
        let mut twin = entry("peer", "me", 2, 1);
        twin.server_id = Some(ServerMessageId::new("m0"));
        let bad = state(vec![entry("peer", "me", 1, 0), twin]);
        assert!(NoDuplicateMessages.check(&bad).is_err());
    }

    #[test]
    fn repeated_local_id_is_a_duplicate() {
        let mut a = entry("me", "peer", 1, 0);
        let mut b = entry("me", "peer", 1, 1);
        a.local_id = Some(LocalId(9));
        b.local_id = Some(LocalId(9));
        assert!(NoDuplicateMessages.check(&state(vec![a, b])).is_err());
    }

    #[test]
    fn third_party_message_breaks_isolation() {
        let bad = state(vec![entry("me", "peer", 1, 0), entry("stranger", "me", 2, 1)]);
        let violation = PeerIsolation.check(&bad).unwrap_err();
        assert_eq!(violation.invariant, "peer_isolation");
        assert_eq!(violation.peer, Some(UserId::new("peer")));
    }

    #[test]
    fn second_connection_is_flagged() {
        let mut bad = state(Vec::new());
        bad.clients[0].open_connections = 2;
        assert!(SingleConnection.check(&bad).is_err());
    }

    #[test]
    fn confirmed_without_id_is_flagged() {
        let mut sent = entry("me", "peer", 1, 0);
        sent.local_id = Some(LocalId(1));
        sent.server_id = None;
        assert!(ConfirmedHaveServerIds.check(&state(vec![sent.clone()])).is_err());

        sent.delivery = "pending";
        assert!(ConfirmedHaveServerIds.check(&state(vec![sent])).is_ok());

        let mut received = entry("peer", "me", 1, 0);
        received.server_id = None;
        assert!(ConfirmedHaveServerIds.check(&state(vec![received])).is_ok());
    }
}
