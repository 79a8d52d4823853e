//! Observable state snapshots for invariant checking.
//!
//! Snapshots capture the observable state of the system at a point in time.
//! Invariants operate on snapshots rather than live state to ensure
//! consistent, atomic checks.

use chrono::{DateTime, Utc};
use parley_client::{Client, CredentialStore, DeliveryState, Environment, Message};
use parley_proto::{LocalId, ServerMessageId, UserId};
use serde::Serialize;

/// Snapshot of the entire system state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemSnapshot {
    /// Per-client state snapshots.
    pub clients: Vec<ClientSnapshot>,
}

impl SystemSnapshot {
    /// Create an empty snapshot (no clients).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a snapshot with a single client.
    pub fn single(client: ClientSnapshot) -> Self {
        Self { clients: vec![client] }
    }

    /// Create a snapshot from multiple clients.
    pub fn from_clients(clients: Vec<ClientSnapshot>) -> Self {
        Self { clients }
    }
}

/// Snapshot of a single client's observable state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientSnapshot {
    /// Client index within the simulation.
    pub id: u64,
    /// Authenticated identity. `None` if logged out.
    pub owner: Option<UserId>,
    /// Push connections the server holds open for this client.
    pub open_connections: usize,
    /// Open conversation.
    pub conversation: Option<ConversationSnapshot>,
}

impl ClientSnapshot {
    /// Capture `client`. `open_connections` comes from the transport side.
    pub fn capture<E: Environment, S: CredentialStore>(id: u64, client: &Client<E, S>, open_connections: usize) -> Self {
        let conversation = client.conversation().map(|c| ConversationSnapshot {
            peer: c.peer().clone(),
            messages: c.messages().iter().map(MessageSnapshot::from).collect(),
        });
        Self { id, owner: client.user().map(|u| u.id.clone()), open_connections, conversation }
    }
}

/// Snapshot of the open conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSnapshot {
    /// Peer.
    pub peer: UserId,
    /// Entries in display order.
    pub messages: Vec<MessageSnapshot>,
}

/// Snapshot of one message entry.
#[derive(Debug, Clone, Serialize)]
pub struct MessageSnapshot {
    /// Optimistic id.
    pub local_id: Option<LocalId>,
    /// Canonical id.
    pub server_id: Option<ServerMessageId>,
    /// Author.
    pub sender: UserId,
    /// Addressee.
    pub recipient: UserId,
    /// Text.
    pub content: String,
    /// Timestamp used for ordering.
    pub created_at: DateTime<Utc>,
    /// Arrival counter, the ordering tie-breaker.
    pub arrival: u64,
    /// Delivery state.
    pub delivery: &'static str,
}

impl From<&Message> for MessageSnapshot {
    fn from(message: &Message) -> Self {
        Self {
            local_id: message.local_id,
            server_id: message.server_id.clone(),
            sender: message.sender.clone(),
            recipient: message.recipient.clone(),
            content: message.content.clone(),
            created_at: message.created_at,
            arrival: message.arrival(),
            delivery: match message.delivery {
                DeliveryState::Pending => "pending",
                DeliveryState::Confirmed => "confirmed",
                DeliveryState::Failed => "failed",
            },
        }
    }
}
