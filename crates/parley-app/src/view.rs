//! Observable application state.
//!
//! A [`View`] is the subset of client state a frontend needs to draw one
//! frame, copied out so drivers never borrow the client.

use chrono::{DateTime, Utc};
use parley_client::{
    Client, ClientError, ConnectionStatus, CredentialStore, DeliveryState, Environment, SessionStatus, SyncState,
};
use parley_proto::{LocalId, UserId};

/// Render snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct View {
    /// Session status.
    pub session: SessionStatus,
    /// Display name of the logged-in user.
    pub username: Option<String>,
    /// Push connection status.
    pub connection: ConnectionStatus,
    /// Open conversation.
    pub conversation: Option<ConversationView>,
    /// Users currently online.
    pub online: Vec<UserId>,
    /// Latest notification. `None` if nothing to show.
    pub status_message: Option<String>,
}

/// The open conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationView {
    /// Peer.
    pub peer: UserId,
    /// Loading state.
    pub state: SyncState,
    /// Whether the first page failed and has not been requested again.
    pub load_failed: bool,
    /// Messages in display order.
    pub messages: Vec<MessageView>,
    /// Whether the peer is typing.
    pub peer_typing: bool,
    /// Current draft.
    pub draft: String,
    /// Whether older history can be loaded.
    pub has_more: bool,
}

/// One message line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    /// Optimistic id, for retrying failed sends.
    pub local_id: Option<LocalId>,
    /// Whether the local user wrote it.
    pub mine: bool,
    /// Text.
    pub content: String,
    /// Timestamp.
    pub created_at: DateTime<Utc>,
    /// Delivery state.
    pub delivery: DeliveryState,
}

impl View {
    /// Copy the displayable state out of `client`.
    pub fn capture<E: Environment, S: CredentialStore>(client: &Client<E, S>, status_message: Option<String>) -> Self {
        let me = client.user().map(|u| u.id.clone());
        let conversation = client.conversation().map(|c| ConversationView {
            peer: c.peer().clone(),
            state: c.state(),
            load_failed: c.load_failed(),
            messages: c
                .messages()
                .iter()
                .map(|m| MessageView {
                    local_id: m.local_id,
                    mine: Some(&m.sender) == me.as_ref(),
                    content: m.content.clone(),
                    created_at: m.created_at,
                    delivery: m.delivery,
                })
                .collect(),
            peer_typing: c.typing().is_typing(),
            draft: c.draft().to_string(),
            has_more: c.has_more(),
        });

        let mut online: Vec<_> = client.presence().online().cloned().collect();
        online.sort();

        Self {
            session: client.session_status(),
            username: client.user().map(|u| u.username.clone()),
            connection: client.connection_status(),
            conversation,
            online,
            status_message,
        }
    }

    /// Text for a notification about `error`.
    pub fn describe_error(error: &ClientError) -> String {
        format!("Error: {error}")
    }
}
