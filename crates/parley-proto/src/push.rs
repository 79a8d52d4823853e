//! Push channel envelope and payloads.
//!
//! Every push frame is a JSON text message of the form
//! `{"event": "<name>", "data": <payload>}`. Payload fields are camelCase to
//! match the server. Decoding goes through an intermediate envelope so an
//! unknown event name is reported as [`ProtocolError::UnknownEvent`] rather
//! than a generic parse failure.
//!
//! # Idempotency keys
//!
//! `send_message` and `receive_message` optionally carry `messageId` (the
//! canonical server id) and `clientMessageId` (the sender's [`LocalId`]). When
//! present they let the sender recognise its own echo exactly; when absent the
//! receiver falls back to content matching.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    errors::{ProtocolError, Result},
    ids::{LocalId, ServerMessageId, UserId},
};

/// Outbound: relay a persisted message to the recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    /// Peer the message is addressed to.
    pub recipient_id: UserId,
    /// Message text.
    pub message: String,
    /// Authenticated identity of the sender.
    pub sender_id: UserId,
    /// Canonical id returned by the persistence call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<ServerMessageId>,
    /// Sender-side optimistic id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<LocalId>,
}

/// Inbound: a message delivered by the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveMessagePayload {
    /// Author of the message.
    pub sender_id: UserId,
    /// Message text.
    pub message: String,
    /// Server timestamp. `None` if the server omitted it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Canonical id, if the server echoes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<ServerMessageId>,
    /// Sender-side optimistic id, if the server echoes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<LocalId>,
}

/// Outbound: local typing indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    /// Peer that should see the indicator.
    pub recipient_id: UserId,
    /// Whether the local user is typing.
    pub is_typing: bool,
}

/// Inbound: remote typing indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTypingPayload {
    /// User whose indicator changed.
    pub user_id: UserId,
    /// Whether that user is typing.
    pub is_typing: bool,
}

/// Inbound: presence change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    /// User whose presence changed.
    pub user_id: UserId,
}

/// Every event carried by the push channel, in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PushEvent {
    /// Outbound handshake announcing the bound identity.
    Join(UserId),
    /// Outbound message relay.
    SendMessage(SendMessagePayload),
    /// Inbound message.
    ReceiveMessage(ReceiveMessagePayload),
    /// Outbound typing indicator.
    Typing(TypingPayload),
    /// Inbound typing indicator.
    UserTyping(UserTypingPayload),
    /// Inbound: user came online.
    UserOnline(PresencePayload),
    /// Inbound: user went offline.
    UserOffline(PresencePayload),
}

/// Inbound event categories a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `receive_message`
    ReceiveMessage,
    /// `user_typing`
    UserTyping,
    /// `user_online`
    UserOnline,
    /// `user_offline`
    UserOffline,
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl PushEvent {
    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::SendMessage(_) => "send_message",
            Self::ReceiveMessage(_) => "receive_message",
            Self::Typing(_) => "typing",
            Self::UserTyping(_) => "user_typing",
            Self::UserOnline(_) => "user_online",
            Self::UserOffline(_) => "user_offline",
        }
    }

    /// Subscription category. `None` for outbound-only events.
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            Self::ReceiveMessage(_) => Some(EventKind::ReceiveMessage),
            Self::UserTyping(_) => Some(EventKind::UserTyping),
            Self::UserOnline(_) => Some(EventKind::UserOnline),
            Self::UserOffline(_) => Some(EventKind::UserOffline),
            Self::Join(_) | Self::SendMessage(_) | Self::Typing(_) => None,
        }
    }

    /// User the inbound event is about. Used for peer-scoped filtering.
    pub fn subject(&self) -> Option<&UserId> {
        match self {
            Self::ReceiveMessage(p) => Some(&p.sender_id),
            Self::UserTyping(p) => Some(&p.user_id),
            Self::UserOnline(p) | Self::UserOffline(p) => Some(&p.user_id),
            Self::Join(_) | Self::SendMessage(_) | Self::Typing(_) => None,
        }
    }

    /// Whether the event may wait in the outbound queue during a reconnect.
    ///
    /// Only message relays are worth delivering late. A stale typing
    /// indicator or a join for a previous transport would be wrong.
    pub fn is_queueable(&self) -> bool {
        matches!(self, Self::SendMessage(_))
    }

    /// Encode as a JSON text frame.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Decode a JSON text frame.
    pub fn decode(text: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| ProtocolError::MalformedEnvelope(e.to_string()))?;

        let data = envelope.data;
        let malformed = |e: serde_json::Error| ProtocolError::MalformedEnvelope(e.to_string());

        match envelope.event.as_str() {
            "join" => serde_json::from_value(data).map(Self::Join).map_err(malformed),
            "send_message" => serde_json::from_value(data).map(Self::SendMessage).map_err(malformed),
            "receive_message" => {
                serde_json::from_value(data).map(Self::ReceiveMessage).map_err(malformed)
            },
            "typing" => serde_json::from_value(data).map(Self::Typing).map_err(malformed),
            "user_typing" => serde_json::from_value(data).map(Self::UserTyping).map_err(malformed),
            "user_online" => serde_json::from_value(data).map(Self::UserOnline).map_err(malformed),
            "user_offline" => serde_json::from_value(data).map(Self::UserOffline).map_err(malformed),
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }
}
