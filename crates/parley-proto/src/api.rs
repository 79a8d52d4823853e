//! Persistence API requests and responses.
//!
//! [`ApiRequest`] describes a call independently of any HTTP client: method,
//! path relative to the API base, whether it needs the bearer token, and the
//! JSON body. [`ApiRequest::decode_response`] turns a successful response body
//! into the typed [`ApiResponse`] for that call, so every transport decodes
//! the same way.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    errors::{ProtocolError, Result},
    ids::{LocalId, ServerMessageId, UserId},
};

/// HTTP method of a persistence call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
}

/// Coarse presence tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// Connected to the push channel.
    Online,
    /// Connected but idle.
    Away,
    /// Not connected.
    #[default]
    #[serde(other)]
    Offline,
}

/// User record as returned by the persistence API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Account id. The server sends `_id`; older endpoints send `id`.
    #[serde(rename = "_id", alias = "id")]
    pub id: UserId,
    /// Display name.
    pub username: String,
    /// Contact address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Presence at the time of the response.
    #[serde(default)]
    pub status: UserStatus,
}

/// Reference to a user inside a message: either a bare id or a populated
/// record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserRef {
    /// Bare id.
    Id(UserId),
    /// Populated record.
    Populated {
        /// Account id.
        #[serde(rename = "_id")]
        id: UserId,
        /// Display name, if populated.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
}

impl UserRef {
    /// Referenced account id.
    pub fn id(&self) -> &UserId {
        match self {
            Self::Id(id) | Self::Populated { id, .. } => id,
        }
    }
}

/// Login form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Account email.
    pub email: String,
    /// Account password.
    pub password: String,
}

/// Signup form.
///
/// `confirm_password` is checked locally and never sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupForm {
    /// Requested display name.
    pub username: String,
    /// Account email.
    pub email: String,
    /// Account password.
    pub password: String,
    /// Must equal `password`.
    #[serde(skip)]
    pub confirm_password: String,
}

/// Fields of a profile update. `None` fields are left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    /// New display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// New presence tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<UserStatus>,
}

/// Message record as stored by the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    /// Canonical id.
    #[serde(rename = "_id")]
    pub id: ServerMessageId,
    /// Author.
    pub sender: UserRef,
    /// Addressee.
    pub recipient: UserRef,
    /// Message text.
    pub content: String,
    /// Server timestamp.
    pub created_at: DateTime<Utc>,
    /// Sender-side optimistic id, if the server stored it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<LocalId>,
}

/// Pagination metadata of a history page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// 1-based page number.
    pub page: u32,
    /// Page size.
    pub limit: u32,
    /// Whether older messages exist.
    pub has_more: bool,
}

/// Response body of login and signup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    /// Authenticated account.
    pub user: User,
    /// Bearer token.
    pub token: String,
}

#[derive(Deserialize)]
struct ProfileBody {
    user: User,
}

#[derive(Deserialize)]
struct HistoryBody {
    messages: Vec<WireMessage>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Deserialize)]
struct SendBody {
    data: SentMessage,
}

/// One page of conversation history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPage {
    /// Peer the history belongs to.
    pub peer: UserId,
    /// Page number that was requested.
    pub page: u32,
    /// Messages, in server order.
    pub messages: Vec<WireMessage>,
    /// Whether an older page exists.
    pub has_more: bool,
}

/// Acknowledgement of a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    /// Canonical id assigned by the server.
    #[serde(rename = "_id")]
    pub id: ServerMessageId,
    /// Server timestamp, if returned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Persistence calls made by the synchronization core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiRequest {
    /// `POST /auth/login`
    Login(Credentials),
    /// `POST /auth/signup`
    Signup(SignupForm),
    /// `GET /auth/me`
    FetchProfile,
    /// `POST /auth/logout`
    Logout,
    /// `PUT /auth/profile`
    UpdateProfile(ProfileUpdate),
    /// `GET /messages/conversation/{peer}?page=&limit=`
    History {
        /// Conversation peer.
        peer: UserId,
        /// 1-based page.
        page: u32,
        /// Page size.
        limit: u32,
    },
    /// `POST /messages/send`
    SendMessage {
        /// Addressee.
        recipient: UserId,
        /// Message text.
        content: String,
        /// Optimistic id, sent as the idempotency key.
        client_message_id: LocalId,
    },
}

/// Decoded body of a successful persistence call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiResponse {
    /// Login or signup succeeded.
    Authenticated(AuthResponse),
    /// Profile fetched or updated.
    Profile(User),
    /// Remote session invalidated.
    LoggedOut,
    /// History page.
    History(HistoryPage),
    /// Message persisted.
    MessageSent(SentMessage),
}

impl ApiRequest {
    /// HTTP method.
    pub fn method(&self) -> Method {
        match self {
            Self::FetchProfile | Self::History { .. } => Method::Get,
            Self::UpdateProfile(_) => Method::Put,
            Self::Login(_) | Self::Signup(_) | Self::Logout | Self::SendMessage { .. } => {
                Method::Post
            },
        }
    }

    /// Path relative to the API base, including the query string.
    pub fn path(&self) -> String {
        match self {
            Self::Login(_) => "/auth/login".to_string(),
            Self::Signup(_) => "/auth/signup".to_string(),
            Self::FetchProfile => "/auth/me".to_string(),
            Self::Logout => "/auth/logout".to_string(),
            Self::UpdateProfile(_) => "/auth/profile".to_string(),
            Self::History { peer, page, limit } => {
                let peer = urlencoding::encode(peer.as_str());
                format!("/messages/conversation/{peer}?page={page}&limit={limit}")
            },
            Self::SendMessage { .. } => "/messages/send".to_string(),
        }
    }

    /// Whether the bearer token must be attached.
    pub fn requires_auth(&self) -> bool {
        !matches!(self, Self::Login(_) | Self::Signup(_))
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Login(_) => "login",
            Self::Signup(_) => "signup",
            Self::FetchProfile => "fetch_profile",
            Self::Logout => "logout",
            Self::UpdateProfile(_) => "update_profile",
            Self::History { .. } => "history",
            Self::SendMessage { .. } => "send_message",
        }
    }

    /// JSON body. `None` for calls without a body.
    pub fn body(&self) -> Result<Option<serde_json::Value>> {
        let encode = |v: serde_json::Result<serde_json::Value>| {
            v.map(Some).map_err(|e| ProtocolError::Encode(e.to_string()))
        };

        match self {
            Self::Login(credentials) => encode(serde_json::to_value(credentials)),
            Self::Signup(form) => encode(serde_json::to_value(form)),
            Self::UpdateProfile(update) => encode(serde_json::to_value(update)),
            Self::SendMessage { recipient, content, client_message_id } => {
                Ok(Some(serde_json::json!({
                    "recipientId": recipient,
                    "content": content,
                    "messageType": "text",
                    "clientMessageId": client_message_id,
                })))
            },
            Self::FetchProfile | Self::Logout | Self::History { .. } => Ok(None),
        }
    }

    /// Decode the body of a successful response to this request.
    pub fn decode_response(&self, body: &[u8]) -> Result<ApiResponse> {
        match self {
            Self::Login(_) | Self::Signup(_) => {
                decode::<AuthResponse>(body, "auth").map(ApiResponse::Authenticated)
            },
            Self::FetchProfile | Self::UpdateProfile(_) => {
                decode::<ProfileBody>(body, "profile").map(|b| ApiResponse::Profile(b.user))
            },
            Self::Logout => Ok(ApiResponse::LoggedOut),
            Self::History { peer, page, limit } => {
                let body = decode::<HistoryBody>(body, "history")?;
                let has_more = match body.pagination {
                    Some(p) => p.has_more,
                    None => body.messages.len() >= *limit as usize,
                };
                Ok(ApiResponse::History(HistoryPage {
                    peer: peer.clone(),
                    page: *page,
                    messages: body.messages,
                    has_more,
                }))
            },
            Self::SendMessage { .. } => {
                decode::<SendBody>(body, "send").map(|b| ApiResponse::MessageSent(b.data))
            },
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: &[u8], expected: &'static str) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| ProtocolError::MalformedResponse { expected, reason: e.to_string() })
}
