//! Parley wire protocol
//!
//! Types shared by every layer that talks to the two collaborators of the chat
//! client: the request/response persistence API and the push-delivery channel.
//!
//! # Components
//!
//! - [`ids`]: opaque identifiers ([`UserId`], [`ServerMessageId`], [`LocalId`])
//! - [`push`]: the push envelope ([`PushEvent`]) and its payloads
//! - [`api`]: persistence requests ([`ApiRequest`]) and decoded responses
//!   ([`ApiResponse`])
//!
//! Nothing here performs I/O. Encoding and decoding are pure functions so the
//! simulation harness and the production transports share one codec.

#![forbid(unsafe_code)]

pub mod api;
pub mod errors;
pub mod ids;
pub mod push;

pub use api::{
    ApiRequest, ApiResponse, AuthResponse, Credentials, HistoryPage, Method, Pagination,
    ProfileUpdate, SentMessage, SignupForm, User, UserRef, UserStatus, WireMessage,
};
pub use errors::{ProtocolError, Result};
pub use ids::{Generation, LocalId, RequestId, ServerMessageId, UserId};
pub use push::{
    EventKind, PresencePayload, PushEvent, ReceiveMessagePayload, SendMessagePayload,
    TypingPayload, UserTypingPayload,
};
