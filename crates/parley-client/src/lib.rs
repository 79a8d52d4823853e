//! Client
//!
//! Action-based synchronization layer for the Parley chat client. Keeps the
//! local session, the open conversation and the push connection consistent
//! with the server.
//!
//! # Architecture
//!
//! The client follows the same Sans-IO and action-based patterns as
//! [`parley_core`]. It receives events ([`ClientEvent`]), processes them
//! through pure state machine logic, and returns actions ([`ClientAction`])
//! for the caller to execute.
//!
//! # Components
//!
//! - [`Client`]: top-level state machine routing between the components
//! - [`SessionManager`]: login, restore, logout and the credential store
//! - [`ConversationSync`]: history, live messages, drafts and typing for one
//!   peer
//! - [`MessageStore`]: ordered, deduplicated message list
//! - [`Presence`]: online status of other users
//!
//! # Transport (optional)
//!
//! With the `transport` feature enabled, this crate also provides:
//! - [`transport::HttpApi`]: persistence calls over HTTP
//! - [`transport::connect_push`]: push channel over WebSocket

#![forbid(unsafe_code)]

mod client;
pub mod config;
mod conversation;
mod credentials;
mod error;
mod event;
mod presence;
mod session;
mod store;
mod typing;
pub mod validation;

#[cfg(feature = "transport")]
pub mod transport;

pub use client::Client;
pub use config::ClientConfig;
pub use conversation::{ConversationSync, HistoryOutcome, OutgoingMessage, SyncState};
pub use credentials::{CredentialError, CredentialStore, MemoryCredentialStore, StoredCredential};
pub use error::{ApiError, ClientError, ErrorKind, Field, FieldError, ValidationErrors};
pub use event::{ClientAction, ClientEvent, Notice};
pub use parley_core::{ConnectionStatus, Environment};
pub use presence::Presence;
pub use session::{SessionAction, SessionManager, SessionState, SessionStatus};
pub use store::{
    ConfirmOutcome, DedupeLedger, DeliveryState, IncomingMessage, MergeOutcome, Message, MessageStore,
};
pub use typing::{OutgoingTyping, TypingState};
