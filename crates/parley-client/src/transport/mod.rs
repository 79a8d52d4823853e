//! Network transports.
//!
//! Thin I/O layers: they move requests, responses and push events, and leave
//! every protocol decision to the Sans-IO [`crate::Client`].

mod http;
mod push;

pub use http::HttpApi;
pub use push::{PushConnection, PushInbound, connect_push};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Client construction or configuration failed.
    #[error("configuration error: {0}")]
    Config(String),
}
