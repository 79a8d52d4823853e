//! Error types for the push connection.
//!
//! Strongly-typed so callers can tell a transient drop (retry will happen)
//! from a state mistake (nothing will happen until the user acts).

use parley_proto::Generation;
use thiserror::Error;

use crate::connection::ConnectionStatus;

/// Errors reported by [`crate::ConnectionManager`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Publish attempted without a usable transport.
    #[error("not connected: cannot publish {event} while {status:?}")]
    NotConnected {
        /// Connection status when the publish was attempted
        status: ConnectionStatus,
        /// Wire name of the rejected event
        event: &'static str,
    },

    /// Outbound queue is at capacity during a reconnect.
    #[error("outbound queue full ({capacity} events), dropping {event}")]
    QueueFull {
        /// Configured queue capacity
        capacity: usize,
        /// Wire name of the rejected event
        event: &'static str,
    },

    /// Transport closed or failed.
    #[error("transport {generation} closed: {reason}")]
    TransportClosed {
        /// Generation of the transport that went away
        generation: Generation,
        /// Reason reported by the driver
        reason: String,
    },

    /// Reconnect attempts exhausted. Queued events were dropped.
    #[error("reconnect gave up after {attempts} attempts, {dropped} queued events dropped")]
    ReconnectExhausted {
        /// Number of failed attempts
        attempts: u32,
        /// Number of queued events discarded
        dropped: usize,
    },

    /// Frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ConnectionError {
    /// Returns true if the condition clears without user action.
    ///
    /// A closed transport is retried by the reconnect cycle and a full queue
    /// drains on reconnect. Everything else needs the user to act
    /// (re-login, manual reconnect).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransportClosed { .. } | Self::QueueFull { .. })
    }
}

impl From<parley_proto::ProtocolError> for ConnectionError {
    fn from(err: parley_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}
