//! Protocol error types.

use thiserror::Error;

/// Result alias for codec operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding wire data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Push envelope could not be decoded.
    #[error("malformed push envelope: {0}")]
    MalformedEnvelope(String),

    /// Push envelope named an event this client does not understand.
    #[error("unknown push event: {0}")]
    UnknownEvent(String),

    /// Persistence response body did not match the expected shape.
    #[error("malformed {expected} response: {reason}")]
    MalformedResponse {
        /// Response type the request expected
        expected: &'static str,
        /// Decoder message
        reason: String,
    },

    /// Value could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),
}
