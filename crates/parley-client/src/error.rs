//! Client error taxonomy.
//!
//! [`ApiError`] classifies how a persistence call failed. [`ClientError`] is
//! what the user sees: authentication, network, validation, connection, or a
//! request that made no sense in the current state. None of them is fatal;
//! every one is recoverable by retrying, logging in again, or reselecting the
//! peer.

use std::fmt;

use parley_core::ConnectionError;
use parley_proto::ProtocolError;
use thiserror::Error;

/// Failure of a persistence call, as reported by the driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Token missing, invalid or expired (HTTP 401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Server refused the request.
    #[error("rejected with status {status}: {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Server-provided message
        message: String,
    },

    /// Server unreachable or timed out.
    #[error("network error: {0}")]
    Network(String),

    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<ProtocolError> for ApiError {
    fn from(err: ProtocolError) -> Self {
        Self::Decode(err.to_string())
    }
}

impl ApiError {
    /// Whether the error means the session token is no longer valid.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

/// Form field a validation error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// Display name.
    Username,
    /// Email address.
    Email,
    /// Password.
    Password,
    /// Password confirmation.
    ConfirmPassword,
    /// Message text.
    Content,
}

/// One failed field check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Offending field.
    pub field: Field,
    /// User-facing message.
    pub message: &'static str,
}

/// Every failed check of one form, reported together so each field can show
/// its own message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    /// Record a failed check.
    pub fn push(&mut self, field: Field, message: &'static str) {
        self.0.push(FieldError { field, message });
    }

    /// Whether no check failed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Message for `field`, if its check failed.
    pub fn get(&self, field: Field) -> Option<&'static str> {
        self.0.iter().find(|e| e.field == field).map(|e| e.message)
    }

    /// All failed checks.
    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    /// `Ok` if empty, otherwise `Err(self)`.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<_> = self.0.iter().map(|e| e.message).collect();
        f.write_str(&messages.join("; "))
    }
}

/// Coarse classification of a [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad credentials or expired session. Route to the login screen.
    AuthFailure,
    /// Server unreachable, timed out or refused the call.
    NetworkFailure,
    /// Input failed client-side checks.
    ValidationFailure,
    /// Push transport problem.
    ConnectionFailure,
    /// Intent not valid right now.
    InvalidState,
}

/// Errors surfaced to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Bad credentials or expired session.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Persistence call unreachable or timed out.
    #[error("network failure: {0}")]
    Network(String),

    /// Server refused a well-formed request.
    #[error("request rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Server-provided message
        message: String,
    },

    /// Client-side field checks failed. Never reaches the network.
    #[error("invalid input: {0}")]
    Validation(ValidationErrors),

    /// Push transport problem.
    #[error("connection failure: {0}")]
    Connection(#[from] ConnectionError),

    /// Intent not valid in the current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// Attempted operation
        operation: &'static str,
        /// Description of the current state
        state: &'static str,
    },
}

impl ClientError {
    /// Classification for display and routing.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth(_) => ErrorKind::AuthFailure,
            Self::Network(_) | Self::Rejected { .. } => ErrorKind::NetworkFailure,
            Self::Validation(_) => ErrorKind::ValidationFailure,
            Self::Connection(_) => ErrorKind::ConnectionFailure,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
        }
    }

    /// Classify a failed persistence call.
    ///
    /// For login and signup a refusal means bad credentials, so it is an
    /// authentication failure rather than a generic rejection.
    pub fn from_api(err: ApiError, auth_call: bool) -> Self {
        match err {
            ApiError::Unauthorized(message) => Self::Auth(message),
            ApiError::Rejected { message, .. } if auth_call => Self::Auth(message),
            ApiError::Rejected { status, message } => Self::Rejected { status, message },
            ApiError::Network(message) => Self::Network(message),
            ApiError::Decode(message) => Self::Network(format!("unreadable response: {message}")),
        }
    }
}

impl From<ValidationErrors> for ClientError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_refusal_is_auth_failure() {
        let err = ApiError::Rejected { status: 400, message: "Invalid credentials".into() };
        assert_eq!(ClientError::from_api(err, true), ClientError::Auth("Invalid credentials".into()));
    }

    #[test]
    fn send_refusal_stays_rejection() {
        let err = ApiError::Rejected { status: 403, message: "Not friends".into() };
        assert!(matches!(ClientError::from_api(err, false), ClientError::Rejected { status: 403, .. }));
    }

    #[test]
    fn rejection_counts_as_network_failure() {
        let err = ClientError::Rejected { status: 500, message: "boom".into() };
        assert_eq!(err.kind(), ErrorKind::NetworkFailure);
    }

    #[test]
    fn unauthorized_is_always_auth() {
        assert!(matches!(
            ClientError::from_api(ApiError::Unauthorized("expired".into()), false),
            ClientError::Auth(_)
        ));
    }

    #[test]
    fn validation_errors_keep_every_field() {
        let mut errors = ValidationErrors::default();
        errors.push(Field::Email, "Please enter a valid email address");
        errors.push(Field::Password, "Password must be at least 6 characters long");

        assert_eq!(errors.get(Field::Password), Some("Password must be at least 6 characters long"));
        assert_eq!(errors.get(Field::Username), None);
        assert_eq!(
            errors.to_string(),
            "Please enter a valid email address; Password must be at least 6 characters long"
        );
        assert!(errors.into_result().is_err());
    }
}
