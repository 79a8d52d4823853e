//! Persisted session credential.
//!
//! One record: the bearer token plus the cached account it belongs to. Stores
//! are written on login and profile refresh, and cleared on logout or when the
//! server rejects the token.

use parley_proto::User;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The persisted credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    /// Bearer token.
    pub token: String,
    /// Account the token was issued for.
    pub user: User,
}

/// Credential storage failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// Underlying storage could not be read or written.
    #[error("credential storage failed: {0}")]
    Storage(String),

    /// Stored record exists but is unreadable.
    #[error("stored credential is corrupt: {0}")]
    Corrupt(String),
}

/// Storage for the single session credential.
pub trait CredentialStore: Send {
    /// Read the stored credential, if any.
    fn load(&self) -> Result<Option<StoredCredential>, CredentialError>;

    /// Replace the stored credential.
    fn save(&mut self, credential: &StoredCredential) -> Result<(), CredentialError>;

    /// Remove the stored credential.
    fn clear(&mut self) -> Result<(), CredentialError>;
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    credential: Option<StoredCredential>,
}

impl MemoryCredentialStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `credential`.
    pub fn with(credential: StoredCredential) -> Self {
        Self { credential: Some(credential) }
    }

    /// Current contents.
    pub fn get(&self) -> Option<&StoredCredential> {
        self.credential.as_ref()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<StoredCredential>, CredentialError> {
        Ok(self.credential.clone())
    }

    fn save(&mut self, credential: &StoredCredential) -> Result<(), CredentialError> {
        self.credential = Some(credential.clone());
        Ok(())
    }

    fn clear(&mut self) -> Result<(), CredentialError> {
        self.credential = None;
        Ok(())
    }
}
