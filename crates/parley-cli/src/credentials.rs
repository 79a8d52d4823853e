//! Credential record persisted as a JSON file.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use parley_client::{CredentialError, CredentialStore, StoredCredential};

/// Stores the session credential at a fixed path.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Store backed by `path`. Nothing is touched until the first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/parley/credentials.json`, falling back to the current
    /// directory when the platform has no config dir.
    pub fn default_path() -> PathBuf {
        dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("parley").join("credentials.json")
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<StoredCredential>, CredentialError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(CredentialError::Storage(err.to_string())),
        };
        serde_json::from_str(&contents).map(Some).map_err(|e| CredentialError::Corrupt(e.to_string()))
    }

    fn save(&mut self, credential: &StoredCredential) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| CredentialError::Storage(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(credential).map_err(|e| CredentialError::Storage(e.to_string()))?;
        fs::write(&self.path, json).map_err(|e| CredentialError::Storage(e.to_string()))
    }

    fn clear(&mut self) -> Result<(), CredentialError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CredentialError::Storage(err.to_string())),
        }
    }
}
