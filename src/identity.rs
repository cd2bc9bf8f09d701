//! Persisted identity token
//!
//! The token is opaque: it is issued by the reflection server, read once
//! when a session starts and rewritten whenever the server hands back a
//! different one. It is never generated locally.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use crate::{Error, Result};

/// Get/set storage for the identity token
pub trait IdentityStore: Send + Sync {
    /// Current token, if one has been stored
    fn get(&self) -> Option<String>;

    /// Replace the stored token
    ///
    /// # Errors
    ///
    /// Returns error if the token cannot be persisted
    fn set(&self, token: &str) -> Result<()>;
}

/// Token kept in a single file
#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    /// Store the token at `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl IdentityStore for FileIdentityStore {
    fn get(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Some(content.trim().to_string()).filter(|t| !t.is_empty()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read identity token");
                None
            }
        }
    }

    fn set(&self, token: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, token)
            .map_err(|e| Error::Identity(format!("{}: {e}", self.path.display())))?;
        tracing::debug!(path = %self.path.display(), "identity token saved");
        Ok(())
    }
}

/// Token held in memory only
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    token: Mutex<Option<String>>,
}

impl MemoryIdentityStore {
    /// Create a store, optionally pre-seeded with a token
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: Mutex::new(token),
        }
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn get(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, token: &str) -> Result<()> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
        Ok(())
    }
}
