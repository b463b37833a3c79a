//! Token storage.
//!
//! The session core only depends on the [`TokenStore`] trait, so the storage
//! medium (memory, a file that survives restarts, an OS keychain) can be
//! swapped without touching refresh logic.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use crate::error::{AuthError, Result};
use crate::token::TokenPair;

/// Default token file name within the corral config directory.
pub const TOKEN_FILE: &str = "tokens.json";

// ============================================================================
// TokenStore Trait
// ============================================================================

/// Synchronous holder of the current token pair.
///
/// Reads return a full snapshot; writers replace the pair as a whole.
pub trait TokenStore: Send + Sync + std::fmt::Debug {
    /// Get the current pair, if any.
    fn get(&self) -> Option<TokenPair>;

    /// Replace the current pair.
    fn set(&self, pair: TokenPair) -> Result<()>;

    /// Remove any stored pair. Safe to call when nothing is stored.
    fn clear(&self) -> Result<()>;

    /// True if a pair is stored and its expiry has been reached.
    fn is_expired(&self) -> bool {
        self.get().is_some_and(|pair| pair.is_expired_at(Utc::now()))
    }
}

/// Shared token store for use across async contexts.
pub type SharedTokenStore = Arc<dyn TokenStore>;

// ============================================================================
// MemoryTokenStore
// ============================================================================

/// In-memory token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    pair: RwLock<Option<TokenPair>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pair(pair: TokenPair) -> Self {
        Self {
            pair: RwLock::new(Some(pair)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Option<TokenPair> {
        self.pair.read().clone()
    }

    fn set(&self, pair: TokenPair) -> Result<()> {
        *self.pair.write() = Some(pair);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.pair.write() = None;
        Ok(())
    }
}

// ============================================================================
// FileTokenStore
// ============================================================================

/// File-backed token store that survives process restarts.
///
/// The file is read once lazily and cached; every write goes through to disk.
#[derive(Debug)]
pub struct FileTokenStore {
    token_path: PathBuf,
    cached: RwLock<Option<Option<TokenPair>>>,
}

impl FileTokenStore {
    /// Create a store at `<dir>/tokens.json`.
    pub fn new(data_dir: &Path) -> Self {
        Self::with_path(data_dir.join(TOKEN_FILE))
    }

    /// Create with a custom token path.
    pub fn with_path(token_path: PathBuf) -> Self {
        Self {
            token_path,
            cached: RwLock::new(None),
        }
    }

    /// Get the token file path.
    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    fn read_file(&self) -> Option<TokenPair> {
        let content = match std::fs::read_to_string(&self.token_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.token_path.display(), error = %e, "Failed to read token file");
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(pair) => Some(pair),
            Err(e) => {
                tracing::warn!(path = %self.token_path.display(), error = %e, "Ignoring unreadable token file");
                None
            }
        }
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self) -> Option<TokenPair> {
        if let Some(cached) = self.cached.read().as_ref() {
            return cached.clone();
        }

        let mut cache = self.cached.write();
        if cache.is_none() {
            *cache = Some(self.read_file());
        }
        cache.clone().flatten()
    }

    fn set(&self, pair: TokenPair) -> Result<()> {
        if let Some(parent) = self.token_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AuthError::Storage(format!("Failed to create token directory: {}", e))
            })?;
        }

        let json = serde_json::to_string_pretty(&pair)?;
        std::fs::write(&self.token_path, json)
            .map_err(|e| AuthError::Storage(format!("Failed to write token file: {}", e)))?;

        *self.cached.write() = Some(Some(pair));
        tracing::debug!(path = %self.token_path.display(), "Tokens saved");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.token_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(AuthError::Storage(format!(
                    "Failed to delete token file: {}",
                    e
                )));
            }
        }
        *self.cached.write() = Some(None);
        Ok(())
    }
}

// ============================================================================
// IntendedRoute
// ============================================================================

/// Session-scoped slot for the route to resume after login.
///
/// Lives only as long as the session; [`IntendedRoute::take`] empties it so a
/// stashed route is consumed at most once.
#[derive(Debug, Default)]
pub struct IntendedRoute {
    route: Mutex<Option<String>>,
}

impl IntendedRoute {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stash(&self, route: impl Into<String>) {
        *self.route.lock() = Some(route.into());
    }

    pub fn take(&self) -> Option<String> {
        self.route.lock().take()
    }

    pub fn clear(&self) {
        self.route.lock().take();
    }
}
