//! Token Cache File
//!
//! Persists the access token so that separate processes (and restarts)
//! share one token instead of each requesting their own. KIS rate-limits
//! token issuance, so a miss here is comparatively expensive.
//!
//! Format: `{"token": "...", "expired": "<RFC 3339>"}`.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::auth::AccessToken;

/// Token cache errors. Only writes can fail; reads degrade to a miss.
#[derive(Debug, thiserror::Error)]
pub enum TokenCacheError {
    /// Filesystem failure.
    #[error("token cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failure.
    #[error("token cache encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Temp file could not be moved into place.
    #[error("token cache persist error: {0}")]
    Persist(#[from] tempfile::PersistError),
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedToken {
    token: String,
    expired: DateTime<Utc>,
}

/// File-backed token cache.
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    /// Create a cache at `path`. Nothing is touched until the first load/save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Cache file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load a token that is still valid at `now`.
    ///
    /// A missing file, unparsable content, or an expired token all return
    /// `None`.
    #[must_use]
    pub fn load(&self, now: DateTime<Utc>) -> Option<AccessToken> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "Token cache unreadable");
                return None;
            }
        };

        let cached: CachedToken = match serde_json::from_str(&contents) {
            Ok(cached) => cached,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "Token cache unparsable");
                return None;
            }
        };

        let token = AccessToken::new(cached.token, cached.expired);
        token.is_valid_at(now).then_some(token)
    }

    /// Atomically write `token` to the cache file.
    ///
    /// The content is written to a temp file in the same directory and
    /// renamed over the target, so concurrent readers see either the old
    /// or the new file, never a partial one.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file
    /// cannot be written or renamed.
    pub fn save(&self, token: &AccessToken) -> Result<(), TokenCacheError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let payload = serde_json::to_vec_pretty(&CachedToken {
            token: token.as_str().to_string(),
            expired: token.expires_at(),
        })?;

        let mut file = tempfile::NamedTempFile::new_in(&dir)?;
        file.write_all(&payload)?;
        file.as_file().sync_all()?;
        file.persist(&self.path)?;
        Ok(())
    }
}
