//! Session cookie persistence.
//!
//! After every successful login the browser cookies are saved to
//! `{data_dir}/cookies.json`; the next cycle injects them into its fresh
//! browser before loading the landing page so that most runs skip the login
//! form entirely.
//!
//! There is no expiry tracking. A stale cache is detected lazily: the
//! logged-in probe fails and the cycle falls through to interactive login,
//! which then overwrites the file.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load cached cookies as raw CDP JSON values.
    ///
    /// Returns `None` when the file is missing, unreadable, unparseable or
    /// empty; a broken cache only costs a fresh login.
    pub fn load(&self) -> Option<Vec<serde_json::Value>> {
        if !self.path.exists() {
            return None;
        }
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                warn!(
                    "session_store: failed to read {}: {}",
                    self.path.display(),
                    e
                );
                return None;
            }
        };
        let cookies: Vec<serde_json::Value> = match serde_json::from_str(&content) {
            Ok(c) => c,
            Err(e) => {
                warn!(
                    "session_store: {} is not a cookie array: {}",
                    self.path.display(),
                    e
                );
                return None;
            }
        };
        if cookies.is_empty() {
            return None;
        }
        info!(
            "session_store: 🍪 loaded {} cookies ({})",
            cookies.len(),
            self.path.display()
        );
        Some(cookies)
    }

    /// Overwrite the cache atomically.
    pub fn save(&self, cookies: &[serde_json::Value]) -> std::io::Result<()> {
        let json = serde_json::to_string(cookies)?;
        super::write_atomic(&self.path, json.as_bytes())?;
        info!(
            "session_store: 💾 saved {} cookies ({})",
            cookies.len(),
            self.path.display()
        );
        Ok(())
    }
}
