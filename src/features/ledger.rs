//! Applied-listings ledger, the cross-cycle deduplication record.
//!
//! Persisted as a JSON array of unique string identifiers (listing link, or
//! title when no link was discoverable). The whole file is read at cycle
//! start and rewritten at cycle end; the ledger only ever grows.
//!
//! A corrupt or unreadable file degrades to an empty ledger instead of
//! aborting the run: re-applying to an old listing is cheaper than missing a
//! whole cycle.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug)]
pub struct PersistentLedger {
    path: PathBuf,
    /// Insertion order, as written back to disk.
    entries: Vec<String>,
    index: HashSet<String>,
}

impl PersistentLedger {
    /// Load the ledger, degrading to empty on any failure.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::try_load(&path) {
            Ok(ledger) => {
                info!(
                    "ledger: loaded {} entries from {}",
                    ledger.len(),
                    path.display()
                );
                ledger
            }
            Err(e) => {
                warn!("ledger: {} — starting from an empty ledger", e);
                Self::empty(path)
            }
        }
    }

    /// Strict load. A missing file is an empty ledger, not an error.
    pub fn try_load(path: &Path) -> Result<Self, LedgerError> {
        if !path.exists() {
            return Ok(Self::empty(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let ids: Vec<String> =
            serde_json::from_str(&content).map_err(|source| LedgerError::Corrupt {
                path: path.to_path_buf(),
                source,
            })?;

        let mut ledger = Self::empty(path.to_path_buf());
        for id in ids {
            ledger.add(id);
        }
        Ok(ledger)
    }

    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            entries: Vec::new(),
            index: HashSet::new(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    /// Returns `false` when `id` was already present.
    pub fn add(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.index.contains(&id) {
            return false;
        }
        self.index.insert(id.clone());
        self.entries.push(id);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the whole file atomically (temp file + rename).
    pub fn flush(&self) -> Result<(), LedgerError> {
        let json = serde_json::to_string_pretty(&self.entries).map_err(|source| {
            LedgerError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })?;
        super::write_atomic(&self.path, json.as_bytes()).map_err(|source| LedgerError::Io {
            path: self.path.clone(),
            source,
        })?;
        info!(
            "ledger: 💾 saved {} entries to {}",
            self.entries.len(),
            self.path.display()
        );
        Ok(())
    }
}
