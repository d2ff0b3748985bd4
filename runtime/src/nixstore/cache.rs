//! Disk-backed cache of resolution results.
//!
//! One JSON document per key under `<user-cache-dir>/nixload/nixstore/`.
//! The cache is a best-effort accelerator: unreadable or corrupt entries
//! read as misses, and entries are never expired. Concurrent writers of the
//! same key race harmlessly (each write is an atomic rename, last one wins).
//!
//! Resolution entries record the strategy that produced them (and, for the
//! build-tool strategy, the expression file). An entry written by another
//! producer is a miss, so switching strategies never serves a stale artifact.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use nixload_core::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::resolver::ResolutionResult;
use crate::oci::reference::cache_key;

/// Strategy and input that produced a cached resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Producer<'a> {
    pub strategy: &'a str,
    pub expression_file: Option<&'a Path>,
}

/// On-disk form of a cached resolution.
#[derive(Debug, Serialize, Deserialize)]
struct CachedResolution {
    #[serde(default)]
    strategy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expression_file: Option<PathBuf>,
    #[serde(flatten)]
    result: ResolutionResult,
}

/// Result cache keyed by image reference.
#[derive(Debug)]
pub struct ResultCache {
    dir: Option<PathBuf>,
    /// Set once, on the first write: whether the directory could be created
    ready: OnceLock<bool>,
}

impl ResultCache {
    /// Cache rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            ready: OnceLock::new(),
        }
    }

    /// Cache that never hits and never writes.
    pub fn disabled() -> Self {
        Self {
            dir: None,
            ready: OnceLock::new(),
        }
    }

    /// Whether entries can be read or written.
    pub fn is_enabled(&self) -> bool {
        self.dir.is_some() && self.ready.get() != Some(&false)
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Path of the entry for `key`.
    pub fn entry_path(&self, key: &str) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", cache_key(key))))
    }

    /// Read an entry. Missing, unreadable or unparsable entries are misses.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.is_enabled() {
            return None;
        }
        let path = self.entry_path(key)?;

        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read cache entry");
                return None;
            }
        };

        match serde_json::from_slice(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Ignoring corrupt cache entry"
                );
                None
            }
        }
    }

    /// Write an entry, replacing any previous one.
    ///
    /// A cache that cannot create its directory silently skips the write.
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let Some(dir) = self.ensure_dir() else {
            return Ok(());
        };
        let path = dir.join(format!("{}.json", cache_key(key)));
        let data = serde_json::to_vec_pretty(value)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, &data)?;
        tmp.persist(&path).map_err(|e| e.error)?;

        tracing::debug!(key = %key, path = %path.display(), "Wrote cache entry");
        Ok(())
    }

    /// Cached resolution for `key`, if `producer` wrote it.
    pub(crate) fn get_resolution(
        &self,
        key: &str,
        producer: Producer<'_>,
    ) -> Option<ResolutionResult> {
        let cached = self.get::<CachedResolution>(key)?;
        let matches = cached.strategy == producer.strategy
            && cached.expression_file.as_deref() == producer.expression_file;
        if !matches {
            tracing::debug!(
                key = %key,
                cached_strategy = %cached.strategy,
                strategy = %producer.strategy,
                "Ignoring cache entry from another strategy"
            );
            return None;
        }
        Some(cached.result)
    }

    /// Store `result` for `key`, recording its producer.
    pub(crate) fn put_resolution(
        &self,
        key: &str,
        producer: Producer<'_>,
        result: &ResolutionResult,
    ) -> Result<()> {
        self.put(
            key,
            &CachedResolution {
                strategy: producer.strategy.to_string(),
                expression_file: producer.expression_file.map(Path::to_path_buf),
                result: result.clone(),
            },
        )
    }

    fn ensure_dir(&self) -> Option<&Path> {
        let dir = self.dir.as_deref()?;
        let ready = *self.ready.get_or_init(|| match std::fs::create_dir_all(dir) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    path = %dir.display(),
                    error = %e,
                    "Failed to create Nix store cache directory, caching disabled"
                );
                false
            }
        });
        ready.then_some(dir)
    }
}
