//! Mapping Source: a JSON table from image names to store artifacts.
//!
//! ```json
//! {
//!   "images": {
//!     "app": "/nix/store/abc-app.tar.gz",
//!     "web": {
//!       "rootfs": "/nix/store/def-web-rootfs",
//!       "manifest": "/nix/store/def-web-manifest.json",
//!       "config": "/nix/store/def-web-config.json"
//!     }
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nixload_core::error::{NixloadError, Result};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::resolver::{ResolutionResult, Resolver};
use crate::oci::reference::{strip_namespaces, DEFAULT_TAG};
use crate::oci::ImportSource;

/// Location of a built image artifact.
///
/// Serialized either as a bare path string or as an object with separate
/// root filesystem, manifest and config paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArtifactLocation {
    /// Archive or OCI layout directory
    Path(PathBuf),
    /// Unpacked image split into its parts
    Components {
        rootfs: PathBuf,
        manifest: PathBuf,
        config: PathBuf,
    },
}

impl std::fmt::Display for ArtifactLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Components { rootfs, .. } => write!(f, "{} (components)", rootfs.display()),
        }
    }
}

impl From<&ArtifactLocation> for ImportSource {
    fn from(location: &ArtifactLocation) -> Self {
        match location {
            ArtifactLocation::Path(path) => ImportSource::Path(path.clone()),
            ArtifactLocation::Components {
                rootfs,
                manifest,
                config,
            } => ImportSource::Components {
                rootfs: rootfs.clone(),
                manifest: manifest.clone(),
                config: config.clone(),
            },
        }
    }
}

/// Full contents of a mapping file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MappingTable {
    #[serde(default)]
    pub images: HashMap<String, ArtifactLocation>,
}

impl MappingTable {
    /// Read and parse a mapping file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            NixloadError::MappingError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            NixloadError::MappingError(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Exact key lookup.
    ///
    /// `name` and `name:latest` are treated as the same key when only one
    /// of them is present in the table.
    pub fn lookup(&self, key: &str) -> Option<&ArtifactLocation> {
        if let Some(location) = self.images.get(key) {
            return Some(location);
        }
        let latest_suffix = format!(":{}", DEFAULT_TAG);
        match key.strip_suffix(latest_suffix.as_str()) {
            Some(untagged) => self.images.get(untagged),
            None if !has_tag(key) => self.images.get(&format!("{}{}", key, latest_suffix)),
            None => None,
        }
    }
}

fn has_tag(key: &str) -> bool {
    let last_segment = key.rsplit('/').next().unwrap_or(key);
    last_segment.contains(':') || last_segment.contains('@')
}

/// Resolves names by static lookup in a pre-generated mapping file.
///
/// The file is re-read on every call so edits apply without a restart.
pub struct MappingResolver {
    mapping_file: PathBuf,
    namespace: String,
}

impl MappingResolver {
    pub fn new(mapping_file: PathBuf, namespace: impl Into<String>) -> Self {
        Self {
            mapping_file,
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl Resolver for MappingResolver {
    fn name(&self) -> &'static str {
        "mapping"
    }

    async fn resolve(
        &self,
        reference: &str,
        _cancel: &CancellationToken,
    ) -> Result<ResolutionResult> {
        let key = strip_namespaces(reference, &self.namespace);
        let table = MappingTable::load(&self.mapping_file)?;

        let location = table.lookup(key).cloned().ok_or_else(|| {
            NixloadError::NotFound(format!(
                "{} (not in {})",
                key,
                self.mapping_file.display()
            ))
        })?;

        tracing::debug!(
            reference = %reference,
            key = %key,
            location = %location,
            "Resolved image from mapping file"
        );

        Ok(ResolutionResult {
            location,
            canonical_name: Some(key.to_string()),
            digest: None,
        })
    }
}
