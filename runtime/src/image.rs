//! Host-facing image runtime.
//!
//! Tries the Nix store backend first and tells the caller when it should
//! fall back to its normal acquisition path (usually a registry pull).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use nixload_core::config::{ConfigLocations, NixloadConfig};
use nixload_core::error::{NixloadError, Result};
use tokio_util::sync::CancellationToken;

use crate::nixstore::{select_resolver, ImageLoader, TokioCommandRunner};
use crate::oci::{ImageStore, ImportSource, Removal, StoredImage};

/// An image held by the local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    stored: StoredImage,
}

impl Image {
    pub fn id(&self) -> &str {
        &self.stored.id
    }

    pub fn short_id(&self) -> &str {
        self.stored.short_id()
    }

    pub fn names(&self) -> &[String] {
        &self.stored.names
    }

    pub fn digest(&self) -> &str {
        &self.stored.digest
    }

    pub fn path(&self) -> &Path {
        &self.stored.path
    }

    pub fn size_bytes(&self) -> u64 {
        self.stored.size_bytes
    }

    pub fn stored(&self) -> &StoredImage {
        &self.stored
    }
}

impl From<StoredImage> for Image {
    fn from(stored: StoredImage) -> Self {
        Self { stored }
    }
}

/// Entry point for hosts: image acquisition plus store pass-throughs.
pub struct Runtime {
    store: Arc<ImageStore>,
    loader: ImageLoader,
}

impl Runtime {
    pub fn new(store: Arc<ImageStore>, loader: ImageLoader) -> Self {
        Self { store, loader }
    }

    /// Open the store and probe for a resolution strategy.
    pub fn from_config(config: &NixloadConfig, locations: &ConfigLocations) -> Result<Self> {
        let store = Arc::new(ImageStore::new(
            &config.images_dir(),
            config.max_store_size,
        )?);
        let runner = Arc::new(TokioCommandRunner::new(config.tool_timeout()));
        let resolver = select_resolver(config, locations, runner);
        let loader = ImageLoader::new(resolver, store.clone(), config.tag_namespace.clone());
        Ok(Self::new(store, loader))
    }

    pub fn loader(&self) -> &ImageLoader {
        &self.loader
    }

    pub fn store(&self) -> &ImageStore {
        &self.store
    }

    /// Get an image by name from the Nix store backend.
    ///
    /// Returns [`NixloadError::ResolutionUnavailable`] when the backend is
    /// disabled or cannot resolve `name`; callers should then acquire the
    /// image some other way. Errors after a successful resolution are
    /// returned unchanged.
    pub async fn get_image(&self, name: &str, cancel: &CancellationToken) -> Result<Image> {
        if !self.loader.is_enabled() {
            tracing::debug!(reference = %name, "Nix store backend disabled");
            return Err(NixloadError::ResolutionUnavailable(format!(
                "Nix store backend is disabled, cannot resolve {}",
                name
            )));
        }

        let resolved = match self.loader.resolve_image(name, cancel).await {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::info!(reference = %name, error = %e, "Nix store resolution failed");
                return Err(NixloadError::ResolutionUnavailable(format!(
                    "{}: {}",
                    name, e
                )));
            }
        };

        let stored = self.loader.load_image(name, &resolved, cancel).await?;
        Ok(stored.into())
    }

    /// Get several images, in order, stopping at the first error.
    pub async fn get_images(&self, names: &[&str], cancel: &CancellationToken) -> Result<Vec<Image>> {
        let mut images = Vec::with_capacity(names.len());
        for name in names {
            images.push(self.get_image(name, cancel).await?);
        }
        Ok(images)
    }

    /// All images in the store.
    pub async fn list_images(&self) -> Vec<Image> {
        self.store
            .list()
            .await
            .into_iter()
            .map(Image::from)
            .collect()
    }

    /// Look up an image by id or name without resolving it.
    pub async fn lookup_image(&self, id_or_name: &str) -> Option<Image> {
        self.store.get(id_or_name).await.map(Image::from)
    }

    /// Bulk-load an archive or layout directory into the store.
    pub async fn load_image(&self, path: &Path) -> Result<Vec<Image>> {
        let ids = self
            .store
            .load(&ImportSource::Path(PathBuf::from(path)))
            .await?;

        let evicted = self.store.evict(&ids).await?;
        if !evicted.is_empty() {
            tracing::info!(count = evicted.len(), "Evicted images over the store size limit");
        }

        let mut images = Vec::with_capacity(ids.len());
        for id in ids {
            let stored = self.store.get(&id).await.ok_or_else(|| {
                NixloadError::StoreInconsistency(format!(
                    "image {} was imported but cannot be looked up",
                    id
                ))
            })?;
            images.push(stored.into());
        }
        Ok(images)
    }

    pub async fn remove_image(&self, id_or_name: &str, force: bool) -> Result<Removal> {
        self.store.remove(id_or_name, force).await
    }

    pub async fn tag_image(&self, id_or_name: &str, name: &str) -> Result<Image> {
        self.store.tag(id_or_name, name).await.map(Image::from)
    }
}
