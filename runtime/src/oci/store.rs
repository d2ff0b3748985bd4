//! Disk-based image store with LRU eviction.
//!
//! Imported images live under `sha256/<id>/` with an in-memory index
//! backed by a persistent `index.json`. An image is identified by its
//! content id and carries any number of names; a name belongs to at
//! most one image at a time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nixload_core::error::{NixloadError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::import::{self, copy_dir_recursive, ImportSource, StagedImage};
use super::reference::DEFAULT_TAG;

/// Metadata for a stored image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredImage {
    /// Content id (hex, no algorithm prefix)
    pub id: String,
    /// Human-readable names pointing at this image
    #[serde(default)]
    pub names: Vec<String>,
    /// Content digest (e.g., "sha256:abc123...")
    pub digest: String,
    /// Total size in bytes
    pub size_bytes: u64,
    /// When the image was first imported
    pub loaded_at: DateTime<Utc>,
    /// When the image was last used
    pub last_used: DateTime<Utc>,
    /// Path to the image data on disk
    pub path: PathBuf,
}

impl StoredImage {
    /// First twelve characters of the id.
    pub fn short_id(&self) -> &str {
        self.id.get(..12).unwrap_or(self.id.as_str())
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

/// What [`ImageStore::remove`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    /// A name was dropped; the image still has others.
    Untagged(String),
    /// The image and its data were deleted.
    Deleted(String),
}

/// Persistent index stored as JSON on disk.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreIndex {
    images: Vec<StoredImage>,
}

/// Store primitives the loader depends on.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Bulk-load an artifact, returning the ids of the imported images.
    async fn load(&self, source: &ImportSource) -> Result<Vec<String>>;

    /// Find an image by id or name.
    async fn lookup(&self, id_or_name: &str) -> Result<Option<StoredImage>>;

    /// Point `name` at the image `id`.
    async fn tag(&self, id: &str, name: &str) -> Result<StoredImage>;
}

/// Disk-based image store with in-memory index and LRU eviction.
pub struct ImageStore {
    /// Root directory for image storage
    store_dir: PathBuf,
    /// In-memory index: id → StoredImage
    index: Arc<RwLock<HashMap<String, StoredImage>>>,
    /// Maximum total size in bytes
    max_size_bytes: u64,
}

impl ImageStore {
    /// Open a store, creating its directory and loading any existing index.
    pub fn new(store_dir: &Path, max_size_bytes: u64) -> Result<Self> {
        std::fs::create_dir_all(store_dir).map_err(|e| {
            NixloadError::ImageStoreError(format!(
                "Failed to create image store directory {}: {}",
                store_dir.display(),
                e
            ))
        })?;

        let index = load_index(store_dir)?;
        Ok(Self {
            store_dir: store_dir.to_path_buf(),
            index: Arc::new(RwLock::new(index)),
            max_size_bytes,
        })
    }

    /// Import every image found in `source`.
    ///
    /// Content already present is reused; names recorded in the artifact
    /// are applied. Returns the ids in artifact order.
    pub async fn load(&self, source: &ImportSource) -> Result<Vec<String>> {
        let staging = import::stage(source, &self.store_dir.join("tmp"))?;
        let mut ids = Vec::with_capacity(staging.images.len());

        for staged in &staging.images {
            let path = self.materialize(staged)?;
            let size_bytes = dir_size(&path);
            let now = Utc::now();

            let mut index = self.index.write().await;
            let image = index
                .entry(staged.id.clone())
                .or_insert_with(|| StoredImage {
                    id: staged.id.clone(),
                    names: Vec::new(),
                    digest: format!("sha256:{}", staged.id),
                    size_bytes,
                    loaded_at: now,
                    last_used: now,
                    path,
                });
            image.last_used = now;
            drop(index);

            for name in &staged.names {
                self.assign_name(&staged.id, name).await;
            }

            tracing::info!(
                id = %staged.id.get(..12).unwrap_or(staged.id.as_str()),
                source = %source,
                "Imported image"
            );
            ids.push(staged.id.clone());
        }

        if !ids.is_empty() {
            self.save_index().await?;
        }
        Ok(ids)
    }

    /// Get a stored image by id, digest or name, marking it used.
    pub async fn get(&self, id_or_name: &str) -> Option<StoredImage> {
        let mut index = self.index.write().await;
        let id = find_id(&index, id_or_name)?;
        let image = index.get_mut(&id)?;
        image.last_used = Utc::now();
        let updated = image.clone();
        drop(index);

        if let Err(e) = self.save_index().await {
            tracing::warn!(error = %e, "Failed to persist image last-used time");
        }
        Some(updated)
    }

    /// Point `name` at the image `id_or_name` refers to.
    ///
    /// The name is removed from any other image. Tagging an image with a
    /// name it already has changes nothing.
    pub async fn tag(&self, id_or_name: &str, name: &str) -> Result<StoredImage> {
        if name.trim().is_empty() {
            return Err(NixloadError::InvalidReference(
                "tag name cannot be empty".to_string(),
            ));
        }

        let index = self.index.read().await;
        let id = find_id(&index, id_or_name).ok_or_else(|| {
            NixloadError::ImageStoreError(format!("Image not found: {}", id_or_name))
        })?;
        if let Some(image) = index.get(&id).filter(|img| img.has_name(name)) {
            return Ok(image.clone());
        }
        drop(index);

        let tagged = self.assign_name(&id, name).await.ok_or_else(|| {
            NixloadError::ImageStoreError(format!("Image not found: {}", id_or_name))
        })?;
        self.save_index().await?;

        tracing::info!(id = %tagged.short_id(), name = %name, "Tagged image");
        Ok(tagged)
    }

    /// Remove a name, or the whole image when addressed by id or by its
    /// last remaining name. `force` deletes the image even if it has other
    /// names.
    pub async fn remove(&self, id_or_name: &str, force: bool) -> Result<Removal> {
        let mut index = self.index.write().await;
        let id = find_id(&index, id_or_name).ok_or_else(|| {
            NixloadError::ImageStoreError(format!("Image not found: {}", id_or_name))
        })?;

        let by_name = index
            .get(&id)
            .and_then(|img| matching_name(img, id_or_name))
            .map(str::to_string);

        if let (Some(name), false) = (&by_name, force) {
            if let Some(image) = index.get_mut(&id).filter(|img| img.names.len() > 1) {
                image.names.retain(|n| n != name);
                drop(index);
                self.save_index().await?;
                return Ok(Removal::Untagged(name.clone()));
            }
        }

        let removed = index.remove(&id);
        drop(index);

        if let Some(image) = removed {
            if image.path.exists() {
                std::fs::remove_dir_all(&image.path).map_err(|e| {
                    NixloadError::ImageStoreError(format!(
                        "Failed to remove image directory {}: {}",
                        image.path.display(),
                        e
                    ))
                })?;
            }
        }
        self.save_index().await?;
        Ok(Removal::Deleted(id))
    }

    /// List all stored images, most recently loaded first.
    pub async fn list(&self) -> Vec<StoredImage> {
        let index = self.index.read().await;
        let mut images: Vec<_> = index.values().cloned().collect();
        images.sort_by(|a, b| b.loaded_at.cmp(&a.loaded_at));
        images
    }

    /// Evict least-recently-used images until total size is under the limit.
    ///
    /// Images in `keep` are never evicted, even if the store stays over the
    /// limit. Returns the ids of evicted images.
    pub async fn evict(&self, keep: &[String]) -> Result<Vec<String>> {
        let mut evicted = Vec::new();

        while self.total_size().await > self.max_size_bytes {
            let lru_id = {
                let index = self.index.read().await;
                index
                    .values()
                    .filter(|img| !keep.contains(&img.id))
                    .min_by_key(|img| img.last_used)
                    .map(|img| img.id.clone())
            };

            match lru_id {
                Some(id) => {
                    self.remove(&id, true).await?;
                    tracing::info!(id = %id, "Evicted image");
                    evicted.push(id);
                }
                None => break,
            }
        }

        Ok(evicted)
    }

    /// Total size of all stored images in bytes.
    pub async fn total_size(&self) -> u64 {
        let index = self.index.read().await;
        index.values().map(|img| img.size_bytes).sum()
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    /// Copy staged content to `sha256/<id>` unless it is already there.
    fn materialize(&self, staged: &StagedImage) -> Result<PathBuf> {
        let blobs = self.store_dir.join("sha256");
        let target = blobs.join(&staged.id);
        if target.exists() {
            return Ok(target);
        }

        std::fs::create_dir_all(&blobs)?;
        let partial = tempfile::Builder::new()
            .prefix(".partial-")
            .tempdir_in(&blobs)?;
        copy_dir_recursive(&staged.content_dir, partial.path()).map_err(|e| {
            NixloadError::ImageStoreError(format!("Failed to copy image to store: {}", e))
        })?;

        if let Err(e) = std::fs::rename(partial.path(), &target) {
            // Lost a race with a concurrent import of the same content.
            if !target.exists() {
                return Err(NixloadError::ImageStoreError(format!(
                    "Failed to move image into {}: {}",
                    target.display(),
                    e
                )));
            }
        }
        Ok(target)
    }

    /// Move `name` onto image `id`. Does not persist.
    async fn assign_name(&self, id: &str, name: &str) -> Option<StoredImage> {
        let mut index = self.index.write().await;
        if !index.contains_key(id) {
            return None;
        }
        for image in index.values_mut() {
            if image.id != id {
                image.names.retain(|n| n != name);
            }
        }
        let image = index.get_mut(id)?;
        if !image.has_name(name) {
            image.names.push(name.to_string());
        }
        Some(image.clone())
    }

    async fn save_index(&self) -> Result<()> {
        let index = self.index.read().await;
        let store_index = StoreIndex {
            images: index.values().cloned().collect(),
        };
        drop(index);

        let data = serde_json::to_string_pretty(&store_index)?;
        let index_path = self.store_dir.join("index.json");

        tokio::fs::write(&index_path, data).await.map_err(|e| {
            NixloadError::ImageStoreError(format!(
                "Failed to write image store index {}: {}",
                index_path.display(),
                e
            ))
        })
    }
}

#[async_trait]
impl ImageBackend for ImageStore {
    async fn load(&self, source: &ImportSource) -> Result<Vec<String>> {
        ImageStore::load(self, source).await
    }

    async fn lookup(&self, id_or_name: &str) -> Result<Option<StoredImage>> {
        Ok(self.get(id_or_name).await)
    }

    async fn tag(&self, id: &str, name: &str) -> Result<StoredImage> {
        ImageStore::tag(self, id, name).await
    }
}

fn load_index(store_dir: &Path) -> Result<HashMap<String, StoredImage>> {
    let index_path = store_dir.join("index.json");
    if !index_path.exists() {
        return Ok(HashMap::new());
    }

    let data = std::fs::read_to_string(&index_path).map_err(|e| {
        NixloadError::ImageStoreError(format!(
            "Failed to read image store index {}: {}",
            index_path.display(),
            e
        ))
    })?;
    let store_index: StoreIndex = serde_json::from_str(&data).map_err(|e| {
        NixloadError::ImageStoreError(format!("Failed to parse image store index: {}", e))
    })?;

    // Drop entries whose data went missing.
    Ok(store_index
        .images
        .into_iter()
        .filter(|img| img.path.exists())
        .map(|img| (img.id.clone(), img))
        .collect())
}

/// Resolve an id, `sha256:` digest, unique id prefix or name to an id.
fn find_id(index: &HashMap<String, StoredImage>, id_or_name: &str) -> Option<String> {
    let hex = id_or_name.strip_prefix("sha256:").unwrap_or(id_or_name);
    if index.contains_key(hex) {
        return Some(hex.to_string());
    }

    if let Some(image) = index
        .values()
        .find(|img| matching_name(img, id_or_name).is_some())
    {
        return Some(image.id.clone());
    }

    if hex.len() >= 12 {
        let mut prefixed = index.keys().filter(|id| id.starts_with(hex));
        if let (Some(id), None) = (prefixed.next(), prefixed.next()) {
            return Some(id.clone());
        }
    }
    None
}

/// The name on `image` that `name` refers to; an untagged name also
/// matches its `:latest` form.
fn matching_name<'a>(image: &'a StoredImage, name: &str) -> Option<&'a str> {
    let latest = format!("{}:{}", name, DEFAULT_TAG);
    image
        .names
        .iter()
        .find(|n| *n == name)
        .or_else(|| image.names.iter().find(|n| **n == latest))
        .map(String::as_str)
}

/// Calculate total size of a directory recursively.
///
/// Symlinks count as themselves and are never followed.
fn dir_size(path: &Path) -> u64 {
    let mut total = 0;
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            match entry.file_type() {
                Ok(file_type) if file_type.is_dir() => total += dir_size(&entry.path()),
                Ok(_) => {
                    if let Ok(meta) = entry.path().symlink_metadata() {
                        total += meta.len();
                    }
                }
                Err(_) => {}
            }
        }
    }
    total
}
