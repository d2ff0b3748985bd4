//! Loader: import a resolved artifact into the image store and tag it.

use std::sync::Arc;

use nixload_core::error::{NixloadError, Result};
use tokio_util::sync::CancellationToken;

use super::resolver::{ResolutionResult, Resolver};
use crate::oci::reference::canonical_tag;
use crate::oci::{ImageBackend, ImportSource, StoredImage};

/// Resolves image names and loads the results into an [`ImageBackend`].
///
/// Holds no mutable state; every call is independent. Retries are left
/// to the caller.
pub struct ImageLoader {
    resolver: Arc<dyn Resolver>,
    backend: Arc<dyn ImageBackend>,
    tag_namespace: Option<String>,
}

impl ImageLoader {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        backend: Arc<dyn ImageBackend>,
        tag_namespace: Option<String>,
    ) -> Self {
        Self {
            resolver,
            backend,
            tag_namespace,
        }
    }

    /// Whether a resolution strategy was found at construction.
    pub fn is_enabled(&self) -> bool {
        self.resolver.is_enabled()
    }

    pub fn strategy(&self) -> &'static str {
        self.resolver.name()
    }

    pub fn tag_namespace(&self) -> Option<&str> {
        self.tag_namespace.as_deref()
    }

    /// Resolve `name` to an artifact location.
    pub async fn resolve_image(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<ResolutionResult> {
        self.resolver.resolve(name, cancel).await
    }

    /// Import a resolved artifact and tag it for `name`.
    ///
    /// A tagging failure leaves the imported image in place.
    pub async fn load_image(
        &self,
        name: &str,
        resolved: &ResolutionResult,
        cancel: &CancellationToken,
    ) -> Result<StoredImage> {
        if cancel.is_cancelled() {
            return Err(NixloadError::Cancelled(format!("load of {}", name)));
        }

        let source = ImportSource::from(&resolved.location);
        tracing::info!(reference = %name, location = %resolved.location, "Loading image from Nix store");

        let ids = self.backend.load(&source).await?;
        let id = ids.first().ok_or_else(|| {
            NixloadError::ImportFailure(format!(
                "no images imported from {}",
                resolved.location
            ))
        })?;
        if ids.len() > 1 {
            tracing::debug!(count = ids.len(), id = %id, "Artifact contained several images, using the first");
        }

        let image = self.backend.lookup(id).await?.ok_or_else(|| {
            NixloadError::StoreInconsistency(format!(
                "image {} was imported but cannot be looked up",
                id
            ))
        })?;

        let tag = canonical_tag(
            resolved.canonical_name.as_deref().unwrap_or(name),
            self.tag_namespace.as_deref(),
        );
        let tagged = self
            .backend
            .tag(&image.id, &tag)
            .await
            .map_err(|e| NixloadError::TagFailure {
                name: tag.clone(),
                message: e.to_string(),
            })?;

        tracing::info!(reference = %name, id = %tagged.short_id(), tag = %tag, "Loaded image");
        Ok(tagged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nixstore::mapping::ArtifactLocation;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Backend with scripted answers that records tag calls.
    struct FakeBackend {
        ids: Vec<String>,
        found: bool,
        tag_error: bool,
        tags: Mutex<Vec<(String, String)>>,
    }

    impl FakeBackend {
        fn importing(ids: &[&str]) -> Self {
            Self {
                ids: ids.iter().map(|s| s.to_string()).collect(),
                found: true,
                tag_error: false,
                tags: Mutex::new(Vec::new()),
            }
        }

        fn image(id: &str) -> StoredImage {
            StoredImage {
                id: id.to_string(),
                names: Vec::new(),
                digest: format!("sha256:{}", id),
                size_bytes: 0,
                loaded_at: Utc::now(),
                last_used: Utc::now(),
                path: PathBuf::from("/store").join(id),
            }
        }

        fn tags(&self) -> Vec<(String, String)> {
            self.tags.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ImageBackend for FakeBackend {
        async fn load(&self, _source: &ImportSource) -> Result<Vec<String>> {
            Ok(self.ids.clone())
        }

        async fn lookup(&self, id: &str) -> Result<Option<StoredImage>> {
            Ok(self.found.then(|| Self::image(id)))
        }

        async fn tag(&self, id: &str, name: &str) -> Result<StoredImage> {
            self.tags
                .lock()
                .unwrap()
                .push((id.to_string(), name.to_string()));
            if self.tag_error {
                return Err(NixloadError::ImageStoreError("index is read-only".to_string()));
            }
            let mut image = Self::image(id);
            image.names.push(name.to_string());
            Ok(image)
        }
    }

    fn loader(backend: Arc<FakeBackend>, namespace: Option<&str>) -> ImageLoader {
        ImageLoader::new(
            Arc::new(crate::nixstore::DisabledResolver::new("test")),
            backend,
            namespace.map(str::to_string),
        )
    }

    fn resolved(canonical: Option<&str>) -> ResolutionResult {
        ResolutionResult {
            location: ArtifactLocation::Path(PathBuf::from("/nix/store/abc-app")),
            canonical_name: canonical.map(str::to_string),
            digest: None,
        }
    }

    #[tokio::test]
    async fn test_load_tags_first_image() {
        let backend = Arc::new(FakeBackend::importing(&["id1", "id2"]));
        let image = loader(backend.clone(), None)
            .load_image("localhost/app", &resolved(None), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(image.id, "id1");
        assert_eq!(image.names, vec!["app"]);
        assert_eq!(backend.tags(), vec![("id1".to_string(), "app".to_string())]);
    }

    #[tokio::test]
    async fn test_canonical_name_preferred_over_request() {
        let backend = Arc::new(FakeBackend::importing(&["id1"]));
        loader(backend.clone(), None)
            .load_image("redis:7", &resolved(Some("library/redis:7")), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(backend.tags()[0].1, "library/redis:7");
    }

    #[tokio::test]
    async fn test_namespace_present_exactly_once() {
        for name in ["app", "nix/app", "localhost/nix/app", "localhost/app"] {
            let backend = Arc::new(FakeBackend::importing(&["id1"]));
            loader(backend.clone(), Some("nix"))
                .load_image(name, &resolved(None), &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(backend.tags()[0].1, "nix/app", "input {name}");
        }
    }

    #[tokio::test]
    async fn test_zero_ids_is_import_failure_without_tag() {
        let backend = Arc::new(FakeBackend::importing(&[]));
        let err = loader(backend.clone(), None)
            .load_image("app", &resolved(None), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, NixloadError::ImportFailure(_)));
        assert!(backend.tags().is_empty());
    }

    #[tokio::test]
    async fn test_missing_after_import_is_store_inconsistency() {
        let backend = Arc::new(FakeBackend {
            found: false,
            ..FakeBackend::importing(&["id1"])
        });
        let err = loader(backend.clone(), None)
            .load_image("app", &resolved(None), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, NixloadError::StoreInconsistency(_)));
        assert!(backend.tags().is_empty());
    }

    #[tokio::test]
    async fn test_tag_error_is_tag_failure() {
        let backend = Arc::new(FakeBackend {
            tag_error: true,
            ..FakeBackend::importing(&["id1"])
        });
        let err = loader(backend, Some("nix"))
            .load_image("app", &resolved(None), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            NixloadError::TagFailure { name, message } => {
                assert_eq!(name, "nix/app");
                assert!(message.contains("read-only"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_import() {
        let backend = Arc::new(FakeBackend::importing(&["id1"]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = loader(backend.clone(), None)
            .load_image("app", &resolved(None), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, NixloadError::Cancelled(_)));
        assert!(backend.tags().is_empty());
    }

    #[tokio::test]
    async fn test_enablement_mirrors_resolver() {
        let backend = Arc::new(FakeBackend::importing(&[]));
        let loader = loader(backend, None);
        assert!(!loader.is_enabled());
        assert_eq!(loader.strategy(), "disabled");
        assert!(matches!(
            loader.resolve_image("app", &CancellationToken::new()).await,
            Err(NixloadError::Disabled(_))
        ));
    }
}
