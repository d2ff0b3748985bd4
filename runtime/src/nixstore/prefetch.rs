//! Prefetch strategy: pin an image with `nix-prefetch-docker`, then realize
//! it into the store with `dockerTools.pullImage`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use nixload_core::error::{NixloadError, Result};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::build::{build_args, nix_escape, parse_build_output};
use super::cache::{Producer, ResultCache};
use super::command::{tool_name, CommandRunner};
use super::mapping::ArtifactLocation;
use super::resolver::{ResolutionResult, Resolver};
use crate::oci::reference::{expand_short_name, strip_namespaces, ImageReference, DEFAULT_TAG};

/// Output of `nix-prefetch-docker --json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefetchResult {
    pub image_name: String,
    pub image_digest: String,
    pub sha256: String,
    #[serde(default, alias = "finalImageTag")]
    pub image_tag: Option<String>,
}

impl PrefetchResult {
    /// `dockerTools.pullImage` call fetching exactly this image.
    pub fn pull_image_expr(&self, tag: &str) -> String {
        format!(
            "(import <nixpkgs> {{ }}).dockerTools.pullImage {{ imageName = \"{}\"; imageDigest = \"{}\"; sha256 = \"{}\"; finalImageTag = \"{}\"; }}",
            nix_escape(&self.image_name),
            nix_escape(&self.image_digest),
            nix_escape(&self.sha256),
            nix_escape(tag)
        )
    }
}

/// Resolves names by prefetching them from their registry into the store.
pub struct PrefetchResolver {
    prefetch: PathBuf,
    nix: PathBuf,
    namespace: String,
    cache: ResultCache,
    runner: Arc<dyn CommandRunner>,
}

impl PrefetchResolver {
    pub fn new(
        prefetch: PathBuf,
        nix: PathBuf,
        namespace: impl Into<String>,
        cache: ResultCache,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            prefetch,
            nix,
            namespace: namespace.into(),
            cache,
            runner,
        }
    }

    fn producer(&self) -> Producer<'_> {
        Producer {
            strategy: self.name(),
            expression_file: None,
        }
    }

    async fn prefetch(
        &self,
        reference: &ImageReference,
        cancel: &CancellationToken,
    ) -> Result<PrefetchResult> {
        let tool = tool_name(&self.prefetch);
        let tag = reference.tag.as_deref().unwrap_or(DEFAULT_TAG);
        let args = vec![
            "--image-name".to_string(),
            reference.prefetch_name(),
            "--image-tag".to_string(),
            tag.to_string(),
            "--json".to_string(),
        ];

        let output = self
            .runner
            .run(&self.prefetch, &args, cancel)
            .await?
            .check(&tool)?;

        serde_json::from_str(output.stdout.trim()).map_err(|e| NixloadError::ToolFailure {
            tool,
            message: format!("failed to parse output: {}", e),
            output: output.combined(),
        })
    }
}

#[async_trait]
impl Resolver for PrefetchResolver {
    fn name(&self) -> &'static str {
        "prefetch"
    }

    async fn resolve(
        &self,
        reference: &str,
        cancel: &CancellationToken,
    ) -> Result<ResolutionResult> {
        let expanded = expand_short_name(strip_namespaces(reference, &self.namespace));

        if let Some(cached) = self.cache.get_resolution(&expanded, self.producer()) {
            tracing::info!(reference = %expanded, "Found cached Nix store info");
            return Ok(cached);
        }

        let parsed = ImageReference::parse(&expanded)?;
        tracing::info!(reference = %expanded, "Prefetching image using {}", tool_name(&self.prefetch));
        let prefetched = self.prefetch(&parsed, cancel).await?;

        let tag = prefetched
            .image_tag
            .clone()
            .or_else(|| parsed.tag.clone())
            .unwrap_or_else(|| DEFAULT_TAG.to_string());
        let args = build_args(&prefetched.pull_image_expr(&tag));
        let output = self
            .runner
            .run(&self.nix, &args, cancel)
            .await?
            .check(&tool_name(&self.nix))?;
        let path = parse_build_output(&output.combined(), &expanded)?;

        let result = ResolutionResult {
            location: ArtifactLocation::Path(path),
            canonical_name: Some(format!("{}:{}", prefetched.image_name, tag)),
            digest: Some(prefetched.image_digest),
        };

        if let Err(e) = self.cache.put_resolution(&expanded, self.producer(), &result) {
            tracing::warn!(reference = %expanded, error = %e, "Failed to write to Nix store cache");
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nixstore::command::CommandOutput;
    use crate::nixstore::test_support::FakeRunner;
    use tempfile::TempDir;

    const PREFETCH_JSON: &str = r#"{
  "imageName": "library/redis",
  "imageDigest": "sha256:0123456789abcdef",
  "sha256": "1xlzwc2r1qgbb2n4vn6mzb4rkmjkl0kblvxc0lyzk4w1lqflb5jf",
  "finalImageName": "library/redis",
  "finalImageTag": "7"
}"#;

    fn resolver(tmp: &TempDir, runner: Arc<FakeRunner>) -> PrefetchResolver {
        PrefetchResolver::new(
            PathBuf::from("nix-prefetch-docker"),
            PathBuf::from("nix"),
            "nix",
            ResultCache::new(tmp.path().join("cache")),
            runner,
        )
    }

    #[test]
    fn test_parse_prefetch_json() {
        let result: PrefetchResult = serde_json::from_str(PREFETCH_JSON).unwrap();
        assert_eq!(result.image_name, "library/redis");
        assert_eq!(result.image_digest, "sha256:0123456789abcdef");
        assert_eq!(result.image_tag.as_deref(), Some("7"));
    }

    #[test]
    fn test_pull_image_expr() {
        let result: PrefetchResult = serde_json::from_str(PREFETCH_JSON).unwrap();
        let expr = result.pull_image_expr("7");
        assert!(expr.starts_with("(import <nixpkgs> { }).dockerTools.pullImage {"));
        assert!(expr.contains("imageName = \"library/redis\";"));
        assert!(expr.contains("imageDigest = \"sha256:0123456789abcdef\";"));
        assert!(expr.contains("finalImageTag = \"7\";"));
    }

    #[tokio::test]
    async fn test_resolve_prefetches_then_builds() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::with_outputs(vec![
            CommandOutput {
                status: Some(0),
                stdout: PREFETCH_JSON.to_string(),
                stderr: "Getting image source signatures\n".to_string(),
            },
            CommandOutput::ok("/nix/store/xyz-docker-image-redis.tar\n"),
        ]));
        let resolver = resolver(&tmp, runner.clone());

        let result = resolver
            .resolve("redis:7", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            result.location,
            ArtifactLocation::Path(PathBuf::from("/nix/store/xyz-docker-image-redis.tar"))
        );
        assert_eq!(result.canonical_name.as_deref(), Some("library/redis:7"));
        assert_eq!(result.digest.as_deref(), Some("sha256:0123456789abcdef"));

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0].1,
            vec!["--image-name", "library/redis", "--image-tag", "7", "--json"]
        );
        assert_eq!(calls[1].0, PathBuf::from("nix"));
    }

    #[tokio::test]
    async fn test_cached_result_skips_both_tools() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::with_outputs(vec![
            CommandOutput::ok(PREFETCH_JSON),
            CommandOutput::ok("/nix/store/xyz-docker-image-redis.tar\n"),
        ]));
        let resolver = resolver(&tmp, runner.clone());
        let cancel = CancellationToken::new();

        let first = resolver.resolve("redis:7", &cancel).await.unwrap();
        let second = resolver.resolve("redis:7", &cancel).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_unparsable_prefetch_output() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::with_output(CommandOutput::ok("not json")));
        let resolver = resolver(&tmp, runner);

        let err = resolver
            .resolve("redis", &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            NixloadError::ToolFailure { tool, output, .. } => {
                assert_eq!(tool, "nix-prefetch-docker");
                assert!(output.contains("not json"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
