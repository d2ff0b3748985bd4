//! Resolver interface and strategy selection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use nixload_core::config::{probe, ConfigLocations, NixloadConfig, StrategyKind};
use nixload_core::error::{NixloadError, Result};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::build::BuildToolResolver;
use super::cache::ResultCache;
use super::command::CommandRunner;
use super::mapping::{ArtifactLocation, MappingResolver};
use super::prefetch::PrefetchResolver;
use crate::oci::reference::NIX_NAMESPACE;

/// Outcome of resolving an image reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionResult {
    /// Where the built artifact lives
    pub location: ArtifactLocation,
    /// Name the backend assigned to the artifact, used for tagging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_name: Option<String>,
    /// Registry digest, when the backend knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Turns an image name into the location of a pre-built artifact.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Short strategy name for logs and `info` output.
    fn name(&self) -> &'static str;

    fn is_enabled(&self) -> bool {
        true
    }

    async fn resolve(
        &self,
        reference: &str,
        cancel: &CancellationToken,
    ) -> Result<ResolutionResult>;
}

/// Resolver used when no external dependency was found.
#[derive(Debug, Clone)]
pub struct DisabledResolver {
    reason: String,
}

impl DisabledResolver {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

#[async_trait]
impl Resolver for DisabledResolver {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn resolve(
        &self,
        _reference: &str,
        _cancel: &CancellationToken,
    ) -> Result<ResolutionResult> {
        Err(NixloadError::Disabled(self.reason.clone()))
    }
}

/// Pick a resolver by probing for each strategy's external dependency.
///
/// Never fails: a missing dependency yields a [`DisabledResolver`].
pub fn select_resolver(
    config: &NixloadConfig,
    locations: &ConfigLocations,
    runner: Arc<dyn CommandRunner>,
) -> Arc<dyn Resolver> {
    let probed = Probe::run(config, locations);
    let namespace = config
        .tag_namespace
        .clone()
        .unwrap_or_else(|| NIX_NAMESPACE.to_string());

    let mapping = || {
        probed
            .mapping_file
            .clone()
            .map(|file| Arc::new(MappingResolver::new(file, namespace.clone())) as Arc<dyn Resolver>)
    };
    let build_tool = || match (&probed.nix, &probed.expression_file) {
        (Some(nix), Some(expr)) => Some(Arc::new(BuildToolResolver::new(
            nix.clone(),
            expr.clone(),
            namespace.clone(),
            open_cache(config),
            runner.clone(),
        )) as Arc<dyn Resolver>),
        _ => None,
    };
    let prefetch = || match (&probed.prefetch, &probed.nix) {
        (Some(prefetch), Some(nix)) => Some(Arc::new(PrefetchResolver::new(
            prefetch.clone(),
            nix.clone(),
            namespace.clone(),
            open_cache(config),
            runner.clone(),
        )) as Arc<dyn Resolver>),
        _ => None,
    };

    let selected = match config.strategy {
        StrategyKind::Auto => mapping().or_else(build_tool).or_else(prefetch),
        StrategyKind::Mapping => mapping(),
        StrategyKind::BuildTool => build_tool(),
        StrategyKind::Prefetch => prefetch(),
    };

    match selected {
        Some(resolver) => {
            tracing::info!(strategy = resolver.name(), "Nix store backend enabled");
            resolver
        }
        None => {
            let reason = probed.missing(config.strategy, config);
            tracing::info!(reason = %reason, "Nix store backend is disabled");
            Arc::new(DisabledResolver::new(reason))
        }
    }
}

/// External dependencies found at construction time.
#[derive(Debug, Default)]
struct Probe {
    mapping_file: Option<PathBuf>,
    expression_file: Option<PathBuf>,
    nix: Option<PathBuf>,
    prefetch: Option<PathBuf>,
}

impl Probe {
    fn run(config: &NixloadConfig, locations: &ConfigLocations) -> Self {
        Self {
            mapping_file: existing(config.mapping_file.as_deref())
                .or_else(|| locations.mapping_file()),
            expression_file: existing(config.expression_file.as_deref())
                .or_else(|| locations.expression_file())
                .map(|path| std::fs::canonicalize(&path).unwrap_or(path)),
            nix: find_binary(&config.nix_binary),
            prefetch: find_binary(&config.prefetch_binary),
        }
    }

    fn missing(&self, strategy: StrategyKind, config: &NixloadConfig) -> String {
        let mut missing = Vec::new();
        let wants = |kind| strategy == StrategyKind::Auto || strategy == kind;

        if wants(StrategyKind::Mapping) && self.mapping_file.is_none() {
            missing.push("no images.json mapping file".to_string());
        }
        if (wants(StrategyKind::BuildTool) || wants(StrategyKind::Prefetch)) && self.nix.is_none() {
            missing.push(format!("{} not found in PATH", config.nix_binary));
        }
        if wants(StrategyKind::BuildTool) && self.expression_file.is_none() {
            missing.push("no images.nix expression file".to_string());
        }
        if wants(StrategyKind::Prefetch) && self.prefetch.is_none() {
            missing.push(format!("{} not found in PATH", config.prefetch_binary));
        }
        missing.join(", ")
    }
}

fn existing(path: Option<&Path>) -> Option<PathBuf> {
    let path = path?;
    if probe(path) {
        Some(path.to_path_buf())
    } else {
        tracing::warn!(path = %path.display(), "Configured file does not exist");
        None
    }
}

fn find_binary(name: &str) -> Option<PathBuf> {
    match which::which(name) {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::debug!(binary = %name, error = %e, "Binary not found");
            None
        }
    }
}

fn open_cache(config: &NixloadConfig) -> ResultCache {
    match config.cache_dir() {
        Some(dir) => {
            tracing::info!(path = %dir.display(), "Nix store cache enabled");
            ResultCache::new(dir)
        }
        None => {
            tracing::warn!("Failed to determine user cache directory, caching disabled");
            ResultCache::disabled()
        }
    }
}
