//! Build-tool strategy: realize an image attribute with `nix build`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use nixload_core::error::{NixloadError, Result};
use tokio_util::sync::CancellationToken;

use super::cache::{Producer, ResultCache};
use super::command::{last_output_line, tool_name, CommandRunner};
use super::mapping::ArtifactLocation;
use super::resolver::{ResolutionResult, Resolver};
use crate::oci::reference::{expand_short_name, strip_namespaces, ImageReference};

/// Resolves names by evaluating an expression file with the build tool.
///
/// Results are cached per reference; the tool runs only on a cache miss.
pub struct BuildToolResolver {
    nix: PathBuf,
    expression_file: PathBuf,
    namespace: String,
    cache: ResultCache,
    runner: Arc<dyn CommandRunner>,
}

impl BuildToolResolver {
    pub fn new(
        nix: PathBuf,
        expression_file: PathBuf,
        namespace: impl Into<String>,
        cache: ResultCache,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            nix,
            expression_file,
            namespace: namespace.into(),
            cache,
            runner,
        }
    }

    fn producer(&self) -> Producer<'_> {
        Producer {
            strategy: self.name(),
            expression_file: Some(&self.expression_file),
        }
    }
}

#[async_trait]
impl Resolver for BuildToolResolver {
    fn name(&self) -> &'static str {
        "build-tool"
    }

    async fn resolve(
        &self,
        reference: &str,
        cancel: &CancellationToken,
    ) -> Result<ResolutionResult> {
        let normalized = strip_namespaces(reference, &self.namespace);
        let expanded = expand_short_name(normalized);
        if expanded != normalized {
            tracing::info!(
                reference = %normalized,
                expanded = %expanded,
                "Short name detected, expanding for Nix store"
            );
        }

        if let Some(cached) = self.cache.get_resolution(&expanded, self.producer()) {
            tracing::info!(reference = %expanded, "Found cached Nix store info");
            return Ok(cached);
        }

        let attribute = ImageReference::parse(&expanded)?.attribute_name();
        let args = build_args(&select_attribute_expr(&self.expression_file, &attribute));
        let tool = tool_name(&self.nix);

        tracing::info!(
            reference = %expanded,
            attribute = %attribute,
            "Building image with {}",
            tool
        );
        let output = self.runner.run(&self.nix, &args, cancel).await?.check(&tool)?;
        let path = parse_build_output(&output.combined(), &attribute)?;

        let result = ResolutionResult {
            location: ArtifactLocation::Path(path),
            canonical_name: Some(attribute),
            digest: None,
        };

        if let Err(e) = self.cache.put_resolution(&expanded, self.producer(), &result) {
            tracing::warn!(reference = %expanded, error = %e, "Failed to write to Nix store cache");
        }

        Ok(result)
    }
}

/// Arguments for `nix build` of a single expression, printing the out path.
pub fn build_args(expr: &str) -> Vec<String> {
    [
        "--extra-experimental-features",
        "nix-command",
        "build",
        "--impure",
        "--no-link",
        "--expr",
        expr,
        "--print-out-paths",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Expression importing `file` and selecting `attribute`.
///
/// The file may evaluate to an attribute set or to a function taking one.
pub fn select_attribute_expr(file: &Path, attribute: &str) -> String {
    format!(
        "let src = import (/. + \"{}\"); images = if builtins.isFunction src then src {{ }} else src; in images.\"{}\"",
        nix_escape(&file.display().to_string()),
        nix_escape(attribute)
    )
}

/// Path from build output: the last non-blank line.
pub fn parse_build_output(output: &str, attribute: &str) -> Result<PathBuf> {
    last_output_line(output)
        .map(PathBuf::from)
        .ok_or_else(|| NixloadError::NotFound(format!("{} (build produced no output path)", attribute)))
}

/// Escape a value for a double-quoted Nix string.
pub(crate) fn nix_escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace("${", "\\${")
}
