//! Image reference parsing and normalization.
//!
//! Parses references like `ghcr.io/org/app:v1` into structured components and
//! derives the lookup keys used by the Nix store resolvers:
//!
//! - `localhost/` and backend namespace prefixes are stripped before lookup
//! - bare names expand to the default registry's `library/` namespace
//! - cache keys replace path separators so they can be used as file names

use nixload_core::error::{NixloadError, Result};

/// Default registry when none is specified.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when none is specified.
pub const DEFAULT_TAG: &str = "latest";

/// Namespace that Nix-built images are tagged under.
pub const NIX_NAMESPACE: &str = "nix";

/// Prefix of locally built images without a registry.
const LOCALHOST_PREFIX: &str = "localhost/";

/// Parsed OCI image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname (e.g., "ghcr.io", "docker.io")
    pub registry: String,
    /// Repository path (e.g., "library/nginx", "org/app")
    pub repository: String,
    /// Tag (e.g., "latest", "v1")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `myuser/app:1.0` → docker.io/myuser/app:1.0
    /// - `registry.io:5000/app` → registry.io:5000/app:latest
    /// - `ghcr.io/org/app@sha256:abc` → ghcr.io/org/app@sha256:abc
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(NixloadError::InvalidReference(
                "Empty image reference".to_string(),
            ));
        }

        let (name_tag, digest) = split_digest(reference)?;
        let (name, tag) = split_tag(name_tag);
        let (registry, repository) = split_registry_repository(name)?;

        let tag = match (tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (tag, _) => tag,
        };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }

    /// Repository name as `nix-prefetch-docker` expects it.
    ///
    /// The default registry is implied and therefore omitted.
    pub fn prefetch_name(&self) -> String {
        if self.registry == DEFAULT_REGISTRY {
            self.repository.clone()
        } else {
            format!("{}/{}", self.registry, self.repository)
        }
    }

    /// Short attribute name used to select an image from a Nix expression.
    ///
    /// Drops the default registry and `library/` namespace, and the tag
    /// when it is the default one: `docker.io/library/app:latest` → `app`.
    pub fn attribute_name(&self) -> String {
        let mut name = if self.registry == DEFAULT_REGISTRY {
            self.repository
                .strip_prefix("library/")
                .unwrap_or(&self.repository)
                .to_string()
        } else {
            format!("{}/{}", self.registry, self.repository)
        };
        if let Some(ref tag) = self.tag {
            if tag != DEFAULT_TAG {
                name.push(':');
                name.push_str(tag);
            }
        }
        if let Some(ref digest) = self.digest {
            name.push('@');
            name.push_str(digest);
        }
        name
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

/// Strip a leading `localhost/` and then a leading `<namespace>/`.
///
/// Each prefix is removed at most once, so `localhost/nix/app`,
/// `nix/app`, `localhost/app` and `app` all normalize to `app`.
pub fn strip_namespaces<'a>(reference: &'a str, namespace: &str) -> &'a str {
    let reference = reference.trim();
    let reference = reference
        .strip_prefix(LOCALHOST_PREFIX)
        .unwrap_or(reference);
    if namespace.is_empty() {
        return reference;
    }
    reference
        .strip_prefix(namespace)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(reference)
}

/// Expand a bare name (no `/`) into the default registry's library namespace.
pub fn expand_short_name(name: &str) -> String {
    if name.contains('/') {
        name.to_string()
    } else {
        format!("{}/library/{}", DEFAULT_REGISTRY, name)
    }
}

/// File-name-safe cache key for a reference.
pub fn cache_key(name: &str) -> String {
    name.replace('/', "_")
}

/// Canonical tag for an imported image.
///
/// Strips `localhost/`; when a namespace is given, the result carries
/// `<namespace>/` exactly once regardless of how often the input did.
pub fn canonical_tag(reference: &str, namespace: Option<&str>) -> String {
    let reference = reference.trim();
    let reference = reference
        .strip_prefix(LOCALHOST_PREFIX)
        .unwrap_or(reference);

    match namespace.filter(|ns| !ns.is_empty()) {
        None => reference.to_string(),
        Some(ns) => {
            let prefix = format!("{}/", ns);
            let mut bare = reference;
            while let Some(rest) = bare.strip_prefix(prefix.as_str()) {
                bare = rest;
            }
            format!("{}{}", prefix, bare)
        }
    }
}

/// Split off a trailing `@algorithm:hex` digest.
fn split_digest(reference: &str) -> Result<(&str, Option<String>)> {
    match reference.rfind('@') {
        Some(at_pos) => {
            let digest = &reference[at_pos + 1..];
            if !digest.contains(':') {
                return Err(NixloadError::InvalidReference(format!(
                    "Invalid digest format in reference '{}': expected algorithm:hex",
                    reference
                )));
            }
            Ok((&reference[..at_pos], Some(digest.to_string())))
        }
        None => Ok((reference, None)),
    }
}

/// Split `name:tag` on the last colon after the last slash.
///
/// A colon before the last slash belongs to a registry port.
fn split_tag(name_tag: &str) -> (&str, Option<String>) {
    let search_from = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
    match name_tag[search_from..].rfind(':') {
        Some(pos) => {
            let colon_pos = search_from + pos;
            (
                &name_tag[..colon_pos],
                Some(name_tag[colon_pos + 1..].to_string()),
            )
        }
        None => (name_tag, None),
    }
}

/// Split a name into registry and repository components.
fn split_registry_repository(name: &str) -> Result<(String, String)> {
    // A first component with a dot or colon, or "localhost", is a registry
    if let Some(slash_pos) = name.find('/') {
        let first = &name[..slash_pos];
        if first.contains('.') || first.contains(':') || first == "localhost" {
            let repo = &name[slash_pos + 1..];
            if repo.is_empty() {
                return Err(NixloadError::InvalidReference(format!(
                    "Empty repository in reference '{}'",
                    name
                )));
            }
            return Ok((first.to_string(), repo.to_string()));
        }
    }

    let repository = if name.contains('/') {
        name.to_string()
    } else {
        format!("library/{}", name)
    };

    Ok((DEFAULT_REGISTRY.to_string(), repository))
}
