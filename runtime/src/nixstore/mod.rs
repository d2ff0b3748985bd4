//! Nix store backend: resolve image names to pre-built store artifacts.
//!
//! ```text
//! name ──► Resolver ──► ResolutionResult ──► ImageLoader ──► tagged StoredImage
//!            │
//!            ├── MappingResolver    images.json lookup
//!            ├── BuildToolResolver  nix build of images.nix  ─┐
//!            ├── PrefetchResolver   nix-prefetch-docker + nix ─┴─ ResultCache
//!            └── DisabledResolver
//! ```
//!
//! Concurrent resolutions of the same name may both run the build tool
//! and both write the cache entry; the later write wins.

mod build;
mod cache;
mod command;
mod loader;
mod mapping;
mod prefetch;
mod resolver;

#[cfg(test)]
mod test_support;

pub use build::{build_args, parse_build_output, select_attribute_expr, BuildToolResolver};
pub use cache::ResultCache;
pub use command::{CommandOutput, CommandRunner, TokioCommandRunner};
pub use loader::ImageLoader;
pub use mapping::{ArtifactLocation, MappingResolver, MappingTable};
pub use prefetch::{PrefetchResolver, PrefetchResult};
pub use resolver::{select_resolver, DisabledResolver, ResolutionResult, Resolver};
