//! nixload Runtime - resolve container image names to Nix store artifacts.
//!
//! This crate provides the resolution strategies (mapping file, `nix build`,
//! `nix-prefetch-docker`), the on-disk result cache, the local image store
//! and the [`Runtime`] facade hosts call to acquire images.

#![allow(clippy::result_large_err)]

pub mod image;
pub mod nixstore;
pub mod oci;

// Re-export common types
pub use image::{Image, Runtime};
pub use nixstore::{
    select_resolver, ArtifactLocation, BuildToolResolver, CommandOutput, CommandRunner,
    DisabledResolver, ImageLoader, MappingResolver, MappingTable, PrefetchResolver,
    ResolutionResult, Resolver, ResultCache, TokioCommandRunner,
};
pub use oci::{ImageBackend, ImageReference, ImageStore, ImportSource, Removal, StoredImage};

/// nixload Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
