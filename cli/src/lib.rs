//! nixload CLI - resolve and load container images from the Nix store.

pub mod commands;
pub mod output;
