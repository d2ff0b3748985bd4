//! nixload Core - Foundational Types
//!
//! Error taxonomy and configuration shared by the runtime and CLI crates.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{ConfigLocations, NixloadConfig, StrategyKind};
pub use error::{NixloadError, Result};

/// nixload version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
