use thiserror::Error;

/// nixload error types
#[derive(Error, Debug)]
pub enum NixloadError {
    /// The Nix store backend has no usable external dependency
    #[error("Nix store backend is not enabled: {0}")]
    Disabled(String),

    /// Key absent from the mapping, or the tool produced no path
    #[error("Image not found in Nix store: {0}")]
    NotFound(String),

    /// External tool exited non-zero or produced unparsable output
    #[error("{tool} failed: {message}")]
    ToolFailure {
        tool: String,
        message: String,
        /// Captured stderr/stdout for diagnostics
        output: String,
    },

    /// Store import produced zero images
    #[error("Nothing imported from {0}")]
    ImportFailure(String),

    /// Lookup after a successful import returned nothing
    #[error("Image store inconsistency: {0}")]
    StoreInconsistency(String),

    /// Tagging after a successful import failed
    #[error("Failed to tag image as {name}: {message}")]
    TagFailure { name: String, message: String },

    /// Resolution is disabled or failed; the host should use its normal path
    #[error("Image resolution not available: {0}")]
    ResolutionUnavailable(String),

    /// Operation cancelled by the caller
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    TimeoutError(String),

    /// Malformed image reference
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    /// Mapping Source could not be read or parsed
    #[error("Mapping file error: {0}")]
    MappingError(String),

    /// Local image store error
    #[error("Image store error: {0}")]
    ImageStoreError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl NixloadError {
    /// Whether the host should fall back to its normal acquisition path.
    pub fn is_fallback_signal(&self) -> bool {
        matches!(self, NixloadError::ResolutionUnavailable(_))
    }

    /// Whether the error happened after an artifact was already imported.
    ///
    /// The imported image is left in the store in that case.
    pub fn is_post_import(&self) -> bool {
        matches!(
            self,
            NixloadError::StoreInconsistency(_) | NixloadError::TagFailure { .. }
        )
    }
}

impl From<serde_json::Error> for NixloadError {
    fn from(err: serde_json::Error) -> Self {
        NixloadError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for NixloadError {
    fn from(err: serde_yaml::Error) -> Self {
        NixloadError::SerializationError(err.to_string())
    }
}

/// Result type alias for nixload operations
pub type Result<T> = std::result::Result<T, NixloadError>;
