use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{NixloadError, Result};

/// Application directory name under the user config/cache roots.
pub const APP_NAME: &str = "nixload";

/// File name of the JSON Mapping Source in a config directory.
pub const MAPPING_FILE_NAME: &str = "images.json";

/// File name of the Nix evaluation source in a config directory.
pub const EXPRESSION_FILE_NAME: &str = "images.nix";

/// System-wide configuration directory.
pub const SYSTEM_CONFIG_DIR: &str = "/etc/nixload";

/// Default maximum image store size: 10 GB.
pub const DEFAULT_MAX_STORE_SIZE: u64 = 10 * 1024 * 1024 * 1024;

/// nixload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NixloadConfig {
    /// Resolution strategy (auto probes the environment)
    pub strategy: StrategyKind,

    /// Explicit Mapping Source (JSON)
    pub mapping_file: Option<PathBuf>,

    /// Explicit Nix evaluation source for the build-tool strategy
    pub expression_file: Option<PathBuf>,

    /// Name or path of the `nix` binary
    pub nix_binary: String,

    /// Name or path of the `nix-prefetch-docker` binary
    pub prefetch_binary: String,

    /// Result cache directory (default: <user-cache-dir>/nixload/nixstore)
    pub cache_dir: Option<PathBuf>,

    /// Namespace prefix applied to tags of imported images (e.g. "nix")
    pub tag_namespace: Option<String>,

    /// Upper bound on a single external-tool invocation, in seconds
    pub tool_timeout_secs: Option<u64>,

    /// Local image store directory (default: ~/.nixload/images)
    pub images_dir: Option<PathBuf>,

    /// Maximum total size of the image store in bytes
    pub max_store_size: u64,
}

impl Default for NixloadConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Auto,
            mapping_file: None,
            expression_file: None,
            nix_binary: "nix".to_string(),
            prefetch_binary: "nix-prefetch-docker".to_string(),
            cache_dir: None,
            tag_namespace: None,
            tool_timeout_secs: None,
            images_dir: None,
            max_store_size: DEFAULT_MAX_STORE_SIZE,
        }
    }
}

impl NixloadConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            NixloadError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_yaml::from_str(&data).map_err(|e| {
            NixloadError::ConfigError(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Load `<user-config-dir>/nixload/config.yaml`, or defaults when absent.
    pub fn load_default() -> Result<Self> {
        match dirs::config_dir().map(|d| d.join(APP_NAME).join("config.yaml")) {
            Some(path) if probe(&path) => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Directory of the local image store.
    pub fn images_dir(&self) -> PathBuf {
        self.images_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".nixload"))
                .unwrap_or_else(|| PathBuf::from(".nixload"))
                .join("images")
        })
    }

    /// Directory of the result cache, if one can be determined.
    pub fn cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir
            .clone()
            .or_else(|| dirs::cache_dir().map(|d| d.join(APP_NAME).join("nixstore")))
    }

    /// Timeout for a single external-tool invocation.
    pub fn tool_timeout(&self) -> Option<std::time::Duration> {
        self.tool_timeout_secs.map(std::time::Duration::from_secs)
    }
}

/// Resolution strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Probe: mapping file, then build tool, then prefetch tool
    Auto,
    /// Static lookup in a JSON mapping file
    Mapping,
    /// `nix build` against an evaluation source
    BuildTool,
    /// `nix-prefetch-docker` followed by `nix build`
    Prefetch,
}

impl Default for StrategyKind {
    fn default() -> Self {
        Self::Auto
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Mapping => write!(f, "mapping"),
            Self::BuildTool => write!(f, "build-tool"),
            Self::Prefetch => write!(f, "prefetch"),
        }
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "mapping" => Ok(Self::Mapping),
            "build-tool" => Ok(Self::BuildTool),
            "prefetch" => Ok(Self::Prefetch),
            _ => Err(format!(
                "unknown strategy: '{}' (supported: auto, mapping, build-tool, prefetch)",
                s
            )),
        }
    }
}

/// Standard locations searched for the Mapping Source and evaluation source.
///
/// The user config directory is searched first, then the system directory.
#[derive(Debug, Clone)]
pub struct ConfigLocations {
    pub user_dir: Option<PathBuf>,
    pub system_dir: PathBuf,
}

impl Default for ConfigLocations {
    fn default() -> Self {
        Self {
            user_dir: dirs::config_dir().map(|d| d.join(APP_NAME)),
            system_dir: PathBuf::from(SYSTEM_CONFIG_DIR),
        }
    }
}

impl ConfigLocations {
    /// First existing `images.json`, if any.
    pub fn mapping_file(&self) -> Option<PathBuf> {
        self.find(MAPPING_FILE_NAME)
    }

    /// First existing `images.nix`, if any.
    pub fn expression_file(&self) -> Option<PathBuf> {
        self.find(EXPRESSION_FILE_NAME)
    }

    fn find(&self, file_name: &str) -> Option<PathBuf> {
        self.user_dir
            .iter()
            .chain(std::iter::once(&self.system_dir))
            .map(|dir| dir.join(file_name))
            .find(|path| probe(path))
    }
}

/// Check whether a path exists. Probe errors are logged and count as absent.
pub fn probe(path: &Path) -> bool {
    match path.try_exists() {
        Ok(exists) => exists,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to probe path");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = NixloadConfig::default();
        assert_eq!(config.strategy, StrategyKind::Auto);
        assert_eq!(config.nix_binary, "nix");
        assert_eq!(config.prefetch_binary, "nix-prefetch-docker");
        assert!(config.tag_namespace.is_none());
        assert_eq!(config.max_store_size, DEFAULT_MAX_STORE_SIZE);
    }

    #[test]
    fn test_load_yaml_partial() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(
            &path,
            "strategy: build-tool\ntag_namespace: nix\ntool_timeout_secs: 30\n",
        )
        .unwrap();

        let config = NixloadConfig::load(&path).unwrap();
        assert_eq!(config.strategy, StrategyKind::BuildTool);
        assert_eq!(config.tag_namespace.as_deref(), Some("nix"));
        assert_eq!(
            config.tool_timeout(),
            Some(std::time::Duration::from_secs(30))
        );
        // Unspecified fields keep their defaults
        assert_eq!(config.nix_binary, "nix");
    }

    #[test]
    fn test_load_malformed_yaml() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "strategy: [unterminated").unwrap();

        let err = NixloadConfig::load(&path).unwrap_err();
        assert!(matches!(err, NixloadError::ConfigError(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = NixloadConfig::load(Path::new("/nonexistent/config.yaml")).unwrap_err();
        assert!(matches!(err, NixloadError::ConfigError(_)));
    }

    #[test]
    fn test_explicit_dirs() {
        let config = NixloadConfig {
            cache_dir: Some(PathBuf::from("/tmp/cache")),
            images_dir: Some(PathBuf::from("/tmp/images")),
            ..Default::default()
        };
        assert_eq!(config.cache_dir(), Some(PathBuf::from("/tmp/cache")));
        assert_eq!(config.images_dir(), PathBuf::from("/tmp/images"));
    }

    #[test]
    fn test_default_cache_dir() {
        let config = NixloadConfig::default();
        if let Some(root) = dirs::cache_dir() {
            assert_eq!(config.cache_dir(), Some(root.join(APP_NAME).join("nixstore")));
        }
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("auto".parse::<StrategyKind>().unwrap(), StrategyKind::Auto);
        assert_eq!(
            "build-tool".parse::<StrategyKind>().unwrap(),
            StrategyKind::BuildTool
        );
        assert!("registry".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_strategy_display_roundtrip() {
        for kind in [
            StrategyKind::Auto,
            StrategyKind::Mapping,
            StrategyKind::BuildTool,
            StrategyKind::Prefetch,
        ] {
            assert_eq!(kind.to_string().parse::<StrategyKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_locations_user_dir_first() {
        let tmp = TempDir::new().unwrap();
        let user = tmp.path().join("user");
        let system = tmp.path().join("system");
        std::fs::create_dir_all(&user).unwrap();
        std::fs::create_dir_all(&system).unwrap();
        std::fs::write(user.join(MAPPING_FILE_NAME), "{}").unwrap();
        std::fs::write(system.join(MAPPING_FILE_NAME), "{}").unwrap();
        std::fs::write(system.join(EXPRESSION_FILE_NAME), "{ }").unwrap();

        let locations = ConfigLocations {
            user_dir: Some(user.clone()),
            system_dir: system.clone(),
        };
        assert_eq!(locations.mapping_file(), Some(user.join(MAPPING_FILE_NAME)));
        assert_eq!(
            locations.expression_file(),
            Some(system.join(EXPRESSION_FILE_NAME))
        );
    }

    #[test]
    fn test_locations_absent() {
        let tmp = TempDir::new().unwrap();
        let locations = ConfigLocations {
            user_dir: None,
            system_dir: tmp.path().join("missing"),
        };
        assert!(locations.mapping_file().is_none());
        assert!(locations.expression_file().is_none());
    }
}
