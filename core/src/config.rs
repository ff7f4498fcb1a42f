use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TagbagError};

/// Default number of blobs transferred concurrently.
pub const DEFAULT_BLOB_CONCURRENCY: usize = 4;

/// Tagbag configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TagbagConfig {
    /// Scratch directory for unpacked stores and incremental archives
    pub temp_dir: PathBuf,

    /// Recompute digests of written blobs and reject mismatches
    pub verify_digests: bool,

    /// Which file names the tarball diff is allowed to match
    pub match_policy: MatchPolicy,

    /// Which instances of a manifest list are copied
    pub image_selection: ImageSelection,

    /// Maximum blobs in flight per image copy
    pub blob_concurrency: usize,

    /// Log level
    pub log_level: LogLevel,
}

impl Default for TagbagConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir().join("tagbag"),
            verify_digests: true,
            match_policy: MatchPolicy::DigestOnly,
            image_selection: ImageSelection::System,
            blob_concurrency: DEFAULT_BLOB_CONCURRENCY,
            log_level: LogLevel::Info,
        }
    }
}

impl TagbagConfig {
    /// Load configuration from a YAML or JSON file, chosen by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TagbagError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: TagbagConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        config.validate()?;

        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.blob_concurrency == 0 {
            return Err(TagbagError::ConfigError(
                "blob_concurrency must be at least 1".to_string(),
            ));
        }
        if self.temp_dir.as_os_str().is_empty() {
            return Err(TagbagError::ConfigError("temp_dir must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Path of the per-user configuration file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".tagbag").join("config.yaml"))
}

/// File names the tarball diff deletes from the target tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchPolicy {
    /// Only digest-shaped names; manifests and markers are kept
    #[default]
    DigestOnly,
    /// Any file whose base name also exists in the source tree
    AnyName,
}

/// Manifest list instance selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageSelection {
    /// Only the instance matching the host platform
    #[default]
    System,
    /// Every instance plus the list itself
    All,
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = TagbagConfig::default();
        assert!(config.verify_digests);
        assert_eq!(config.match_policy, MatchPolicy::DigestOnly);
        assert_eq!(config.image_selection, ImageSelection::System);
        assert_eq!(config.blob_concurrency, DEFAULT_BLOB_CONCURRENCY);
        assert!(config.temp_dir.ends_with("tagbag"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_yaml_partial() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(
            &path,
            "match_policy: any-name\nimage_selection: all\nblob_concurrency: 8\n",
        )
        .unwrap();

        let config = TagbagConfig::load(&path).unwrap();
        assert_eq!(config.match_policy, MatchPolicy::AnyName);
        assert_eq!(config.image_selection, ImageSelection::All);
        assert_eq!(config.blob_concurrency, 8);
        assert!(config.verify_digests);
    }

    #[test]
    fn test_load_json() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"verify_digests": false, "log_level": "debug"}"#).unwrap();

        let config = TagbagConfig::load(&path).unwrap();
        assert!(!config.verify_digests);
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_load_rejects_zero_concurrency() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "blob_concurrency: 0\n").unwrap();

        let err = TagbagConfig::load(&path).unwrap_err();
        assert!(matches!(err, TagbagError::ConfigError(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = TagbagConfig::load(Path::new("/nonexistent/tagbag.yaml")).unwrap_err();
        assert!(matches!(err, TagbagError::ConfigError(_)));
    }

    #[test]
    fn test_log_level_into_tracing() {
        assert_eq!(tracing::Level::from(LogLevel::Warn), tracing::Level::WARN);
    }
}
