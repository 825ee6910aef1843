//! Pipeline configuration (TOML).
//!
//! Credentials are deliberately absent: they come from CLI flags or the
//! environment and are handed to the pipeline per invocation.

use crate::pipeline::PipelineSettings;
use crate::services::ServiceCredentials;
use lightbox_protocol::defaults::*;
use lightbox_protocol::paths::lightbox_home;
use lightbox_protocol::Namespaces;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Which enrichment clients the CLI wires into the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    /// Fixed labels plus keyword categorization; no network access.
    #[default]
    Offline,
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default)]
    pub mode: ServiceMode,

    #[serde(default = "default_vision_endpoint")]
    pub vision_endpoint: String,

    #[serde(default = "default_categorizer_endpoint")]
    pub categorizer_endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_labels")]
    pub max_labels: u32,

    /// Labels the offline annotator reports for every image
    #[serde(default)]
    pub offline_labels: Vec<String>,
}

fn default_vision_endpoint() -> String {
    DEFAULT_VISION_ENDPOINT.to_string()
}

fn default_categorizer_endpoint() -> String {
    DEFAULT_CATEGORIZER_ENDPOINT.to_string()
}

fn default_model() -> String {
    DEFAULT_CATEGORIZER_MODEL.to_string()
}

fn default_max_labels() -> u32 {
    DEFAULT_MAX_LABELS
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            mode: ServiceMode::default(),
            vision_endpoint: default_vision_endpoint(),
            categorizer_endpoint: default_categorizer_endpoint(),
            model: default_model(),
            max_labels: default_max_labels(),
            offline_labels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root directory of the local artifact store
    #[serde(default = "default_store_root")]
    pub store_root: PathBuf,

    /// SQLite database holding analysis records
    #[serde(default = "default_results_db")]
    pub results_db: PathBuf,

    /// Directory for working copies; system temp dir when unset
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    #[serde(default = "default_inbox_prefix")]
    pub inbox_prefix: String,

    #[serde(default = "default_processed_prefix")]
    pub processed_prefix: String,

    #[serde(default = "default_relocation_interval")]
    pub relocation_interval_secs: u64,

    #[serde(default = "default_analysis_interval")]
    pub analysis_interval_secs: u64,

    #[serde(default = "default_invocation_timeout")]
    pub invocation_timeout_secs: u64,

    #[serde(default = "default_max_concurrent_invocations")]
    pub max_concurrent_invocations: usize,

    #[serde(default = "default_watch_interval")]
    pub watch_interval_secs: u64,

    /// Stop retrying an undecodable artifact after this many attempts
    #[serde(default)]
    pub max_decode_attempts: Option<u32>,

    #[serde(default)]
    pub services: ServicesConfig,
}

fn default_store_root() -> PathBuf {
    lightbox_home().join("store")
}

fn default_results_db() -> PathBuf {
    lightbox_home().join("results.sqlite")
}

fn default_inbox_prefix() -> String {
    DEFAULT_INBOX_PREFIX.to_string()
}

fn default_processed_prefix() -> String {
    DEFAULT_PROCESSED_PREFIX.to_string()
}

fn default_relocation_interval() -> u64 {
    DEFAULT_RELOCATION_INTERVAL_SECS
}

fn default_analysis_interval() -> u64 {
    DEFAULT_ANALYSIS_INTERVAL_SECS
}

fn default_invocation_timeout() -> u64 {
    DEFAULT_INVOCATION_TIMEOUT_SECS
}

fn default_max_concurrent_invocations() -> usize {
    DEFAULT_MAX_CONCURRENT_INVOCATIONS
}

fn default_watch_interval() -> u64 {
    DEFAULT_WATCH_INTERVAL_SECS
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            store_root: default_store_root(),
            results_db: default_results_db(),
            scratch_dir: None,
            inbox_prefix: default_inbox_prefix(),
            processed_prefix: default_processed_prefix(),
            relocation_interval_secs: default_relocation_interval(),
            analysis_interval_secs: default_analysis_interval(),
            invocation_timeout_secs: default_invocation_timeout(),
            max_concurrent_invocations: default_max_concurrent_invocations(),
            watch_interval_secs: default_watch_interval(),
            max_decode_attempts: None,
            services: ServicesConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate configuration from a TOML file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: PipelineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let ns = self.namespaces();
        if ns.inbox.is_empty() || ns.processed.is_empty() {
            return Err(ConfigError::Invalid(
                "inbox_prefix and processed_prefix must not be empty".to_string(),
            ));
        }
        // Overlapping prefixes would make relocation feed itself
        if ns.inbox.starts_with(&ns.processed) || ns.processed.starts_with(&ns.inbox) {
            return Err(ConfigError::Invalid(format!(
                "prefixes '{}' and '{}' overlap",
                ns.inbox, ns.processed
            )));
        }

        for (name, value) in [
            ("relocation_interval_secs", self.relocation_interval_secs),
            ("analysis_interval_secs", self.analysis_interval_secs),
            ("invocation_timeout_secs", self.invocation_timeout_secs),
            ("watch_interval_secs", self.watch_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }
        if self.max_concurrent_invocations == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_invocations must be positive".to_string(),
            ));
        }
        if self.max_decode_attempts == Some(0) {
            return Err(ConfigError::Invalid(
                "max_decode_attempts must be positive when set".to_string(),
            ));
        }

        if self.services.mode == ServiceMode::Http {
            if self.services.vision_endpoint.trim().is_empty()
                || self.services.categorizer_endpoint.trim().is_empty()
            {
                return Err(ConfigError::Invalid(
                    "http mode requires both service endpoints".to_string(),
                ));
            }
            if self.services.max_labels == 0 {
                return Err(ConfigError::Invalid("max_labels must be positive".to_string()));
            }
        }
        Ok(())
    }

    pub fn namespaces(&self) -> Namespaces {
        Namespaces::new(self.inbox_prefix.as_str(), self.processed_prefix.as_str())
    }

    pub fn relocation_interval(&self) -> Duration {
        Duration::from_secs(self.relocation_interval_secs)
    }

    pub fn analysis_interval(&self) -> Duration {
        Duration::from_secs(self.analysis_interval_secs)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_interval_secs)
    }

    pub fn pipeline_settings(&self, credentials: ServiceCredentials) -> PipelineSettings {
        PipelineSettings {
            namespaces: self.namespaces(),
            invocation_timeout: Duration::from_secs(self.invocation_timeout_secs),
            max_decode_attempts: self.max_decode_attempts,
            credentials,
            scratch_dir: self.scratch_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: PipelineConfig = toml::from_str("").unwrap();
        assert_eq!(config.relocation_interval_secs, 300);
        assert_eq!(config.analysis_interval_secs, 300);
        assert_eq!(config.invocation_timeout_secs, 60);
        assert_eq!(config.max_concurrent_invocations, 4);
        assert_eq!(config.watch_interval_secs, 5);
        assert_eq!(config.max_decode_attempts, None);
        assert_eq!(config.services.mode, ServiceMode::Offline);
        assert!(config.store_root.ends_with("store"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file() {
        let config: PipelineConfig = toml::from_str(
            r#"
            store_root = "/srv/lightbox"
            processed_prefix = "clean"
            max_decode_attempts = 3

            [services]
            mode = "http"
            model = "claude-test"
            "#,
        )
        .unwrap();
        assert_eq!(config.store_root, PathBuf::from("/srv/lightbox"));
        assert_eq!(config.namespaces().processed, "clean/");
        assert_eq!(config.namespaces().inbox, "inbox/");
        assert_eq!(config.services.mode, ServiceMode::Http);
        assert_eq!(config.services.model, "claude-test");
        assert_eq!(config.services.vision_endpoint, DEFAULT_VISION_ENDPOINT);

        let settings = config.pipeline_settings(ServiceCredentials::default());
        assert_eq!(settings.max_decode_attempts, Some(3));
        assert_eq!(settings.invocation_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let overlapping = PipelineConfig {
            inbox_prefix: "data/".into(),
            processed_prefix: "data/clean/".into(),
            ..PipelineConfig::default()
        };
        assert!(matches!(overlapping.validate(), Err(ConfigError::Invalid(_))));

        let zero_timeout = PipelineConfig {
            invocation_timeout_secs: 0,
            ..PipelineConfig::default()
        };
        assert!(zero_timeout.validate().is_err());

        let zero_attempts = PipelineConfig {
            max_decode_attempts: Some(0),
            ..PipelineConfig::default()
        };
        assert!(zero_attempts.validate().is_err());
    }

    #[test]
    fn test_unknown_mode_is_parse_error() {
        let err = toml::from_str::<PipelineConfig>("[services]\nmode = \"cloud\"\n").unwrap_err();
        assert!(err.to_string().contains("cloud"));
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("lightbox.toml");
        let config = PipelineConfig {
            store_root: dir.path().join("store"),
            watch_interval_secs: 2,
            ..PipelineConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(PipelineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(PipelineConfig::load(&path), Err(ConfigError::Read { .. })));
        assert_eq!(
            PipelineConfig::load_or_default(&path).unwrap().watch_interval_secs,
            5
        );
    }
}
