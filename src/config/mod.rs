//! Configuration management for the module host
//!
//! Handles configuration loading and defaults. Every field has a serde default, so an
//! empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Module host configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleHostConfig {
    /// Directory scanned for bundles
    #[serde(default = "default_bundles_dir")]
    pub bundles_dir: PathBuf,

    /// Root of the per-module data directories
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// File or directory extension marking a bundle
    #[serde(default = "default_bundle_extension")]
    pub bundle_extension: String,

    /// Resource extensions extracted into module data directories
    #[serde(default = "default_resource_extensions")]
    pub resource_extensions: Vec<String>,

    /// Unit name prefixes always resolved from the host first
    #[serde(default = "default_parent_first_prefixes")]
    pub parent_first_prefixes: Vec<String>,

    /// Let loaded bundles resolve each other's units
    #[serde(default = "default_true")]
    pub share_bundle_exports: bool,

    /// Bundles scanned at once (0 = unbounded)
    #[serde(default)]
    pub max_concurrent_scans: usize,

    /// Logging configuration
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive (e.g. "info", "bllvm_module_host=debug"); RUST_LOG wins
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit JSON lines (requires the `json-logging` feature)
    #[serde(default)]
    pub json_format: bool,
}

fn default_true() -> bool {
    true
}

fn default_bundles_dir() -> PathBuf {
    PathBuf::from("modules")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/modules")
}

fn default_bundle_extension() -> String {
    "bundle".to_string()
}

fn default_resource_extensions() -> Vec<String> {
    ["toml", "yml", "yaml", "json", "properties", "conf"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_parent_first_prefixes() -> Vec<String> {
    vec!["host.".to_string()]
}

impl Default for ModuleHostConfig {
    fn default() -> Self {
        Self {
            bundles_dir: default_bundles_dir(),
            data_dir: default_data_dir(),
            bundle_extension: default_bundle_extension(),
            resource_extensions: default_resource_extensions(),
            parent_first_prefixes: default_parent_first_prefixes(),
            share_bundle_exports: true,
            max_concurrent_scans: 0,
            logging: None,
        }
    }
}

impl ModuleHostConfig {
    /// Default configuration rooted at the given directories
    pub fn with_dirs<P: AsRef<Path>, Q: AsRef<Path>>(bundles_dir: P, data_dir: Q) -> Self {
        Self {
            bundles_dir: bundles_dir.as_ref().to_path_buf(),
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Load configuration from TOML file
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ModuleHostConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from JSON file
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ModuleHostConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn to_json_file(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
