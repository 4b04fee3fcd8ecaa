//! Configuration loading
//!
//! Two kinds of TOML files:
//!
//! 1. **Bootstrap config** ([`TomlConfig`]): database location, logging and the
//!    runtime environment filters are gated against.
//! 2. **Installation files** ([`InstallFile`]): filter groups and filter
//!    trees to store in the registry.
//!
//! # Config file resolution
//!
//! 1. Command-line argument (highest priority)
//! 2. `SFE_CONFIG` environment variable
//! 3. `<config dir>/sfe/config.toml` if it exists
//! 4. Built-in defaults

use crate::db::FilterGroup;
use crate::environment::{Environment, Version};
use crate::error::{Error, Result};
use crate::filter::Settings;
use crate::registry::FilterSpec;
use crate::value::Value;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable naming the bootstrap config file
pub const CONFIG_ENV_VAR: &str = "SFE_CONFIG";

/// Bootstrap configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// SQLite database file; defaults to [`default_database_path`]
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub environment: EnvironmentConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// What the running platform offers to filters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub platform_version: Option<String>,

    #[serde(default)]
    pub features: Vec<String>,

    /// External tool name → executable path
    #[serde(default)]
    pub tools: BTreeMap<String, PathBuf>,
}

impl EnvironmentConfig {
    pub fn to_environment(&self) -> Result<Environment> {
        let platform_version = self
            .platform_version
            .as_deref()
            .map(|v| v.parse::<Version>().map_err(Error::Config))
            .transpose()?;
        Ok(Environment {
            platform_version,
            features: self.features.iter().cloned().collect(),
            tools: self.tools.clone(),
        })
    }
}

impl TomlConfig {
    /// Parse a bootstrap config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: TomlConfig = toml::from_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load the config file found by [`resolve_config_path`], or defaults
    pub fn resolve(cli_arg: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_arg) {
            Some(path) => Self::load(&path),
            None => {
                info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Configured database path or the platform default
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }
}

/// Locate the bootstrap config file
///
/// An explicit path (CLI or environment variable) is returned even if it does
/// not exist, so that loading reports the missing file instead of silently
/// falling back to defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir()
        .map(|dir| dir.join("sfe").join("config.toml"))
        .filter(|path| path.exists())
}

/// `<local data dir>/sfe/filters.db`
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("sfe"))
        .unwrap_or_else(|| PathBuf::from("./sfe_data"))
        .join("filters.db")
}

/// Filter groups and filters to install
///
/// ```toml
/// [[group]]
/// symbolic = "submission=>title"
/// display_name = "Submission title"
/// input_type = "class::lib.pkp.classes.submission.Submission"
/// output_type = "primitive::string"
///
/// [[filter]]
/// class = "sequencer"
/// group = "submission=>title"
/// settings = { settings_mapping = { case = ["seq2_case"] }, case = "upper" }
///
/// [[filter.sub_filter]]
/// class = "field_extract"
/// group = "submission=>string"
/// settings = { field = "title" }
///
/// [[filter.sub_filter]]
/// class = "string_case"
/// group = "string=>string"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstallFile {
    #[serde(default, rename = "group")]
    pub groups: Vec<FilterGroup>,

    #[serde(default, rename = "filter")]
    pub filters: Vec<FilterConfig>,
}

impl InstallFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// One filter (and its sub-filters) in an installation file
#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    #[serde(rename = "class")]
    pub class_name: String,

    /// Symbolic name of the filter group
    pub group: String,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub template: bool,

    #[serde(default)]
    pub context_id: Option<i64>,

    /// Position under the parent (sub-filters only)
    #[serde(default)]
    pub seq: Option<u32>,

    #[serde(default)]
    pub settings: BTreeMap<String, toml::Value>,

    /// Setting name → locale → value
    #[serde(default)]
    pub localized: BTreeMap<String, BTreeMap<String, toml::Value>>,

    #[serde(default, rename = "sub_filter")]
    pub sub_filters: Vec<FilterConfig>,
}

impl FilterConfig {
    pub fn to_spec(&self) -> FilterSpec {
        let mut settings = Settings::new();
        for (name, value) in &self.settings {
            settings.set(name.clone(), Value::from(value.clone()));
        }
        for (name, variants) in &self.localized {
            for (locale, value) in variants {
                settings.set_localized(name.clone(), locale.clone(), Value::from(value.clone()));
            }
        }

        FilterSpec {
            class_name: self.class_name.clone(),
            group: self.group.clone(),
            display_name: self.display_name.clone(),
            is_template: self.template,
            context_id: self.context_id,
            sequence: self.seq,
            settings,
            sub_filters: self.sub_filters.iter().map(FilterConfig::to_spec).collect(),
        }
    }
}
