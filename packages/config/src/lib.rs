#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Engine configuration.
//!
//! The defaults live in `config/default.toml`, embedded at compile time.
//! Setting `SIGNAL_MAP_CONFIG` to a TOML file path replaces them; any
//! section or key the file leaves out keeps its default.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use signal_map_cluster::ClusterOptions;
use signal_map_geohash::ZoomPrecisionMap;
use signal_map_grid::SelectionOptions;

/// Environment variable naming an override configuration file.
pub const CONFIG_ENV: &str = "SIGNAL_MAP_CONFIG";

/// The embedded default configuration.
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The override file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The TOML is malformed or has values of the wrong type.
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Where queries are sent and which dataset they read.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the query backend, without a trailing slash.
    pub base_url: String,
    /// Dataset identifier.
    pub dataset_id: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090/api".to_string(),
            dataset_id: "default".to_string(),
            timeout_secs: 30,
        }
    }
}

impl BackendConfig {
    /// URL of the data fetch endpoint.
    #[must_use]
    pub fn fetch_url(&self) -> String {
        format!("{}/data/fetch", self.base_url.trim_end_matches('/'))
    }

    /// Server-side path of the dataset file.
    #[must_use]
    pub fn dataset_source(&self) -> String {
        format!(
            "/opt/experiments/{id}/dataset/{id}.csv",
            id = self.dataset_id
        )
    }

    /// Request timeout for backend queries.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Clustering thresholds.
    pub cluster: ClusterOptions,
    /// Zoom/precision step table.
    pub zoom: ZoomPrecisionMap,
    /// Selection behavior.
    pub selection: SelectionOptions,
    /// Query backend.
    pub backend: BackendConfig,
}

impl EngineConfig {
    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// * If the TOML is malformed or a value has the wrong type
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// The embedded default configuration.
    ///
    /// # Errors
    ///
    /// * If the embedded TOML fails to parse
    pub fn embedded() -> Result<Self, ConfigError> {
        Self::from_toml_str(DEFAULT_CONFIG)
    }

    /// Reads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// * If the file cannot be read
    /// * If the TOML is malformed
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Loads the override file named by [`CONFIG_ENV`], or the embedded
    /// defaults when the variable is unset.
    ///
    /// # Errors
    ///
    /// * If the override file cannot be read or parsed
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => {
                let path = PathBuf::from(path);
                log::info!("Loading config from {}", path.display());
                Self::from_path(&path)
            }
            None => {
                log::debug!("{CONFIG_ENV} not set, using embedded config");
                Self::embedded()
            }
        }
    }
}
