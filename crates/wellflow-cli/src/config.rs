//! Application configuration
//!
//! Read from `wellflow.toml` in the working directory, or from the file
//! given with `--config`. Every section is optional.
//!
//! ```toml
//! data_dir = "data"
//!
//! [engine]
//! display_delay = 800
//! execute_delay = 500
//!
//! [gate]
//! training_delay = 2000
//!
//! [log]
//! level = "debug"
//! json = false
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use wellflow_core::{EngineConfig, GateConfig};
use wellflow_store::StoreConfig;

/// Default config file name
pub const CONFIG_FILE: &str = "wellflow.toml";

/// Logging options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of text
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Everything the binary needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Monthly data files and the JSON stores
    pub data_dir: PathBuf,
    /// Engine timing
    pub engine: EngineConfig,
    /// Gate timing
    pub gate: GateConfig,
    /// Logging
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            engine: EngineConfig::default(),
            gate: GateConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// Parse TOML text
    ///
    /// # Errors
    /// Invalid TOML or unknown value types.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("invalid configuration")
    }

    /// Load `path`, or `wellflow.toml` when present, or defaults
    ///
    /// # Errors
    /// An explicit `path` that cannot be read, or an unparsable file.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Turn off every simulated delay
    #[must_use]
    pub fn immediate(mut self) -> Self {
        self.engine = EngineConfig::immediate();
        self.gate = GateConfig::immediate();
        self
    }

    /// With data directory
    #[inline]
    #[must_use]
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    /// Store locations under the data directory
    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(&self.data_dir)
    }
}
