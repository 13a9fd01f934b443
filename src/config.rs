//! YAML configuration shared by the tracker and node binaries.
//!
//! ```yaml
//! tracker:
//!   host: 127.0.0.1
//!   port: 9090
//! node:
//!   port: 9091
//!   download_dir: ./downloads
//!   identity: 10.0.0.5
//! ```
//!
//! Every field is optional. A missing file yields the defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::constants::{DEFAULT_DOWNLOAD_DIR, DEFAULT_NODE_PORT, DEFAULT_TRACKER_PORT};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid yaml in {path:?}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tracker: TrackerConfig,
    pub node: NodeConfig,
}

/// Where the tracker listens, and where nodes find it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// UDP port for chunk traffic. `0` picks a free port.
    pub port: u16,
    pub download_dir: PathBuf,
    /// Address announced to the tracker. Defaults to the local address of
    /// the tracker connection.
    pub identity: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_TRACKER_PORT,
        }
    }
}

impl TrackerConfig {
    /// `host:port`, suitable for connecting or binding.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_NODE_PORT,
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            identity: None,
        }
    }
}

impl Config {
    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        Self::parse(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }
}
