//! Configuration discovery, loading, and validation.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::Config;

/// Locations probed, in order, when no explicit path is given.
const SEARCH_PATHS: [&str; 2] = ["config.toml", "/etc/gilgamesh/config.toml"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration file found (searched ./config.toml and /etc/gilgamesh/config.toml)")]
    NotFound,
    #[error("failed reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Load and validate the configuration from an explicit path, or from the
/// first discovered default location.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => discover().ok_or(ConfigError::NotFound)?,
    };
    let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    let config: Config =
        toml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })?;
    validate(&config)?;
    Ok(config)
}

fn discover() -> Option<PathBuf> {
    SEARCH_PATHS
        .into_iter()
        .map(PathBuf::from)
        .find(|path| path.is_file())
}

/// Semantic checks beyond what the schema can express.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.proxy.server.ports.is_empty() && config.proxy.server.tls_ports.is_empty() {
        return Err(ConfigError::Invalid(
            "no listening ports configured".to_string(),
        ));
    }
    if !config.proxy.server.tls_ports.is_empty() && config.proxy.tls.is_none() {
        return Err(ConfigError::Invalid(
            "tls_ports configured without a [proxy.tls] section".to_string(),
        ));
    }
    Ok(())
}
