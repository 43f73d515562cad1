//! Configuration loading and validation (`spec.md` §6). Kept outside the
//! resolution core but still built on the same serde/toml stack the rest
//! of the ecosystem reaches for.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use serde_derive::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("external upstream is enabled (allow_external = true) but external.endpoint is not set")]
    MissingExternalEndpoint,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub custom: Vec<CustomEntry>,
    #[serde(default)]
    pub blocking_lists: Vec<String>,
    #[serde(default = "default_allow_external")]
    pub allow_external: bool,
    #[serde(default)]
    pub external: ExternalConfig,
    #[serde(default)]
    pub memdump: Option<PathBuf>,
}

fn default_allow_external() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub address: SocketAddr,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    pub size: u64,
    pub basettl: u32,
    #[serde(default)]
    pub force_basettl: bool,
}

impl Default for CacheSection {
    fn default() -> Self {
        CacheSection {
            size: 1_048_576,
            basettl: 60,
            force_basettl: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomEntry {
    pub name: String,
    pub ip: IpAddr,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalConfig {
    #[serde(rename = "type", default)]
    pub kind: ExternalKind,
    pub endpoint: Option<String>,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        ExternalConfig {
            kind: ExternalKind::Udp,
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalKind {
    #[default]
    Udp,
    Doh,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.allow_external && self.external.endpoint.is_none() {
            return Err(ConfigError::MissingExternalEndpoint);
        }
        Ok(())
    }
}
