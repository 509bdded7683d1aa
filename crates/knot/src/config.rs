use anyhow::{Context, Result};
use clap::Args;
use knot_core::EditorConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9090,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one JSON file per note.
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("notes"),
        }
    }
}

/// Contents of `knot.toml`. Every section and key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub editor: EditorConfig,
}

/// Command-line / environment overrides, layered on top of the file.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Path to a knot.toml
    #[clap(long, env = "KNOT_CONFIG")]
    pub config: Option<PathBuf>,

    #[clap(long, env = "KNOT_HOST")]
    pub host: Option<String>,

    #[clap(long, env = "KNOT_PORT")]
    pub port: Option<u16>,

    #[clap(long, env = "KNOT_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[clap(long, env = "KNOT_LOG_LEVEL")]
    pub log_level: Option<String>,
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Invalid knot configuration")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("In {}", path.display()))
    }

    /// The file named by `args.config` (defaults if none), with flag overrides applied.
    pub fn load(args: &ConfigArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(args);
        Ok(config)
    }

    pub fn apply_overrides(&mut self, args: &ConfigArgs) {
        if let Some(host) = &args.host {
            self.server.host = host.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(data_dir) = &args.data_dir {
            self.store.data_dir = data_dir.clone();
        }
        if let Some(level) = &args.log_level {
            self.server.log_level = level.clone();
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
