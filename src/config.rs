//! Layered configuration for corkboard.
//!
//! Values are resolved in this order, later layers winning:
//!
//! 1. Built-in defaults
//! 2. `.corkboard/corkboard.toml` in the project directory
//! 3. Environment variables (`CORKBOARD_PORT`, `CORKBOARD_DB_PATH`,
//!    `CORKBOARD_REORDER_POLICY`)
//! 4. Command line flags
//!
//! Example `corkboard.toml`:
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3142
//!
//! [database]
//! path = ".corkboard/board.db"
//!
//! [reorder]
//! out_of_range = "clamp"
//!
//! [logging]
//! filter = "corkboard=info,tower_http=info"
//! json = false
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::board::positioning::TargetPolicy;
use crate::errors::ConfigError;

/// Directory holding the config file and, by default, the database.
pub const CONFIG_DIR: &str = ".corkboard";

/// Config file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "corkboard.toml";

pub const ENV_PORT: &str = "CORKBOARD_PORT";
pub const ENV_DB_PATH: &str = "CORKBOARD_DB_PATH";
pub const ENV_REORDER_POLICY: &str = "CORKBOARD_REORDER_POLICY";

/// Root of `corkboard.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorkboardConfig {
    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub database: DatabaseSection,

    #[serde(default)]
    pub reorder: ReorderSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Permissive CORS and bind on all interfaces.
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3142
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSection {
    /// SQLite file. Relative paths are resolved against the project directory.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("board.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReorderSection {
    /// What to do with a target position past either end of the list.
    #[serde(default)]
    pub out_of_range: TargetPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// `tracing_subscriber::EnvFilter` directives. `RUST_LOG` takes precedence.
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Emit one JSON object per line instead of the compact text format.
    #[serde(default)]
    pub json: bool,
}

fn default_log_filter() -> String {
    "corkboard=info,tower_http=info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

/// Values given on the command line. `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub port: Option<u16>,
    pub db_path: Option<PathBuf>,
    pub dev: bool,
    pub policy: Option<TargetPolicy>,
}

pub fn config_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(CONFIG_DIR)
}

pub fn config_path(project_dir: &Path) -> PathBuf {
    config_dir(project_dir).join(CONFIG_FILE)
}

impl CorkboardConfig {
    /// Load and parse a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse config from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse corkboard.toml")
    }

    /// Load `corkboard.toml` from the project directory, or the defaults when
    /// the file does not exist. A file that exists but is broken is an error.
    pub fn load_or_default(project_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_path(project_dir);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write the config as pretty TOML, creating the parent directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// Apply the process environment on top of the current values.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides read through `lookup`. Empty values are
    /// ignored; unparsable ones are an error.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(raw) = get(ENV_PORT) {
            self.server.port = raw
                .trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
                    key: ENV_PORT.to_string(),
                    value: raw.clone(),
                    message: e.to_string(),
                })?;
        }
        if let Some(raw) = get(ENV_DB_PATH) {
            self.database.path = PathBuf::from(raw);
        }
        if let Some(raw) = get(ENV_REORDER_POLICY) {
            self.reorder.out_of_range =
                raw.parse()
                    .map_err(|e: anyhow::Error| ConfigError::InvalidValue {
                        key: ENV_REORDER_POLICY.to_string(),
                        value: raw.clone(),
                        message: e.to_string(),
                    })?;
        }
        Ok(())
    }

    /// Apply command line flags. `--dev` only ever switches dev mode on.
    pub fn apply_cli(&mut self, overrides: &CliOverrides) {
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(path) = &overrides.db_path {
            self.database.path = path.clone();
        }
        if overrides.dev {
            self.server.dev_mode = true;
        }
        if let Some(policy) = overrides.policy {
            self.reorder.out_of_range = policy;
        }
    }

    /// Anchor a relative database path at the project directory.
    pub fn resolve_paths(&mut self, project_dir: &Path) {
        if self.database.path.is_relative() {
            self.database.path = project_dir.join(&self.database.path);
        }
    }

    /// Full layered resolution: file, environment, flags, then path anchoring.
    pub fn resolve(project_dir: &Path, overrides: &CliOverrides) -> Result<Self, ConfigError> {
        let mut config = Self::load_or_default(project_dir)?;
        config.apply_env()?;
        config.apply_cli(overrides);
        config.resolve_paths(project_dir);
        Ok(config)
    }

    /// Check for values that parse but will not work. Returns warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.host.trim().is_empty() {
            warnings.push("server.host is empty".to_string());
        }
        if self.server.port == 0 {
            warnings.push("server.port is 0; the OS will pick a random port".to_string());
        }
        if self.database.path.as_os_str().is_empty() {
            warnings.push("database.path is empty".to_string());
        }
        if let Err(e) = tracing_subscriber::EnvFilter::try_new(&self.logging.filter) {
            warnings.push(format!(
                "logging.filter '{}' is not a valid filter: {}",
                self.logging.filter, e
            ));
        }

        warnings
    }
}
