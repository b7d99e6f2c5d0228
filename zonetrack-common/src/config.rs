//! Configuration loading and resolution
//!
//! Settings are resolved per field in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (collected together with 1 by the binary's CLI parser)
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing TOML file is not an error: the service logs a warning and runs on
//! defaults. An unreadable or unparsable file is.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Bootstrap configuration loaded from TOML
///
/// Every field is optional so that file values can be layered between CLI
/// overrides and compiled defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct TomlConfig {
    /// Source container (`.mdb`) to mirror
    #[serde(default)]
    pub source_path: Option<PathBuf>,

    /// SQLite store path
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Reading table inside the source container
    #[serde(default)]
    pub table: Option<String>,

    /// Readings per insert transaction
    #[serde(default)]
    pub batch_size: Option<usize>,

    /// Quiet interval before a burst of change notifications triggers a resync
    #[serde(default)]
    pub debounce_ms: Option<u64>,

    /// Program used to export the source table as JSON lines
    #[serde(default)]
    pub exporter: Option<PathBuf>,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
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

/// Compiled-in fallback values
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub database_path: PathBuf,
    pub table: String,
    pub batch_size: usize,
    pub debounce_ms: u64,
    pub exporter: PathBuf,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            database_path: default_data_dir().join("temperature_data.sqlite"),
            table: "Table1".to_string(),
            batch_size: 1000,
            debounce_ms: 1000,
            exporter: PathBuf::from("mdb-json"),
        }
    }
}

/// OS-dependent data directory for the store
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("zonetrack"))
        .unwrap_or_else(|| PathBuf::from("./zonetrack_data"))
}

/// Default config file location (`<config dir>/zonetrack/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("zonetrack").join("config.toml"))
}

/// Parse a TOML config file
pub fn read_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load the TOML layer
///
/// An explicitly named file must exist. The default location may be absent,
/// in which case an empty layer is returned.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::Config(format!("Config file not found: {}", path.display())));
        }
        info!("Loading config from {}", path.display());
        return read_toml_config(path);
    }

    match default_config_path() {
        Some(path) if path.exists() => {
            info!("Loading config from {}", path.display());
            read_toml_config(&path)
        }
        Some(path) => {
            warn!("No config file at {}, using defaults", path.display());
            Ok(TomlConfig::default())
        }
        None => {
            warn!("Could not determine config directory, using defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Values supplied on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub source_path: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub table: Option<String>,
    pub batch_size: Option<usize>,
    pub debounce_ms: Option<u64>,
    pub exporter: Option<PathBuf>,
    pub log_level: Option<String>,
}

/// Store path alone, for commands that never touch the source
pub fn resolve_database_path(
    overrides: &ConfigOverrides,
    toml: &TomlConfig,
    defaults: &CompiledDefaults,
) -> PathBuf {
    overrides
        .database_path
        .clone()
        .or_else(|| toml.database_path.clone())
        .unwrap_or_else(|| defaults.database_path.clone())
}

/// Logging settings: CLI level over file level, file destination from TOML only
pub fn resolve_logging(overrides: &ConfigOverrides, toml: &TomlConfig) -> LoggingConfig {
    LoggingConfig {
        level: overrides
            .log_level
            .clone()
            .unwrap_or_else(|| toml.logging.level.clone()),
        file: toml.logging.file.clone(),
    }
}

/// Fully resolved runtime configuration of the sync service
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub source_path: PathBuf,
    pub database_path: PathBuf,
    pub table: String,
    pub batch_size: usize,
    pub debounce: Duration,
    pub exporter: PathBuf,
    pub logging: LoggingConfig,
}

impl SyncConfig {
    /// Merge the three layers field by field and validate the result
    pub fn resolve(
        overrides: ConfigOverrides,
        toml: TomlConfig,
        defaults: &CompiledDefaults,
    ) -> Result<Self> {
        let logging = resolve_logging(&overrides, &toml);
        let database_path = resolve_database_path(&overrides, &toml, defaults);

        let source_path = overrides
            .source_path
            .or(toml.source_path)
            .ok_or_else(|| {
                Error::Config(
                    "No source file configured. Set MDB_FILE_PATH, pass --source, \
                     or add source_path to the config file"
                        .to_string(),
                )
            })?;

        let config = Self {
            source_path,
            database_path,
            table: overrides
                .table
                .or(toml.table)
                .unwrap_or_else(|| defaults.table.clone()),
            batch_size: overrides
                .batch_size
                .or(toml.batch_size)
                .unwrap_or(defaults.batch_size),
            debounce: Duration::from_millis(
                overrides
                    .debounce_ms
                    .or(toml.debounce_ms)
                    .unwrap_or(defaults.debounce_ms),
            ),
            exporter: overrides
                .exporter
                .or(toml.exporter)
                .unwrap_or_else(|| defaults.exporter.clone()),
            logging,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_path.as_os_str().is_empty() {
            return Err(Error::Config("source_path must not be empty".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        if self.debounce.is_zero() {
            return Err(Error::Config("debounce_ms must be at least 1".to_string()));
        }
        if self.table.trim().is_empty() {
            return Err(Error::Config("table must not be empty".to_string()));
        }
        Ok(())
    }
}
