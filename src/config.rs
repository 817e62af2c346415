//! Application configuration module.
//!
//! Handles loading, validating, and merging `style-designer.toml`. Stock
//! defaults are the base layer; a user config file overrides any subset of
//! them.
//!
//! ## Config File Location
//!
//! `style-designer.toml` is looked up in the working directory, or passed
//! explicitly with `--config <file>`.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [storage]
//! root = ".style-designer"                # Caches and the local store live here
//! cache_name = "style-designer-cache-v1"  # Name of the gateway's cache
//!
//! [scope]
//! base_url = "http://localhost:8080/"     # Origin + path the gateway controls
//!
//! [serve]
//! host = "127.0.0.1"
//! port = 8080
//!
//! [ingest]
//! max_workers = 4                         # Omit for auto = CPU cores
//!
//! [logging]
//! level = "info"                          # RUST_LOG overrides this
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse. Override just the values you want:
//!
//! ```toml
//! [scope]
//! base_url = "https://designer.example.org/"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// File name looked up in a directory by [`load_config`].
pub const CONFIG_FILENAME: &str = "style-designer.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Application configuration loaded from `style-designer.toml`.
///
/// All fields have sensible defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Where persistent state is kept.
    pub storage: StorageConfig,
    /// The URL space the gateway intercepts.
    pub scope: ScopeConfig,
    /// Preview server bind address.
    pub serve: ServeConfig,
    /// Archive ingestion settings.
    pub ingest: IngestConfig,
    /// Log verbosity.
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.root.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "storage.root must not be empty".into(),
            ));
        }
        let name = &self.storage.cache_name;
        if name.is_empty()
            || name.starts_with('.')
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(ConfigError::Validation(format!(
                "storage.cache_name {name:?} may only contain letters, digits, '-', '_' and '.'"
            )));
        }
        let url = Url::parse(&self.scope.base_url).map_err(|e| {
            ConfigError::Validation(format!("scope.base_url is not a valid URL: {e}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(
                "scope.base_url must be an http or https URL".into(),
            ));
        }
        if self.serve.host.trim().is_empty() {
            return Err(ConfigError::Validation("serve.host must not be empty".into()));
        }
        if self.ingest.max_workers == Some(0) {
            return Err(ConfigError::Validation(
                "ingest.max_workers must be at least 1".into(),
            ));
        }
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {}",
                LOG_LEVELS.join(", ")
            )));
        }
        Ok(())
    }
}

/// Persistent state location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Directory holding the cache storage and the local key/value store.
    pub root: PathBuf,
    /// Name of the cache the gateway answers from. Bump it to abandon old
    /// content after an incompatible change.
    pub cache_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".style-designer"),
            cache_name: "style-designer-cache-v1".to_string(),
        }
    }
}

/// The gateway's scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScopeConfig {
    /// Absolute base URL. Stored paths resolve against it.
    pub base_url: String,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/".to_string(),
        }
    }
}

/// Preview server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServeConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Archive ingestion settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    /// Maximum number of parallel entry writers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_workers: Option<usize>,
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Log verbosity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter level; `RUST_LOG` takes precedence.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &IngestConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_workers.map(|n| n.min(cores)).unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(AppConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(config_path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto the stock defaults, then deserialize and
/// validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<AppConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: AppConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `style-designer.toml` in the given directory.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result.
pub fn load_config(dir: &Path) -> Result<AppConfig, ConfigError> {
    load_config_file(&dir.join(CONFIG_FILENAME))
}

/// Load config from an explicit file. A missing file yields the defaults.
pub fn load_config_file(path: &Path) -> Result<AppConfig, ConfigError> {
    resolve_config(load_raw_config(path)?)
}

/// Returns a fully-commented stock `style-designer.toml` with all keys and
/// explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Style Designer Configuration
# ============================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Persistent storage
# ---------------------------------------------------------------------------
[storage]
# Directory holding the response cache and the local key/value store.
root = ".style-designer"

# Name of the cache the gateway answers from. Changing it starts from an
# empty store; the old cache stays on disk until removed.
cache_name = "style-designer-cache-v1"

# ---------------------------------------------------------------------------
# Gateway scope
# ---------------------------------------------------------------------------
[scope]
# Absolute URL whose contents/ and theme/ paths the gateway answers.
# Must be https, or a local development host (localhost, 127.0.0.1, [::1]).
base_url = "http://localhost:8080/"

# ---------------------------------------------------------------------------
# Preview server
# ---------------------------------------------------------------------------
[serve]
host = "127.0.0.1"
port = 8080

# ---------------------------------------------------------------------------
# Ingestion
# ---------------------------------------------------------------------------
[ingest]
# Maximum parallel entry writers per archive.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_workers = 4

# ---------------------------------------------------------------------------
# Logging
# ---------------------------------------------------------------------------
[logging]
# One of trace, debug, info, warn, error. RUST_LOG takes precedence.
level = "info"
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = AppConfig::default();
        assert_eq!(config.storage.root, PathBuf::from(".style-designer"));
        assert_eq!(config.storage.cache_name, "style-designer-cache-v1");
        assert_eq!(config.scope.base_url, "http://localhost:8080/");
        assert_eq!(config.serve.port, 8080);
        assert_eq!(config.ingest.max_workers, None);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
[scope]
base_url = "https://designer.example.org/app/"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.scope.base_url, "https://designer.example.org/app/");
        // Defaults preserved
        assert_eq!(config.storage.cache_name, "style-designer-cache-v1");
        assert_eq!(config.serve.host, "127.0.0.1");
    }

    // =========================================================================
    // load_config tests
    // =========================================================================

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.scope.base_url, "http://localhost:8080/");
    }

    #[test]
    fn load_config_reads_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(CONFIG_FILENAME),
            r#"
[serve]
port = 9090

[ingest]
max_workers = 2
"#,
        )
        .unwrap();

        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.serve.port, 9090);
        assert_eq!(config.ingest.max_workers, Some(2));
        // Unspecified values should be defaults
        assert_eq!(config.serve.host, "127.0.0.1");
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILENAME), "this is not valid toml [[[").unwrap();
        assert!(matches!(
            load_config(tmp.path()),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn stock_config_toml_parses_to_defaults() {
        let config: AppConfig = toml::from_str(stock_config_toml()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.storage.cache_name, AppConfig::default().storage.cache_name);
        assert_eq!(config.scope.base_url, AppConfig::default().scope.base_url);
    }

    // =========================================================================
    // effective_threads tests
    // =========================================================================

    #[test]
    fn effective_threads_auto() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        assert_eq!(effective_threads(&IngestConfig::default()), cores);
    }

    #[test]
    fn effective_threads_clamped_to_cores() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let config = IngestConfig {
            max_workers: Some(cores + 64),
        };
        assert_eq!(effective_threads(&config), cores);
    }

    #[test]
    fn effective_threads_user_constrains_down() {
        let config = IngestConfig {
            max_workers: Some(1),
        };
        assert_eq!(effective_threads(&config), 1);
    }

    // =========================================================================
    // merge_toml tests
    // =========================================================================

    #[test]
    fn merge_toml_scalar_override() {
        let base: toml::Value = toml::from_str(r#"port = 8080"#).unwrap();
        let overlay: toml::Value = toml::from_str(r#"port = 9000"#).unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged.get("port").unwrap().as_integer(), Some(9000));
    }

    #[test]
    fn merge_toml_table_merge() {
        let base: toml::Value = toml::from_str(
            r#"
[serve]
host = "127.0.0.1"
port = 8080
"#,
        )
        .unwrap();
        let overlay: toml::Value = toml::from_str(
            r#"
[serve]
port = 9000
"#,
        )
        .unwrap();
        let merged = merge_toml(base, overlay);
        let serve = merged.get("serve").unwrap();
        assert_eq!(serve.get("port").unwrap().as_integer(), Some(9000));
        // host preserved from base
        assert_eq!(serve.get("host").unwrap().as_str(), Some("127.0.0.1"));
    }

    // =========================================================================
    // Unknown key rejection tests
    // =========================================================================

    #[test]
    fn unknown_key_rejected() {
        let toml_str = r#"
[storage]
cache = "x"
"#;
        let result: Result<AppConfig, _> = toml::from_str(toml_str);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("unknown field"));
    }

    #[test]
    fn unknown_section_rejected() {
        let result: Result<AppConfig, _> = toml::from_str("[storrage]\nroot = \"x\"\n");
        assert!(result.is_err());
    }

    // =========================================================================
    // Validation tests
    // =========================================================================

    #[test]
    fn validate_default_config_passes() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_cache_name() {
        let mut config = AppConfig::default();
        config.storage.cache_name = "../escape".into();
        assert!(config.validate().is_err());
        config.storage.cache_name = ".hidden".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_non_http_scope() {
        let mut config = AppConfig::default();
        config.scope.base_url = "ftp://localhost/".into();
        assert!(config.validate().is_err());
        config.scope.base_url = "not a url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_workers_and_unknown_level() {
        let mut config = AppConfig::default();
        config.ingest.max_workers = Some(0);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "loud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_config_validates_values() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("custom.toml");
        fs::write(&path, "[logging]\nlevel = \"verbose\"\n").unwrap();
        assert!(matches!(
            load_config_file(&path),
            Err(ConfigError::Validation(_))
        ));
    }
}
