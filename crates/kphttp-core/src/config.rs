//! Configuration resolution for kphttp.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Config file (explicit path, or the global `kphttp/settings.json`)
//! 3. Environment variables
//! 4. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::protocol::PROTOCOL_VERSION;

/// Complete kphttp configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// Protocol engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Reported as `Response.Version`.
    pub version: String,
    /// Export matching custom fields as `StringFields`.
    pub return_string_fields: bool,
    /// Custom fields starting with this prefix are exported.
    pub string_field_prefix: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            return_string_fields: false,
            string_field_prefix: "KPH: ".to_string(),
        }
    }
}

/// Host daemon settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub database_path: Option<PathBuf>,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

/// Load configuration with hierarchical resolution.
///
/// An explicit `path` must exist; the global file is optional.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => load_config_file(path)?,
        None => match global_config_path() {
            Some(global) if global.exists() => load_config_file(&global)?,
            _ => Config::default(),
        },
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Global config file path (`<config dir>/kphttp/settings.json`).
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("kphttp").join("settings.json"))
}

/// Default credential database path (`<data dir>/kphttp/database.json`).
pub fn default_database_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("kphttp").join("database.json"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn parse_bool(val: &str) -> Option<bool> {
    match val.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("KPHTTP_DATABASE") {
        config.daemon.database_path = Some(PathBuf::from(val));
    }
    if let Ok(val) = std::env::var("KPHTTP_LOG_LEVEL") {
        config.daemon.log_level = val;
    }
    if let Some(b) = std::env::var("KPHTTP_LOG_JSON").ok().as_deref().and_then(parse_bool) {
        config.daemon.log_json = b;
    }
    if let Some(b) = std::env::var("KPHTTP_RETURN_STRING_FIELDS")
        .ok()
        .as_deref()
        .and_then(parse_bool)
    {
        config.protocol.return_string_fields = b;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_reports_protocol_version() {
        let config = Config::default();
        assert_eq!(config.protocol.version, "1.8.4.1");
        assert!(!config.protocol.return_string_fields);
        assert_eq!(config.protocol.string_field_prefix, "KPH: ");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"protocol":{"return_string_fields":true}}"#).unwrap();

        let config = load_config_file(&path).unwrap();
        assert!(config.protocol.return_string_fields);
        assert_eq!(config.protocol.version, "1.8.4.1");
        assert_eq!(config.daemon.log_level, "info");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let result = load_config(Some(Path::new("/nonexistent/kphttp/settings.json")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(load_config_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
