//! Server configuration for `hireline serve`.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `HIRELINE_*` environment variables, then command-line flags.
//!
//! # Example
//!
//! ```toml
//! [server]
//! port = 8080
//! rate_limit = 120
//! api_key = "local-dev-key"
//!
//! [engine]
//! platform_fee_percentage = 5
//!
//! [storage]
//! data_file = "hireline-data.json"
//!
//! [files]
//! public_url_prefix = "/files"
//! ```

use std::path::{Path, PathBuf};

use hireline_core::FeeRate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_RATE_LIMIT: u64 = 120;
pub const DEFAULT_FILES_PREFIX: &str = "/files";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {var}: '{value}'")]
    Env { var: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerSection,
    pub engine: EngineSection,
    pub storage: StorageSection,
    pub files: FilesSection,
}

/// `[server]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub port: u16,
    /// Requests per minute per client IP.
    pub rate_limit: u64,
    /// When set, every route except `/health` requires this key.
    pub api_key: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        ServerSection {
            port: DEFAULT_PORT,
            rate_limit: DEFAULT_RATE_LIMIT,
            api_key: None,
        }
    }
}

/// `[engine]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    pub platform_fee_percentage: Decimal,
}

impl Default for EngineSection {
    fn default() -> Self {
        EngineSection {
            platform_fee_percentage: FeeRate::default().percent(),
        }
    }
}

/// `[storage]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    /// JSON store file. Records are kept in memory only when unset.
    pub data_file: Option<PathBuf>,
}

/// `[files]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilesSection {
    pub public_url_prefix: String,
}

impl Default for FilesSection {
    fn default() -> Self {
        FilesSection {
            public_url_prefix: DEFAULT_FILES_PREFIX.to_string(),
        }
    }
}

/// Flag values given on the `serve` command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub fee_percent: Option<Decimal>,
    pub data_file: Option<PathBuf>,
    pub api_key: Option<String>,
    pub rate_limit: Option<u64>,
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl Config {
    /// Read a TOML config file. A missing `path` yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Config::default());
        };
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Config::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply `HIRELINE_*` variables from the process environment.
    pub fn apply_process_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env(|var| std::env::var(var).ok())
    }

    /// Apply `HIRELINE_*` variables as returned by `lookup`. Empty values are
    /// ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &'static str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("HIRELINE_PORT") {
            self.server.port = parse_env("HIRELINE_PORT", &v)?;
        }
        if let Some(v) = get("HIRELINE_RATE_LIMIT") {
            self.server.rate_limit = parse_env("HIRELINE_RATE_LIMIT", &v)?;
        }
        if let Some(v) = get("HIRELINE_API_KEY") {
            self.server.api_key = Some(v);
        }
        if let Some(v) = get("HIRELINE_FEE_PERCENT") {
            self.engine.platform_fee_percentage = parse_env("HIRELINE_FEE_PERCENT", &v)?;
        }
        if let Some(v) = get("HIRELINE_DATA_FILE") {
            self.storage.data_file = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(rate_limit) = overrides.rate_limit {
            self.server.rate_limit = rate_limit;
        }
        if let Some(key) = overrides.api_key {
            self.server.api_key = Some(key);
        }
        if let Some(fee) = overrides.fee_percent {
            self.engine.platform_fee_percentage = fee;
        }
        if let Some(path) = overrides.data_file {
            self.storage.data_file = Some(path);
        }
    }

    /// Check cross-field constraints; collects every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.server.rate_limit == 0 {
            problems.push("server.rate_limit must be at least 1".to_string());
        }
        if matches!(&self.server.api_key, Some(k) if k.trim().is_empty()) {
            problems.push("server.api_key must not be blank".to_string());
        }
        if let Err(e) = self.fee_rate() {
            problems.push(e.to_string());
        }
        if !self.files.public_url_prefix.starts_with('/')
            && !self.files.public_url_prefix.starts_with("http")
        {
            problems.push(format!(
                "files.public_url_prefix must be a path or URL, got '{}'",
                self.files.public_url_prefix
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems.join("; ")))
        }
    }

    pub fn fee_rate(&self) -> Result<FeeRate, ConfigError> {
        FeeRate::from_percent(self.engine.platform_fee_percentage)
            .map_err(|e| ConfigError::Invalid(format!("engine.platform_fee_percentage: {}", e)))
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.server.port, 8080);
        assert_eq!(c.server.rate_limit, 120);
        assert!(c.server.api_key.is_none());
        assert_eq!(c.engine.platform_fee_percentage, Decimal::from(5));
        assert!(c.storage.data_file.is_none());
        assert_eq!(c.files.public_url_prefix, "/files");
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let c = Config::parse(
            r#"
            [server]
            port = 9000

            [engine]
            platform_fee_percentage = 7.5
            "#,
        )
        .unwrap();
        assert_eq!(c.server.port, 9000);
        assert_eq!(c.server.rate_limit, 120);
        assert_eq!(c.engine.platform_fee_percentage, "7.5".parse::<Decimal>().unwrap());
        assert_eq!(c.files.public_url_prefix, "/files");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::parse("[server]\nprot = 1\n").is_err());
        assert!(Config::parse("[database]\nurl = \"x\"\n").is_err());
    }

    #[test]
    fn env_overrides_file() {
        let mut c = Config::parse("[server]\nport = 9000\n").unwrap();
        c.apply_env(env(&[
            ("HIRELINE_PORT", "9100"),
            ("HIRELINE_FEE_PERCENT", "10"),
            ("HIRELINE_DATA_FILE", "/tmp/store.json"),
            ("HIRELINE_API_KEY", "secret"),
            ("HIRELINE_RATE_LIMIT", ""),
        ]))
        .unwrap();
        assert_eq!(c.server.port, 9100);
        assert_eq!(c.server.rate_limit, 120);
        assert_eq!(c.server.api_key.as_deref(), Some("secret"));
        assert_eq!(c.engine.platform_fee_percentage, Decimal::from(10));
        assert_eq!(c.storage.data_file, Some(PathBuf::from("/tmp/store.json")));
    }

    #[test]
    fn bad_env_value_names_the_variable() {
        let mut c = Config::default();
        let err = c.apply_env(env(&[("HIRELINE_PORT", "eighty")])).unwrap_err();
        assert!(err.to_string().contains("HIRELINE_PORT"));
    }

    #[test]
    fn flags_override_env() {
        let mut c = Config::default();
        c.apply_env(env(&[("HIRELINE_PORT", "9100")])).unwrap();
        c.apply_overrides(Overrides {
            port: Some(9200),
            fee_percent: Some(Decimal::from(3)),
            ..Overrides::default()
        });
        assert_eq!(c.server.port, 9200);
        assert_eq!(c.fee_rate().unwrap().percent(), Decimal::from(3));
    }

    #[test]
    fn validate_collects_problems() {
        let mut c = Config::default();
        c.server.rate_limit = 0;
        c.engine.platform_fee_percentage = Decimal::from(150);
        let msg = c.validate().unwrap_err().to_string();
        assert!(msg.contains("rate_limit"));
        assert!(msg.contains("platform_fee_percentage"));
    }

    #[test]
    fn load_missing_file_is_a_read_error() {
        let err = Config::load(Some(Path::new("/nonexistent/hireline.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
