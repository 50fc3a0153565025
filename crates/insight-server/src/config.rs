//! Server configuration.

use anyhow::Result;
use insight_types::MaskKind;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Analytical store, opened read-only.
    #[serde(default = "default_analytics_db_path")]
    pub analytics_db_path: PathBuf,
    /// Append-only audit trail, kept separate from the analytical store.
    #[serde(default = "default_audit_db_path")]
    pub audit_db_path: PathBuf,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,
    #[serde(default = "default_row_cap")]
    pub default_row_cap: usize,
    #[serde(default = "default_max_row_cap")]
    pub max_row_cap: usize,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Snapshot staging row counts may grow or shrink by at most this
    /// factor between refreshes.
    #[serde(default = "default_bound_factor")]
    pub bound_factor: f64,
    /// Principals allowed to request unmasked results.
    #[serde(default)]
    pub unmasked_principals: Vec<String>,
    /// Extra column-name classifications merged over the built-ins.
    #[serde(default)]
    pub column_classifications: HashMap<String, MaskKind>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_analytics_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("insight-gateway")
        .join("analytics.db")
}

fn default_audit_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("insight-gateway")
        .join("audit.db")
}

fn default_pool_size() -> usize {
    4
}

fn default_acquire_timeout_ms() -> u64 {
    2_000
}

fn default_query_timeout_secs() -> u64 {
    30
}

fn default_max_query_length() -> usize {
    10_000
}

fn default_row_cap() -> usize {
    1_000
}

fn default_max_row_cap() -> usize {
    1_000
}

fn default_refresh_interval_secs() -> u64 {
    900
}

fn default_bound_factor() -> f64 {
    2.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            analytics_db_path: default_analytics_db_path(),
            audit_db_path: default_audit_db_path(),
            pool_size: default_pool_size(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            query_timeout_secs: default_query_timeout_secs(),
            max_query_length: default_max_query_length(),
            default_row_cap: default_row_cap(),
            max_row_cap: default_max_row_cap(),
            refresh_interval_secs: default_refresh_interval_secs(),
            bound_factor: default_bound_factor(),
            unmasked_principals: Vec::new(),
            column_classifications: HashMap::new(),
        }
    }
}

impl Config {
    /// Load config from a specific file path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load config from default location (config/default.toml) or fall back to defaults.
    pub fn load() -> Result<Self> {
        let config_path = PathBuf::from("config/default.toml");
        if config_path.exists() {
            return Self::load_from(&config_path);
        }
        Ok(Config::default())
    }
}
