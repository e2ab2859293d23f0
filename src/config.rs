//! Configuration Module
//!
//! Loads server configuration from a YAML file and validates it at startup.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::PolicyKind;
use crate::error::{HpcsError, Result};

// == Config ==
/// Top-level server configuration.
///
/// Every section and every field may be omitted from the file; missing
/// values take the defaults below.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub cluster: ClusterConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    /// Per-connection read deadline as a humantime string; "0s" disables
    pub read_timeout: String,
    /// Per-connection write deadline as a humantime string; "0s" disables
    pub write_timeout: String,
    pub idle_timeout: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 6379,
            max_connections: 10_000,
            read_timeout: "30s".to_string(),
            write_timeout: "30s".to_string(),
            idle_timeout: "120s".to_string(),
        }
    }
}

impl ServerConfig {
    /// Listen address in `host:port` form.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Read deadline, or None when disabled. Assumes a validated config.
    pub fn read_timeout(&self) -> Option<Duration> {
        parse_optional_duration(&self.read_timeout)
    }

    /// Write deadline, or None when disabled. Assumes a validated config.
    pub fn write_timeout(&self) -> Option<Duration> {
        parse_optional_duration(&self.write_timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Capacity bound: bare byte count or KB/MB/GB suffix (multiplier 1024)
    pub max_memory: String,
    pub eviction_policy: PolicyKind,
    pub cleanup_interval: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory: "1GB".to_string(),
            eviction_policy: PolicyKind::Lru,
            cleanup_interval: "60s".to_string(),
        }
    }
}

impl CacheConfig {
    /// Capacity bound in bytes. Assumes a validated config.
    pub fn max_memory_bytes(&self) -> u64 {
        parse_memory_size(&self.max_memory).unwrap_or(1024 * 1024 * 1024)
    }

    /// Interval between maintenance passes. Assumes a validated config.
    pub fn cleanup_interval(&self) -> Duration {
        humantime::parse_duration(&self.cleanup_interval).unwrap_or(Duration::from_secs(60))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub enabled: bool,
    /// Peer addresses in `host:port` form
    pub nodes: Vec<String>,
    pub replica_count: usize,
    pub virtual_nodes: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            nodes: Vec::new(),
            replica_count: 1,
            virtual_nodes: 150,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
            path: "/metrics".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "json" selects the JSON formatter; anything else is human-readable
    pub format: String,
    /// "stdout" or "file"
    pub output: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            output: "stdout".to_string(),
            file: None,
        }
    }
}

impl Config {
    // == Load ==
    /// Reads and validates a YAML configuration file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HpcsError::Config(format!("failed to read config file {path}: {e}")))?;

        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| HpcsError::Config(format!("failed to parse config file {path}: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    // == Validate ==
    /// Checks every constraint that must hold before the server starts.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(HpcsError::Config("server port must be nonzero".to_string()));
        }

        if self.server.max_connections == 0 {
            return Err(HpcsError::Config("max_connections must be positive".to_string()));
        }

        for (name, value) in [
            ("read_timeout", &self.server.read_timeout),
            ("write_timeout", &self.server.write_timeout),
            ("idle_timeout", &self.server.idle_timeout),
            ("cleanup_interval", &self.cache.cleanup_interval),
        ] {
            humantime::parse_duration(value)
                .map_err(|e| HpcsError::Config(format!("invalid {name} {value:?}: {e}")))?;
        }

        parse_memory_size(&self.cache.max_memory)?;

        let valid_levels = ["debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(HpcsError::Config(format!(
                "invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }
}

// == Size Parsing ==
/// Parses a memory size: a bare byte count, or a decimal number with a
/// KB/MB/GB suffix (multiplier 1024).
pub fn parse_memory_size(size: &str) -> Result<u64> {
    let upper = size.trim().to_uppercase();

    let (digits, multiplier) = if let Some(prefix) = upper.strip_suffix("GB") {
        (prefix, 1024 * 1024 * 1024)
    } else if let Some(prefix) = upper.strip_suffix("MB") {
        (prefix, 1024 * 1024)
    } else if let Some(prefix) = upper.strip_suffix("KB") {
        (prefix, 1024)
    } else {
        (upper.as_str(), 1)
    };

    digits
        .trim()
        .parse::<u64>()
        .map(|value| value * multiplier)
        .map_err(|_| HpcsError::Config(format!("invalid memory size: {size}")))
}

fn parse_optional_duration(value: &str) -> Option<Duration> {
    humantime::parse_duration(value)
        .ok()
        .filter(|d| !d.is_zero())
}
