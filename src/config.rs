//! Configuration management
//!
//! TOML configuration with environment variable overrides and sensible
//! defaults. The server reads the path from `RESTWEAVE_CONFIG`, falling
//! back to `./restweave.toml`, and finally to pure defaults. Resource
//! mappings may additionally be injected through `RESTWEAVE_MAPPING_<NAME>`
//! environment variables, which always win over the file.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ApplicationConfig {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerSettings,

    /// Query engine settings
    #[serde(default)]
    pub engine: EngineSettings,

    /// Static resource mappings: resource name to URL template
    #[serde(default)]
    pub mappings: HashMap<String, String>,
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    /// Listen address, host:port
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Allowed CORS origins; empty allows any origin
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,

    /// Log level when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Default tenant for mapping resolution
    #[serde(default = "default_tenant")]
    pub tenant: String,
}

/// Query engine settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSettings {
    /// Statement timeout when the query declares none, in milliseconds
    #[serde(default = "default_statement_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Upper bound on declared statement timeouts, in milliseconds
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,

    /// Deadline for an entire query execution, in milliseconds
    #[serde(default = "default_query_deadline_ms")]
    pub query_deadline_ms: u64,

    /// Upstream connection pool size per host
    #[serde(default = "default_max_connections_per_host")]
    pub max_connections_per_host: usize,
}

// Default value functions
fn default_listen_addr() -> String {
    "0.0.0.0:9000".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_tenant() -> String {
    "default".to_string()
}
fn default_statement_timeout_ms() -> u64 {
    5_000
}
fn default_max_timeout_ms() -> u64 {
    30_000
}
fn default_query_deadline_ms() -> u64 {
    60_000
}
fn default_max_connections_per_host() -> usize {
    512
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            cors_allowed_origins: Vec::new(),
            log_level: default_log_level(),
            tenant: default_tenant(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_statement_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
            query_deadline_ms: default_query_deadline_ms(),
            max_connections_per_host: default_max_connections_per_host(),
        }
    }
}

impl ApplicationConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config file {path}: {e}"))?;
        toml::from_str(&contents).map_err(|e| format!("failed to parse config file {path}: {e}"))
    }

    /// Load configuration from a TOML file with environment overrides
    pub fn from_file_with_env(path: &str) -> Result<Self, String> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("RESTWEAVE_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Ok(port) = std::env::var("RESTWEAVE_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                let host = self
                    .server
                    .listen_addr
                    .rsplit_once(':')
                    .map(|(host, _)| host.to_string())
                    .unwrap_or_else(|| "0.0.0.0".to_string());
                self.server.listen_addr = format!("{host}:{p}");
            }
        }
        if let Ok(tenant) = std::env::var("RESTWEAVE_TENANT") {
            self.server.tenant = tenant;
        }
        if let Ok(timeout) = std::env::var("RESTWEAVE_DEFAULT_TIMEOUT_MS") {
            if let Ok(t) = timeout.parse() {
                self.engine.default_timeout_ms = t;
            }
        }
        if let Ok(deadline) = std::env::var("RESTWEAVE_QUERY_DEADLINE_MS") {
            if let Ok(d) = deadline.parse() {
                self.engine.query_deadline_ms = d;
            }
        }
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.server.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.server.listen_addr.is_empty() {
            return Err("listen address cannot be empty".to_string());
        }
        if self.engine.default_timeout_ms == 0 {
            return Err("default timeout must be > 0".to_string());
        }
        if self.engine.max_timeout_ms < self.engine.default_timeout_ms {
            return Err("max timeout must be >= default timeout".to_string());
        }
        if self.engine.query_deadline_ms == 0 {
            return Err("query deadline must be > 0".to_string());
        }
        Ok(())
    }
}
