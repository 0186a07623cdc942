//! Server configuration module
//!
//! Handles loading and parsing of server configuration from files and environment variables.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Server name used in logs
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Addresses the game listeners bind to
    #[serde(default = "default_listen_addrs")]
    pub listen_addrs: Vec<String>,

    /// Pump cycle interval in milliseconds
    #[serde(default = "default_tick_rate")]
    pub tick_rate_ms: u64,

    /// Socket read chunk size in bytes
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,

    /// Number of pre-allocated packet buffers
    #[serde(default = "default_pool_slot_count")]
    pub pool_slot_count: usize,

    /// Size of each pooled packet buffer in bytes
    #[serde(default = "default_pool_slot_size")]
    pub pool_slot_size: usize,

    /// Ceiling on buffered inbound bytes per connection (0 = unbounded)
    #[serde(default)]
    pub max_buffered_bytes: usize,

    /// Enable per-opcode packet profiling
    #[serde(default)]
    pub profiler_enabled: bool,

    /// Enable debug logging
    #[serde(default)]
    pub debug: bool,
}

// Default value functions
fn default_server_name() -> String {
    "Ravenmoor".to_string()
}

fn default_listen_addrs() -> Vec<String> {
    vec!["0.0.0.0:2593".to_string()]
}

fn default_tick_rate() -> u64 {
    50
}

fn default_read_chunk_size() -> usize {
    4096
}

fn default_pool_slot_count() -> usize {
    4
}

fn default_pool_slot_size() -> usize {
    1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/server.toml"),
            server_name: default_server_name(),
            listen_addrs: default_listen_addrs(),
            tick_rate_ms: default_tick_rate(),
            read_chunk_size: default_read_chunk_size(),
            pool_slot_count: default_pool_slot_count(),
            pool_slot_size: default_pool_slot_size(),
            max_buffered_bytes: 0,
            profiler_enabled: false,
            debug: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from file and environment variables
    pub async fn load() -> Result<Self> {
        // Determine config path from environment or use default
        let config_path = env::var("RAVENMOOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/server.toml"));

        // Try to load from file
        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| {
                    format!("Failed to read config file: {}", config_path.display())
                })?;

            toml::from_str(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            Self::default()
        };

        config.config_path = config_path;

        // Override with environment variables
        config.apply_env_overrides();

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("RAVENMOOR_SERVER_NAME") {
            self.server_name = val;
        }
        if let Ok(val) = env::var("RAVENMOOR_LISTEN_ADDRS") {
            let addrs: Vec<String> = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !addrs.is_empty() {
                self.listen_addrs = addrs;
            }
        }
        if let Ok(val) = env::var("RAVENMOOR_TICK_RATE_MS") {
            if let Ok(rate) = val.parse() {
                self.tick_rate_ms = rate;
            }
        }
        if let Ok(val) = env::var("RAVENMOOR_READ_CHUNK_SIZE") {
            if let Ok(size) = val.parse() {
                self.read_chunk_size = size;
            }
        }
        if let Ok(val) = env::var("RAVENMOOR_MAX_BUFFERED_BYTES") {
            if let Ok(max) = val.parse() {
                self.max_buffered_bytes = max;
            }
        }
        if let Ok(val) = env::var("RAVENMOOR_PROFILER") {
            self.profiler_enabled = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(val) = env::var("RAVENMOOR_DEBUG") {
            self.debug = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.listen_addrs.is_empty() {
            anyhow::bail!("At least one listen address is required");
        }
        for addr in &self.listen_addrs {
            addr.parse::<SocketAddr>()
                .with_context(|| format!("Invalid listen address: {}", addr))?;
        }

        // Tick rate must be reasonable
        if self.tick_rate_ms == 0 || self.tick_rate_ms > 1000 {
            anyhow::bail!("Tick rate must be between 1ms and 1000ms");
        }

        if self.read_chunk_size < 256 || self.read_chunk_size > 65536 {
            anyhow::bail!("Read chunk size must be between 256 and 65536 bytes");
        }

        if self.pool_slot_count == 0 {
            anyhow::bail!("Pool slot count must be at least 1");
        }
        if self.pool_slot_size < 64 {
            anyhow::bail!("Pool slot size must be at least 64 bytes");
        }

        if self.max_buffered_bytes > 0 && self.max_buffered_bytes < self.read_chunk_size {
            anyhow::bail!("Buffered byte ceiling must be at least one read chunk");
        }

        Ok(())
    }

    /// Parsed listener addresses
    pub fn listener_addrs(&self) -> Vec<SocketAddr> {
        self.listen_addrs
            .iter()
            .filter_map(|a| a.parse().ok())
            .collect()
    }
}
