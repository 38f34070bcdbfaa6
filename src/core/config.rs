//! Configuration management for pulseops.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - Environment variable and CLI overrides (applied by the CLI)
//! - Validation and defaults

use crate::core::{PulseError, Result};
use crate::topology::{TopologyConfig, TopologyPolicy};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Complete configuration for pulseops
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener configuration
    pub server: ServerConfig,
    /// Storage engine configuration
    pub storage: StorageConfig,
    /// Replication topology and consistency levels
    pub topology: TopologyConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// OTLP/HTTP ingest port
    pub http_port: u16,
    /// OTLP/gRPC ingest port
    pub grpc_port: u16,
    /// Query API port
    pub api_port: u16,
    /// Bind address for all listeners
    pub bind_address: IpAddr,
    /// Maximum accepted request body
    pub max_body_bytes: usize,
}

/// Storage engine selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    /// Embedded, process-local engine
    Memory,
    /// Cassandra / ScyllaDB cluster over CQL
    Cassandra,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Which engine to connect to
    pub backend: StorageBackendKind,
    /// `host:port` contact points for the CQL engine
    pub contact_points: Vec<String>,
    /// Connection establishment timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Per-call timeout for reads and writes
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Concurrent writes per ingest request
    pub write_concurrency: usize,
    /// Concurrent bucket reads per range query
    pub read_concurrency: usize,
    /// Largest number of daily buckets one query may touch
    pub max_query_buckets: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Targets, thread ids and line numbers in every line
    pub structured: bool,
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            http_port: 4318,
            grpc_port: 4317,
            api_port: 3002,
            bind_address: IpAddr::from([0, 0, 0, 0]),
            max_body_bytes: 8 * 1024 * 1024,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            backend: StorageBackendKind::Memory,
            contact_points: vec!["127.0.0.1:9042".to_string()],
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            write_concurrency: 64,
            read_concurrency: 8,
            max_query_buckets: 366,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let ports = [self.server.http_port, self.server.grpc_port, self.server.api_port];
        for (i, port) in ports.iter().enumerate() {
            if ports[i + 1..].contains(port) {
                return Err(PulseError::config(format!(
                    "HTTP, GRPC and API ports must be different: {} is used twice",
                    port
                )));
            }
        }

        if self.server.max_body_bytes == 0 {
            return Err(PulseError::config("max_body_bytes must be greater than 0"));
        }

        if self.storage.backend == StorageBackendKind::Cassandra
            && self.storage.contact_points.is_empty()
        {
            return Err(PulseError::config("At least one contact point is required"));
        }

        if self.storage.connect_timeout.is_zero() || self.storage.request_timeout.is_zero() {
            return Err(PulseError::config("Storage timeouts must be greater than 0"));
        }

        if self.storage.write_concurrency == 0 || self.storage.read_concurrency == 0 {
            return Err(PulseError::config("Storage fan-out limits must be greater than 0"));
        }

        if self.storage.max_query_buckets == 0 {
            return Err(PulseError::config("max_query_buckets must be greater than 0"));
        }

        TopologyPolicy::validate(&self.topology)?;

        Ok(())
    }

    /// Validated topology policy for this configuration
    pub fn topology_policy(&self) -> Result<TopologyPolicy> {
        TopologyPolicy::new(self.topology.clone())
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| PulseError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set OTLP/HTTP port
    pub fn http_port(mut self, port: u16) -> Self {
        self.config.server.http_port = port;
        self
    }

    /// Set OTLP/gRPC port
    pub fn grpc_port(mut self, port: u16) -> Self {
        self.config.server.grpc_port = port;
        self
    }

    /// Set query API port
    pub fn api_port(mut self, port: u16) -> Self {
        self.config.server.api_port = port;
        self
    }

    /// Select the storage backend
    pub fn backend(mut self, backend: StorageBackendKind) -> Self {
        self.config.storage.backend = backend;
        self
    }

    /// Replace the CQL contact points
    pub fn contact_points(mut self, points: Vec<String>) -> Self {
        self.config.storage.contact_points = points;
        self
    }

    /// Set the local datacenter
    pub fn local_datacenter(mut self, dc: impl Into<String>) -> Self {
        self.config.topology.local_datacenter = dc.into();
        self
    }

    /// Set the keyspace
    pub fn keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.config.topology.keyspace = keyspace.into();
        self
    }

    /// Set the per-call storage timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.storage.request_timeout = timeout;
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
