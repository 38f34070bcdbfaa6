//! Command-line interface for pulseops.
//!
//! Run `pulseops` to start every listener against the embedded store, or
//! point it at a cluster with `--backend cassandra --contact-point host:9042`.

use crate::application::{self, Application, RunMode};
use crate::core::config::{ConfigBuilder, LoggingConfig};
use crate::core::{Config, PulseError, Result, StorageBackendKind};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Edge metrics ingestion and range queries over day-partitioned storage.
#[derive(Parser, Debug)]
#[command(name = "pulseops")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// OTLP/gRPC ingest port
    #[arg(long, env = "PULSEOPS_GRPC_PORT")]
    pub grpc_port: Option<u16>,

    /// OTLP/HTTP ingest port
    #[arg(long, env = "PULSEOPS_HTTP_PORT")]
    pub http_port: Option<u16>,

    /// Query API port
    #[arg(long, env = "PULSEOPS_API_PORT")]
    pub api_port: Option<u16>,

    /// Storage backend
    #[arg(long, env = "PULSEOPS_BACKEND", value_parser = parse_backend)]
    pub backend: Option<StorageBackendKind>,

    /// CQL contact point, repeatable
    #[arg(long = "contact-point", env = "PULSEOPS_CONTACT_POINTS", value_delimiter = ',')]
    pub contact_points: Vec<String>,

    /// Datacenter this node writes to
    #[arg(long, env = "PULSEOPS_LOCAL_DC")]
    pub local_datacenter: Option<String>,

    /// Keyspace holding the metrics table
    #[arg(long, env = "PULSEOPS_KEYSPACE")]
    pub keyspace: Option<String>,

    /// Per-call storage timeout, e.g. `5s`
    #[arg(long, env = "PULSEOPS_REQUEST_TIMEOUT", value_parser = humantime::parse_duration)]
    pub request_timeout: Option<Duration>,

    /// Configuration file path (default: ~/.config/pulseops/config.yaml)
    #[arg(short, long, env = "PULSEOPS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Which listeners to run
    #[arg(long, value_enum, env = "PULSEOPS_MODE", default_value_t = RunMode::All)]
    pub mode: RunMode,

    /// Enable debug logging
    #[arg(short, long, env = "PULSEOPS_DEBUG")]
    pub debug: bool,

    /// Log with targets, thread ids and line numbers
    #[arg(long, env = "PULSEOPS_STRUCTURED_LOGS")]
    pub structured: bool,

    /// Create the keyspace and table, then exit
    #[arg(long)]
    pub init_schema: bool,

    /// Validate configuration, print it and exit
    #[arg(long)]
    pub check_config: bool,
}

fn parse_backend(value: &str) -> std::result::Result<StorageBackendKind, String> {
    match value.to_ascii_lowercase().as_str() {
        "memory" => Ok(StorageBackendKind::Memory),
        "cassandra" => Ok(StorageBackendKind::Cassandra),
        other => Err(format!("unknown backend '{}', expected 'memory' or 'cassandra'", other)),
    }
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Load configuration with proper precedence:
    /// 1. CLI arguments and environment variables (highest priority)
    /// 2. Config file
    /// 3. Defaults (lowest priority)
    pub async fn load_config(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::new();

        let config_path = match &self.config {
            Some(path) => Some(path.clone()),
            None => dirs::config_dir()
                .map(|d| d.join("pulseops").join("config.yaml"))
                .filter(|p| p.exists()),
        };

        if let Some(path) = config_path {
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    builder = builder.from_yaml(&content)?;
                },
                Err(e) => {
                    return Err(PulseError::config(format!(
                        "Failed to read config file {:?}: {}",
                        path, e
                    )));
                },
            }
        }

        self.build_config_from_args(builder)
    }

    fn build_config_from_args(&self, mut builder: ConfigBuilder) -> Result<Config> {
        if let Some(port) = self.grpc_port {
            builder = builder.grpc_port(port);
        }
        if let Some(port) = self.http_port {
            builder = builder.http_port(port);
        }
        if let Some(port) = self.api_port {
            builder = builder.api_port(port);
        }
        if let Some(backend) = self.backend {
            builder = builder.backend(backend);
        }
        if !self.contact_points.is_empty() {
            builder = builder.contact_points(self.contact_points.clone());
        }
        if let Some(dc) = &self.local_datacenter {
            builder = builder.local_datacenter(dc.as_str());
        }
        if let Some(keyspace) = &self.keyspace {
            builder = builder.keyspace(keyspace.as_str());
        }
        if let Some(timeout) = self.request_timeout {
            builder = builder.request_timeout(timeout);
        }

        builder.debug(self.debug).build()
    }

    /// Initialize logging.
    ///
    /// `--debug` wins over `PULSEOPS_LOG_LEVEL`, which wins over the config
    /// file; `RUST_LOG` replaces all of them when set.
    pub fn init_logging(&self, logging: &LoggingConfig) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let env_log_level = std::env::var("PULSEOPS_LOG_LEVEL").ok();
        let log_level = if self.debug {
            "debug"
        } else {
            env_log_level.as_deref().unwrap_or(logging.level.as_str())
        };

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        let fmt_layer = if self.structured || logging.structured {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .compact()
        } else {
            tracing_subscriber::fmt::layer().with_target(false).compact()
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| PulseError::config(format!("Failed to initialize logging: {}", e)))?;

        Ok(())
    }
}

/// Execute the pulseops command.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.load_config().await?;
    cli.init_logging(&config.logging)?;

    if cli.check_config {
        let rendered = serde_yaml::to_string(&config)
            .map_err(|e| PulseError::config(format!("Failed to render configuration: {}", e)))?;
        println!("Configuration is valid!");
        print!("{}", rendered);
        return Ok(());
    }

    if cli.init_schema {
        tracing::info!("Creating keyspace {}", config.topology.keyspace);
        return application::init_schema(&config).await;
    }

    tracing::info!(
        "Starting pulseops ({:?} mode, {:?} backend, local datacenter {})",
        cli.mode,
        config.storage.backend,
        config.topology.local_datacenter
    );

    let app = Application::start(config).await?;
    app.run(cli.mode, application::shutdown_signal()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["pulseops"]).unwrap();
        assert_eq!(cli.mode, RunMode::All);
        assert!(!cli.debug);
        assert!(cli.contact_points.is_empty());
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "pulseops",
            "--api-port",
            "9000",
            "--backend",
            "Cassandra",
            "--contact-point",
            "10.0.0.1:9042,10.0.0.2:9042",
            "--local-datacenter",
            "edge-a",
            "--request-timeout",
            "5s",
            "--mode",
            "query",
        ])
        .unwrap();

        let topology_cfg = "topology:\n  local_datacenter: edge-a\n  datacenters:\n    - name: edge-a\n      replication_factor: 1\n";
        let builder = ConfigBuilder::new().from_yaml(topology_cfg).unwrap();
        let config = cli.build_config_from_args(builder).unwrap();

        assert_eq!(cli.mode, RunMode::Query);
        assert_eq!(config.server.api_port, 9000);
        assert_eq!(config.storage.backend, StorageBackendKind::Cassandra);
        assert_eq!(config.storage.contact_points.len(), 2);
        assert_eq!(config.storage.request_timeout, Duration::from_secs(5));
        assert_eq!(config.topology.local_datacenter, "edge-a");
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(Cli::try_parse_from(["pulseops", "--backend", "sqlite"]).is_err());
    }
}
