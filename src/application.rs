//! Process lifecycle for pulseops.
//!
//! Startup connects to the storage engine and verifies the schema before any
//! listener is bound; a failure there aborts the process. Shutdown stops the
//! listeners, lets in-flight requests finish, then closes the store.

use crate::api::create_query_router;
use crate::core::{Config, PulseError, Result};
use crate::monitoring::Monitor;
use crate::query::RangeQueryPlanner;
use crate::receiver::{create_http_router, create_metrics_service_server, MetricsIngestor};
use crate::storage::{self, IngestWriter, MetricStore};
use crate::topology::TopologyPolicy;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Which listeners to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum RunMode {
    /// OTLP/HTTP and OTLP/gRPC ingest only
    Ingest,
    /// Query API only
    Query,
    /// Everything
    #[default]
    All,
}

impl RunMode {
    fn ingest(self) -> bool {
        matches!(self, RunMode::Ingest | RunMode::All)
    }

    fn query(self) -> bool {
        matches!(self, RunMode::Query | RunMode::All)
    }
}

/// Main application struct that coordinates all components of pulseops.
pub struct Application {
    config: Config,
    topology: TopologyPolicy,
    store: Arc<dyn MetricStore>,
    monitor: Arc<Monitor>,
    ingestor: Arc<MetricsIngestor>,
    planner: Arc<RangeQueryPlanner>,
}

impl Application {
    /// Connect to storage and verify the schema.
    pub async fn start(config: Config) -> Result<Self> {
        let topology = config.topology_policy()?;
        if topology.reads_need_remote() {
            tracing::warn!(
                "Read consistency {} needs remote replicas; queries will fail during a partition",
                topology.read_consistency()
            );
        }

        let store = storage::connect(&config, &topology).await?;
        store.verify_schema().await.map_err(|e| {
            tracing::error!("Schema verification failed on {} store: {}", store.name(), e);
            e
        })?;
        Self::with_store(config, store)
    }

    /// Wire the application around an already verified store.
    pub fn with_store(config: Config, store: Arc<dyn MetricStore>) -> Result<Self> {
        let topology = config.topology_policy()?;
        let monitor = Arc::new(Monitor::new());

        let writer = IngestWriter::new(Arc::clone(&store), &topology, &config.storage)
            .with_monitor(Arc::clone(&monitor));
        let ingestor = Arc::new(MetricsIngestor::new(Arc::new(writer), Arc::clone(&monitor)));

        let planner = RangeQueryPlanner::new(Arc::clone(&store), &topology, &config.storage)
            .with_monitor(Arc::clone(&monitor));

        Ok(Self {
            config,
            topology,
            store,
            monitor,
            ingestor,
            planner: Arc::new(planner),
        })
    }

    /// Router for OTLP/HTTP ingest.
    pub fn ingest_router(&self) -> Router {
        create_http_router(Arc::clone(&self.ingestor), self.config.server.max_body_bytes)
    }

    /// Router for the query API.
    pub fn query_router(&self) -> Router {
        create_query_router(Arc::clone(&self.planner), Arc::clone(&self.monitor))
    }

    pub fn ingestor(&self) -> &Arc<MetricsIngestor> {
        &self.ingestor
    }

    pub fn planner(&self) -> &Arc<RangeQueryPlanner> {
        &self.planner
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn topology(&self) -> &TopologyPolicy {
        &self.topology
    }

    /// Serve until `shutdown` resolves or a listener fails, then drain and
    /// close the store.
    pub async fn run<F>(self, mode: RunMode, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut servers: JoinSet<Result<()>> = JoinSet::new();

        let mut failure = match self.spawn_listeners(mode, &mut servers, &stop_rx).await {
            Ok(()) => None,
            Err(e) => {
                tracing::error!("Failed to start listeners: {}", e);
                Some(e)
            },
        };

        if failure.is_none() {
            tokio::select! {
                () = shutdown => {
                    tracing::info!("Received shutdown signal, stopping listeners...");
                }
                Some(joined) = servers.join_next() => {
                    failure = server_failure(joined);
                    tracing::warn!("A listener stopped unexpectedly, shutting down");
                }
            }
        }

        let _ = stop_tx.send(true);
        while let Some(joined) = servers.join_next().await {
            if let Some(e) = server_failure(joined) {
                failure.get_or_insert(e);
            }
        }

        if let Err(e) = self.store.shutdown().await {
            tracing::error!("Failed to close {} store: {}", self.store.name(), e);
            failure.get_or_insert(e);
        }
        tracing::info!("pulseops stopped");

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn spawn_listeners(
        &self,
        mode: RunMode,
        servers: &mut JoinSet<Result<()>>,
        stop_rx: &watch::Receiver<bool>,
    ) -> Result<()> {
        let bind = self.config.server.bind_address;

        if mode.ingest() {
            let http_addr = SocketAddr::new(bind, self.config.server.http_port);
            let listener = bind_listener(http_addr).await?;
            tracing::info!("OTLP/HTTP receiver listening on {}", http_addr);
            servers.spawn(serve_http(listener, self.ingest_router(), stop_rx.clone()));

            let grpc_addr = SocketAddr::new(bind, self.config.server.grpc_port);
            let service = create_metrics_service_server(Arc::clone(&self.ingestor));
            let grpc_stop = stop_rx.clone();
            tracing::info!("OTLP/gRPC receiver listening on {}", grpc_addr);
            servers.spawn(async move {
                tonic::transport::Server::builder()
                    .add_service(service)
                    .serve_with_shutdown(grpc_addr, stopped(grpc_stop))
                    .await
                    .map_err(|e| PulseError::protocol(format!("gRPC server on {} failed: {}", grpc_addr, e)))
            });
        }

        if mode.query() {
            let api_addr = SocketAddr::new(bind, self.config.server.api_port);
            let listener = bind_listener(api_addr).await?;
            tracing::info!("Query API listening on {}", api_addr);
            servers.spawn(serve_http(listener, self.query_router(), stop_rx.clone()));
        }

        Ok(())
    }
}

/// Create the keyspace and table on the configured backend.
pub async fn init_schema(config: &Config) -> Result<()> {
    let topology = config.topology_policy()?;
    let store = storage::connect(config, &topology).await?;
    let created = store.create_schema(&topology).await;
    store.shutdown().await?;
    created
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

async fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr).await.map_err(|e| {
        PulseError::Io(std::io::Error::new(e.kind(), format!("Failed to bind to {}: {}", addr, e)))
    })
}

async fn serve_http(listener: TcpListener, router: Router, stop: watch::Receiver<bool>) -> Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(stopped(stop))
        .await
        .map_err(PulseError::Io)
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    // A dropped sender also means stop
    let _ = stop.wait_for(|stop| *stop).await;
}

fn server_failure(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Option<PulseError> {
    match joined {
        Ok(Ok(())) => None,
        Ok(Err(e)) => {
            tracing::error!("Listener failed: {}", e);
            Some(e)
        },
        Err(e) => {
            tracing::error!("Listener task panicked: {}", e);
            Some(PulseError::Join(e))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ConfigBuilder;
    use crate::storage::InMemoryStore;

    #[test]
    fn test_run_mode_selection() {
        assert!(RunMode::All.ingest() && RunMode::All.query());
        assert!(RunMode::Ingest.ingest() && !RunMode::Ingest.query());
        assert!(!RunMode::Query.ingest() && RunMode::Query.query());
    }

    #[tokio::test]
    async fn test_run_stops_and_closes_store() {
        let config = ConfigBuilder::new()
            .http_port(24_318)
            .grpc_port(24_317)
            .api_port(23_002)
            .build()
            .unwrap();

        let store = Arc::new(InMemoryStore::new());
        let app = Application::with_store(config, store.clone()).unwrap();
        app.run(RunMode::Query, async {}).await.unwrap();

        assert!(store.verify_schema().await.unwrap_err().is_unavailable());
    }

    #[tokio::test]
    async fn test_start_with_memory_backend() {
        let app = Application::start(Config::default()).await.unwrap();
        assert_eq!(app.topology().keyspace(), "pulseops");
    }

    #[tokio::test]
    async fn test_bind_failure_still_closes_store() {
        let config = ConfigBuilder::new()
            .http_port(24_418)
            .grpc_port(24_417)
            .api_port(23_102)
            .build()
            .unwrap();
        let _taken = TcpListener::bind(("0.0.0.0", 23_102)).await.unwrap();

        let store = Arc::new(InMemoryStore::new());
        let app = Application::with_store(config, store.clone()).unwrap();
        let err = app.run(RunMode::All, std::future::pending()).await.unwrap_err();

        assert!(matches!(err, PulseError::Io(_)));
        assert!(store.verify_schema().await.unwrap_err().is_unavailable());
    }
}
