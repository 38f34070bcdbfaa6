//! CQL storage engine over a Cassandra-compatible cluster.
//!
//! Connections are datacenter-aware: the load balancer prefers the local
//! datacenter and only fails over to remote ones when the topology allows
//! it. Every statement carries the consistency level chosen by the caller.

use super::{MetricStore, RangeRead};
use crate::core::config::StorageConfig;
use crate::core::{MetricRow, PulseError, Result};
use crate::topology::{Consistency, TopologyPolicy};
use arc_swap::ArcSwapOption;
use scylla::frame::value::CqlTimestamp;
use scylla::prepared_statement::PreparedStatement;
use scylla::transport::errors::{DbError, QueryError};
use scylla::transport::host_filter::{DcHostFilter, HostFilter};
use scylla::transport::load_balancing::DefaultPolicy;
use scylla::transport::session::PoolSize;
use scylla::{ExecutionProfile, Session, SessionBuilder};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

const DRAIN_POLL: Duration = Duration::from_millis(50);

struct Statements {
    insert: PreparedStatement,
    select_range: PreparedStatement,
}

/// Metric store backed by a CQL session.
pub struct CassandraStore {
    session: ArcSwapOption<Session>,
    statements: ArcSwapOption<Statements>,
    keyspace: String,
    drain_timeout: Duration,
}

impl CassandraStore {
    /// Open a session against the configured contact points.
    pub async fn connect(config: &StorageConfig, topology: &TopologyPolicy) -> Result<Self> {
        let balancing = DefaultPolicy::builder()
            .prefer_datacenter(topology.local_datacenter().to_string())
            .permit_dc_failover(topology.permit_remote_failover())
            .build();

        let profile = ExecutionProfile::builder()
            .consistency(to_cql(topology.write_consistency()))
            .request_timeout(Some(config.request_timeout))
            .load_balancing_policy(balancing)
            .build();

        let connections = NonZeroUsize::new(topology.pool().local_connections)
            .ok_or_else(|| PulseError::config("local pool size must be non-zero"))?;

        tracing::info!(
            "Connecting to {:?} (local datacenter {}, {} connections per host)",
            config.contact_points,
            topology.local_datacenter(),
            connections
        );

        let mut builder = SessionBuilder::new()
            .known_nodes(&config.contact_points)
            .connection_timeout(config.connect_timeout)
            .pool_size(PoolSize::PerHost(connections))
            .default_execution_profile_handle(profile.into_handle());

        if let Some(filter) = far_host_filter(topology) {
            builder = builder.host_filter(filter);
        }

        let session = builder
            .build()
            .await
            .map_err(|e| PulseError::storage_unavailable(format!("cannot connect to cluster: {}", e)))?;

        Ok(Self {
            session: ArcSwapOption::from_pointee(session),
            statements: ArcSwapOption::empty(),
            keyspace: topology.keyspace().to_string(),
            drain_timeout: config.request_timeout,
        })
    }

    fn session(&self) -> Result<Arc<Session>> {
        self.session
            .load_full()
            .ok_or_else(|| PulseError::storage_unavailable("session is shut down"))
    }

    fn statements(&self) -> Result<Arc<Statements>> {
        self.statements
            .load_full()
            .ok_or_else(|| PulseError::storage("statements not prepared; verify the schema first"))
    }

    async fn prepare(&self, session: &Session) -> Result<()> {
        let insert = session
            .prepare(format!(
                "INSERT INTO {}.metrics (metric_name, time_bucket, timestamp, node_id, value) VALUES (?, ?, ?, ?, ?)",
                self.keyspace
            ))
            .await
            .map_err(query_error)?;
        let select_range = session
            .prepare(format!(
                "SELECT node_id, timestamp, value FROM {}.metrics \
                 WHERE metric_name = ? AND time_bucket = ? AND timestamp >= ? AND timestamp <= ?",
                self.keyspace
            ))
            .await
            .map_err(query_error)?;

        self.statements.store(Some(Arc::new(Statements { insert, select_range })));
        Ok(())
    }
}

#[async_trait::async_trait]
impl MetricStore for CassandraStore {
    fn name(&self) -> &'static str {
        "cassandra"
    }

    async fn verify_schema(&self) -> Result<()> {
        let session = self.session()?;

        let keyspaces = session
            .query_unpaged(
                "SELECT keyspace_name FROM system_schema.keyspaces WHERE keyspace_name = ?",
                (self.keyspace.as_str(),),
            )
            .await
            .map_err(query_error)?;
        if keyspaces.rows_num().unwrap_or(0) == 0 {
            return Err(PulseError::config(format!(
                "keyspace '{}' does not exist; run with --init-schema",
                self.keyspace
            )));
        }

        let tables = session
            .query_unpaged(
                "SELECT table_name FROM system_schema.tables WHERE keyspace_name = ? AND table_name = 'metrics'",
                (self.keyspace.as_str(),),
            )
            .await
            .map_err(query_error)?;
        if tables.rows_num().unwrap_or(0) == 0 {
            return Err(PulseError::config(format!(
                "table '{}.metrics' does not exist; run with --init-schema",
                self.keyspace
            )));
        }

        self.prepare(&session).await?;
        tracing::info!("Verified keyspace {}", self.keyspace);
        Ok(())
    }

    async fn create_schema(&self, topology: &TopologyPolicy) -> Result<()> {
        let session = self.session()?;
        for statement in [topology.keyspace_cql(), topology.table_cql()] {
            tracing::debug!("{}", statement);
            session.query_unpaged(statement, &[]).await.map_err(query_error)?;
        }
        session.await_schema_agreement().await.map_err(query_error)?;
        tracing::info!("Schema for keyspace {} is in place", topology.keyspace());
        self.prepare(&session).await
    }

    async fn insert(&self, row: &MetricRow, consistency: Consistency) -> Result<()> {
        let session = self.session()?;
        let mut statement = self.statements()?.insert.clone();
        statement.set_consistency(to_cql(consistency));

        session
            .execute_unpaged(
                &statement,
                (
                    row.metric_name.as_str(),
                    row.time_bucket.to_string(),
                    CqlTimestamp(row.timestamp.timestamp_millis()),
                    row.node_id.as_str(),
                    row.value,
                ),
            )
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn select_range(&self, read: &RangeRead, consistency: Consistency) -> Result<Vec<MetricRow>> {
        let session = self.session()?;
        let mut statement = self.statements()?.select_range.clone();
        statement.set_consistency(to_cql(consistency));

        let result = session
            .execute_unpaged(
                &statement,
                (
                    read.metric_name.as_str(),
                    read.bucket.to_string(),
                    CqlTimestamp(read.from.timestamp_millis()),
                    CqlTimestamp(read.to.timestamp_millis()),
                ),
            )
            .await
            .map_err(query_error)?;

        let typed = result
            .rows_typed::<(String, CqlTimestamp, f64)>()
            .map_err(|e| PulseError::storage(format!("unexpected result for range read: {}", e)))?;

        let mut rows = Vec::new();
        for row in typed {
            let (node_id, CqlTimestamp(millis), value) =
                row.map_err(|e| PulseError::storage(format!("malformed metrics row: {}", e)))?;
            let Some(timestamp) = crate::core::bucket::timestamp_from_millis(millis) else {
                tracing::warn!("Dropping row with out-of-range timestamp {} in {}", millis, read.bucket);
                continue;
            };
            rows.push(MetricRow {
                node_id,
                metric_name: read.metric_name.clone(),
                time_bucket: read.bucket,
                timestamp,
                value,
            });
        }
        Ok(rows)
    }

    async fn shutdown(&self) -> Result<()> {
        self.statements.store(None);
        let Some(session) = self.session.swap(None) else {
            return Ok(());
        };

        // Calls already holding the session keep it alive until they finish
        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        while Arc::strong_count(&session) > 1 {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    "Closing CQL session with {} calls still in flight",
                    Arc::strong_count(&session) - 1
                );
                break;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }

        drop(session);
        tracing::info!("CQL session closed");
        Ok(())
    }
}

fn to_cql(level: Consistency) -> scylla::statement::Consistency {
    use scylla::statement::Consistency as Cql;
    match level {
        Consistency::Any => Cql::Any,
        Consistency::One => Cql::One,
        Consistency::Two => Cql::Two,
        Consistency::Three => Cql::Three,
        Consistency::Quorum => Cql::Quorum,
        Consistency::All => Cql::All,
        Consistency::LocalQuorum => Cql::LocalQuorum,
        Consistency::EachQuorum => Cql::EachQuorum,
        Consistency::LocalOne => Cql::LocalOne,
        Consistency::Serial => Cql::Serial,
        Consistency::LocalSerial => Cql::LocalSerial,
    }
}

/// Replica and transport failures are availability problems; the rest are not.
fn query_error(error: QueryError) -> PulseError {
    match &error {
        QueryError::DbError(
            DbError::Unavailable { .. }
            | DbError::ReadTimeout { .. }
            | DbError::WriteTimeout { .. }
            | DbError::Overloaded
            | DbError::IsBootstrapping,
            _,
        )
        | QueryError::TimeoutError
        | QueryError::RequestTimeout(_) => PulseError::storage_unavailable(error.to_string()),
        _ => PulseError::storage(error.to_string()),
    }
}

/// Far hosts get no pool when requests must stay in the local datacenter.
fn far_host_filter(topology: &TopologyPolicy) -> Option<Arc<dyn HostFilter>> {
    if topology.permit_remote_failover() {
        None
    } else {
        Some(Arc::new(DcHostFilter::new(topology.local_datacenter().to_string())))
    }
}
