//! Replication topology and consistency policy.
//!
//! The edge datacenter must keep accepting writes while it cannot reach the
//! remote datacenter. That only holds when the write consistency level can be
//! satisfied by replicas in the local datacenter alone, which is what
//! [`TopologyPolicy::validate`] enforces.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::core::{PulseError, Result};

/// How many replicas must acknowledge an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Consistency {
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    LocalOne,
    Serial,
    LocalSerial,
}

impl Consistency {
    /// Canonical CQL name, e.g. `LOCAL_ONE`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Consistency::Any => "ANY",
            Consistency::One => "ONE",
            Consistency::Two => "TWO",
            Consistency::Three => "THREE",
            Consistency::Quorum => "QUORUM",
            Consistency::All => "ALL",
            Consistency::LocalQuorum => "LOCAL_QUORUM",
            Consistency::EachQuorum => "EACH_QUORUM",
            Consistency::LocalOne => "LOCAL_ONE",
            Consistency::Serial => "SERIAL",
            Consistency::LocalSerial => "LOCAL_SERIAL",
        }
    }

    /// Replicas in the local datacenter needed to satisfy this level when no
    /// remote replica answers. `None` means remote replicas are always needed.
    pub fn local_acks_required(&self, local_rf: u32) -> Option<u32> {
        match self {
            Consistency::Any | Consistency::One | Consistency::LocalOne => Some(1),
            Consistency::Two => Some(2),
            Consistency::Three => Some(3),
            Consistency::LocalQuorum | Consistency::LocalSerial => Some(local_rf / 2 + 1),
            Consistency::Quorum
            | Consistency::All
            | Consistency::EachQuorum
            | Consistency::Serial => None,
        }
    }
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Consistency {
    type Err = PulseError;

    fn from_str(s: &str) -> Result<Self> {
        let level = match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "ANY" => Consistency::Any,
            "ONE" => Consistency::One,
            "TWO" => Consistency::Two,
            "THREE" => Consistency::Three,
            "QUORUM" => Consistency::Quorum,
            "ALL" => Consistency::All,
            "LOCAL_QUORUM" => Consistency::LocalQuorum,
            "EACH_QUORUM" => Consistency::EachQuorum,
            "LOCAL_ONE" => Consistency::LocalOne,
            "SERIAL" => Consistency::Serial,
            "LOCAL_SERIAL" => Consistency::LocalSerial,
            other => {
                return Err(PulseError::config(format!("Unknown consistency level '{}'", other)))
            },
        };
        Ok(level)
    }
}

impl TryFrom<String> for Consistency {
    type Error = PulseError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Consistency> for String {
    fn from(level: Consistency) -> Self {
        level.as_str().to_string()
    }
}

/// One replication site and how many copies it keeps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatacenterConfig {
    /// Datacenter name as known to the storage engine
    pub name: String,
    /// Replicas kept in this datacenter
    pub replication_factor: u32,
}

/// Connection pool sizing.
///
/// Hosts in the local datacenter hold `local_connections` each. Remote hosts
/// hold none unless `permit_remote_failover` is set, in which case the driver
/// sizes them like local ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Connections per host in the local datacenter
    pub local_connections: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { local_connections: 2 }
    }
}

/// Replication and consistency settings, as read from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Keyspace holding the `metrics` table
    pub keyspace: String,
    /// Datacenter this process writes to
    pub local_datacenter: String,
    /// All replication sites, local one included
    pub datacenters: Vec<DatacenterConfig>,
    /// Consistency level for ingest writes
    pub write_consistency: Consistency,
    /// Consistency level for range reads
    pub read_consistency: Consistency,
    /// Route requests to a remote datacenter when no local host is up
    pub permit_remote_failover: bool,
    /// Connection pool sizing
    pub pool: PoolConfig,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            keyspace: "pulseops".to_string(),
            local_datacenter: "dc1".to_string(),
            datacenters: vec![DatacenterConfig {
                name: "dc1".to_string(),
                replication_factor: 1,
            }],
            write_consistency: Consistency::LocalOne,
            read_consistency: Consistency::LocalOne,
            permit_remote_failover: false,
            pool: PoolConfig::default(),
        }
    }
}

/// Validated topology handed to the writer, the planner and the store.
#[derive(Debug, Clone, PartialEq)]
pub struct TopologyPolicy {
    config: TopologyConfig,
}

impl TopologyPolicy {
    /// Validate a configuration and wrap it.
    pub fn new(config: TopologyConfig) -> Result<Self> {
        Self::validate(&config)?;
        Ok(Self { config })
    }

    /// Check a topology for internal consistency and partition tolerance.
    pub fn validate(config: &TopologyConfig) -> Result<()> {
        if config.keyspace.is_empty()
            || !config
                .keyspace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(PulseError::config(format!(
                "Keyspace '{}' must be a non-empty identifier of [A-Za-z0-9_]",
                config.keyspace
            )));
        }

        let mut seen = HashSet::new();
        for dc in &config.datacenters {
            if !seen.insert(dc.name.as_str()) {
                return Err(PulseError::config(format!("Datacenter '{}' listed twice", dc.name)));
            }
            if dc.replication_factor == 0 {
                return Err(PulseError::config(format!(
                    "Replication factor for datacenter '{}' must be greater than 0",
                    dc.name
                )));
            }
        }

        if !seen.contains(config.local_datacenter.as_str()) {
            return Err(PulseError::config(format!(
                "Local datacenter '{}' is not in the datacenter list",
                config.local_datacenter
            )));
        }

        if config.pool.local_connections == 0 {
            return Err(PulseError::config("Pool size must be greater than 0"));
        }

        if !survives_partition(config, config.write_consistency) {
            return Err(PulseError::config(format!(
                "Write consistency {} cannot be met by datacenter '{}' alone (rf={}); \
                 ingestion would stop while the remote datacenter is unreachable",
                config.write_consistency,
                config.local_datacenter,
                local_rf(config)
            )));
        }

        Ok(())
    }

    /// Keyspace holding the `metrics` table.
    pub fn keyspace(&self) -> &str {
        &self.config.keyspace
    }

    /// Datacenter this process is co-located with.
    pub fn local_datacenter(&self) -> &str {
        &self.config.local_datacenter
    }

    /// Consistency used for every ingest write.
    pub fn write_consistency(&self) -> Consistency {
        self.config.write_consistency
    }

    /// Consistency used for every bucket read.
    pub fn read_consistency(&self) -> Consistency {
        self.config.read_consistency
    }

    /// Whether requests may be routed to a remote datacenter.
    pub fn permit_remote_failover(&self) -> bool {
        self.config.permit_remote_failover
    }

    /// Pool sizing for local hosts.
    pub fn pool(&self) -> &PoolConfig {
        &self.config.pool
    }

    /// Replicas kept in the local datacenter.
    pub fn local_replication_factor(&self) -> u32 {
        local_rf(&self.config)
    }

    /// True when `level` can be satisfied without the remote datacenter.
    pub fn survives_partition(&self, level: Consistency) -> bool {
        survives_partition(&self.config, level)
    }

    /// True when bucket reads cannot be served while the remote datacenter is unreachable.
    pub fn reads_need_remote(&self) -> bool {
        !self.survives_partition(self.config.read_consistency)
    }

    /// `NetworkTopologyStrategy` replication map in CQL syntax.
    pub fn replication_cql(&self) -> String {
        let mut parts = vec!["'class': 'NetworkTopologyStrategy'".to_string()];
        parts.extend(
            self.config
                .datacenters
                .iter()
                .map(|dc| format!("'{}': {}", dc.name, dc.replication_factor)),
        );
        format!("{{{}}}", parts.join(", "))
    }

    /// Idempotent keyspace creation statement.
    pub fn keyspace_cql(&self) -> String {
        format!(
            "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = {}",
            self.config.keyspace,
            self.replication_cql()
        )
    }

    /// Idempotent table creation statement.
    ///
    /// Partitioned by `(metric_name, time_bucket)`, clustered by timestamp, with
    /// `node_id` completing the row identity.
    pub fn table_cql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {}.metrics (\
             metric_name text, \
             time_bucket text, \
             timestamp timestamp, \
             node_id text, \
             value double, \
             PRIMARY KEY ((metric_name, time_bucket), timestamp, node_id)\
             ) WITH CLUSTERING ORDER BY (timestamp ASC, node_id ASC)",
            self.config.keyspace
        )
    }
}

impl Default for TopologyPolicy {
    fn default() -> Self {
        Self {
            config: TopologyConfig::default(),
        }
    }
}

fn local_rf(config: &TopologyConfig) -> u32 {
    config
        .datacenters
        .iter()
        .find(|dc| dc.name == config.local_datacenter)
        .map_or(0, |dc| dc.replication_factor)
}

fn survives_partition(config: &TopologyConfig, level: Consistency) -> bool {
    let local = local_rf(config);
    if local == 0 {
        return false;
    }
    // With a single site there is no remote datacenter to be partitioned from.
    let single_site = config.datacenters.len() == 1;
    match level.local_acks_required(local) {
        Some(needed) => needed <= local,
        None => single_site,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_site(write: Consistency, edge_rf: u32) -> TopologyConfig {
        TopologyConfig {
            local_datacenter: "edge".into(),
            datacenters: vec![
                DatacenterConfig {
                    name: "edge".into(),
                    replication_factor: edge_rf,
                },
                DatacenterConfig {
                    name: "core".into(),
                    replication_factor: 3,
                },
            ],
            write_consistency: write,
            ..TopologyConfig::default()
        }
    }

    #[test]
    fn test_default_policy_is_valid_and_local() {
        let policy = TopologyPolicy::new(TopologyConfig::default()).unwrap();
        assert_eq!(policy.write_consistency(), Consistency::LocalOne);
        assert_eq!(policy.local_replication_factor(), 1);
        assert!(policy.survives_partition(Consistency::LocalOne));
    }

    #[test]
    fn test_cross_dc_write_consistency_rejected() {
        for level in [Consistency::Quorum, Consistency::All, Consistency::EachQuorum] {
            let err = TopologyPolicy::new(two_site(level, 1)).unwrap_err();
            assert_eq!(err.category(), "config");
        }
    }

    #[test]
    fn test_local_levels_accepted() {
        for level in [Consistency::LocalOne, Consistency::LocalQuorum, Consistency::One, Consistency::Any] {
            assert!(TopologyPolicy::new(two_site(level, 1)).is_ok(), "{} should be accepted", level);
        }
        assert!(TopologyPolicy::new(two_site(Consistency::Two, 1)).is_err());
        assert!(TopologyPolicy::new(two_site(Consistency::Two, 2)).is_ok());
    }

    #[test]
    fn test_single_site_accepts_global_levels() {
        let config = TopologyConfig {
            write_consistency: Consistency::Quorum,
            ..TopologyConfig::default()
        };
        assert!(TopologyPolicy::new(config).is_ok());
    }

    #[test]
    fn test_local_dc_must_be_listed() {
        let config = TopologyConfig {
            local_datacenter: "nowhere".into(),
            ..TopologyConfig::default()
        };
        assert!(TopologyPolicy::new(config).is_err());
    }

    #[test]
    fn test_consistency_parsing() {
        assert_eq!("local_one".parse::<Consistency>().unwrap(), Consistency::LocalOne);
        assert_eq!("LOCAL-QUORUM".parse::<Consistency>().unwrap(), Consistency::LocalQuorum);
        assert!("MOST".parse::<Consistency>().is_err());
        assert_eq!(Consistency::EachQuorum.to_string(), "EACH_QUORUM");
    }

    #[test]
    fn test_schema_statements() {
        let policy = TopologyPolicy::new(two_site(Consistency::LocalOne, 1)).unwrap();
        assert_eq!(
            policy.keyspace_cql(),
            "CREATE KEYSPACE IF NOT EXISTS pulseops WITH replication = \
             {'class': 'NetworkTopologyStrategy', 'edge': 1, 'core': 3}"
        );
        assert!(policy
            .table_cql()
            .contains("PRIMARY KEY ((metric_name, time_bucket), timestamp, node_id)"));
    }

    #[test]
    fn test_empty_pool_rejected() {
        let config = TopologyConfig {
            pool: PoolConfig { local_connections: 0 },
            ..TopologyConfig::default()
        };
        assert_eq!(TopologyPolicy::new(config).unwrap_err().category(), "config");
        assert_eq!(PoolConfig::default().local_connections, 2);
    }

    #[test]
    fn test_remote_read_consistency_flagged_not_rejected() {
        let config = TopologyConfig {
            read_consistency: Consistency::Quorum,
            ..two_site(Consistency::LocalOne, 1)
        };
        let policy = TopologyPolicy::new(config).unwrap();
        assert!(policy.reads_need_remote());
        assert!(!TopologyPolicy::new(two_site(Consistency::LocalOne, 1)).unwrap().reads_need_remote());
    }
}
