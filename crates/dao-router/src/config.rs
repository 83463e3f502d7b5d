//! Configuration for a master/replica database node.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DaoError, Result};

/// Upper bound on the runtime of any transaction begun through a node.
pub const TRANSACTION_MAX_RUNTIME: Duration = Duration::from_secs(1);

/// Default period of the background liveness probe.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Connection settings for one database server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// `host:port` of the server.
    pub addr: String,
    pub user: String,
    pub password: String,
    /// Timezone the driver uses to interpret DATETIME columns.
    pub timezone: String,
    /// Relative share of read traffic. Only meaningful for replicas.
    pub weight: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            addr: String::new(),
            user: String::new(),
            password: String::new(),
            timezone: "Local".to_string(),
            weight: 1,
        }
    }
}

impl NodeConfig {
    /// Render the MySQL-style DSN handed to [`Driver::open`](crate::driver::Driver::open).
    pub fn dsn(&self) -> String {
        let loc: String = url::form_urlencoded::byte_serialize(self.timezone.as_bytes()).collect();
        format!(
            "{}:{}@tcp({})/?charset=utf8&loc={}&parseTime=true",
            self.user, self.password, self.addr, loc
        )
    }
}

/// One partitioning rule, keyed by `(db, table)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardConfig {
    pub db: String,
    pub table: String,
    /// Modulus for `mod` sharding.
    pub mod_num: i64,
    /// Number of ranges for `range` sharding.
    pub locations: i64,
    /// Strategy tag: `mod`, `range`, `date_day`, `date_month` or `date_year`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Width of each range for `range` sharding.
    pub table_row_limit: i64,
}

/// Configuration for one logical database: a master, its replicas and
/// the sharding rules of its tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub name: String,
    /// Maximum open connections per pool.
    pub max_conn_num: u32,
    /// Maximum idle connections per pool.
    pub max_idle_conns: u32,
    /// Maximum connection lifetime in seconds. Zero means unlimited.
    pub max_lifetime: u64,
    pub master: NodeConfig,
    pub slave: Vec<NodeConfig>,
    pub shard: Vec<ShardConfig>,
    /// Liveness probe period in milliseconds.
    pub check_interval_ms: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            max_conn_num: 0,
            max_idle_conns: 2,
            max_lifetime: 0,
            master: NodeConfig::default(),
            slave: Vec::new(),
            shard: Vec::new(),
            check_interval_ms: DEFAULT_CHECK_INTERVAL.as_millis() as u64,
        }
    }
}

impl DbConfig {
    /// Decode a configuration from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.master.addr.is_empty() {
            return Err(DaoError::NoMasterDb);
        }
        for (i, slave) in self.slave.iter().enumerate() {
            if slave.addr.is_empty() {
                return Err(DaoError::Config(format!("slave[{i}] addr must not be empty")));
            }
            if slave.weight == 0 {
                return Err(DaoError::Config(format!("slave[{i}] weight must be > 0")));
            }
        }
        if self.check_interval_ms == 0 {
            return Err(DaoError::Config("check_interval_ms must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Weights of the replicas, index-aligned with `slave`.
    pub fn slave_weights(&self) -> Vec<u32> {
        self.slave.iter().map(|s| s.weight).collect()
    }
}
