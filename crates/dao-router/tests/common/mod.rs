//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use dao_router::driver::memory::{MemoryConn, MemoryDriver};
use dao_router::{DaoError, DbConfig, Node, NodeConfig, ShardConfig};
use parking_lot::Mutex;

pub const MASTER: &str = "master:3306";

/// Route test logs through the libtest capture.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn node_config(addr: &str, weight: u32) -> NodeConfig {
    NodeConfig {
        addr: addr.to_string(),
        user: "app".to_string(),
        password: "secret".to_string(),
        timezone: "UTC".to_string(),
        weight,
    }
}

pub fn shard_config(db: &str, table: &str, kind: &str) -> ShardConfig {
    ShardConfig {
        db: db.to_string(),
        table: table.to_string(),
        kind: kind.to_string(),
        ..ShardConfig::default()
    }
}

/// A config with the given replicas and no sharding.
pub fn db_config(slaves: &[(&str, u32)]) -> DbConfig {
    DbConfig {
        name: "it".to_string(),
        max_conn_num: 8,
        max_idle_conns: 2,
        max_lifetime: 300,
        master: node_config(MASTER, 1),
        slave: slaves.iter().map(|(a, w)| node_config(a, *w)).collect(),
        ..DbConfig::default()
    }
}

/// Collects every error handed to the liveness callback.
#[derive(Clone, Default)]
pub struct Failures(Arc<Mutex<Vec<String>>>);

impl Failures {
    pub fn handler(&self) -> impl Fn(DaoError) + Send + Sync + 'static {
        let sink = self.0.clone();
        move |err| sink.lock().push(err.to_string())
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

pub async fn open_node(driver: &MemoryDriver, cfg: DbConfig) -> Node<MemoryConn> {
    init_tracing();
    Node::new(cfg, driver, |_| {})
        .await
        .unwrap_or_else(|e| panic!("node creation failed: {e}"))
}
