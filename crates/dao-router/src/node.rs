//! Node — one master, its weighted replicas and the sharding rules of the
//! tables they serve.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{DbConfig, NodeConfig};
use crate::discovery::health::{CheckHandler, HealthProbe};
use crate::driver::{Connection, Driver};
use crate::error::{BoxError, DaoError, Result};
use crate::routing::balancer::Balancer;
use crate::routing::shard::{parse_shards, Shard, ShardKey, TableKey};
use crate::txn::{clamp_runtime, Transaction};

/// Replica handles, index-aligned with their weights, and the dispatch
/// queue built over them.
#[derive(Debug)]
pub struct ReplicaSet<C> {
    conns: Vec<C>,
    addrs: Vec<String>,
    weights: Vec<u32>,
    balancer: Balancer,
}

impl<C: Clone> ReplicaSet<C> {
    fn new(conns: Vec<C>, addrs: Vec<String>, weights: Vec<u32>) -> Self {
        debug_assert_eq!(conns.len(), weights.len());
        let balancer = Balancer::new(&weights);
        Self {
            conns,
            addrs,
            weights,
            balancer,
        }
    }

    fn next_conn(&mut self) -> Result<C> {
        let index = self.balancer.next_index()?;
        self.conns.get(index).cloned().ok_or(DaoError::NoDatabase)
    }

    /// `(addr, handle)` of every replica in configuration order.
    pub(crate) fn snapshot(&self) -> Vec<(String, C)> {
        self.addrs
            .iter()
            .cloned()
            .zip(self.conns.iter().cloned())
            .collect()
    }
}

/// Routing entry point shared by every request handler.
pub struct Node<C: Connection> {
    config: DbConfig,
    master: C,
    replicas: Arc<RwLock<ReplicaSet<C>>>,
    shards: HashMap<TableKey, Shard>,
    probe: HealthProbe<C>,
    liveness: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl<C: Connection> Node<C> {
    /// Connect to the master and every replica, then start the liveness loop.
    ///
    /// Fails if any server cannot be opened and pinged. `handler` receives
    /// every probe failure after startup. Must be called within a tokio
    /// runtime.
    pub async fn new<D, F>(config: DbConfig, driver: &D, handler: F) -> Result<Self>
    where
        D: Driver<Conn = C>,
        F: Fn(DaoError) + Send + Sync + 'static,
    {
        config.validate()?;
        let shards = parse_shards(&config.shard)?;

        let master = open_conn(driver, &config, &config.master)
            .await
            .map_err(|source| DaoError::MasterUnreachable {
                addr: config.master.addr.clone(),
                source,
            })?;

        let mut conns = Vec::with_capacity(config.slave.len());
        for (index, slave) in config.slave.iter().enumerate() {
            let conn = open_conn(driver, &config, slave).await.map_err(|source| {
                DaoError::ReplicaUnreachable {
                    index,
                    addr: slave.addr.clone(),
                    source,
                }
            })?;
            conns.push(conn);
        }
        let addrs = config.slave.iter().map(|s| s.addr.clone()).collect();
        let replicas = ReplicaSet::new(conns, addrs, config.slave_weights());

        tracing::info!(
            "node {}: master {}, {} slaves, dispatch queue of {}, {} sharded tables",
            config.name,
            config.master.addr,
            replicas.conns.len(),
            replicas.balancer.len(),
            shards.len()
        );

        let replicas = Arc::new(RwLock::new(replicas));
        let handler: CheckHandler = Arc::new(handler);
        let probe = HealthProbe::new(
            master.clone(),
            config.master.addr.clone(),
            replicas.clone(),
            handler,
        );
        let liveness = probe.clone().spawn(config.check_interval());

        Ok(Self {
            config,
            master,
            replicas,
            shards,
            probe,
            liveness: Mutex::new(Some(liveness)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn get_master_conn(&self) -> Result<C> {
        if self.is_closed() {
            return Err(DaoError::NoMasterConn);
        }
        Ok(self.master.clone())
    }

    /// Next replica in weighted round-robin order.
    pub fn get_slave_conn(&self) -> Result<C> {
        if self.is_closed() {
            return Err(DaoError::NoSlaveDb);
        }
        self.replicas.write().next_conn()
    }

    /// Physical name of `db.table` for `keys`: `db.table_<shard>` when the
    /// table is sharded, `db.table` otherwise.
    pub fn get_table(&self, db: &str, table: &str, keys: &[ShardKey]) -> Result<String> {
        match self.shard(db, table) {
            Some(shard) => {
                let index = shard.find_for_key(keys)?;
                Ok(format!("{db}.{table}_{index}"))
            }
            None => Ok(format!("{db}.{table}")),
        }
    }

    pub fn shard(&self, db: &str, table: &str) -> Option<&Shard> {
        self.shards.get(&(db.to_string(), table.to_string()))
    }

    pub fn slave_count(&self) -> usize {
        self.replicas.read().conns.len()
    }

    pub fn slave_weights(&self) -> Vec<u32> {
        self.replicas.read().weights.clone()
    }

    /// Snapshot of the dispatch queue.
    pub fn dispatch_queue(&self) -> Vec<usize> {
        self.replicas.read().balancer.queue().to_vec()
    }

    /// Begin a master transaction that lives at most
    /// `min(max_runtime, TRANSACTION_MAX_RUNTIME)`.
    pub async fn begin_transaction(
        &self,
        max_runtime: Duration,
    ) -> Result<Transaction<C::Tx>> {
        let master = self.get_master_conn()?;
        let runtime = clamp_runtime(max_runtime);
        if runtime != max_runtime {
            tracing::debug!("transaction runtime {max_runtime:?} clamped to {runtime:?}");
        }
        let deadline = Instant::now() + runtime;
        let tx = master.begin(deadline).await.map_err(DaoError::Driver)?;
        Ok(Transaction::start(tx, deadline))
    }

    pub async fn commit(&self, tx: Transaction<C::Tx>) -> Result<()> {
        tx.commit().await
    }

    pub async fn rollback(&self, tx: Transaction<C::Tx>) -> Result<()> {
        tx.rollback().await
    }

    /// Run one liveness round now. Returns the number of failed pings.
    pub async fn check_now(&self) -> usize {
        self.probe.run_once().await
    }

    /// Stop the liveness loop and refuse further connection requests.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(liveness) = self.liveness.lock().take() {
            liveness.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl<C: Connection> Drop for Node<C> {
    fn drop(&mut self) {
        if let Some(liveness) = self.liveness.get_mut().take() {
            liveness.abort();
        }
    }
}

async fn open_conn<D: Driver>(
    driver: &D,
    config: &DbConfig,
    node: &NodeConfig,
) -> std::result::Result<D::Conn, BoxError> {
    let conn = driver.open(&node.dsn()).await?;
    conn.set_max_idle_conns(config.max_idle_conns);
    conn.set_max_open_conns(config.max_conn_num);
    conn.set_conn_max_lifetime(config.max_lifetime());
    conn.ping().await?;
    tracing::debug!("opened connection to {}", node.addr);
    Ok(conn)
}
