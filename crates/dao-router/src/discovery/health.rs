//! Periodic liveness probing of the master and its replicas.
//!
//! Probes are purely observational: a failed ping is logged and handed to
//! the caller's [`CheckHandler`], and the node keeps routing to the server.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::driver::Connection;
use crate::error::DaoError;
use crate::node::ReplicaSet;

/// Callback invoked synchronously with every failed probe.
pub type CheckHandler = Arc<dyn Fn(DaoError) + Send + Sync>;

/// Pings the master, then every replica in configuration order.
#[derive(Clone)]
pub struct HealthProbe<C: Connection> {
    master: C,
    master_addr: String,
    replicas: Arc<RwLock<ReplicaSet<C>>>,
    handler: CheckHandler,
}

impl<C: Connection> HealthProbe<C> {
    pub(crate) fn new(
        master: C,
        master_addr: String,
        replicas: Arc<RwLock<ReplicaSet<C>>>,
        handler: CheckHandler,
    ) -> Self {
        Self {
            master,
            master_addr,
            replicas,
            handler,
        }
    }

    /// Run one probe round. Returns the number of failed pings.
    pub async fn run_once(&self) -> usize {
        let mut failures = usize::from(!self.check_master().await);
        failures += self.check_slaves().await;
        failures
    }

    /// Returns whether the master answered.
    pub async fn check_master(&self) -> bool {
        match self.master.ping().await {
            Ok(()) => true,
            Err(source) => {
                tracing::warn!("master {} ping failed: {}", self.master_addr, source);
                (self.handler)(DaoError::MasterUnreachable {
                    addr: self.master_addr.clone(),
                    source,
                });
                false
            }
        }
    }

    /// Returns the number of replicas that did not answer.
    pub async fn check_slaves(&self) -> usize {
        let slaves = self.replicas.read().snapshot();

        let mut failures = 0;
        for (index, (addr, conn)) in slaves.into_iter().enumerate() {
            if let Err(source) = conn.ping().await {
                tracing::warn!("slave[{index}] {addr} ping failed: {source}");
                (self.handler)(DaoError::ReplicaUnreachable {
                    index,
                    addr,
                    source,
                });
                failures += 1;
            }
        }
        failures
    }

    /// Probe every `period`, starting one period from now, until aborted.
    pub fn spawn(self, period: Duration) -> JoinHandle<()> {
        let start = Instant::now() + period;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let failures = self.run_once().await;
                tracing::debug!("liveness round finished with {failures} failed probes");
            }
        })
    }
}
