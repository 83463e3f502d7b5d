//! Contract the routing layer expects from the underlying SQL client.
//!
//! Any client that can open a pooled handle from a DSN, ping it, begin a
//! deadline-bound transaction on it and accept pool tuning is substitutable.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::BoxError;

/// Opens pooled connection handles.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    type Conn: Connection;

    async fn open(&self, dsn: &str) -> Result<Self::Conn, BoxError>;
}

/// A pooled handle to one server. Cloning must be cheap and share the pool.
#[async_trait]
pub trait Connection: Clone + Send + Sync + 'static {
    type Tx: Transact;

    async fn ping(&self) -> Result<(), BoxError>;

    /// Begin a transaction the driver aborts once `deadline` passes.
    async fn begin(&self, deadline: Instant) -> Result<Self::Tx, BoxError>;

    fn set_max_open_conns(&self, n: u32);
    fn set_max_idle_conns(&self, n: u32);
    fn set_conn_max_lifetime(&self, lifetime: Duration);
}

/// An open transaction on the master.
#[async_trait]
pub trait Transact: Send + Sized + 'static {
    async fn commit(self) -> Result<(), BoxError>;
    async fn rollback(self) -> Result<(), BoxError>;
}
