//! In-process driver with per-server fault injection.
//!
//! Servers are keyed by the address embedded in the DSN
//! (`user:password@tcp(addr)/...`). Every server records how often it was
//! opened, pinged and used, so callers can observe routing decisions without
//! a live database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{Connection, Driver, Transact};
use crate::error::BoxError;

/// Pool settings last applied to a server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolTuning {
    pub max_open: u32,
    pub max_idle: u32,
    pub max_lifetime: Duration,
}

/// Observable state of one simulated server.
#[derive(Debug, Default)]
pub struct MemoryServer {
    addr: String,
    fail_open: AtomicBool,
    fail_ping: AtomicBool,
    fail_begin: AtomicBool,
    opens: AtomicU64,
    pings: AtomicU64,
    begins: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    tuning: Mutex<PoolTuning>,
    statements: Mutex<Vec<String>>,
}

impl MemoryServer {
    fn new(addr: &str) -> Self {
        Self {
            addr: addr.to_string(),
            ..Self::default()
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_ping(&self, fail: bool) {
        self.fail_ping.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_begin(&self, fail: bool) {
        self.fail_begin.store(fail, Ordering::SeqCst);
    }

    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> u64 {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn begins(&self) -> u64 {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::SeqCst)
    }

    pub fn tuning(&self) -> PoolTuning {
        *self.tuning.lock()
    }

    /// Statements committed through transactions on this server.
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    fn refused(&self) -> BoxError {
        format!("dial tcp {}: connection refused", self.addr).into()
    }
}

/// Driver whose servers live in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    servers: Arc<Mutex<HashMap<String, Arc<MemoryServer>>>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create) the server listening on `addr`.
    pub fn server(&self, addr: &str) -> Arc<MemoryServer> {
        self.servers
            .lock()
            .entry(addr.to_string())
            .or_insert_with(|| Arc::new(MemoryServer::new(addr)))
            .clone()
    }
}

fn addr_from_dsn(dsn: &str) -> Option<&str> {
    let start = dsn.find("tcp(")? + 4;
    let len = dsn[start..].find(')')?;
    Some(&dsn[start..start + len])
}

#[async_trait]
impl Driver for MemoryDriver {
    type Conn = MemoryConn;

    async fn open(&self, dsn: &str) -> Result<MemoryConn, BoxError> {
        let addr = addr_from_dsn(dsn).ok_or_else(|| -> BoxError {
            format!("invalid DSN {dsn:?}: missing tcp(addr)").into()
        })?;
        let server = self.server(addr);
        if server.fail_open.load(Ordering::SeqCst) {
            return Err(server.refused());
        }
        server.opens.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConn { server })
    }
}

/// Pooled handle to a [`MemoryServer`].
#[derive(Debug, Clone)]
pub struct MemoryConn {
    server: Arc<MemoryServer>,
}

impl MemoryConn {
    pub fn server(&self) -> &Arc<MemoryServer> {
        &self.server
    }

    pub fn addr(&self) -> &str {
        self.server.addr()
    }
}

#[async_trait]
impl Connection for MemoryConn {
    type Tx = MemoryTx;

    async fn ping(&self) -> Result<(), BoxError> {
        self.server.pings.fetch_add(1, Ordering::SeqCst);
        if self.server.fail_ping.load(Ordering::SeqCst) {
            return Err(self.server.refused());
        }
        Ok(())
    }

    async fn begin(&self, deadline: Instant) -> Result<MemoryTx, BoxError> {
        if self.server.fail_begin.load(Ordering::SeqCst) {
            return Err(self.server.refused());
        }
        self.server.begins.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryTx {
            server: self.server.clone(),
            deadline,
            pending: Vec::new(),
        })
    }

    fn set_max_open_conns(&self, n: u32) {
        self.server.tuning.lock().max_open = n;
    }

    fn set_max_idle_conns(&self, n: u32) {
        self.server.tuning.lock().max_idle = n;
    }

    fn set_conn_max_lifetime(&self, lifetime: Duration) {
        self.server.tuning.lock().max_lifetime = lifetime;
    }
}

/// Transaction on a [`MemoryServer`]. Statements become visible on commit.
#[derive(Debug)]
pub struct MemoryTx {
    server: Arc<MemoryServer>,
    deadline: Instant,
    pending: Vec<String>,
}

impl MemoryTx {
    /// Buffer a statement until commit.
    pub fn exec(&mut self, statement: &str) -> Result<(), BoxError> {
        self.check_deadline()?;
        self.pending.push(statement.to_string());
        Ok(())
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    fn check_deadline(&self) -> Result<(), BoxError> {
        if Instant::now() >= self.deadline {
            return Err("context deadline exceeded: transaction aborted".into());
        }
        Ok(())
    }
}

#[async_trait]
impl Transact for MemoryTx {
    async fn commit(self) -> Result<(), BoxError> {
        self.check_deadline()?;
        self.server.statements.lock().extend(self.pending);
        self.server.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self) -> Result<(), BoxError> {
        self.server.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
