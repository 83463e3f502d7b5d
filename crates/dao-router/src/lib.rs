//! dao-router — data-access routing in front of a master/replica SQL store.
//!
//! Balances reads across weighted replicas, resolves logical table names to
//! shard-suffixed physical names, and runs deadline-bound transactions on
//! the master.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │           Request handlers (many tasks)          │
//! ├─────────────────────────────────────────────────┤
//! │  Node                                            │
//! │   ├─ Shard strategies per (db, table)            │
//! │   ├─ Balancer (weighted round robin)             │
//! │   ├─ Transaction (deadline ≤ 1s)                 │
//! │   └─ HealthProbe (ping every 30s)                │
//! ├─────────────────────────────────────────────────┤
//! │  Driver / Connection / Transact (SQL client)     │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod node;

pub mod discovery;
pub mod driver;
pub mod routing;
pub mod txn;

pub use config::{DbConfig, NodeConfig, ShardConfig, TRANSACTION_MAX_RUNTIME};
pub use error::{DaoError, Result};
pub use node::Node;
pub use routing::shard::ShardKey;
pub use txn::Transaction;
