//! Error types for the data-access routing layer.

use thiserror::Error;

/// Error produced by an upstream SQL client.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while routing or coordinating database access.
#[derive(Debug, Error)]
pub enum DaoError {
    /// The master node has no address configured.
    #[error("no master database configured")]
    NoMasterDb,
    /// The master connection is not available.
    #[error("no master connection available")]
    NoMasterConn,
    /// A replica connection could not be resolved.
    #[error("no slave database available")]
    NoSlaveDb,
    /// The dispatch queue is empty or references a stale replica index.
    #[error("no database available for dispatch")]
    NoDatabase,
    /// No key was supplied, or the key variant is unsupported by the strategy.
    #[error("shard key does not exist or has an unsupported type")]
    KeyNotExist,
    /// The key fell outside every configured range.
    #[error("shard key is out of range")]
    KeyOutOfRange,
    /// A strategy has no partitions to route into.
    #[error("shard has no configured partitions")]
    MultiShard,
    /// A shard configuration row carries invalid parameters.
    #[error("invalid shard config for {db}.{table}: {reason}")]
    InvalidShardConfig {
        db: String,
        table: String,
        reason: String,
    },
    /// Configuration validation failed.
    #[error("config error: {0}")]
    Config(String),
    /// Opening or pinging the master failed.
    #[error("master {addr} unreachable: {source}")]
    MasterUnreachable {
        addr: String,
        #[source]
        source: BoxError,
    },
    /// Opening or pinging a replica failed.
    #[error("slave[{index}] {addr} unreachable: {source}")]
    ReplicaUnreachable {
        index: usize,
        addr: String,
        #[source]
        source: BoxError,
    },
    /// The transaction was already committed, rolled back, or expired.
    #[error("transaction has already been committed or rolled back")]
    TransactionClosed,
    /// Any other upstream client failure.
    #[error("driver: {0}")]
    Driver(#[source] BoxError),
    /// Configuration could not be decoded.
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

/// Result alias for routing operations.
pub type Result<T> = std::result::Result<T, DaoError>;
