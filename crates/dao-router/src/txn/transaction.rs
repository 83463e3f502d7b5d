//! Deadline-bound master transactions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::TRANSACTION_MAX_RUNTIME;
use crate::driver::Transact;
use crate::error::{DaoError, Result};

/// Clamp a requested runtime to `(0, TRANSACTION_MAX_RUNTIME]`.
///
/// A zero request means "use the ceiling".
pub fn clamp_runtime(requested: Duration) -> Duration {
    if requested.is_zero() || requested > TRANSACTION_MAX_RUNTIME {
        TRANSACTION_MAX_RUNTIME
    } else {
        requested
    }
}

/// An open transaction on the master.
///
/// Finished by exactly one [`commit`](Self::commit) or
/// [`rollback`](Self::rollback). If neither happens before the deadline the
/// transaction is rolled back and later calls return
/// [`DaoError::TransactionClosed`].
pub struct Transaction<T: Transact> {
    slot: Arc<Mutex<Option<T>>>,
    deadline: Instant,
    expiry: JoinHandle<()>,
}

impl<T: Transact> Transaction<T> {
    pub(crate) fn start(tx: T, deadline: Instant) -> Self {
        let slot = Arc::new(Mutex::new(Some(tx)));
        let expiry = tokio::spawn(expire(slot.clone(), deadline));
        Self {
            slot,
            deadline,
            expiry,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Whether the transaction can still be used.
    pub async fn is_open(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Borrow the driver transaction to run statements on it.
    pub async fn conn(&self) -> Result<MappedMutexGuard<'_, T>> {
        let guard = self.slot.lock().await;
        MutexGuard::try_map(guard, Option::as_mut).map_err(|_| DaoError::TransactionClosed)
    }

    pub async fn commit(self) -> Result<()> {
        let result = match self.take().await {
            Some(tx) => tx.commit().await.map_err(DaoError::Driver),
            None => Err(DaoError::TransactionClosed),
        };
        self.expiry.abort();
        result
    }

    pub async fn rollback(self) -> Result<()> {
        let result = match self.take().await {
            Some(tx) => tx.rollback().await.map_err(DaoError::Driver),
            None => Err(DaoError::TransactionClosed),
        };
        self.expiry.abort();
        result
    }

    async fn take(&self) -> Option<T> {
        self.slot.lock().await.take()
    }
}

impl<T: Transact> std::fmt::Debug for Transaction<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

async fn expire<T: Transact>(slot: Arc<Mutex<Option<T>>>, deadline: Instant) {
    tokio::time::sleep_until(deadline).await;
    let Some(tx) = slot.lock().await.take() else {
        return;
    };
    tracing::warn!("transaction exceeded its deadline, rolling back");
    if let Err(e) = tx.rollback().await {
        tracing::warn!("rollback of expired transaction failed: {e}");
    }
}
