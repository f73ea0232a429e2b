//! Context-threaded transactions.
//!
//! A [`UnitOfWork`] owns one database transaction. It travels inside an
//! [`OpContext`] through every store call made on behalf of a single
//! handler invocation, so that aggregate writes, outbox rows, and the
//! final commit are one atomic unit. Store operations never open their own
//! transaction; a context without one fails with `TransactionRequired`.

use std::sync::Arc;

use sqlx::{Sqlite, SqlitePool, Transaction};
use tokio::sync::Mutex;

use crate::StoreError;

/// A scoped transactional handle.
///
/// `commit` and `rollback` are idempotent: once the transaction is closed,
/// further calls are no-ops. Commit is non-cancellable - once issued it
/// runs to resolution.
pub struct UnitOfWork {
    pub(crate) tx: Mutex<Option<Transaction<'static, Sqlite>>>,
}

impl UnitOfWork {
    /// Open a transaction on the pool.
    pub async fn begin(pool: &SqlitePool) -> Result<Arc<Self>, StoreError> {
        let tx = pool.begin().await?;
        Ok(Arc::new(Self {
            tx: Mutex::new(Some(tx)),
        }))
    }

    /// Commit the transaction. No-op if already closed.
    pub async fn commit(&self) -> Result<(), StoreError> {
        let tx = self.tx.lock().await.take();
        match tx {
            Some(tx) => Ok(tx.commit().await?),
            None => Ok(()),
        }
    }

    /// Roll the transaction back. No-op if already closed.
    pub async fn rollback(&self) -> Result<(), StoreError> {
        let tx = self.tx.lock().await.take();
        match tx {
            Some(tx) => Ok(tx.rollback().await?),
            None => Ok(()),
        }
    }

    /// Whether the transaction is still open.
    pub async fn is_open(&self) -> bool {
        self.tx.lock().await.is_some()
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork").finish_non_exhaustive()
    }
}

/// Ambient call context carried through store operations.
///
/// Cheap to clone. [`OpContext::detached`] derives a context without the
/// transaction for post-commit best-effort work, so a closed transaction
/// can never be reused by accident.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    uow: Option<Arc<UnitOfWork>>,
}

impl OpContext {
    /// A context with no transaction attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context carrying the given unit of work.
    pub fn with_uow(uow: Arc<UnitOfWork>) -> Self {
        Self { uow: Some(uow) }
    }

    /// The attached unit of work, or `TransactionRequired`.
    pub fn uow(&self) -> Result<&Arc<UnitOfWork>, StoreError> {
        self.uow.as_ref().ok_or(StoreError::TransactionRequired)
    }

    /// Whether a unit of work is attached.
    pub fn has_transaction(&self) -> bool {
        self.uow.is_some()
    }

    /// A copy of this context with the transaction stripped.
    pub fn detached(&self) -> Self {
        Self { uow: None }
    }
}
