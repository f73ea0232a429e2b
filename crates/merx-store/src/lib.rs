#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **merx-store** – SQLite-backed aggregate persistence for the Merx core.
//!
//! The store owns the persisted bytes of both aggregates. Writes go
//! through a version-checked save protocol (optimistic concurrency, no row
//! locks); reads reconstruct the aggregate from its header and item rows,
//! fronted by a short-TTL process-local cache. Every operation observes
//! the transaction carried in the caller's [`OpContext`]; the outbox
//! publisher writes event rows in that same transaction so state change
//! and event enqueue commit atomically.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::sync::Arc;

use merx_domain::ErrorKind;

pub mod cache;
pub mod cart;
mod codec;
pub mod context;
mod migrate;
pub mod order;
pub mod outbox;

pub use cache::{AggregateCache, CacheConfig};
pub use cart::CartStore;
pub use context::{OpContext, UnitOfWork};
pub use order::{OrderFilter, OrderPage, OrderStore};
pub use outbox::{OutboxPublisher, OutboxRecord};

//─────────────────────────────
//  Error type
//─────────────────────────────

/// Errors produced by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The operation was called without a transaction in its context.
    #[error("operation requires an active transaction")]
    TransactionRequired,
    /// The transaction in the context has already been committed or rolled
    /// back.
    #[error("transaction already closed")]
    TransactionClosed,
    /// The aggregate changed underneath the caller; reload and retry.
    #[error("version conflict saving {aggregate} {id} at version {expected}")]
    VersionConflict {
        /// Aggregate family ("cart" or "order").
        aggregate: &'static str,
        /// Aggregate identifier.
        id: String,
        /// The version the caller loaded.
        expected: u64,
    },
    /// The aggregate does not exist.
    #[error("{aggregate} {id} not found")]
    NotFound {
        /// Aggregate family.
        aggregate: &'static str,
        /// Aggregate identifier.
        id: String,
    },
    /// A persisted row could not be interpreted.
    #[error("corrupt row in {table}: {detail}")]
    Corrupt {
        /// Table the row came from.
        table: &'static str,
        /// What failed to parse.
        detail: String,
    },
    /// The database rejected or dropped the operation.
    #[error("storage backend error: {0}")]
    Backend(#[from] sqlx::Error),
    /// Event payload could not be encoded for the outbox.
    #[error("failed to encode outbox payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// The taxonomy category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::VersionConflict { .. } => ErrorKind::Conflict,
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Backend(_) => ErrorKind::Unavailable,
            StoreError::TransactionRequired
            | StoreError::TransactionClosed
            | StoreError::Corrupt { .. }
            | StoreError::Serialization(_) => ErrorKind::Internal,
        }
    }
}

//─────────────────────────────
//  Store facade
//─────────────────────────────

/// The SQLite-backed store: pool, per-aggregate stores, outbox.
#[derive(Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
    carts: CartStore,
    orders: OrderStore,
    outbox: OutboxPublisher,
}

impl SqliteStore {
    /// Open or create a database file and run migrations.
    pub async fn open<P: AsRef<Path>>(path: P, cache: CacheConfig) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        Self::from_pool(pool, cache).await
    }

    /// Open an in-memory database. Useful for tests.
    pub async fn in_memory(cache: CacheConfig) -> Result<Self, StoreError> {
        // One connection: in-memory SQLite databases are per-connection,
        // and the schema must stay visible to every handle.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool, cache).await
    }

    /// Build a store from an existing pool and run migrations.
    pub async fn from_pool(pool: SqlitePool, cache: CacheConfig) -> Result<Self, StoreError> {
        migrate::run(&pool).await?;
        Ok(Self {
            pool,
            carts: CartStore::new(cache.clone()),
            orders: OrderStore::new(cache),
            outbox: OutboxPublisher::new(),
        })
    }

    /// Open a fresh unit of work on this store's pool.
    pub async fn begin(&self) -> Result<Arc<UnitOfWork>, StoreError> {
        UnitOfWork::begin(&self.pool).await
    }

    /// Cart aggregate store.
    pub fn carts(&self) -> &CartStore {
        &self.carts
    }

    /// Order aggregate store.
    pub fn orders(&self) -> &OrderStore {
        &self.orders
    }

    /// Outbox publisher.
    pub fn outbox(&self) -> &OutboxPublisher {
        &self.outbox
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_taxonomy() {
        assert_eq!(StoreError::TransactionRequired.kind(), ErrorKind::Internal);
        assert_eq!(
            StoreError::VersionConflict {
                aggregate: "cart",
                id: "x".into(),
                expected: 1,
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            StoreError::NotFound {
                aggregate: "order",
                id: "x".into(),
            }
            .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            StoreError::Backend(sqlx::Error::PoolClosed).kind(),
            ErrorKind::Unavailable
        );
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let store = SqliteStore::in_memory(CacheConfig::default()).await.unwrap();
        // A second run against the same pool must not fail.
        migrate::run(store.pool()).await.unwrap();
    }

    #[tokio::test]
    async fn file_backed_store_persists_across_reopen() {
        use merx_domain::{Cart, CustomerId, Item};
        use rust_decimal::Decimal;
        use uuid::Uuid;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merx.db");
        let owner = CustomerId(Uuid::new_v4());

        {
            let store = SqliteStore::open(&path, CacheConfig::default()).await.unwrap();
            let uow = store.begin().await.unwrap();
            let ctx = OpContext::with_uow(uow.clone());
            let mut cart = Cart::new(owner);
            cart.add_item(
                Item::new("g1", 2, Decimal::new(1999, 2), Decimal::ZERO, Decimal::ZERO).unwrap(),
            )
            .unwrap();
            store.carts().save(&ctx, &mut cart).await.unwrap();
            uow.commit().await.unwrap();
            store.close().await;
        }

        {
            let store = SqliteStore::open(&path, CacheConfig::default()).await.unwrap();
            let uow = store.begin().await.unwrap();
            let ctx = OpContext::with_uow(uow.clone());
            let cart = store.carts().load(&ctx, owner).await.unwrap().unwrap();
            uow.commit().await.unwrap();
            assert_eq!(cart.version(), 1);
            assert_eq!(cart.items().len(), 1);
        }
    }
}
