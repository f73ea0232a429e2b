//! Cart aggregate store.

use chrono::Utc;
use sqlx::Row;
use tracing::warn;

use merx_domain::{Cart, CustomerId, Item};

use crate::cache::{AggregateCache, CacheConfig};
use crate::codec::{is_unique_violation, parse_decimal, parse_timestamp};
use crate::context::OpContext;
use crate::StoreError;

/// Load/save access to the cart aggregate.
///
/// Reads go through the L1 cache; the persisted representation is the
/// only source of truth and the cache entry is dropped on every
/// successful save. All operations require the transaction in the
/// caller's context.
#[derive(Debug)]
pub struct CartStore {
    cache: AggregateCache<CustomerId, Cart>,
}

impl CartStore {
    pub(crate) fn new(cache: CacheConfig) -> Self {
        Self {
            cache: AggregateCache::new(cache),
        }
    }

    /// Load a cart, or `None` when the customer has never written one.
    ///
    /// Negative lookups are never cached.
    pub async fn load(
        &self,
        ctx: &OpContext,
        customer: CustomerId,
    ) -> Result<Option<Cart>, StoreError> {
        let uow = ctx.uow()?;
        if let Some(cart) = self.cache.get(&customer) {
            return Ok(Some(cart));
        }

        let mut guard = uow.tx.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        let id = customer.to_string();

        let Some(header) =
            sqlx::query("SELECT version, created_at, updated_at FROM carts WHERE customer_id = ?")
                .bind(id.as_str())
                .fetch_optional(&mut **tx)
                .await?
        else {
            return Ok(None);
        };

        let version: i64 = header.get("version");
        let created_at = parse_timestamp("carts", header.get("created_at"))?;
        let updated_at = parse_timestamp("carts", header.get("updated_at"))?;

        let rows = sqlx::query(
            "SELECT good_id, quantity, unit_price, discount, tax \
             FROM cart_items WHERE cart_id = ? ORDER BY rowid",
        )
        .bind(id.as_str())
        .fetch_all(&mut **tx)
        .await?;
        drop(guard);

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let good_id: String = row.get("good_id");
            match reconstruct_item(&good_id, &row) {
                Ok(item) => items.push(item),
                Err(err) => {
                    // A single bad row must not fail the whole load.
                    warn!(customer = %customer, good_id = %good_id, error = %err,
                        "skipping invalid cart item row");
                }
            }
        }

        let cart = Cart::reconstitute(customer, version as u64, items, created_at, updated_at);
        self.cache.insert(customer, cart.clone());
        Ok(Some(cart))
    }

    /// Persist a cart under the optimistic-concurrency protocol.
    ///
    /// A fresh aggregate (version 0) inserts its header at version 1; any
    /// other version performs a conditional bump and fails with
    /// `VersionConflict` when the persisted version moved. Item rows are
    /// replaced wholesale inside the same transaction. On success the
    /// in-memory version is advanced and the cache entry is dropped.
    pub async fn save(&self, ctx: &OpContext, cart: &mut Cart) -> Result<(), StoreError> {
        let uow = ctx.uow()?;
        let mut guard = uow.tx.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;

        let id = cart.customer_id().to_string();
        let now = Utc::now().to_rfc3339();

        let next_version = if cart.version() == 0 {
            let inserted = sqlx::query(
                "INSERT INTO carts (customer_id, version, created_at, updated_at) \
                 VALUES (?, 1, ?, ?)",
            )
            .bind(id.as_str())
            .bind(cart.created_at().to_rfc3339())
            .bind(now.as_str())
            .execute(&mut **tx)
            .await;
            match inserted {
                Ok(_) => 1,
                Err(err) if is_unique_violation(&err) => {
                    // Another writer created the row first.
                    return Err(StoreError::VersionConflict {
                        aggregate: "cart",
                        id,
                        expected: 0,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        } else {
            let updated = sqlx::query(
                "UPDATE carts SET version = version + 1, updated_at = ? \
                 WHERE customer_id = ? AND version = ?",
            )
            .bind(now.as_str())
            .bind(id.as_str())
            .bind(cart.version() as i64)
            .execute(&mut **tx)
            .await?;
            if updated.rows_affected() == 0 {
                return Err(StoreError::VersionConflict {
                    aggregate: "cart",
                    id,
                    expected: cart.version(),
                });
            }
            cart.version() + 1
        };

        sqlx::query("DELETE FROM cart_items WHERE cart_id = ?")
            .bind(id.as_str())
            .execute(&mut **tx)
            .await?;
        for item in cart.items() {
            sqlx::query(
                "INSERT INTO cart_items (cart_id, good_id, quantity, unit_price, discount, tax) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(id.as_str())
            .bind(item.good_id().as_str())
            .bind(i64::from(item.quantity()))
            .bind(item.unit_price().to_string())
            .bind(item.discount().to_string())
            .bind(item.tax().to_string())
            .execute(&mut **tx)
            .await?;
        }
        drop(guard);

        cart.set_version(next_version);
        self.cache.invalidate(&cart.customer_id());
        Ok(())
    }
}

fn reconstruct_item(good_id: &str, row: &sqlx::sqlite::SqliteRow) -> Result<Item, String> {
    let quantity: i64 = row.get("quantity");
    let unit_price = parse_decimal(row.get::<String, _>("unit_price").as_str())?;
    let discount = parse_decimal(row.get::<String, _>("discount").as_str())?;
    let tax = parse_decimal(row.get::<String, _>("tax").as_str())?;
    let quantity = i32::try_from(quantity).map_err(|e| e.to_string())?;
    Item::new(good_id, quantity, unit_price, discount, tax).map_err(|e| e.to_string())
}
