#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **merx-index** – Good ↔ customer reverse index.
//!
//! Two set-valued maps: which customers hold a given good in their cart,
//! and which goods a given customer's cart contains. The index is
//! eventually consistent with the cart aggregate: handlers update it
//! strictly after commit on a detached context, a missing or divergent
//! entry is never an error, and [`reconcile_cart`] can rebuild a
//! customer's entries from a freshly loaded cart.
//!
//! All operations are idempotent set operations, so repair and replay are
//! always safe.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use merx_domain::{Cart, CustomerId, GoodId};

//─────────────────────────────
//  Index contract
//─────────────────────────────

/// The reverse-index contract.
///
/// The production deployment backs this with an out-of-process key-value
/// store; [`InMemoryCartIndex`] is the in-process driver behind the same
/// interface.
#[async_trait]
pub trait CartIndex: Send + Sync {
    /// Record that `customer`'s cart contains `good`.
    async fn add_good_to_cart(&self, good: &GoodId, customer: CustomerId) -> Result<()>;

    /// Record that `customer`'s cart no longer contains `good`.
    async fn remove_good_from_cart(&self, good: &GoodId, customer: CustomerId) -> Result<()>;

    /// Customers whose carts contain `good`.
    async fn customers_with_good(&self, good: &GoodId) -> Result<Vec<CustomerId>>;

    /// Drop every entry for `customer`'s cart.
    async fn clear_cart(&self, customer: CustomerId) -> Result<()>;
}

//─────────────────────────────
//  In-process driver
//─────────────────────────────

/// In-process index driver over two sharded maps.
#[derive(Debug, Default)]
pub struct InMemoryCartIndex {
    customers_by_good: DashMap<GoodId, HashSet<CustomerId>>,
    goods_by_customer: DashMap<CustomerId, HashSet<GoodId>>,
}

impl InMemoryCartIndex {
    /// An empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Goods currently indexed for a customer.
    pub fn goods_of(&self, customer: CustomerId) -> Vec<GoodId> {
        self.goods_by_customer
            .get(&customer)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CartIndex for InMemoryCartIndex {
    async fn add_good_to_cart(&self, good: &GoodId, customer: CustomerId) -> Result<()> {
        self.customers_by_good
            .entry(good.clone())
            .or_default()
            .insert(customer);
        self.goods_by_customer
            .entry(customer)
            .or_default()
            .insert(good.clone());
        Ok(())
    }

    async fn remove_good_from_cart(&self, good: &GoodId, customer: CustomerId) -> Result<()> {
        if let Some(mut customers) = self.customers_by_good.get_mut(good) {
            customers.remove(&customer);
        }
        if let Some(mut goods) = self.goods_by_customer.get_mut(&customer) {
            goods.remove(good);
        }
        Ok(())
    }

    async fn customers_with_good(&self, good: &GoodId) -> Result<Vec<CustomerId>> {
        Ok(self
            .customers_by_good
            .get(good)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn clear_cart(&self, customer: CustomerId) -> Result<()> {
        let goods = self
            .goods_by_customer
            .remove(&customer)
            .map(|(_, set)| set)
            .unwrap_or_default();
        for good in goods {
            if let Some(mut customers) = self.customers_by_good.get_mut(&good) {
                customers.remove(&customer);
            }
        }
        Ok(())
    }
}

//─────────────────────────────
//  Reconciliation
//─────────────────────────────

/// Replace a customer's index entries with the cart's actual contents.
///
/// The aggregate is authoritative; this is the repair path for entries
/// that drifted or were lost. Always safe to re-run.
pub async fn reconcile_cart(index: &dyn CartIndex, cart: &Cart) -> Result<()> {
    index.clear_cart(cart.customer_id()).await?;
    for item in cart.items() {
        index
            .add_good_to_cart(item.good_id(), cart.customer_id())
            .await?;
    }
    debug!(customer = %cart.customer_id(), goods = cart.items().len(),
        "cart index reconciled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use merx_domain::Item;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn customer() -> CustomerId {
        CustomerId(Uuid::new_v4())
    }

    fn good(id: &str) -> GoodId {
        GoodId::new(id).unwrap()
    }

    #[tokio::test]
    async fn add_and_remove_keep_both_maps_consistent() {
        let index = InMemoryCartIndex::new();
        let c1 = customer();
        let c2 = customer();
        let g = good("g1");

        index.add_good_to_cart(&g, c1).await.unwrap();
        index.add_good_to_cart(&g, c2).await.unwrap();

        let mut holders = index.customers_with_good(&g).await.unwrap();
        holders.sort_by_key(|c| c.to_string());
        let mut expected = vec![c1, c2];
        expected.sort_by_key(|c| c.to_string());
        assert_eq!(holders, expected);
        assert_eq!(index.goods_of(c1), vec![g.clone()]);

        index.remove_good_from_cart(&g, c1).await.unwrap();
        assert_eq!(index.customers_with_good(&g).await.unwrap(), vec![c2]);
        assert!(index.goods_of(c1).is_empty());
    }

    #[tokio::test]
    async fn operations_are_idempotent() {
        let index = InMemoryCartIndex::new();
        let c = customer();
        let g = good("g1");

        index.add_good_to_cart(&g, c).await.unwrap();
        index.add_good_to_cart(&g, c).await.unwrap();
        assert_eq!(index.customers_with_good(&g).await.unwrap().len(), 1);

        index.remove_good_from_cart(&g, c).await.unwrap();
        index.remove_good_from_cart(&g, c).await.unwrap();
        assert!(index.customers_with_good(&g).await.unwrap().is_empty());

        index.clear_cart(c).await.unwrap();
        index.clear_cart(c).await.unwrap();
    }

    #[tokio::test]
    async fn clear_cart_drops_every_good() {
        let index = InMemoryCartIndex::new();
        let c = customer();
        index.add_good_to_cart(&good("g1"), c).await.unwrap();
        index.add_good_to_cart(&good("g2"), c).await.unwrap();

        index.clear_cart(c).await.unwrap();

        assert!(index.customers_with_good(&good("g1")).await.unwrap().is_empty());
        assert!(index.customers_with_good(&good("g2")).await.unwrap().is_empty());
        assert!(index.goods_of(c).is_empty());
    }

    #[tokio::test]
    async fn reconcile_rebuilds_from_the_aggregate() {
        let index = InMemoryCartIndex::new();
        let c = customer();

        // Divergent entry that the cart does not actually contain.
        index.add_good_to_cart(&good("stale"), c).await.unwrap();

        let mut cart = Cart::new(c);
        cart.add_item(Item::new("g1", 1, Decimal::TEN, Decimal::ZERO, Decimal::ZERO).unwrap())
            .unwrap();
        cart.add_item(Item::new("g2", 2, Decimal::TEN, Decimal::ZERO, Decimal::ZERO).unwrap())
            .unwrap();

        reconcile_cart(&index, &cart).await.unwrap();

        assert!(index.customers_with_good(&good("stale")).await.unwrap().is_empty());
        assert_eq!(index.customers_with_good(&good("g1")).await.unwrap(), vec![c]);
        assert_eq!(index.customers_with_good(&good("g2")).await.unwrap(), vec![c]);
    }
}
