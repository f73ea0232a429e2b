//! Cart command handlers and the cart query.

use std::sync::Arc;

use tracing::warn;

use merx_bus::EventDispatcher;
use merx_domain::{Cart, CustomerId, DomainEvent, GoodId, Item};
use merx_index::{reconcile_cart, CartIndex};
use merx_store::{OpContext, SqliteStore};

use crate::{ServiceError, ServiceResult};

/// One line of a `RemoveItems` command.
#[derive(Debug, Clone)]
pub struct ItemRemoval {
    /// The good to remove.
    pub good_id: GoodId,
    /// How many units to remove.
    pub quantity: i32,
}

impl ItemRemoval {
    /// A removal of every unit of the good.
    pub fn all(good_id: GoodId) -> Self {
        Self {
            good_id,
            quantity: i32::MAX,
        }
    }
}

/// Cart use cases: add, remove, reset, get.
pub struct CartService {
    store: Arc<SqliteStore>,
    index: Arc<dyn CartIndex>,
    dispatcher: Arc<EventDispatcher>,
}

impl CartService {
    /// Wire the handler against its collaborators.
    pub fn new(
        store: Arc<SqliteStore>,
        index: Arc<dyn CartIndex>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            store,
            index,
            dispatcher,
        }
    }

    /// Add items to the customer's cart, creating it on first write.
    /// Quantities merge when a good is already present.
    pub async fn add_items(
        &self,
        customer: CustomerId,
        items: Vec<Item>,
    ) -> ServiceResult<Cart> {
        const OP: &str = "cart.add_items";
        let uow = self.store.begin().await.map_err(|e| ServiceError::store(OP, e))?;
        let ctx = OpContext::with_uow(uow.clone());

        let result: ServiceResult<(Cart, Vec<DomainEvent>)> = async {
            let mut cart = self
                .store
                .carts()
                .load(&ctx, customer)
                .await
                .map_err(|e| ServiceError::store(OP, e))?
                .unwrap_or_else(|| Cart::new(customer));
            for item in items {
                cart.add_item(item).map_err(|e| ServiceError::domain(OP, e))?;
            }
            self.store
                .carts()
                .save(&ctx, &mut cart)
                .await
                .map_err(|e| ServiceError::store(OP, e))?;
            let events = cart.drain_events();
            self.store
                .outbox()
                .publish_all(&ctx, &events)
                .await
                .map_err(|e| ServiceError::store(OP, e))?;
            Ok((cart, events))
        }
        .await;

        match result {
            Ok((cart, events)) => {
                uow.commit().await.map_err(|e| ServiceError::store(OP, e))?;
                self.after_commit(OP, &cart, &events).await;
                Ok(cart)
            }
            Err(err) => {
                rollback_quietly(&uow, OP).await;
                Err(err)
            }
        }
    }

    /// Remove units of goods from the customer's cart. A missing cart, or
    /// a good not in the cart, is a no-op.
    pub async fn remove_items(
        &self,
        customer: CustomerId,
        removals: Vec<ItemRemoval>,
    ) -> ServiceResult<Cart> {
        const OP: &str = "cart.remove_items";
        let uow = self.store.begin().await.map_err(|e| ServiceError::store(OP, e))?;
        let ctx = OpContext::with_uow(uow.clone());

        let result: ServiceResult<Option<(Cart, Vec<DomainEvent>)>> = async {
            let Some(mut cart) = self
                .store
                .carts()
                .load(&ctx, customer)
                .await
                .map_err(|e| ServiceError::store(OP, e))?
            else {
                return Ok(None);
            };
            for removal in removals {
                cart.remove_item(&removal.good_id, removal.quantity)
                    .map_err(|e| ServiceError::domain(OP, e))?;
            }
            self.store
                .carts()
                .save(&ctx, &mut cart)
                .await
                .map_err(|e| ServiceError::store(OP, e))?;
            let events = cart.drain_events();
            self.store
                .outbox()
                .publish_all(&ctx, &events)
                .await
                .map_err(|e| ServiceError::store(OP, e))?;
            Ok(Some((cart, events)))
        }
        .await;

        match result {
            Ok(Some((cart, events))) => {
                uow.commit().await.map_err(|e| ServiceError::store(OP, e))?;
                self.after_commit(OP, &cart, &events).await;
                Ok(cart)
            }
            Ok(None) => {
                rollback_quietly(&uow, OP).await;
                Ok(Cart::new(customer))
            }
            Err(err) => {
                rollback_quietly(&uow, OP).await;
                Err(err)
            }
        }
    }

    /// Empty the customer's cart. A missing cart is a no-op.
    pub async fn reset(&self, customer: CustomerId) -> ServiceResult<Cart> {
        const OP: &str = "cart.reset";
        let uow = self.store.begin().await.map_err(|e| ServiceError::store(OP, e))?;
        let ctx = OpContext::with_uow(uow.clone());

        let result: ServiceResult<Option<(Cart, Vec<DomainEvent>)>> = async {
            let Some(mut cart) = self
                .store
                .carts()
                .load(&ctx, customer)
                .await
                .map_err(|e| ServiceError::store(OP, e))?
            else {
                return Ok(None);
            };
            cart.reset();
            self.store
                .carts()
                .save(&ctx, &mut cart)
                .await
                .map_err(|e| ServiceError::store(OP, e))?;
            let events = cart.drain_events();
            self.store
                .outbox()
                .publish_all(&ctx, &events)
                .await
                .map_err(|e| ServiceError::store(OP, e))?;
            Ok(Some((cart, events)))
        }
        .await;

        match result {
            Ok(Some((cart, events))) => {
                uow.commit().await.map_err(|e| ServiceError::store(OP, e))?;
                self.after_commit(OP, &cart, &events).await;
                Ok(cart)
            }
            Ok(None) => {
                rollback_quietly(&uow, OP).await;
                Ok(Cart::new(customer))
            }
            Err(err) => {
                rollback_quietly(&uow, OP).await;
                Err(err)
            }
        }
    }

    /// The customer's cart, or an empty aggregate for an unknown customer.
    /// This surface never answers `NotFound`.
    pub async fn get_cart(&self, customer: CustomerId) -> ServiceResult<Cart> {
        const OP: &str = "cart.get";
        let uow = self.store.begin().await.map_err(|e| ServiceError::store(OP, e))?;
        let ctx = OpContext::with_uow(uow.clone());
        let loaded = self
            .store
            .carts()
            .load(&ctx, customer)
            .await
            .map_err(|e| ServiceError::store(OP, e));
        rollback_quietly(&uow, OP).await;
        Ok(loaded?.unwrap_or_else(|| Cart::new(customer)))
    }

    /// Best-effort post-commit work: reconcile the reverse index and hand
    /// the committed events to the in-process dispatcher. Failures are
    /// logged, never surfaced - the authoritative state is already
    /// persisted.
    async fn after_commit(&self, op: &'static str, cart: &Cart, events: &[DomainEvent]) {
        if let Err(err) = reconcile_cart(self.index.as_ref(), cart).await {
            warn!(op, customer = %cart.customer_id(), error = %err,
                "cart index reconciliation failed");
        }
        if let Err(err) = self.dispatcher.dispatch(events).await {
            warn!(op, customer = %cart.customer_id(), error = %err,
                "post-commit event dispatch failed");
        }
    }
}

pub(crate) async fn rollback_quietly(uow: &merx_store::UnitOfWork, op: &'static str) {
    if let Err(err) = uow.rollback().await {
        warn!(op, error = %err, "rollback failed");
    }
}
