//! Order command handlers and queries.

use std::sync::Arc;

use tracing::warn;

use merx_bus::EventDispatcher;
use merx_domain::{CustomerId, DeliveryInfo, DeliveryStage, DomainEvent, Order, OrderId, OrderItem};
use merx_store::{OpContext, OrderFilter, OrderPage, SqliteStore};

use crate::cart::rollback_quietly;
use crate::{ServiceError, ServiceResult};

/// Order use cases: create, cancel, delivery info, get, list.
pub struct OrderService {
    store: Arc<SqliteStore>,
    dispatcher: Arc<EventDispatcher>,
}

impl OrderService {
    /// Wire the handler against its collaborators.
    pub fn new(store: Arc<SqliteStore>, dispatcher: Arc<EventDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Create an order directly from a validated item list.
    pub async fn create_order(
        &self,
        customer: CustomerId,
        items: Vec<OrderItem>,
    ) -> ServiceResult<Order> {
        const OP: &str = "order.create";
        let mut order = Order::create(customer, items).map_err(|e| ServiceError::domain(OP, e))?;
        self.persist_new(OP, &mut order).await?;
        Ok(order)
    }

    /// Cancel an order. Terminal orders reject this with a conflict.
    pub async fn cancel_order(
        &self,
        order_id: OrderId,
        reason: Option<String>,
    ) -> ServiceResult<Order> {
        const OP: &str = "order.cancel";
        self.mutate(OP, order_id, move |order| order.cancel(reason.clone()))
            .await
    }

    /// Set or replace an order's delivery info. Rejected on terminal
    /// orders and once a courier was assigned.
    pub async fn update_delivery_info(
        &self,
        order_id: OrderId,
        info: DeliveryInfo,
    ) -> ServiceResult<Order> {
        const OP: &str = "order.update_delivery_info";
        info.validate().map_err(|e| ServiceError::domain(OP, e))?;
        self.mutate(OP, order_id, move |order| {
            order.set_delivery_info(info.clone())
        })
        .await
    }

    /// Record the delivery service's dispatch response on the order.
    pub async fn record_delivery_dispatch(
        &self,
        order_id: OrderId,
        package_id: String,
        stage: DeliveryStage,
    ) -> ServiceResult<Order> {
        const OP: &str = "order.record_delivery_dispatch";
        self.mutate(OP, order_id, move |order| {
            order.record_delivery_dispatch(package_id.clone(), stage)
        })
        .await
    }

    /// Fetch one order. Fails with `NotFound` when absent.
    pub async fn get_order(&self, order_id: OrderId) -> ServiceResult<Order> {
        const OP: &str = "order.get";
        let uow = self.store.begin().await.map_err(|e| ServiceError::store(OP, e))?;
        let ctx = OpContext::with_uow(uow.clone());
        let loaded = self
            .store
            .orders()
            .get(&ctx, order_id)
            .await
            .map_err(|e| ServiceError::store(OP, e));
        rollback_quietly(&uow, OP).await;
        loaded
    }

    /// Paginated listing with combined filters; the page carries the
    /// total count and derives the page count.
    pub async fn list_orders(&self, filter: OrderFilter) -> ServiceResult<OrderPage> {
        const OP: &str = "order.list";
        let uow = self.store.begin().await.map_err(|e| ServiceError::store(OP, e))?;
        let ctx = OpContext::with_uow(uow.clone());
        let page = self
            .store
            .orders()
            .list(&ctx, &filter)
            .await
            .map_err(|e| ServiceError::store(OP, e));
        rollback_quietly(&uow, OP).await;
        page
    }

    /// Persist a freshly created order and run the post-commit work.
    async fn persist_new(&self, op: &'static str, order: &mut Order) -> ServiceResult<()> {
        let uow = self.store.begin().await.map_err(|e| ServiceError::store(op, e))?;
        let ctx = OpContext::with_uow(uow.clone());

        let result: ServiceResult<Vec<DomainEvent>> = async {
            self.store
                .orders()
                .save(&ctx, order)
                .await
                .map_err(|e| ServiceError::store(op, e))?;
            let events = order.drain_events();
            self.store
                .outbox()
                .publish_all(&ctx, &events)
                .await
                .map_err(|e| ServiceError::store(op, e))?;
            Ok(events)
        }
        .await;

        match result {
            Ok(events) => {
                uow.commit().await.map_err(|e| ServiceError::store(op, e))?;
                self.after_commit(op, order, &events).await;
                Ok(())
            }
            Err(err) => {
                rollback_quietly(&uow, op).await;
                Err(err)
            }
        }
    }

    /// Canonical load-mutate-save for an existing order.
    async fn mutate<F>(&self, op: &'static str, order_id: OrderId, apply: F) -> ServiceResult<Order>
    where
        F: Fn(&mut Order) -> Result<(), merx_domain::DomainError>,
    {
        let uow = self.store.begin().await.map_err(|e| ServiceError::store(op, e))?;
        let ctx = OpContext::with_uow(uow.clone());

        let result: ServiceResult<(Order, Vec<DomainEvent>)> = async {
            let mut order = self
                .store
                .orders()
                .get(&ctx, order_id)
                .await
                .map_err(|e| ServiceError::store(op, e))?;
            apply(&mut order).map_err(|e| ServiceError::domain(op, e))?;
            self.store
                .orders()
                .save(&ctx, &mut order)
                .await
                .map_err(|e| ServiceError::store(op, e))?;
            let events = order.drain_events();
            self.store
                .outbox()
                .publish_all(&ctx, &events)
                .await
                .map_err(|e| ServiceError::store(op, e))?;
            Ok((order, events))
        }
        .await;

        match result {
            Ok((order, events)) => {
                uow.commit().await.map_err(|e| ServiceError::store(op, e))?;
                self.after_commit(op, &order, &events).await;
                Ok(order)
            }
            Err(err) => {
                rollback_quietly(&uow, op).await;
                Err(err)
            }
        }
    }

    async fn after_commit(&self, op: &'static str, order: &Order, events: &[DomainEvent]) {
        if let Err(err) = self.dispatcher.dispatch(events).await {
            warn!(op, order = %order.order_id(), error = %err,
                "post-commit event dispatch failed");
        }
    }
}
