//! Cross-aggregate checkout: drain a cart into a fresh order.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::warn;

use merx_bus::EventDispatcher;
use merx_domain::{
    CustomerId, DeliveryInfo, DomainError, DomainEvent, Order, OrderItem,
};
use merx_gateway::{QuoteBreakdown, QuoteRequest, Quoter};
use merx_index::{reconcile_cart, CartIndex};
use merx_store::{OpContext, SqliteStore};

use crate::cart::rollback_quietly;
use crate::{ServiceError, ServiceResult};

/// What checkout hands back: the new order plus the captured quote.
#[derive(Debug)]
pub struct CheckoutSummary {
    /// The order that was created.
    pub order: Order,
    /// Sum of line prices before discount and tax.
    pub subtotal: Decimal,
    /// Total discount the quoter granted.
    pub total_discount: Decimal,
    /// Total tax the quoter computed.
    pub total_tax: Decimal,
    /// What the customer pays.
    pub final_price: Decimal,
}

/// The checkout handler.
///
/// Cart reset and order creation share one unit of work: both persist or
/// neither does. Pricing is best-effort - a quoter failure degrades the
/// figures to zeros instead of failing the checkout.
pub struct CheckoutService {
    store: Arc<SqliteStore>,
    quoter: Arc<dyn Quoter>,
    index: Arc<dyn CartIndex>,
    dispatcher: Arc<EventDispatcher>,
}

impl CheckoutService {
    /// Wire the handler against its collaborators.
    pub fn new(
        store: Arc<SqliteStore>,
        quoter: Arc<dyn Quoter>,
        index: Arc<dyn CartIndex>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            store,
            quoter,
            index,
            dispatcher,
        }
    }

    /// Create an order from the customer's cart and empty the cart.
    pub async fn create_order_from_cart(
        &self,
        customer: CustomerId,
        delivery_info: Option<DeliveryInfo>,
    ) -> ServiceResult<CheckoutSummary> {
        const OP: &str = "checkout";

        if let Some(info) = &delivery_info {
            info.validate().map_err(|e| ServiceError::domain(OP, e))?;
        }

        let uow = self.store.begin().await.map_err(|e| ServiceError::store(OP, e))?;
        let ctx = OpContext::with_uow(uow.clone());

        let result = self.run(OP, &ctx, customer, delivery_info).await;
        match result {
            Ok((summary, cart, events)) => {
                uow.commit().await.map_err(|e| ServiceError::store(OP, e))?;

                // Post-commit, best effort: the cart is now empty, so its
                // index entries go away; the order events reach the
                // in-process subscribers (workflow kickoff among them).
                if let Err(err) = reconcile_cart(self.index.as_ref(), &cart).await {
                    warn!(op = OP, customer = %customer, error = %err,
                        "cart index reconciliation failed");
                }
                if let Err(err) = self.dispatcher.dispatch(&events).await {
                    warn!(op = OP, customer = %customer, error = %err,
                        "post-commit event dispatch failed");
                }
                Ok(summary)
            }
            Err(err) => {
                rollback_quietly(&uow, OP).await;
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        op: &'static str,
        ctx: &OpContext,
        customer: CustomerId,
        delivery_info: Option<DeliveryInfo>,
    ) -> ServiceResult<(CheckoutSummary, merx_domain::Cart, Vec<DomainEvent>)> {
        let mut cart = self
            .store
            .carts()
            .load(ctx, customer)
            .await
            .map_err(|e| ServiceError::store(op, e))?
            .ok_or_else(|| ServiceError::domain(op, DomainError::EmptyCart))?;
        if cart.is_empty() {
            return Err(ServiceError::domain(op, DomainError::EmptyCart));
        }

        // Best-effort pricing: a dead quoter costs the figures, never the
        // checkout.
        let quote = match self
            .quoter
            .calculate_total(QuoteRequest::for_cart(&cart))
            .await
        {
            Ok(quote) => quote,
            Err(err) => {
                warn!(op, customer = %customer, error = %err,
                    "quoter unavailable, degrading to zero figures");
                QuoteBreakdown::zero()
            }
        };

        let items: Vec<OrderItem> = cart
            .items()
            .iter()
            .map(|item| {
                OrderItem::new(item.good_id().clone(), item.quantity(), item.unit_price())
            })
            .collect::<Result<_, _>>()
            .map_err(|e| ServiceError::domain(op, e))?;

        let mut order = Order::create(customer, items).map_err(|e| ServiceError::domain(op, e))?;
        if let Some(info) = delivery_info {
            order
                .set_delivery_info(info)
                .map_err(|e| ServiceError::domain(op, e))?;
        }
        cart.reset();

        self.store
            .orders()
            .save(ctx, &mut order)
            .await
            .map_err(|e| ServiceError::store(op, e))?;
        self.store
            .carts()
            .save(ctx, &mut cart)
            .await
            .map_err(|e| ServiceError::store(op, e))?;

        let mut events = order.drain_events();
        events.extend(cart.drain_events());
        self.store
            .outbox()
            .publish_all(ctx, &events)
            .await
            .map_err(|e| ServiceError::store(op, e))?;

        let summary = CheckoutSummary {
            order,
            subtotal: quote.subtotal,
            total_discount: quote.total_discount,
            total_tax: quote.total_tax,
            final_price: quote.final_price,
        };
        Ok((summary, cart, events))
    }
}
