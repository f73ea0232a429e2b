//! Bridges committed order events into workflow starts and signals.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use merx_bus::EventHandler;
use merx_domain::event::kind;
use merx_domain::{DomainEvent, EventPayload};
use merx_services::OrderService;

use crate::order::{workflow_id, OrderWorkflowInput, WorkflowRegistry};

/// Post-commit subscriber that launches and signals order workflows.
///
/// Registered on the in-process dispatcher. Failures to start or signal
/// are surfaced to the dispatcher (first error wins) where they are
/// logged; the emitting commit has already succeeded and is never
/// affected.
pub struct OrderEventSubscriber {
    registry: Arc<WorkflowRegistry>,
    orders: Arc<OrderService>,
}

impl OrderEventSubscriber {
    /// Wire the subscriber against the registry and the order handlers.
    pub fn new(registry: Arc<WorkflowRegistry>, orders: Arc<OrderService>) -> Self {
        Self { registry, orders }
    }
}

const SUBSCRIBED_KINDS: [&str; 2] = [kind::ORDER_CREATED, kind::ORDER_CANCELLED];

#[async_trait]
impl EventHandler for OrderEventSubscriber {
    fn kinds(&self) -> &[&'static str] {
        &SUBSCRIBED_KINDS
    }

    async fn handle(&self, event: &DomainEvent) -> Result<()> {
        match &event.payload {
            EventPayload::OrderCreated { order, customer } => {
                let loaded = self
                    .orders
                    .get_order(*order)
                    .await
                    .context("loading created order for workflow start")?;
                let input = OrderWorkflowInput {
                    order_id: *order,
                    customer_id: *customer,
                    items: loaded.items().to_vec(),
                    has_delivery: loaded.has_delivery_info(),
                };
                let handle = self.registry.start_order_workflow(input)?;
                info!(workflow = handle.id(), "workflow started for created order");
                Ok(())
            }
            EventPayload::OrderCancelled { order, reason } => {
                let reason = reason.clone().unwrap_or_else(|| "cancelled".to_string());
                self.registry
                    .signal_cancel(&workflow_id(*order), reason)
                    .context("signalling order workflow cancel")?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
