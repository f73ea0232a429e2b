//! Activity contract and its production implementation.
//!
//! Activities are the only place the workflow touches wall clock,
//! database, or external services. They re-enter the handler surfaces, so
//! every invariant the handlers enforce holds inside the saga too.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use merx_domain::{ErrorKind, Order, OrderId};
use merx_gateway::{DeliveryRequest, DeliveryService, DeliveryTicket};
use merx_services::{OrderService, ServiceError};

//─────────────────────────────
//  Activity errors
//─────────────────────────────

/// Failure of a single activity invocation.
#[derive(Debug, thiserror::Error)]
pub enum ActivityError {
    /// The activity ran and failed.
    #[error("activity {activity} failed: {message}")]
    Failed {
        /// Which activity failed.
        activity: &'static str,
        /// Taxonomy category, drives the retry decision.
        kind: ErrorKind,
        /// Human-readable failure description.
        message: String,
    },
    /// One attempt exceeded its start-to-close timeout.
    #[error("activity {activity} timed out after {seconds}s")]
    Timeout {
        /// Which activity timed out.
        activity: &'static str,
        /// The exceeded budget, in seconds.
        seconds: u64,
    },
    /// The saga's token was cancelled while the activity was in flight.
    #[error("activity {activity} cancelled")]
    Cancelled {
        /// Which activity was aborted.
        activity: &'static str,
    },
}

impl ActivityError {
    /// The taxonomy category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ActivityError::Failed { kind, .. } => *kind,
            ActivityError::Timeout { .. } => ErrorKind::Unavailable,
            ActivityError::Cancelled { .. } => ErrorKind::Internal,
        }
    }

    /// Whether the retry policy may run the activity again.
    ///
    /// Validation failures and conflicts are deterministic, so they fail
    /// fast; a cancelled attempt never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            ActivityError::Failed { kind, .. } => kind.is_retryable(),
            ActivityError::Timeout { .. } => true,
            ActivityError::Cancelled { .. } => false,
        }
    }

    pub(crate) fn from_service(activity: &'static str, err: ServiceError) -> Self {
        ActivityError::Failed {
            activity,
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Whether this failure is the cooperative-cancellation marker.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ActivityError::Cancelled { .. })
    }
}

//─────────────────────────────
//  Contract
//─────────────────────────────

/// Side effects the order saga may perform.
#[async_trait]
pub trait OrderActivities: Send + Sync {
    /// Idempotent read of the order.
    async fn get_order(&self, order_id: OrderId) -> Result<Order, ActivityError>;

    /// Reserve stock for the order. External; placeholder in this core.
    async fn reserve_stock(&self, order_id: OrderId) -> Result<(), ActivityError>;

    /// Release a stock reservation. Compensation; idempotent.
    async fn release_stock(&self, order_id: OrderId) -> Result<(), ActivityError>;

    /// Settle payment for the order. External; placeholder in this core.
    async fn process_payment(&self, order_id: OrderId) -> Result<(), ActivityError>;

    /// Cancel the order. Compensation; idempotent - an already-terminal
    /// order counts as done.
    async fn cancel_order(&self, order_id: OrderId) -> Result<(), ActivityError>;

    /// Hand the order to the delivery service and record the dispatch.
    async fn request_delivery(&self, order_id: OrderId) -> Result<DeliveryTicket, ActivityError>;
}

//─────────────────────────────
//  Production implementation
//─────────────────────────────

/// Activities backed by the order handlers and the delivery gateway.
pub struct CoreOrderActivities {
    orders: Arc<OrderService>,
    delivery: Arc<dyn DeliveryService>,
}

impl CoreOrderActivities {
    /// Wire the activities against their collaborators.
    pub fn new(orders: Arc<OrderService>, delivery: Arc<dyn DeliveryService>) -> Self {
        Self { orders, delivery }
    }
}

#[async_trait]
impl OrderActivities for CoreOrderActivities {
    async fn get_order(&self, order_id: OrderId) -> Result<Order, ActivityError> {
        self.orders
            .get_order(order_id)
            .await
            .map_err(|e| ActivityError::from_service("get_order", e))
    }

    async fn reserve_stock(&self, order_id: OrderId) -> Result<(), ActivityError> {
        // Stock ownership lives elsewhere; the saga step is a placeholder
        // until the reservation service is wired in.
        debug!(order = %order_id, "reserve_stock placeholder");
        Ok(())
    }

    async fn release_stock(&self, order_id: OrderId) -> Result<(), ActivityError> {
        debug!(order = %order_id, "release_stock placeholder");
        Ok(())
    }

    async fn process_payment(&self, order_id: OrderId) -> Result<(), ActivityError> {
        debug!(order = %order_id, "process_payment placeholder");
        Ok(())
    }

    async fn cancel_order(&self, order_id: OrderId) -> Result<(), ActivityError> {
        match self.orders.cancel_order(order_id, Some("saga".into())).await {
            Ok(_) => Ok(()),
            // Already terminal: the compensation has nothing left to do.
            Err(err) if err.kind() == ErrorKind::Conflict => {
                info!(order = %order_id, "cancel compensation found order already terminal");
                Ok(())
            }
            Err(err) => Err(ActivityError::from_service("cancel_order", err)),
        }
    }

    async fn request_delivery(&self, order_id: OrderId) -> Result<DeliveryTicket, ActivityError> {
        let order = self
            .orders
            .get_order(order_id)
            .await
            .map_err(|e| ActivityError::from_service("request_delivery", e))?;
        let request = DeliveryRequest::for_order(&order).ok_or(ActivityError::Failed {
            activity: "request_delivery",
            kind: ErrorKind::InvalidInput,
            message: "order has no delivery info".into(),
        })?;

        let ticket = self
            .delivery
            .accept_order(request)
            .await
            .map_err(|e| ActivityError::Failed {
                activity: "request_delivery",
                kind: ErrorKind::Unavailable,
                message: e.to_string(),
            })?;

        self.orders
            .record_delivery_dispatch(
                order_id,
                ticket.package_id.clone(),
                ticket.status.to_stage(),
            )
            .await
            .map_err(|e| ActivityError::from_service("request_delivery", e))?;

        info!(order = %order_id, package = %ticket.package_id,
            status = ?ticket.status, "delivery dispatched");
        Ok(ticket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification_follows_error_kinds() {
        let validation = ActivityError::Failed {
            activity: "x",
            kind: ErrorKind::InvalidInput,
            message: "bad".into(),
        };
        assert!(!validation.is_retryable());

        let conflict = ActivityError::Failed {
            activity: "x",
            kind: ErrorKind::Conflict,
            message: "stale".into(),
        };
        assert!(!conflict.is_retryable());

        let outage = ActivityError::Failed {
            activity: "x",
            kind: ErrorKind::Unavailable,
            message: "down".into(),
        };
        assert!(outage.is_retryable());

        assert!(ActivityError::Timeout {
            activity: "x",
            seconds: 30,
        }
        .is_retryable());
        assert!(!ActivityError::Cancelled { activity: "x" }.is_retryable());
    }
}
