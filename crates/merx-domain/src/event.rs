//! Domain events emitted by the aggregates.
//!
//! Events are data, not callbacks: a tagged payload wrapped in an envelope
//! carrying the event id and occurrence time. Aggregates buffer events on a
//! pending list and hand them over in append order through
//! `drain_events()`; the handler publishes them to the outbox inside the
//! same commit that persists the aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CustomerId, GoodId, Item, OrderId};

/// Unique identifier of a committed domain event (UUID v4).
pub type EventId = Uuid;

/// Stable event kind tags, shared with the outbox and the dispatcher.
pub mod kind {
    /// An item was added to a cart (or merged into an existing line).
    pub const ITEM_ADDED: &str = "cart.item_added";
    /// Units of a good were removed from a cart.
    pub const ITEM_REMOVED: &str = "cart.item_removed";
    /// A cart was emptied.
    pub const CART_RESET: &str = "cart.reset";
    /// An order was created.
    pub const ORDER_CREATED: &str = "order.created";
    /// An order was cancelled.
    pub const ORDER_CANCELLED: &str = "order.cancelled";
    /// An order's delivery info changed.
    pub const ORDER_DELIVERY_INFO_UPDATED: &str = "order.delivery_info_updated";
}

/// Typed payload of a domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum EventPayload {
    /// An item was added to the customer's cart.
    ItemAdded {
        /// Cart owner.
        customer: CustomerId,
        /// The item as it was added (the delta, not the merged line).
        item: Item,
    },
    /// Units of a good were removed from the customer's cart.
    ItemRemoved {
        /// Cart owner.
        customer: CustomerId,
        /// The good that was removed.
        good_id: GoodId,
        /// Units actually removed.
        quantity: i32,
    },
    /// The customer's cart was emptied.
    CartReset {
        /// Cart owner.
        customer: CustomerId,
    },
    /// A new order entered the system.
    OrderCreated {
        /// The new order.
        order: OrderId,
        /// The customer the order belongs to.
        customer: CustomerId,
    },
    /// An order was cancelled.
    OrderCancelled {
        /// The cancelled order.
        order: OrderId,
        /// Caller-supplied reason, if any.
        reason: Option<String>,
    },
    /// An order's delivery info was set or updated.
    OrderDeliveryInfoUpdated {
        /// The order whose delivery info changed.
        order: OrderId,
    },
}

impl EventPayload {
    /// Stable textual tag of this payload variant.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::ItemAdded { .. } => kind::ITEM_ADDED,
            EventPayload::ItemRemoved { .. } => kind::ITEM_REMOVED,
            EventPayload::CartReset { .. } => kind::CART_RESET,
            EventPayload::OrderCreated { .. } => kind::ORDER_CREATED,
            EventPayload::OrderCancelled { .. } => kind::ORDER_CANCELLED,
            EventPayload::OrderDeliveryInfoUpdated { .. } => kind::ORDER_DELIVERY_INFO_UPDATED,
        }
    }

    /// Identifier of the aggregate the event is about.
    pub fn subject(&self) -> String {
        match self {
            EventPayload::ItemAdded { customer, .. }
            | EventPayload::ItemRemoved { customer, .. }
            | EventPayload::CartReset { customer } => customer.to_string(),
            EventPayload::OrderCreated { order, .. }
            | EventPayload::OrderCancelled { order, .. }
            | EventPayload::OrderDeliveryInfoUpdated { order } => order.to_string(),
        }
    }
}

/// Envelope around an [`EventPayload`]: id, occurrence time, payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Unique event identifier.
    pub id: EventId,
    /// Wall-clock time the event occurred.
    pub occurred_at: DateTime<Utc>,
    /// What happened.
    pub payload: EventPayload,
}

impl DomainEvent {
    /// Wrap a payload in a fresh envelope stamped with the current time.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            payload,
        }
    }

    /// Stable textual tag of the wrapped payload.
    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }

    /// Identifier of the aggregate the event is about.
    pub fn subject(&self) -> String {
        self.payload.subject()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn kinds_are_stable_tags() {
        let customer = CustomerId(Uuid::nil());
        let event = DomainEvent::new(EventPayload::CartReset { customer });
        assert_eq!(event.kind(), "cart.reset");
        assert_eq!(event.subject(), customer.to_string());
    }

    #[test]
    fn order_events_use_the_order_as_subject() {
        let order = OrderId::generate();
        let event = DomainEvent::new(EventPayload::OrderCancelled {
            order,
            reason: Some("customer-request".to_string()),
        });
        assert_eq!(event.kind(), "order.cancelled");
        assert_eq!(event.subject(), order.to_string());
    }

    #[test]
    fn envelope_serde_round_trip() {
        let event = DomainEvent::new(EventPayload::OrderCreated {
            order: OrderId::generate(),
            customer: CustomerId(Uuid::new_v4()),
        });
        let json = serde_json::to_string(&event).unwrap();
        let back: DomainEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
