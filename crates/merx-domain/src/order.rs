//! Order aggregate, order items, and the order state machine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::delivery::{DeliveryInfo, DeliveryStage};
use crate::event::{DomainEvent, EventPayload};
use crate::{CustomerId, DomainError, GoodId, OrderId};

/// Lifecycle status of an order.
///
/// Created → Confirmed → Delivering → Completed; any non-terminal status
/// may go to Cancelled. Completed and Cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Freshly created, nothing reserved yet.
    Created,
    /// Stock reserved and payment settled.
    Confirmed,
    /// Handed to the delivery service.
    Delivering,
    /// Terminal success.
    Completed,
    /// Terminal abort.
    Cancelled,
}

impl OrderStatus {
    /// Whether no further transitions are allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Whether the machine allows moving from `self` to `to`.
    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, to) {
            (Created, Confirmed) => true,
            (Confirmed, Delivering) => true,
            (Delivering, Completed) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Integer representation used by the persisted schema.
    pub fn as_int(&self) -> i64 {
        match self {
            OrderStatus::Created => 0,
            OrderStatus::Confirmed => 1,
            OrderStatus::Delivering => 2,
            OrderStatus::Completed => 3,
            OrderStatus::Cancelled => 4,
        }
    }

    /// Parse the persisted integer representation.
    pub fn from_int(value: i64) -> Option<Self> {
        match value {
            0 => Some(OrderStatus::Created),
            1 => Some(OrderStatus::Confirmed),
            2 => Some(OrderStatus::Delivering),
            3 => Some(OrderStatus::Completed),
            4 => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            OrderStatus::Created => "created",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Delivering => "delivering",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        };
        f.write_str(tag)
    }
}

/// An order line with the price captured at checkout time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    /// The good ordered.
    pub good_id: GoodId,
    /// Units ordered. Always positive.
    pub quantity: i32,
    /// Per-unit price captured when the order was created.
    pub price: Decimal,
}

impl OrderItem {
    /// Construct an order line, validating quantity and price.
    pub fn new(good_id: GoodId, quantity: i32, price: Decimal) -> Result<Self, DomainError> {
        if quantity <= 0 {
            return Err(DomainError::NonPositiveQuantity(quantity));
        }
        if price.is_sign_negative() {
            return Err(DomainError::NegativePrice(price));
        }
        Ok(Self {
            good_id,
            quantity,
            price,
        })
    }
}

/// Order aggregate root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    order_id: OrderId,
    customer_id: CustomerId,
    items: Vec<OrderItem>,
    status: OrderStatus,
    version: u64,
    delivery_info: Option<DeliveryInfo>,
    #[serde(skip)]
    pending_events: Vec<DomainEvent>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Create a new order in status Created. Emits `OrderCreated`.
    ///
    /// The item list must be non-empty and may not mention the same good
    /// twice.
    pub fn create(customer_id: CustomerId, items: Vec<OrderItem>) -> Result<Self, DomainError> {
        if items.is_empty() {
            return Err(DomainError::EmptyOrder);
        }
        let mut seen = HashSet::new();
        for item in &items {
            if !seen.insert(item.good_id.clone()) {
                return Err(DomainError::DuplicateGood(item.good_id.clone()));
            }
        }
        let order_id = OrderId::generate();
        let now = Utc::now();
        let mut order = Self {
            order_id,
            customer_id,
            items,
            status: OrderStatus::Created,
            version: 0,
            delivery_info: None,
            pending_events: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        order.record(EventPayload::OrderCreated {
            order: order_id,
            customer: customer_id,
        });
        Ok(order)
    }

    /// Rebuild an order from persisted state. Used by the store only.
    #[allow(clippy::too_many_arguments)]
    pub fn reconstitute(
        order_id: OrderId,
        customer_id: CustomerId,
        items: Vec<OrderItem>,
        status: OrderStatus,
        version: u64,
        delivery_info: Option<DeliveryInfo>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            customer_id,
            items,
            status,
            version,
            delivery_info,
            pending_events: Vec::new(),
            created_at,
            updated_at,
        }
    }

    /// Order identifier.
    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    /// Owning customer.
    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    /// Order lines.
    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    /// Current lifecycle status.
    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Persisted version; 0 means the order has never been saved.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Overwrite the version after a successful save. Store use only.
    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Delivery info, if set.
    pub fn delivery_info(&self) -> Option<&DeliveryInfo> {
        self.delivery_info.as_ref()
    }

    /// Whether the order carries delivery info.
    pub fn has_delivery_info(&self) -> bool {
        self.delivery_info.is_some()
    }

    /// Creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last mutation timestamp.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Move Created → Confirmed.
    pub fn confirm(&mut self) -> Result<(), DomainError> {
        self.transition(OrderStatus::Confirmed)
    }

    /// Move Confirmed → Delivering.
    pub fn start_delivery(&mut self) -> Result<(), DomainError> {
        self.transition(OrderStatus::Delivering)
    }

    /// Move Delivering → Completed.
    pub fn complete(&mut self) -> Result<(), DomainError> {
        self.transition(OrderStatus::Completed)
    }

    /// Cancel from any non-terminal status. Emits `OrderCancelled`.
    pub fn cancel(&mut self, reason: Option<String>) -> Result<(), DomainError> {
        self.transition(OrderStatus::Cancelled)?;
        self.record(EventPayload::OrderCancelled {
            order: self.order_id,
            reason,
        });
        Ok(())
    }

    /// Set or replace the delivery info. Emits `OrderDeliveryInfoUpdated`.
    ///
    /// Rejected once the order is terminal, and once the previous delivery
    /// reached a stage that freezes updates (Assigned and later).
    pub fn set_delivery_info(&mut self, info: DeliveryInfo) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::InvalidStateTransition {
                from: self.status,
                to: self.status,
            });
        }
        if let Some(existing) = &self.delivery_info {
            if existing.stage.freezes_updates() {
                return Err(DomainError::DeliveryInfoFrozen(existing.stage));
            }
        }
        self.delivery_info = Some(info);
        self.record(EventPayload::OrderDeliveryInfoUpdated {
            order: self.order_id,
        });
        Ok(())
    }

    /// Record the delivery service's dispatch response: the assigned
    /// package id and the reported stage. Emits `OrderDeliveryInfoUpdated`.
    pub fn record_delivery_dispatch(
        &mut self,
        package_id: String,
        stage: DeliveryStage,
    ) -> Result<(), DomainError> {
        let info = self
            .delivery_info
            .as_mut()
            .ok_or(DomainError::MissingDeliveryInfo)?;
        info.package_id = Some(package_id);
        info.stage = stage;
        self.record(EventPayload::OrderDeliveryInfoUpdated {
            order: self.order_id,
        });
        Ok(())
    }

    /// Events recorded since the last drain, in append order.
    pub fn pending_events(&self) -> &[DomainEvent] {
        &self.pending_events
    }

    /// Take the pending events, leaving the list empty.
    pub fn drain_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.pending_events)
    }

    fn transition(&mut self, to: OrderStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidStateTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn record(&mut self, payload: EventPayload) {
        self.updated_at = Utc::now();
        self.pending_events.push(DomainEvent::new(payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn line(good: &str, quantity: i32) -> OrderItem {
        OrderItem::new(GoodId::new(good).unwrap(), quantity, Decimal::TEN).unwrap()
    }

    fn order() -> Order {
        Order::create(CustomerId(Uuid::new_v4()), vec![line("g1", 2)]).unwrap()
    }

    #[test]
    fn create_requires_items() {
        let err = Order::create(CustomerId(Uuid::new_v4()), vec![]).unwrap_err();
        assert_eq!(err, DomainError::EmptyOrder);
    }

    #[test]
    fn create_rejects_duplicate_goods() {
        let err = Order::create(
            CustomerId(Uuid::new_v4()),
            vec![line("g1", 1), line("g1", 2)],
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::DuplicateGood(_)));
    }

    #[test]
    fn create_emits_order_created() {
        let order = order();
        assert_eq!(order.status(), OrderStatus::Created);
        assert_eq!(order.pending_events().len(), 1);
        assert_eq!(order.pending_events()[0].kind(), "order.created");
    }

    #[test]
    fn happy_path_transitions() {
        let mut order = order();
        order.confirm().unwrap();
        order.start_delivery().unwrap();
        order.complete().unwrap();
        assert_eq!(order.status(), OrderStatus::Completed);
    }

    #[test]
    fn transitions_cannot_skip_stages() {
        let mut order = order();
        assert!(matches!(
            order.start_delivery(),
            Err(DomainError::InvalidStateTransition { .. })
        ));
        assert!(matches!(
            order.complete(),
            Err(DomainError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn cancel_allowed_from_any_non_terminal_status() {
        for steps in 0..3 {
            let mut order = order();
            if steps >= 1 {
                order.confirm().unwrap();
            }
            if steps >= 2 {
                order.start_delivery().unwrap();
            }
            order.cancel(Some("test".into())).unwrap();
            assert_eq!(order.status(), OrderStatus::Cancelled);
        }
    }

    #[test]
    fn terminal_orders_reject_every_mutation() {
        let mut order = order();
        order.cancel(None).unwrap();

        assert!(matches!(
            order.cancel(None),
            Err(DomainError::InvalidStateTransition { .. })
        ));
        assert!(matches!(
            order.confirm(),
            Err(DomainError::InvalidStateTransition { .. })
        ));

        let info_err = order
            .set_delivery_info(test_delivery_info())
            .unwrap_err();
        assert_eq!(info_err.kind(), crate::ErrorKind::Conflict);
    }

    fn test_delivery_info() -> DeliveryInfo {
        use crate::delivery::{Address, DeliveryPeriod, DeliveryPriority, PackageInfo};
        use chrono::TimeZone;
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        DeliveryInfo::new(
            Address::new("1 Warehouse Way", "Springfield", "US", 40.0, -74.0).unwrap(),
            Address::new("9 Home Rd", "Springfield", "US", 40.1, -74.1).unwrap(),
            DeliveryPeriod::new(start, end).unwrap(),
            PackageInfo::new(Decimal::ONE).unwrap(),
            DeliveryPriority::Normal,
            None,
        )
    }

    #[test]
    fn delivery_info_freezes_once_assigned() {
        let mut order = order();
        order.set_delivery_info(test_delivery_info()).unwrap();
        order
            .record_delivery_dispatch("pkg-1".into(), DeliveryStage::Assigned)
            .unwrap();

        let err = order.set_delivery_info(test_delivery_info()).unwrap_err();
        assert_eq!(err, DomainError::DeliveryInfoFrozen(DeliveryStage::Assigned));
    }

    #[test]
    fn delivery_info_replaceable_before_assignment() {
        let mut order = order();
        order.set_delivery_info(test_delivery_info()).unwrap();
        order
            .record_delivery_dispatch("pkg-1".into(), DeliveryStage::Requested)
            .unwrap();
        assert!(order.set_delivery_info(test_delivery_info()).is_ok());
    }

    #[test]
    fn dispatch_requires_delivery_info() {
        let mut order = order();
        assert_eq!(
            order.record_delivery_dispatch("pkg".into(), DeliveryStage::Requested),
            Err(DomainError::MissingDeliveryInfo)
        );
    }

    #[test]
    fn status_int_round_trip() {
        for status in [
            OrderStatus::Created,
            OrderStatus::Confirmed,
            OrderStatus::Delivering,
            OrderStatus::Completed,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(OrderStatus::from_int(status.as_int()), Some(status));
        }
        assert_eq!(OrderStatus::from_int(99), None);
    }
}
