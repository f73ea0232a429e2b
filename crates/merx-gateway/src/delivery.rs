//! Delivery service contract.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use merx_domain::{
    Address, CustomerId, DeliveryPeriod, DeliveryPriority, DeliveryStage, Order, OrderId,
    PackageInfo, RecipientContacts,
};

/// Dispatch status reported by the delivery service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    /// Request accepted, not yet pooled.
    Accepted,
    /// Waiting for a courier in the dispatch pool.
    InPool,
    /// A courier took the package.
    Assigned,
    /// On the way.
    InTransit,
    /// Arrived.
    Delivered,
    /// Terminally failed.
    NotDelivered,
    /// Needs manual intervention on the delivery side.
    RequiresHandling,
    /// The service did not say.
    Unspecified,
}

impl DispatchStatus {
    /// The delivery stage this status maps to on the order.
    pub fn to_stage(self) -> DeliveryStage {
        match self {
            DispatchStatus::Assigned => DeliveryStage::Assigned,
            DispatchStatus::InTransit => DeliveryStage::InTransit,
            DispatchStatus::Delivered => DeliveryStage::Delivered,
            DispatchStatus::NotDelivered => DeliveryStage::NotDelivered,
            // Anything pre-assignment reads as a requested delivery.
            DispatchStatus::Accepted
            | DispatchStatus::InPool
            | DispatchStatus::RequiresHandling
            | DispatchStatus::Unspecified => DeliveryStage::Requested,
        }
    }
}

/// Request shape of the delivery service's `AcceptOrder` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRequest {
    /// The order being dispatched.
    pub order_id: OrderId,
    /// The customer receiving it.
    pub customer_id: CustomerId,
    /// Pickup address.
    pub pickup_address: Address,
    /// Destination address.
    pub delivery_address: Address,
    /// Acceptable delivery window.
    pub period: DeliveryPeriod,
    /// Parcel parameters.
    pub package: PackageInfo,
    /// Requested priority.
    pub priority: DeliveryPriority,
    /// Recipient contacts, if shared.
    pub recipient_contacts: Option<RecipientContacts>,
}

impl DeliveryRequest {
    /// Map an order's delivery info onto the service's request shape.
    ///
    /// Returns `None` when the order carries no delivery info.
    pub fn for_order(order: &Order) -> Option<Self> {
        let info = order.delivery_info()?;
        Some(Self {
            order_id: order.order_id(),
            customer_id: order.customer_id(),
            pickup_address: info.pickup.clone(),
            delivery_address: info.destination.clone(),
            period: info.period,
            package: info.package,
            priority: info.priority,
            recipient_contacts: info.contacts.clone(),
        })
    }
}

/// The delivery service's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryTicket {
    /// Package identifier assigned by the delivery service.
    pub package_id: String,
    /// Initial dispatch status.
    pub status: DispatchStatus,
}

/// Delivery service consumed by the order workflow.
#[async_trait]
pub trait DeliveryService: Send + Sync {
    /// Hand an order over for delivery.
    async fn accept_order(&self, request: DeliveryRequest) -> Result<DeliveryTicket>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use merx_domain::{DeliveryInfo, GoodId, OrderItem};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn order_with_delivery() -> Order {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let info = DeliveryInfo::new(
            Address::new("1 Warehouse Way", "Springfield", "US", 40.0, -74.0).unwrap(),
            Address::new("9 Home Rd", "Springfield", "US", 40.1, -74.1).unwrap(),
            DeliveryPeriod::new(start, end).unwrap(),
            PackageInfo::new(Decimal::ONE).unwrap(),
            DeliveryPriority::Normal,
            None,
        );
        let mut order = Order::create(
            CustomerId(Uuid::new_v4()),
            vec![OrderItem::new(GoodId::new("g1").unwrap(), 1, Decimal::TEN).unwrap()],
        )
        .unwrap();
        order.set_delivery_info(info).unwrap();
        order
    }

    #[test]
    fn request_mirrors_the_order_delivery_info() {
        let order = order_with_delivery();
        let request = DeliveryRequest::for_order(&order).unwrap();
        assert_eq!(request.order_id, order.order_id());
        assert_eq!(request.customer_id, order.customer_id());
        assert_eq!(request.pickup_address.city(), "Springfield");
        assert_eq!(request.priority, DeliveryPriority::Normal);
    }

    #[test]
    fn order_without_delivery_info_yields_no_request() {
        let order = Order::create(
            CustomerId(Uuid::new_v4()),
            vec![OrderItem::new(GoodId::new("g1").unwrap(), 1, Decimal::TEN).unwrap()],
        )
        .unwrap();
        assert!(DeliveryRequest::for_order(&order).is_none());
    }

    #[test]
    fn status_maps_onto_stages() {
        assert_eq!(DispatchStatus::Accepted.to_stage(), DeliveryStage::Requested);
        assert_eq!(DispatchStatus::InPool.to_stage(), DeliveryStage::Requested);
        assert_eq!(DispatchStatus::Assigned.to_stage(), DeliveryStage::Assigned);
        assert_eq!(DispatchStatus::InTransit.to_stage(), DeliveryStage::InTransit);
        assert_eq!(DispatchStatus::Delivered.to_stage(), DeliveryStage::Delivered);
        assert_eq!(
            DispatchStatus::NotDelivered.to_stage(),
            DeliveryStage::NotDelivered
        );
    }
}
