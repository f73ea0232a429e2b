use rust_decimal::Decimal;
use uuid::Uuid;

use merx_domain::{
    Address, Cart, CustomerId, DeliveryPeriod, DeliveryStage, DomainError, ErrorKind, GoodId,
    Item, Order, OrderItem, OrderStatus, PackageInfo,
};

#[test]
fn test_item_validation() {
    // Valid item
    let valid = Item::new("sku-1", 2, Decimal::new(1999, 2), Decimal::ONE, Decimal::ZERO).unwrap();
    assert_eq!(valid.good_id().as_str(), "sku-1");
    assert_eq!(valid.quantity(), 2);

    // Empty good id should fail
    assert!(Item::new("", 1, Decimal::ONE, Decimal::ZERO, Decimal::ZERO).is_err());
    assert!(Item::new("   ", 1, Decimal::ONE, Decimal::ZERO, Decimal::ZERO).is_err());

    // Non-positive quantity should fail
    assert!(Item::new("g", 0, Decimal::ONE, Decimal::ZERO, Decimal::ZERO).is_err());
    assert!(Item::new("g", -3, Decimal::ONE, Decimal::ZERO, Decimal::ZERO).is_err());

    // Negative money fields should fail
    assert!(Item::new("g", 1, Decimal::NEGATIVE_ONE, Decimal::ZERO, Decimal::ZERO).is_err());
    assert!(Item::new("g", 1, Decimal::ONE, Decimal::NEGATIVE_ONE, Decimal::ZERO).is_err());
    assert!(Item::new("g", 1, Decimal::ONE, Decimal::ZERO, Decimal::NEGATIVE_ONE).is_err());

    // Discount above unit price should fail; equal is fine
    assert!(Item::new("g", 1, Decimal::ONE, Decimal::TWO, Decimal::ZERO).is_err());
    assert!(Item::new("g", 1, Decimal::ONE, Decimal::ONE, Decimal::ZERO).is_ok());
}

#[test]
fn test_validation_errors_are_invalid_input() {
    let err = Item::new("", 1, Decimal::ONE, Decimal::ZERO, Decimal::ZERO).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err = Item::new("g", 0, Decimal::ONE, Decimal::ZERO, Decimal::ZERO).unwrap_err();
    assert_eq!(err, DomainError::NonPositiveQuantity(0));
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn test_address_validation() {
    // Valid address at the coordinate boundaries
    assert!(Address::new("1 Main St", "Springfield", "US", 90.0, -180.0).is_ok());

    // Blank components should fail
    assert!(Address::new("", "Springfield", "US", 0.0, 0.0).is_err());
    assert!(Address::new("1 Main St", "", "US", 0.0, 0.0).is_err());
    assert!(Address::new("1 Main St", "Springfield", " ", 0.0, 0.0).is_err());

    // Out-of-range coordinates should fail
    assert!(Address::new("1 Main St", "Springfield", "US", 90.5, 0.0).is_err());
    assert!(Address::new("1 Main St", "Springfield", "US", 0.0, 181.0).is_err());
}

#[test]
fn test_delivery_period_and_package_validation() {
    use chrono::TimeZone;
    let start = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    let end = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

    assert!(DeliveryPeriod::new(start, end).is_ok());
    assert!(DeliveryPeriod::new(end, start).is_err());
    assert!(DeliveryPeriod::new(start, start).is_err());

    assert!(PackageInfo::new(Decimal::new(15, 1)).is_ok());
    assert!(PackageInfo::new(Decimal::ZERO).is_err());
}

#[test]
fn test_cart_invariants_hold_under_mixed_operations() {
    let mut cart = Cart::new(CustomerId(Uuid::new_v4()));
    let add = |good: &str, quantity: i32| {
        Item::new(good, quantity, Decimal::TEN, Decimal::ZERO, Decimal::ZERO).unwrap()
    };

    cart.add_item(add("g1", 2)).unwrap();
    cart.add_item(add("g2", 1)).unwrap();
    cart.add_item(add("g1", 3)).unwrap();
    cart.remove_item(&GoodId::new("g2").unwrap(), 1).unwrap();
    cart.add_item(add("g3", 4)).unwrap();
    cart.remove_item(&GoodId::new("g3").unwrap(), 2).unwrap();

    // One line per good, every quantity positive.
    let mut goods: Vec<_> = cart.items().iter().map(|i| i.good_id().clone()).collect();
    goods.sort();
    goods.dedup();
    assert_eq!(goods.len(), cart.items().len());
    assert!(cart.items().iter().all(|i| i.quantity() > 0));
}

#[test]
fn test_order_creation_validation() {
    let customer = CustomerId(Uuid::new_v4());
    let line = |good: &str| {
        OrderItem::new(GoodId::new(good).unwrap(), 1, Decimal::TEN).unwrap()
    };

    // Empty item list should fail
    assert_eq!(
        Order::create(customer, vec![]).unwrap_err(),
        DomainError::EmptyOrder
    );

    // Duplicate goods should fail with a conflict
    let err = Order::create(customer, vec![line("g1"), line("g1")]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    // Order item validation mirrors the item rules
    assert!(OrderItem::new(GoodId::new("g1").unwrap(), 0, Decimal::TEN).is_err());
    assert!(OrderItem::new(GoodId::new("g1").unwrap(), 1, Decimal::NEGATIVE_ONE).is_err());
}

#[test]
fn test_order_state_machine_transition_table() {
    use OrderStatus::*;

    let allowed = [
        (Created, Confirmed),
        (Confirmed, Delivering),
        (Delivering, Completed),
        (Created, Cancelled),
        (Confirmed, Cancelled),
        (Delivering, Cancelled),
    ];
    for (from, to) in allowed {
        assert!(from.can_transition_to(to), "{from} -> {to} should be legal");
    }

    let forbidden = [
        (Created, Delivering),
        (Created, Completed),
        (Confirmed, Completed),
        (Completed, Cancelled),
        (Cancelled, Created),
        (Completed, Delivering),
        (Cancelled, Cancelled),
    ];
    for (from, to) in forbidden {
        assert!(!from.can_transition_to(to), "{from} -> {to} should be illegal");
    }

    assert!(Completed.is_terminal());
    assert!(Cancelled.is_terminal());
    assert!(!Created.is_terminal());
}

#[test]
fn test_delivery_stage_gates_updates() {
    for stage in [DeliveryStage::None, DeliveryStage::Requested, DeliveryStage::NotDelivered] {
        assert!(!stage.freezes_updates(), "{stage} should allow updates");
    }
    for stage in [
        DeliveryStage::Assigned,
        DeliveryStage::InTransit,
        DeliveryStage::Delivered,
    ] {
        assert!(stage.freezes_updates(), "{stage} should freeze updates");
    }
}
