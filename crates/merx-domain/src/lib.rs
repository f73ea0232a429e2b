#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **merx-domain** – Domain model for the Merx order management core.
//!
//! The crate is dependency-light and sits at the very bottom of the crate
//! graph so that every other crate can depend on it without causing cycles.
//! It owns the two aggregates (`Cart`, `Order`), their value objects, the
//! domain events they emit, and the validation rules their constructors
//! enforce. It intentionally makes no assumptions about I/O or storage.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//─────────────────────────────
//  Aggregates and value objects
//─────────────────────────────

/// Cart aggregate and its operations.
pub mod cart;
/// Delivery-related value objects and the delivery stage machine.
pub mod delivery;
/// Domain event envelope and payload set.
pub mod event;
/// Item value object.
pub mod item;
/// Order aggregate, order items, and the order state machine.
pub mod order;
/// Named validation rules evaluated by value-object constructors.
pub mod rules;

pub use cart::Cart;
pub use delivery::{
    Address, DeliveryInfo, DeliveryPeriod, DeliveryPriority, DeliveryStage, PackageInfo,
    RecipientContacts,
};
pub use event::{DomainEvent, EventId, EventPayload};
pub use item::Item;
pub use order::{Order, OrderItem, OrderStatus};

//─────────────────────────────
//  Core identifiers
//─────────────────────────────

/// Unique, 128-bit identifier of a customer.
///
/// Carts are keyed by customer: a customer owns at most one cart, created
/// lazily on first write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(pub Uuid);

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique, 128-bit identifier of an order, generated at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub Uuid);

impl OrderId {
    /// Generate a fresh order identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of a good (SKU). Must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GoodId(String);

impl GoodId {
    /// Create a good identifier, rejecting empty or blank strings.
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DomainError::EmptyGoodId);
        }
        Ok(Self(id))
    }

    /// The raw identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GoodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//─────────────────────────────
//  Error taxonomy
//─────────────────────────────

/// Coarse error categories shared across the whole core.
///
/// Every public error type exposes a `kind()` accessor returning one of
/// these; the transport layer maps the kind to its own status codes and the
/// workflow retry policy consults [`ErrorKind::is_retryable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Value-object constructor violations and malformed commands.
    InvalidInput,
    /// A required aggregate is absent.
    NotFound,
    /// Optimistic-lock failure, illegal state transition, or duplicate goods.
    Conflict,
    /// A downstream collaborator is currently unreachable.
    Unavailable,
    /// Unclassified; logged with an op tag for forensics.
    Internal,
}

impl ErrorKind {
    /// Stable textual tag for the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Internal => "internal",
        }
    }

    /// Whether an operation failing with this kind may be retried.
    ///
    /// Validation failures and conflicts are deterministic: retrying the
    /// same input yields the same outcome, so the workflow retry policy
    /// must skip them and fail fast.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Unavailable | ErrorKind::Internal)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by domain constructors and aggregate operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DomainError {
    /// Good identifier was empty or blank.
    #[error("good id must not be empty")]
    EmptyGoodId,
    /// Quantity was zero or negative.
    #[error("quantity must be positive, got {0}")]
    NonPositiveQuantity(i32),
    /// Unit price was negative.
    #[error("unit price must be non-negative, got {0}")]
    NegativePrice(rust_decimal::Decimal),
    /// Discount was negative.
    #[error("discount must be non-negative, got {0}")]
    NegativeDiscount(rust_decimal::Decimal),
    /// Tax was negative.
    #[error("tax must be non-negative, got {0}")]
    NegativeTax(rust_decimal::Decimal),
    /// Per-unit discount exceeded the unit price.
    #[error("discount {discount} exceeds unit price {price}")]
    DiscountExceedsPrice {
        /// Offending discount.
        discount: rust_decimal::Decimal,
        /// Unit price the discount was checked against.
        price: rust_decimal::Decimal,
    },
    /// Order creation was attempted with no items.
    #[error("order must contain at least one item")]
    EmptyOrder,
    /// Checkout was attempted on a cart with no items.
    #[error("cart is empty")]
    EmptyCart,
    /// The same good appeared twice in one order.
    #[error("duplicate good {0} in order")]
    DuplicateGood(GoodId),
    /// The requested status change is not allowed by the state machine.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Status the order was in.
        from: OrderStatus,
        /// Status the caller asked for.
        to: OrderStatus,
    },
    /// Delivery info can no longer be changed at the current stage.
    #[error("delivery info is frozen at stage {0}")]
    DeliveryInfoFrozen(DeliveryStage),
    /// Delivery dispatch was recorded for an order without delivery info.
    #[error("order has no delivery info")]
    MissingDeliveryInfo,
    /// Address failed validation.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// Delivery period end was not after its start.
    #[error("delivery period end must be after start")]
    InvalidDeliveryPeriod,
    /// Package weight was zero or negative.
    #[error("package weight must be positive, got {0} kg")]
    InvalidPackageWeight(rust_decimal::Decimal),
}

impl DomainError {
    /// The taxonomy category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::DuplicateGood(_)
            | DomainError::InvalidStateTransition { .. }
            | DomainError::DeliveryInfoFrozen(_) => ErrorKind::Conflict,
            _ => ErrorKind::InvalidInput,
        }
    }
}
