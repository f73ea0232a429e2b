#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **merx-gateway** – Contracts for the external collaborators the Merx
//! core consumes.
//!
//! The core does not own pricing rules, delivery routing, or notification
//! transports; it talks to them through the traits defined here. Failures
//! are handled by the callers per contract: quoting degrades to zeros,
//! delivery errors feed the workflow retry policy, and the notifier is
//! fire-and-forget.

/// Delivery service contract.
pub mod delivery;
/// Notification sink contract.
pub mod notifier;
/// Pricing service contract.
pub mod quoter;

pub use delivery::{DeliveryRequest, DeliveryService, DeliveryTicket, DispatchStatus};
pub use notifier::{NoopNotifier, Notifier};
pub use quoter::{QuoteBreakdown, QuoteLine, QuoteRequest, Quoter, StaticQuoter};
