#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **merx-services** – Command and query handlers for the Merx core.
//!
//! Every command handler follows the same canonical shape: open one unit
//! of work, load the aggregate, invoke a pure domain operation, save,
//! publish the drained events to the outbox, commit, then run the
//! best-effort post-commit work (secondary-index reconciliation and
//! in-process event dispatch). Handlers never share a unit of work and
//! stores never open their own.

use merx_domain::{DomainError, ErrorKind};
use merx_store::StoreError;

/// Cart commands and the cart query.
pub mod cart;
/// Cross-aggregate checkout.
pub mod checkout;
/// Order commands and queries.
pub mod order;
/// Stock-change ingest.
pub mod stock;

pub use cart::{CartService, ItemRemoval};
pub use checkout::{CheckoutService, CheckoutSummary};
pub use order::OrderService;
pub use stock::StockChangeHandler;

//─────────────────────────────
//  Error type
//─────────────────────────────

/// Errors surfaced by the handlers, tagged with the failing operation.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// A domain rule rejected the command.
    #[error("{op}: {source}")]
    Domain {
        /// Handler-specific op tag for forensics.
        op: &'static str,
        /// The violated rule.
        source: DomainError,
    },
    /// Storage rejected or dropped the operation.
    #[error("{op}: {source}")]
    Store {
        /// Handler-specific op tag for forensics.
        op: &'static str,
        /// The storage failure.
        source: StoreError,
    },
}

impl ServiceError {
    pub(crate) fn domain(op: &'static str, source: DomainError) -> Self {
        Self::Domain { op, source }
    }

    pub(crate) fn store(op: &'static str, source: StoreError) -> Self {
        Self::Store { op, source }
    }

    /// The taxonomy category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Domain { source, .. } => source.kind(),
            ServiceError::Store { source, .. } => source.kind(),
        }
    }

    /// The op tag of the handler that failed.
    pub fn op(&self) -> &'static str {
        match self {
            ServiceError::Domain { op, .. } | ServiceError::Store { op, .. } => op,
        }
    }
}

/// Result alias for handler operations.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
