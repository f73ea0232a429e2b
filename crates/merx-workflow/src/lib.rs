#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **merx-workflow** – Order saga orchestration for the Merx core.
//!
//! Every order gets one workflow instance, identified `order-{order_id}`,
//! driving the post-checkout saga: create (observational) → reserve stock
//! → process payment → request delivery (when the order carries delivery
//! info) → complete. Each forward step documents its compensation; on
//! failure the saga unwinds and cancels the order.
//!
//! The workflow body performs no I/O of its own - every side effect runs
//! through an [`OrderActivities`] call wrapped in the retry executor with
//! an explicit start-to-close timeout. Validation failures are
//! deterministic and bypass retry entirely. A `cancel` signal may arrive
//! at any time before a terminal state: it flips the queryable state to
//! `Cancelled`, cancels the saga's token cooperatively, and runs the
//! idempotent order-cancel compensation.

use std::time::Duration;

use merx_domain::ErrorKind;

/// Activity contract and its production implementation.
pub mod activities;
/// Per-order workflow instance and the instance registry.
pub mod order;
/// Retry executor with timeout, backoff, and non-retryable kinds.
pub mod retry;
/// The saga step sequence and its compensations.
mod saga;
/// Per-customer cart session workflow.
pub mod session;
/// Bridges committed order events into workflow starts and signals.
pub mod subscriber;

pub use activities::{ActivityError, CoreOrderActivities, OrderActivities};
pub use order::{
    workflow_id, OrderWorkflowHandle, OrderWorkflowInput, WorkflowRegistry, WorkflowStatus,
};
pub use retry::{run_activity, ActivityOptions, RetryPolicy};
pub use session::{start_cart_session, CartSessionHandle, SessionConfig, SessionSignal};
pub use subscriber::OrderEventSubscriber;

//─────────────────────────────
//  Configuration
//─────────────────────────────

/// Default start-to-close timeout for one activity attempt.
pub const DEFAULT_START_TO_CLOSE: Duration = Duration::from_secs(30);

/// Default first retry delay.
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_secs(1);

/// Default retry delay cap.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(60);

/// Default attempt budget per activity.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

//─────────────────────────────
//  Error type
//─────────────────────────────

/// Errors surfaced by the workflow registry and subscriber plumbing.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// An instance with this id is already running.
    #[error("workflow {0} is already running")]
    AlreadyRunning(String),
    /// No instance with this id exists.
    #[error("workflow {0} not found")]
    NotFound(String),
    /// The instance exists but no longer accepts signals.
    #[error("workflow {0} no longer accepts signals")]
    SignalRejected(String),
    /// An activity failed terminally.
    #[error(transparent)]
    Activity(#[from] ActivityError),
}

impl WorkflowError {
    /// The taxonomy category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::AlreadyRunning(_) => ErrorKind::Conflict,
            WorkflowError::NotFound(_) => ErrorKind::NotFound,
            WorkflowError::SignalRejected(_) => ErrorKind::Conflict,
            WorkflowError::Activity(err) => err.kind(),
        }
    }
}
