//! Per-order workflow instance and the instance registry.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use merx_domain::{CustomerId, OrderId, OrderItem};

use crate::activities::{ActivityError, OrderActivities};
use crate::retry::{run_activity, ActivityOptions};
use crate::saga::run_order_saga;
use crate::WorkflowError;

/// Signal buffer per instance; senders never block the dispatcher.
const SIGNAL_BUFFER: usize = 16;

/// The workflow id for an order.
pub fn workflow_id(order_id: OrderId) -> String {
    format!("order-{order_id}")
}

//─────────────────────────────
//  Status and input
//─────────────────────────────

/// Queryable state of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStatus {
    /// The saga is running.
    Processing,
    /// The saga finished successfully.
    Completed,
    /// A cancel signal ended the workflow.
    Cancelled,
    /// The saga failed and compensated.
    Failed,
}

impl WorkflowStatus {
    /// Whether the workflow reached a final state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkflowStatus::Processing)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            WorkflowStatus::Processing => "processing",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Cancelled => "cancelled",
            WorkflowStatus::Failed => "failed",
        };
        f.write_str(tag)
    }
}

/// What the workflow is started with.
#[derive(Debug, Clone)]
pub struct OrderWorkflowInput {
    /// The order the saga drives.
    pub order_id: OrderId,
    /// The customer the order belongs to.
    pub customer_id: CustomerId,
    /// The order lines at creation time.
    pub items: Vec<OrderItem>,
    /// Whether step 4 (request delivery) runs.
    pub has_delivery: bool,
}

//─────────────────────────────
//  Instance handle
//─────────────────────────────

enum Signal {
    Cancel { reason: String },
    Complete,
}

/// Handle to a running (or finished) workflow instance.
pub struct OrderWorkflowHandle {
    id: String,
    status_rx: watch::Receiver<WorkflowStatus>,
    signal_tx: mpsc::Sender<Signal>,
}

impl OrderWorkflowHandle {
    /// The instance id (`order-{order_id}`).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current queryable state. This is the workflow `get` query.
    pub fn status(&self) -> WorkflowStatus {
        *self.status_rx.borrow()
    }

    /// Ask the workflow to cancel. Queued, never blocking.
    pub fn signal_cancel(&self, reason: impl Into<String>) -> Result<(), WorkflowError> {
        self.signal_tx
            .try_send(Signal::Cancel {
                reason: reason.into(),
            })
            .map_err(|_| WorkflowError::SignalRejected(self.id.clone()))
    }

    /// Advisory completion signal; logged, the saga outcome is what
    /// actually completes the workflow.
    pub fn signal_complete(&self) -> Result<(), WorkflowError> {
        self.signal_tx
            .try_send(Signal::Complete)
            .map_err(|_| WorkflowError::SignalRejected(self.id.clone()))
    }

    /// Wait until the workflow reaches a terminal state.
    pub async fn wait_terminal(&self) -> WorkflowStatus {
        let mut rx = self.status_rx.clone();
        loop {
            let status = *rx.borrow();
            if status.is_terminal() {
                return status;
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }
}

impl fmt::Debug for OrderWorkflowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderWorkflowHandle")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

//─────────────────────────────
//  Registry
//─────────────────────────────

/// Starts and addresses workflow instances.
///
/// At most one instance runs per workflow id; starting a second while the
/// first is still processing fails with `AlreadyRunning`. A finished
/// instance may be superseded.
pub struct WorkflowRegistry {
    activities: Arc<dyn OrderActivities>,
    options: ActivityOptions,
    instances: DashMap<String, Arc<OrderWorkflowHandle>>,
}

impl WorkflowRegistry {
    /// Create a registry running activities under the given options.
    pub fn new(activities: Arc<dyn OrderActivities>, options: ActivityOptions) -> Self {
        Self {
            activities,
            options,
            instances: DashMap::new(),
        }
    }

    /// Start the workflow for an order.
    ///
    /// Fails with `AlreadyRunning` while a live instance holds the id; a
    /// terminal instance is superseded.
    pub fn start_order_workflow(
        &self,
        input: OrderWorkflowInput,
    ) -> Result<Arc<OrderWorkflowHandle>, WorkflowError> {
        use dashmap::mapref::entry::Entry;

        let id = workflow_id(input.order_id);
        match self.instances.entry(id.clone()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().status().is_terminal() {
                    return Err(WorkflowError::AlreadyRunning(id));
                }
                let handle = spawn_instance(
                    id,
                    input,
                    Arc::clone(&self.activities),
                    self.options.clone(),
                );
                occupied.insert(Arc::clone(&handle));
                Ok(handle)
            }
            Entry::Vacant(vacant) => {
                let handle = spawn_instance(
                    id,
                    input,
                    Arc::clone(&self.activities),
                    self.options.clone(),
                );
                vacant.insert(Arc::clone(&handle));
                Ok(handle)
            }
        }
    }

    /// Fetch a handle by workflow id.
    pub fn get(&self, id: &str) -> Option<Arc<OrderWorkflowHandle>> {
        self.instances.get(id).map(|h| Arc::clone(h.value()))
    }

    /// Signal `cancel` on a workflow id.
    pub fn signal_cancel(&self, id: &str, reason: impl Into<String>) -> Result<(), WorkflowError> {
        let handle = self
            .get(id)
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))?;
        handle.signal_cancel(reason)
    }

    /// Number of tracked instances. Mostly for tests.
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

fn spawn_instance(
    id: String,
    input: OrderWorkflowInput,
    activities: Arc<dyn OrderActivities>,
    options: ActivityOptions,
) -> Arc<OrderWorkflowHandle> {
    let (status_tx, status_rx) = watch::channel(WorkflowStatus::Processing);
    let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER);

    let handle = Arc::new(OrderWorkflowHandle {
        id: id.clone(),
        status_rx,
        signal_tx,
    });

    tokio::spawn(run_instance(
        id, input, activities, options, status_tx, signal_rx,
    ));
    handle
}

/// The workflow main loop: drive the saga as a child task and select over
/// {saga done, cancel signal, advisory complete signal}.
async fn run_instance(
    id: String,
    input: OrderWorkflowInput,
    activities: Arc<dyn OrderActivities>,
    options: ActivityOptions,
    status_tx: watch::Sender<WorkflowStatus>,
    mut signal_rx: mpsc::Receiver<Signal>,
) {
    info!(workflow = %id, order = %input.order_id, has_delivery = input.has_delivery,
        "order workflow started");

    let cancel = CancellationToken::new();
    let order_id = input.order_id;
    let mut saga = tokio::spawn(run_order_saga(
        Arc::clone(&activities),
        input,
        options.clone(),
        cancel.clone(),
    ));

    let mut signals_open = true;
    loop {
        tokio::select! {
            joined = &mut saga => {
                let outcome = joined.unwrap_or_else(|join_err| {
                    Err(ActivityError::Failed {
                        activity: "saga",
                        kind: merx_domain::ErrorKind::Internal,
                        message: join_err.to_string(),
                    })
                });
                match outcome {
                    Ok(()) => {
                        info!(workflow = %id, "workflow completed");
                        let _ = status_tx.send(WorkflowStatus::Completed);
                    }
                    Err(err) => {
                        error!(workflow = %id, error = %err, "workflow failed");
                        let _ = status_tx.send(WorkflowStatus::Failed);
                    }
                }
                return;
            }
            signal = signal_rx.recv(), if signals_open => match signal {
                Some(Signal::Cancel { reason }) => {
                    info!(workflow = %id, reason = %reason, "cancel signal received");
                    // The queryable state flips first, then the saga's
                    // token aborts in-flight activities cooperatively.
                    let _ = status_tx.send(WorkflowStatus::Cancelled);
                    cancel.cancel();
                    let _ = (&mut saga).await;

                    // Idempotent compensation on a fresh token: the order
                    // itself must end up cancelled.
                    let token = CancellationToken::new();
                    let compensation = {
                        let activities = Arc::clone(&activities);
                        run_activity("cancel_order", &options, &token, move || {
                            let activities = Arc::clone(&activities);
                            async move { activities.cancel_order(order_id).await }
                        })
                        .await
                    };
                    if let Err(err) = compensation {
                        warn!(workflow = %id, error = %err,
                            "cancel compensation failed");
                    }
                    return;
                }
                Some(Signal::Complete) => {
                    // Advisory only; saga completion is what transitions
                    // the state.
                    info!(workflow = %id, "advisory complete signal received");
                }
                None => {
                    signals_open = false;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use merx_domain::{ErrorKind, GoodId, Order};
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    use crate::retry::RetryPolicy;

    /// Scriptable activity double recording every invocation.
    struct StubActivities {
        reserve_failures: u32,
        reserve_fail_kind: ErrorKind,
        reserve_delay: Duration,
        delivery_fails: bool,
        get_calls: AtomicU32,
        reserve_calls: AtomicU32,
        release_calls: AtomicU32,
        payment_calls: AtomicU32,
        cancel_calls: AtomicU32,
        delivery_calls: AtomicU32,
    }

    impl Default for StubActivities {
        fn default() -> Self {
            Self {
                reserve_failures: 0,
                reserve_fail_kind: ErrorKind::Unavailable,
                reserve_delay: Duration::ZERO,
                delivery_fails: false,
                get_calls: AtomicU32::new(0),
                reserve_calls: AtomicU32::new(0),
                release_calls: AtomicU32::new(0),
                payment_calls: AtomicU32::new(0),
                cancel_calls: AtomicU32::new(0),
                delivery_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl OrderActivities for StubActivities {
        async fn get_order(&self, _order_id: OrderId) -> Result<Order, ActivityError> {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            Order::create(
                CustomerId(Uuid::new_v4()),
                vec![OrderItem::new(GoodId::new("g1").unwrap(), 1, Decimal::TEN).unwrap()],
            )
            .map_err(|e| ActivityError::Failed {
                activity: "get_order",
                kind: e.kind(),
                message: e.to_string(),
            })
        }

        async fn reserve_stock(&self, _order_id: OrderId) -> Result<(), ActivityError> {
            let call = self.reserve_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.reserve_delay).await;
            if call < self.reserve_failures {
                return Err(ActivityError::Failed {
                    activity: "reserve_stock",
                    kind: self.reserve_fail_kind,
                    message: "scripted failure".into(),
                });
            }
            Ok(())
        }

        async fn release_stock(&self, _order_id: OrderId) -> Result<(), ActivityError> {
            self.release_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn process_payment(&self, _order_id: OrderId) -> Result<(), ActivityError> {
            self.payment_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn cancel_order(&self, _order_id: OrderId) -> Result<(), ActivityError> {
            self.cancel_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn request_delivery(
            &self,
            _order_id: OrderId,
        ) -> Result<merx_gateway::DeliveryTicket, ActivityError> {
            self.delivery_calls.fetch_add(1, Ordering::SeqCst);
            if self.delivery_fails {
                return Err(ActivityError::Failed {
                    activity: "request_delivery",
                    kind: ErrorKind::Unavailable,
                    message: "scripted failure".into(),
                });
            }
            Ok(merx_gateway::DeliveryTicket {
                package_id: "pkg-1".into(),
                status: merx_gateway::DispatchStatus::Accepted,
            })
        }
    }

    fn quick_options() -> ActivityOptions {
        ActivityOptions {
            start_to_close: Duration::from_secs(5),
            retry: RetryPolicy {
                initial_interval: Duration::from_millis(5),
                backoff_multiplier: 2.0,
                max_interval: Duration::from_millis(20),
                max_attempts: 3,
            },
        }
    }

    fn input(has_delivery: bool) -> OrderWorkflowInput {
        OrderWorkflowInput {
            order_id: OrderId::generate(),
            customer_id: CustomerId(Uuid::new_v4()),
            items: vec![OrderItem::new(GoodId::new("g1").unwrap(), 1, Decimal::TEN).unwrap()],
            has_delivery,
        }
    }

    #[tokio::test]
    async fn happy_path_with_delivery_completes() {
        let stub = Arc::new(StubActivities::default());
        let registry = WorkflowRegistry::new(stub.clone(), quick_options());

        let handle = registry.start_order_workflow(input(true)).unwrap();
        assert_eq!(handle.wait_terminal().await, WorkflowStatus::Completed);

        assert_eq!(stub.get_calls.load(Ordering::SeqCst), 1);
        assert_eq!(stub.reserve_calls.load(Ordering::SeqCst), 1);
        assert_eq!(stub.payment_calls.load(Ordering::SeqCst), 1);
        assert_eq!(stub.delivery_calls.load(Ordering::SeqCst), 1);
        assert_eq!(stub.cancel_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn delivery_step_is_skipped_without_delivery_info() {
        let stub = Arc::new(StubActivities::default());
        let registry = WorkflowRegistry::new(stub.clone(), quick_options());

        let handle = registry.start_order_workflow(input(false)).unwrap();
        assert_eq!(handle.wait_terminal().await, WorkflowStatus::Completed);
        assert_eq!(stub.delivery_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transient_reserve_failure_is_retried_to_success() {
        let stub = Arc::new(StubActivities {
            reserve_failures: 2,
            ..Default::default()
        });
        let registry = WorkflowRegistry::new(stub.clone(), quick_options());

        let handle = registry.start_order_workflow(input(false)).unwrap();
        assert_eq!(handle.wait_terminal().await, WorkflowStatus::Completed);
        assert_eq!(stub.reserve_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_and_compensate() {
        let stub = Arc::new(StubActivities {
            reserve_failures: u32::MAX,
            ..Default::default()
        });
        let registry = WorkflowRegistry::new(stub.clone(), quick_options());

        let handle = registry.start_order_workflow(input(false)).unwrap();
        assert_eq!(handle.wait_terminal().await, WorkflowStatus::Failed);

        assert_eq!(stub.reserve_calls.load(Ordering::SeqCst), 3);
        // Reserve never succeeded, so nothing to release; the order still
        // gets cancelled.
        assert_eq!(stub.release_calls.load(Ordering::SeqCst), 0);
        assert_eq!(stub.cancel_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn validation_failures_bypass_retry() {
        let stub = Arc::new(StubActivities {
            reserve_failures: u32::MAX,
            reserve_fail_kind: ErrorKind::InvalidInput,
            ..Default::default()
        });
        let registry = WorkflowRegistry::new(stub.clone(), quick_options());

        let handle = registry.start_order_workflow(input(false)).unwrap();
        assert_eq!(handle.wait_terminal().await, WorkflowStatus::Failed);
        assert_eq!(stub.reserve_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delivery_failure_unwinds_reserve_and_cancels() {
        let stub = Arc::new(StubActivities {
            delivery_fails: true,
            ..Default::default()
        });
        let registry = WorkflowRegistry::new(stub.clone(), quick_options());

        let handle = registry.start_order_workflow(input(true)).unwrap();
        assert_eq!(handle.wait_terminal().await, WorkflowStatus::Failed);

        assert_eq!(stub.delivery_calls.load(Ordering::SeqCst), 3);
        assert_eq!(stub.release_calls.load(Ordering::SeqCst), 1);
        assert_eq!(stub.cancel_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_signal_flips_state_and_runs_the_cancel_activity() {
        let stub = Arc::new(StubActivities {
            reserve_delay: Duration::from_secs(30),
            ..Default::default()
        });
        let registry = WorkflowRegistry::new(stub.clone(), quick_options());

        let handle = registry.start_order_workflow(input(false)).unwrap();
        // Let the saga reach the slow reserve step.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.status(), WorkflowStatus::Processing);

        handle.signal_cancel("customer-request").unwrap();
        assert_eq!(handle.wait_terminal().await, WorkflowStatus::Cancelled);
        assert!(stub.cancel_calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn complete_signal_is_advisory_only() {
        let stub = Arc::new(StubActivities {
            reserve_delay: Duration::from_millis(100),
            ..Default::default()
        });
        let registry = WorkflowRegistry::new(stub.clone(), quick_options());

        let handle = registry.start_order_workflow(input(false)).unwrap();
        handle.signal_complete().unwrap();
        // The advisory signal does not terminate anything; the saga does.
        assert_eq!(handle.wait_terminal().await, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn at_most_one_running_instance_per_id() {
        let stub = Arc::new(StubActivities {
            reserve_delay: Duration::from_secs(30),
            ..Default::default()
        });
        let registry = WorkflowRegistry::new(stub.clone(), quick_options());

        let first_input = input(false);
        let handle = registry.start_order_workflow(first_input.clone()).unwrap();
        let err = registry.start_order_workflow(first_input).unwrap_err();
        assert!(matches!(err, WorkflowError::AlreadyRunning(_)));

        handle.signal_cancel("test").unwrap();
        handle.wait_terminal().await;
        assert_eq!(registry.instance_count(), 1);
    }
}
