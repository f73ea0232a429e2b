//! The order saga: forward steps and their compensations.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use merx_domain::OrderId;

use crate::activities::{ActivityError, OrderActivities};
use crate::order::OrderWorkflowInput;
use crate::retry::{run_activity, ActivityOptions};

/// Compensations accumulated as forward steps succeed, unwound LIFO.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Compensation {
    ReleaseStock,
}

/// Drive the saga to completion or compensated failure.
///
/// Step 1 (create) is observational: the order was persisted before the
/// workflow started. A failure with the cancellation marker skips
/// compensation entirely - already-run steps stay in place and the
/// workflow's cancel path owns the cleanup.
pub(crate) async fn run_order_saga(
    activities: Arc<dyn OrderActivities>,
    input: OrderWorkflowInput,
    options: ActivityOptions,
    cancel: CancellationToken,
) -> Result<(), ActivityError> {
    let order_id = input.order_id;
    let mut compensations: Vec<Compensation> = Vec::new();

    // Step 1 - create (observational).
    let step = {
        let activities = Arc::clone(&activities);
        run_activity("get_order", &options, &cancel, move || {
            let activities = Arc::clone(&activities);
            async move { activities.get_order(order_id).await.map(|_| ()) }
        })
        .await
    };
    if let Err(err) = step {
        return fail(&activities, &options, order_id, &compensations, err).await;
    }

    // Step 2 - reserve stock. Compensation: release.
    let step = {
        let activities = Arc::clone(&activities);
        run_activity("reserve_stock", &options, &cancel, move || {
            let activities = Arc::clone(&activities);
            async move { activities.reserve_stock(order_id).await }
        })
        .await
    };
    if let Err(err) = step {
        return fail(&activities, &options, order_id, &compensations, err).await;
    }
    compensations.push(Compensation::ReleaseStock);

    // Step 3 - process payment.
    let step = {
        let activities = Arc::clone(&activities);
        run_activity("process_payment", &options, &cancel, move || {
            let activities = Arc::clone(&activities);
            async move { activities.process_payment(order_id).await }
        })
        .await
    };
    if let Err(err) = step {
        return fail(&activities, &options, order_id, &compensations, err).await;
    }

    // Step 4 - request delivery, only when the order carries delivery info.
    if input.has_delivery {
        let step = {
            let activities = Arc::clone(&activities);
            run_activity("request_delivery", &options, &cancel, move || {
                let activities = Arc::clone(&activities);
                async move { activities.request_delivery(order_id).await.map(|_| ()) }
            })
            .await
        };
        if let Err(err) = step {
            return fail(&activities, &options, order_id, &compensations, err).await;
        }
    }

    // Step 5 - complete.
    info!(order = %order_id, "order saga completed");
    Ok(())
}

/// Unwind the compensation stack, cancel the order, propagate the error.
async fn fail(
    activities: &Arc<dyn OrderActivities>,
    options: &ActivityOptions,
    order_id: OrderId,
    compensations: &[Compensation],
    err: ActivityError,
) -> Result<(), ActivityError> {
    if err.is_cancelled() {
        // Signal-driven cancellation: the workflow's cancel path owns the
        // cleanup; nothing is unwound here.
        return Err(err);
    }
    warn!(order = %order_id, error = %err, "order saga failed, compensating");

    // Compensations run on a fresh token: a failed saga must still be
    // able to unwind.
    let token = CancellationToken::new();
    for compensation in compensations.iter().rev() {
        let outcome = match compensation {
            Compensation::ReleaseStock => {
                let activities = Arc::clone(activities);
                run_activity("release_stock", options, &token, move || {
                    let activities = Arc::clone(&activities);
                    async move { activities.release_stock(order_id).await }
                })
                .await
            }
        };
        if let Err(comp_err) = outcome {
            warn!(order = %order_id, compensation = ?compensation, error = %comp_err,
                "compensation failed");
        }
    }

    let cancel_outcome = {
        let activities = Arc::clone(activities);
        run_activity("cancel_order", options, &token, move || {
            let activities = Arc::clone(&activities);
            async move { activities.cancel_order(order_id).await }
        })
        .await
    };
    if let Err(cancel_err) = cancel_outcome {
        warn!(order = %order_id, error = %cancel_err, "cancel compensation failed");
    }

    Err(err)
}
