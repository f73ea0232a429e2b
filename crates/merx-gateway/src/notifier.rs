//! Notification sink contract.

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use merx_domain::{CustomerId, GoodId};

/// Fire-and-forget notification sink.
///
/// Callers never fail over a notifier error; the absence of any
/// subscriber on the other side is not an error either.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Tell a customer that a good in their cart ran out of stock.
    async fn stock_depleted(&self, customer: CustomerId, good: &GoodId) -> Result<()>;
}

/// A notifier that swallows every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn stock_depleted(&self, customer: CustomerId, good: &GoodId) -> Result<()> {
        debug!(%customer, %good, "stock depleted notification dropped (no sink)");
        Ok(())
    }
}
