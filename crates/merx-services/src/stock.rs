//! Stock-change ingest.
//!
//! Stock state lives elsewhere; this core only reacts to depletion. When
//! a good's quantity drops to zero, every cart holding it (per the
//! reverse index) sheds the good through the normal remove path, and the
//! affected customers are notified fire-and-forget. Per-customer failures
//! are isolated: one broken cart never blocks the sweep.

use std::sync::Arc;

use tracing::{info, warn};

use merx_domain::GoodId;
use merx_gateway::Notifier;
use merx_index::CartIndex;

use crate::cart::{CartService, ItemRemoval};
use crate::ServiceResult;

/// Inbound `StockChanged` handler.
pub struct StockChangeHandler {
    index: Arc<dyn CartIndex>,
    carts: Arc<CartService>,
    notifier: Arc<dyn Notifier>,
}

impl StockChangeHandler {
    /// Wire the handler against its collaborators.
    pub fn new(
        index: Arc<dyn CartIndex>,
        carts: Arc<CartService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            index,
            carts,
            notifier,
        }
    }

    /// React to a stock level change. Only depletion (zero) acts.
    pub async fn on_stock_changed(&self, good: GoodId, new_quantity: i64) -> ServiceResult<()> {
        if new_quantity != 0 {
            return Ok(());
        }

        let customers = match self.index.customers_with_good(&good).await {
            Ok(customers) => customers,
            Err(err) => {
                // The index is best-effort; without it there is nothing
                // to sweep.
                warn!(%good, error = %err, "index lookup failed during stock sweep");
                return Ok(());
            }
        };
        info!(%good, affected = customers.len(), "sweeping depleted good from carts");

        for customer in customers {
            let removal = ItemRemoval::all(good.clone());
            if let Err(err) = self.carts.remove_items(customer, vec![removal]).await {
                warn!(%good, %customer, error = %err,
                    "failed to remove depleted good from cart");
                continue;
            }
            if let Err(err) = self.notifier.stock_depleted(customer, &good).await {
                warn!(%good, %customer, error = %err, "stock depletion notification failed");
            }
        }
        Ok(())
    }
}
