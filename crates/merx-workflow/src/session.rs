//! Per-customer cart session workflow.
//!
//! A session hosts an idle timer for one customer's cart. Signals re-enter
//! the cart handlers and re-arm the timer; when the cart sits untouched
//! for the whole idle window, the session resets it and ends. Sessions are
//! not on the order critical path - they exist purely for cart TTL.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{info, warn};

use merx_domain::{CustomerId, Item};
use merx_services::{CartService, ItemRemoval};

use crate::WorkflowError;

/// Signal buffer per session.
const SIGNAL_BUFFER: usize = 16;

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long the cart may sit untouched before it is reset.
    pub idle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Signals a session accepts.
#[derive(Debug)]
pub enum SessionSignal {
    /// Add items to the cart.
    Add(Vec<Item>),
    /// Remove units of goods from the cart.
    Remove(Vec<ItemRemoval>),
    /// Empty the cart now.
    Reset,
}

/// Handle to a running cart session.
pub struct CartSessionHandle {
    customer: CustomerId,
    signal_tx: mpsc::Sender<SessionSignal>,
    done_rx: watch::Receiver<bool>,
}

impl CartSessionHandle {
    /// The customer this session belongs to.
    pub fn customer(&self) -> CustomerId {
        self.customer
    }

    /// Queue a signal. Never blocks.
    pub fn signal(&self, signal: SessionSignal) -> Result<(), WorkflowError> {
        self.signal_tx
            .try_send(signal)
            .map_err(|_| WorkflowError::SignalRejected(format!("session-{}", self.customer)))
    }

    /// Whether the session has ended.
    pub fn is_finished(&self) -> bool {
        *self.done_rx.borrow()
    }

    /// Wait for the session to end.
    pub async fn wait_finished(&self) {
        let mut rx = self.done_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Start a session workflow for one customer's cart.
pub fn start_cart_session(
    carts: Arc<CartService>,
    customer: CustomerId,
    config: SessionConfig,
) -> CartSessionHandle {
    let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER);
    let (done_tx, done_rx) = watch::channel(false);

    tokio::spawn(run_session(carts, customer, config, signal_rx, done_tx));
    CartSessionHandle {
        customer,
        signal_tx,
        done_rx,
    }
}

async fn run_session(
    carts: Arc<CartService>,
    customer: CustomerId,
    config: SessionConfig,
    mut signal_rx: mpsc::Receiver<SessionSignal>,
    done_tx: watch::Sender<bool>,
) {
    info!(%customer, idle = ?config.idle_timeout, "cart session started");
    let mut deadline = Instant::now() + config.idle_timeout;

    loop {
        tokio::select! {
            signal = signal_rx.recv() => match signal {
                Some(signal) => {
                    apply_signal(&carts, customer, signal).await;
                    deadline = Instant::now() + config.idle_timeout;
                }
                // Every handle dropped: nobody can touch the session
                // anymore, let the timer run out on its own.
                None => {
                    tokio::time::sleep_until(deadline).await;
                    expire(&carts, customer).await;
                    break;
                }
            },
            _ = tokio::time::sleep_until(deadline) => {
                expire(&carts, customer).await;
                break;
            }
        }
    }
    let _ = done_tx.send(true);
}

async fn apply_signal(carts: &CartService, customer: CustomerId, signal: SessionSignal) {
    let outcome = match signal {
        SessionSignal::Add(items) => carts.add_items(customer, items).await.map(|_| ()),
        SessionSignal::Remove(removals) => {
            carts.remove_items(customer, removals).await.map(|_| ())
        }
        SessionSignal::Reset => carts.reset(customer).await.map(|_| ()),
    };
    if let Err(err) = outcome {
        warn!(%customer, error = %err, "cart session signal failed");
    }
}

async fn expire(carts: &CartService, customer: CustomerId) {
    info!(%customer, "cart session expired, resetting cart");
    if let Err(err) = carts.reset(customer).await {
        warn!(%customer, error = %err, "session expiry reset failed");
    }
}
