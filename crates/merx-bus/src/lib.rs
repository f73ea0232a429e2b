#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **merx-bus** – In-process event plumbing for the Merx core.
//!
//! Two delivery mechanisms over the same [`DomainEvent`] type:
//!
//! - [`EventBus`] / [`InMemoryBus`]: lightweight broadcast of committed
//!   events to any number of passive observers. Slow observers may miss
//!   events; nothing in the core depends on observing the stream.
//! - [`EventDispatcher`]: post-commit dispatch to registered
//!   [`EventHandler`]s keyed by event kind. Handlers run sequentially in
//!   publication order; the first handler error is collected and returned
//!   to the caller for logging, but by then the aggregate state is already
//!   committed, so dispatch failures never abort anything.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::warn;

use merx_domain::DomainEvent;

//─────────────────────────────
//  Broadcast bus
//─────────────────────────────

/// Broadcast abstraction for committed domain events.
///
/// Implementations must be thread-safe and support multiple subscribers.
/// Publishing should complete quickly and never block the caller; if
/// subscribers fall behind, the bus may drop events.
pub trait EventBus: Send + Sync {
    /// Publish an event to all subscribers.
    fn publish(&self, event: &DomainEvent) -> Result<()>;

    /// Subscribe to the live event stream.
    fn subscribe(&self) -> broadcast::Receiver<DomainEvent>;
}

/// Simple in-memory, broadcast-only event bus using Tokio channels.
#[derive(Debug, Clone)]
pub struct InMemoryBus {
    tx: Arc<broadcast::Sender<DomainEvent>>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl InMemoryBus {
    /// Create a bus with the given ring buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx: Arc::new(tx) }
    }

    /// Current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventBus for InMemoryBus {
    fn publish(&self, event: &DomainEvent) -> Result<()> {
        // Lagging receivers must handle missed events themselves.
        let _ = self.tx.send(event.clone());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }
}

//─────────────────────────────
//  Typed post-commit dispatch
//─────────────────────────────

/// A handler invoked for the event kinds it declares interest in.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Event kind tags this handler wants (see `merx_domain::event::kind`).
    fn kinds(&self) -> &[&'static str];

    /// React to one event. Runs after the emitting transaction committed.
    async fn handle(&self, event: &DomainEvent) -> Result<()>;
}

/// Dispatch table from event kind to the handlers registered for it.
///
/// Dispatch is sequential and in publication order so that a subscriber
/// observing `order.created` then `order.cancelled` sees them in the order
/// the aggregate emitted them.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: RwLock<HashMap<&'static str, Vec<Arc<dyn EventHandler>>>>,
}

impl EventDispatcher {
    /// An empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for every kind it declares.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut table = self.handlers.write().await;
        for kind in handler.kinds() {
            table.entry(*kind).or_default().push(Arc::clone(&handler));
        }
    }

    /// Dispatch a batch of committed events to their handlers.
    ///
    /// Every handler runs even when an earlier one fails; the first error
    /// wins and is returned so the caller can log it. The events are
    /// already durable, so the error is informational only.
    pub async fn dispatch(&self, events: &[DomainEvent]) -> Result<()> {
        let mut first_error: Option<anyhow::Error> = None;
        for event in events {
            let handlers = {
                let table = self.handlers.read().await;
                table.get(event.kind()).cloned().unwrap_or_default()
            };
            for handler in handlers {
                if let Err(err) = handler.handle(event).await {
                    warn!(kind = event.kind(), subject = %event.subject(), error = %err,
                        "event handler failed");
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Number of handler registrations for a kind. Mostly for tests.
    pub async fn handler_count(&self, kind: &str) -> usize {
        self.handlers
            .read()
            .await
            .get(kind)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

//─────────────────────────────
//  Error types
//─────────────────────────────

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Event could not be published.
    #[error("failed to publish event: {0}")]
    PublishFailed(String),
    /// Subscription failed.
    #[error("failed to create subscription: {0}")]
    SubscriptionFailed(String),
}
