//! Cart aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{DomainEvent, EventPayload};
use crate::{CustomerId, DomainError, GoodId, Item};

/// Cart aggregate root, keyed by customer.
///
/// Invariants: at most one item per good (adds merge quantities), all
/// quantities strictly positive. A cart is created on first write and never
/// deleted; `reset` empties the item list and the next save bumps the
/// version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    customer_id: CustomerId,
    version: u64,
    items: Vec<Item>,
    #[serde(skip)]
    pending_events: Vec<DomainEvent>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Cart {
    /// A fresh, never-persisted cart (version 0).
    pub fn new(customer_id: CustomerId) -> Self {
        let now = Utc::now();
        Self {
            customer_id,
            version: 0,
            items: Vec::new(),
            pending_events: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuild a cart from persisted state. Used by the store only.
    pub fn reconstitute(
        customer_id: CustomerId,
        version: u64,
        items: Vec<Item>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            customer_id,
            version,
            items,
            pending_events: Vec::new(),
            created_at,
            updated_at,
        }
    }

    /// Owner of the cart.
    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    /// Persisted version; 0 means the cart has never been saved.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Overwrite the version after a successful save. Store use only.
    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Items in insertion order.
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Whether the cart holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last mutation timestamp.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Add an item, merging quantities when the good is already present.
    ///
    /// Emits `ItemAdded` carrying the added item (the delta).
    pub fn add_item(&mut self, item: Item) -> Result<(), DomainError> {
        match self.items.iter_mut().find(|i| i.good_id() == item.good_id()) {
            Some(existing) => {
                let merged = existing.merged(item.quantity())?;
                *existing = merged;
            }
            None => self.items.push(item.clone()),
        }
        self.record(EventPayload::ItemAdded {
            customer: self.customer_id,
            item,
        });
        Ok(())
    }

    /// Remove up to `quantity` units of a good; the line is deleted when it
    /// reaches zero. Removing a good that is not in the cart is a no-op.
    pub fn remove_item(&mut self, good_id: &GoodId, quantity: i32) -> Result<(), DomainError> {
        if quantity <= 0 {
            return Err(DomainError::NonPositiveQuantity(quantity));
        }
        let Some(position) = self.items.iter().position(|i| i.good_id() == good_id) else {
            return Ok(());
        };
        let existing = self.items[position].clone();
        let removed = existing.quantity().min(quantity);
        if existing.quantity() > quantity {
            self.items[position] = existing.with_quantity(existing.quantity() - quantity)?;
        } else {
            self.items.remove(position);
        }
        self.record(EventPayload::ItemRemoved {
            customer: self.customer_id,
            good_id: good_id.clone(),
            quantity: removed,
        });
        Ok(())
    }

    /// Empty the cart. Emits `CartReset`.
    pub fn reset(&mut self) {
        self.items.clear();
        self.record(EventPayload::CartReset {
            customer: self.customer_id,
        });
    }

    /// Events recorded since the last drain, in append order.
    pub fn pending_events(&self) -> &[DomainEvent] {
        &self.pending_events
    }

    /// Take the pending events, leaving the list empty.
    pub fn drain_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.pending_events)
    }

    fn record(&mut self, payload: EventPayload) {
        self.updated_at = Utc::now();
        self.pending_events.push(DomainEvent::new(payload));
    }
}
