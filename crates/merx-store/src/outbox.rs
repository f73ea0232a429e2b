//! Transactional outbox.
//!
//! Events are published by inserting rows into the `outbox` table using
//! the caller's transaction, making event enqueue atomic with the
//! aggregate save. A platform-owned forwarder drains the table to the
//! downstream bus; nothing in this core reads it back except tests.

use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use merx_domain::DomainEvent;

use crate::codec::{parse_timestamp, parse_uuid};
use crate::context::OpContext;
use crate::StoreError;

/// Writes domain events into the same-database outbox table.
#[derive(Debug, Default)]
pub struct OutboxPublisher;

impl OutboxPublisher {
    pub(crate) fn new() -> Self {
        Self
    }

    /// Insert one event row in the context's transaction.
    pub async fn publish(&self, ctx: &OpContext, event: &DomainEvent) -> Result<(), StoreError> {
        let uow = ctx.uow()?;
        let payload = serde_json::to_string(&event.payload)?;

        let mut guard = uow.tx.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        sqlx::query(
            "INSERT INTO outbox (id, kind, subject, payload, occurred_at, recorded_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(event.id.to_string())
        .bind(event.kind())
        .bind(event.subject())
        .bind(payload)
        .bind(event.occurred_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Insert a batch of event rows, preserving order.
    pub async fn publish_all(
        &self,
        ctx: &OpContext,
        events: &[DomainEvent],
    ) -> Result<(), StoreError> {
        for event in events {
            self.publish(ctx, event).await?;
        }
        Ok(())
    }

    /// Read back pending rows in insertion order. Forwarder/test surface.
    pub async fn pending(&self, ctx: &OpContext) -> Result<Vec<OutboxRecord>, StoreError> {
        let uow = ctx.uow()?;
        let mut guard = uow.tx.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        let rows = sqlx::query(
            "SELECT id, kind, subject, payload, occurred_at, recorded_at \
             FROM outbox ORDER BY rowid",
        )
        .fetch_all(&mut **tx)
        .await?;
        drop(guard);

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id_text: String = row.get("id");
            records.push(OutboxRecord {
                id: parse_uuid("outbox", &id_text)?,
                kind: row.get("kind"),
                subject: row.get("subject"),
                payload: row.get("payload"),
                occurred_at: parse_timestamp("outbox", row.get("occurred_at"))?,
                recorded_at: parse_timestamp("outbox", row.get("recorded_at"))?,
            });
        }
        Ok(records)
    }
}

/// One persisted outbox row.
#[derive(Debug, Clone)]
pub struct OutboxRecord {
    /// Event identifier.
    pub id: Uuid,
    /// Stable event kind tag.
    pub kind: String,
    /// Aggregate the event is about.
    pub subject: String,
    /// JSON-encoded event payload.
    pub payload: String,
    /// When the event occurred.
    pub occurred_at: chrono::DateTime<Utc>,
    /// When the row was written.
    pub recorded_at: chrono::DateTime<Utc>,
}
