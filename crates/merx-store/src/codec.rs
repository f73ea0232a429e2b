//! Shared row-decoding helpers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

use crate::StoreError;

/// Parse an RFC 3339 timestamp column.
pub(crate) fn parse_timestamp(
    table: &'static str,
    value: String,
) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            table,
            detail: format!("timestamp {value}: {e}"),
        })
}

/// Parse a decimal column stored as text.
pub(crate) fn parse_decimal(value: &str) -> Result<Decimal, String> {
    Decimal::from_str(value).map_err(|e| e.to_string())
}

/// Parse a UUID column stored as text.
pub(crate) fn parse_uuid(table: &'static str, value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|e| StoreError::Corrupt {
        table,
        detail: format!("uuid {value}: {e}"),
    })
}

/// Whether the backend rejected a write over a uniqueness constraint.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}
