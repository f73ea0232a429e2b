//! Schema migrations, run at pool construction.

use sqlx::SqlitePool;

use crate::StoreError;

/// Create the schema when missing and the supporting indexes.
pub(crate) async fn run(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS carts (
            customer_id TEXT PRIMARY KEY,
            version INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        ) STRICT
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cart_items (
            cart_id TEXT NOT NULL REFERENCES carts(customer_id),
            good_id TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            unit_price TEXT NOT NULL,
            discount TEXT NOT NULL,
            tax TEXT NOT NULL,
            PRIMARY KEY (cart_id, good_id)
        ) STRICT
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            customer_id TEXT NOT NULL,
            status INTEGER NOT NULL,
            version INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        ) STRICT
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS order_items (
            order_id TEXT NOT NULL REFERENCES orders(id),
            good_id TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            price TEXT NOT NULL
        ) STRICT
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS order_delivery_info (
            order_id TEXT PRIMARY KEY REFERENCES orders(id),
            pickup_street TEXT NOT NULL,
            pickup_city TEXT NOT NULL,
            pickup_country TEXT NOT NULL,
            pickup_lat REAL NOT NULL,
            pickup_lon REAL NOT NULL,
            dest_street TEXT NOT NULL,
            dest_city TEXT NOT NULL,
            dest_country TEXT NOT NULL,
            dest_lat REAL NOT NULL,
            dest_lon REAL NOT NULL,
            period_start TEXT NOT NULL,
            period_end TEXT NOT NULL,
            weight_kg TEXT NOT NULL,
            priority TEXT NOT NULL,
            stage TEXT NOT NULL,
            package_id TEXT,
            contact_name TEXT,
            contact_phone TEXT,
            contact_email TEXT
        ) STRICT
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS outbox (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            subject TEXT NOT NULL,
            payload TEXT NOT NULL,
            occurred_at TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        ) STRICT
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_customer ON orders(customer_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_created_at ON orders(created_at)")
        .execute(pool)
        .await?;

    Ok(())
}
