//! Order aggregate store and its query surface.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::warn;

use merx_domain::{
    Address, CustomerId, DeliveryInfo, DeliveryPeriod, DeliveryPriority, DeliveryStage, Order,
    OrderId, OrderItem, OrderStatus, PackageInfo, RecipientContacts,
};

use crate::cache::{AggregateCache, CacheConfig};
use crate::codec::{is_unique_violation, parse_decimal, parse_timestamp, parse_uuid};
use crate::context::OpContext;
use crate::StoreError;

//─────────────────────────────
//  Query types
//─────────────────────────────

/// Combined filter for the paginated order listing.
#[derive(Debug, Clone)]
pub struct OrderFilter {
    /// Restrict to one customer.
    pub customer: Option<CustomerId>,
    /// Restrict to a set of statuses; empty means all.
    pub statuses: Vec<OrderStatus>,
    /// 1-based page number.
    pub page: u32,
    /// Rows per page.
    pub page_size: u32,
}

impl Default for OrderFilter {
    fn default() -> Self {
        Self {
            customer: None,
            statuses: Vec::new(),
            page: 1,
            page_size: 20,
        }
    }
}

/// One page of the order listing plus the total row count.
#[derive(Debug)]
pub struct OrderPage {
    /// Orders on this page, newest first.
    pub orders: Vec<Order>,
    /// Total matching rows across all pages.
    pub total: u64,
    /// The page that was fetched (1-based).
    pub page: u32,
    /// Rows per page used for the fetch.
    pub page_size: u32,
}

impl OrderPage {
    /// Number of pages needed for `total` rows at this page size.
    pub fn total_pages(&self) -> u64 {
        let size = u64::from(self.page_size.max(1));
        self.total.div_ceil(size)
    }
}

//─────────────────────────────
//  Store
//─────────────────────────────

/// Load/save access to the order aggregate, plus listing queries.
#[derive(Debug)]
pub struct OrderStore {
    cache: AggregateCache<OrderId, Order>,
}

impl OrderStore {
    pub(crate) fn new(cache: CacheConfig) -> Self {
        Self {
            cache: AggregateCache::new(cache),
        }
    }

    /// Load an order, or `None` when it does not exist.
    pub async fn load(&self, ctx: &OpContext, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let uow = ctx.uow()?;
        if let Some(order) = self.cache.get(&order_id) {
            return Ok(Some(order));
        }

        let mut guard = uow.tx.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        let id = order_id.to_string();

        let Some(row) = sqlx::query(
            "SELECT id, customer_id, status, version, created_at, updated_at \
             FROM orders WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&mut **tx)
        .await?
        else {
            return Ok(None);
        };

        let order = hydrate(&mut **tx, &row).await?;
        drop(guard);

        self.cache.insert(order_id, order.clone());
        Ok(Some(order))
    }

    /// Load an order, failing with `NotFound` when absent.
    pub async fn get(&self, ctx: &OpContext, order_id: OrderId) -> Result<Order, StoreError> {
        self.load(ctx, order_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                aggregate: "order",
                id: order_id.to_string(),
            })
    }

    /// Persist an order under the optimistic-concurrency protocol.
    ///
    /// Same shape as the cart save: fresh aggregates insert at version 1,
    /// existing ones bump conditionally, and item plus delivery rows are
    /// replaced wholesale in the same transaction.
    pub async fn save(&self, ctx: &OpContext, order: &mut Order) -> Result<(), StoreError> {
        let uow = ctx.uow()?;
        let mut guard = uow.tx.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;

        let id = order.order_id().to_string();
        let now = Utc::now().to_rfc3339();

        let next_version = if order.version() == 0 {
            let inserted = sqlx::query(
                "INSERT INTO orders (id, customer_id, status, version, created_at, updated_at) \
                 VALUES (?, ?, ?, 1, ?, ?)",
            )
            .bind(id.as_str())
            .bind(order.customer_id().to_string())
            .bind(order.status().as_int())
            .bind(order.created_at().to_rfc3339())
            .bind(now.as_str())
            .execute(&mut **tx)
            .await;
            match inserted {
                Ok(_) => 1,
                Err(err) if is_unique_violation(&err) => {
                    return Err(StoreError::VersionConflict {
                        aggregate: "order",
                        id,
                        expected: 0,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        } else {
            let updated = sqlx::query(
                "UPDATE orders SET version = version + 1, status = ?, updated_at = ? \
                 WHERE id = ? AND version = ?",
            )
            .bind(order.status().as_int())
            .bind(now.as_str())
            .bind(id.as_str())
            .bind(order.version() as i64)
            .execute(&mut **tx)
            .await?;
            if updated.rows_affected() == 0 {
                return Err(StoreError::VersionConflict {
                    aggregate: "order",
                    id,
                    expected: order.version(),
                });
            }
            order.version() + 1
        };

        sqlx::query("DELETE FROM order_items WHERE order_id = ?")
            .bind(id.as_str())
            .execute(&mut **tx)
            .await?;
        for item in order.items() {
            sqlx::query(
                "INSERT INTO order_items (order_id, good_id, quantity, price) VALUES (?, ?, ?, ?)",
            )
            .bind(id.as_str())
            .bind(item.good_id.as_str())
            .bind(i64::from(item.quantity))
            .bind(item.price.to_string())
            .execute(&mut **tx)
            .await?;
        }

        sqlx::query("DELETE FROM order_delivery_info WHERE order_id = ?")
            .bind(id.as_str())
            .execute(&mut **tx)
            .await?;
        if let Some(info) = order.delivery_info() {
            sqlx::query(
                "INSERT INTO order_delivery_info (\
                 order_id, pickup_street, pickup_city, pickup_country, pickup_lat, pickup_lon, \
                 dest_street, dest_city, dest_country, dest_lat, dest_lon, \
                 period_start, period_end, weight_kg, priority, stage, package_id, \
                 contact_name, contact_phone, contact_email) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(id.as_str())
            .bind(info.pickup.street())
            .bind(info.pickup.city())
            .bind(info.pickup.country())
            .bind(info.pickup.latitude())
            .bind(info.pickup.longitude())
            .bind(info.destination.street())
            .bind(info.destination.city())
            .bind(info.destination.country())
            .bind(info.destination.latitude())
            .bind(info.destination.longitude())
            .bind(info.period.start.to_rfc3339())
            .bind(info.period.end.to_rfc3339())
            .bind(info.package.weight_kg().to_string())
            .bind(info.priority.as_str())
            .bind(info.stage.as_str())
            .bind(info.package_id.as_deref())
            .bind(info.contacts.as_ref().map(|c| c.name.clone()))
            .bind(info.contacts.as_ref().and_then(|c| c.phone.clone()))
            .bind(info.contacts.as_ref().and_then(|c| c.email.clone()))
            .execute(&mut **tx)
            .await?;
        }
        drop(guard);

        order.set_version(next_version);
        self.cache.invalidate(&order.order_id());
        Ok(())
    }

    /// Paginated listing with combined filters, newest first, plus the
    /// total matching count.
    pub async fn list(&self, ctx: &OpContext, filter: &OrderFilter) -> Result<OrderPage, StoreError> {
        let uow = ctx.uow()?;
        let page = filter.page.max(1);
        let page_size = filter.page_size.max(1);

        let mut guard = uow.tx.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;

        let mut count_query = QueryBuilder::new("SELECT COUNT(*) AS count FROM orders");
        push_filters(&mut count_query, filter);
        let total: i64 = count_query
            .build()
            .fetch_one(&mut **tx)
            .await?
            .get("count");

        let offset = i64::from(page - 1) * i64::from(page_size);
        let orders = self
            .fetch_filtered(&mut **tx, filter, Some((i64::from(page_size), offset)))
            .await?;
        drop(guard);

        Ok(OrderPage {
            orders,
            total: total as u64,
            page,
            page_size,
        })
    }

    /// All orders of one customer, newest first.
    pub async fn list_by_customer(
        &self,
        ctx: &OpContext,
        customer: CustomerId,
    ) -> Result<Vec<Order>, StoreError> {
        let filter = OrderFilter {
            customer: Some(customer),
            ..Default::default()
        };
        self.list_unpaged(ctx, &filter).await
    }

    /// All orders in one status, newest first.
    pub async fn list_by_status(
        &self,
        ctx: &OpContext,
        status: OrderStatus,
    ) -> Result<Vec<Order>, StoreError> {
        let filter = OrderFilter {
            statuses: vec![status],
            ..Default::default()
        };
        self.list_unpaged(ctx, &filter).await
    }

    async fn list_unpaged(
        &self,
        ctx: &OpContext,
        filter: &OrderFilter,
    ) -> Result<Vec<Order>, StoreError> {
        let uow = ctx.uow()?;
        let mut guard = uow.tx.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;
        let orders = self.fetch_filtered(&mut **tx, filter, None).await?;
        drop(guard);
        Ok(orders)
    }

    async fn fetch_filtered(
        &self,
        conn: &mut sqlx::SqliteConnection,
        filter: &OrderFilter,
        paging: Option<(i64, i64)>,
    ) -> Result<Vec<Order>, StoreError> {
        let mut query = QueryBuilder::new(
            "SELECT id, customer_id, status, version, created_at, updated_at FROM orders",
        );
        push_filters(&mut query, filter);
        query.push(" ORDER BY created_at DESC, id");
        if let Some((limit, offset)) = paging {
            query.push(" LIMIT ");
            query.push_bind(limit);
            query.push(" OFFSET ");
            query.push_bind(offset);
        }
        let rows = query.build().fetch_all(&mut *conn).await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            orders.push(hydrate(&mut *conn, row).await?);
        }
        Ok(orders)
    }
}

fn push_filters(query: &mut QueryBuilder<'_, Sqlite>, filter: &OrderFilter) {
    let mut has_where = false;
    if let Some(customer) = filter.customer {
        query.push(" WHERE customer_id = ");
        query.push_bind(customer.to_string());
        has_where = true;
    }
    if !filter.statuses.is_empty() {
        query.push(if has_where { " AND " } else { " WHERE " });
        query.push("status IN (");
        {
            let mut separated = query.separated(", ");
            for status in &filter.statuses {
                separated.push_bind(status.as_int());
            }
        }
        query.push(")");
    }
}

async fn hydrate(conn: &mut sqlx::SqliteConnection, row: &SqliteRow) -> Result<Order, StoreError> {
    let id_text: String = row.get("id");
    let order_id = OrderId(parse_uuid("orders", &id_text)?);
    let customer_text: String = row.get("customer_id");
    let customer = CustomerId(parse_uuid("orders", &customer_text)?);
    let status_int: i64 = row.get("status");
    let status = OrderStatus::from_int(status_int).ok_or(StoreError::Corrupt {
        table: "orders",
        detail: format!("status {status_int}"),
    })?;
    let version: i64 = row.get("version");
    let created_at = parse_timestamp("orders", row.get("created_at"))?;
    let updated_at = parse_timestamp("orders", row.get("updated_at"))?;

    let items = read_items(conn, &id_text).await?;
    let delivery_info = read_delivery(conn, &id_text).await?;

    Ok(Order::reconstitute(
        order_id,
        customer,
        items,
        status,
        version as u64,
        delivery_info,
        created_at,
        updated_at,
    ))
}

async fn read_items(
    conn: &mut sqlx::SqliteConnection,
    order_id: &str,
) -> Result<Vec<OrderItem>, StoreError> {
    let rows = sqlx::query(
        "SELECT good_id, quantity, price FROM order_items WHERE order_id = ? ORDER BY rowid",
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let good_id: String = row.get("good_id");
        let quantity: i64 = row.get("quantity");
        let price_text: String = row.get("price");
        let reconstructed = merx_domain::GoodId::new(good_id.as_str())
            .map_err(|e| e.to_string())
            .and_then(|good| {
                let quantity = i32::try_from(quantity).map_err(|e| e.to_string())?;
                let price = parse_decimal(&price_text)?;
                OrderItem::new(good, quantity, price).map_err(|e| e.to_string())
            });
        match reconstructed {
            Ok(item) => items.push(item),
            Err(err) => {
                warn!(order_id, good_id = %good_id, error = %err, "skipping invalid order item row");
            }
        }
    }
    Ok(items)
}

async fn read_delivery(
    conn: &mut sqlx::SqliteConnection,
    order_id: &str,
) -> Result<Option<DeliveryInfo>, StoreError> {
    let Some(row) = sqlx::query(
        "SELECT pickup_street, pickup_city, pickup_country, pickup_lat, pickup_lon, \
         dest_street, dest_city, dest_country, dest_lat, dest_lon, \
         period_start, period_end, weight_kg, priority, stage, package_id, \
         contact_name, contact_phone, contact_email \
         FROM order_delivery_info WHERE order_id = ?",
    )
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?
    else {
        return Ok(None);
    };

    match build_delivery(&row) {
        Ok(info) => Ok(Some(info)),
        Err(err) => {
            warn!(order_id, error = %err, "skipping invalid delivery info row");
            Ok(None)
        }
    }
}

fn build_delivery(row: &SqliteRow) -> Result<DeliveryInfo, String> {
    let pickup = Address::new(
        row.get::<String, _>("pickup_street"),
        row.get::<String, _>("pickup_city"),
        row.get::<String, _>("pickup_country"),
        row.get::<f64, _>("pickup_lat"),
        row.get::<f64, _>("pickup_lon"),
    )
    .map_err(|e| e.to_string())?;
    let destination = Address::new(
        row.get::<String, _>("dest_street"),
        row.get::<String, _>("dest_city"),
        row.get::<String, _>("dest_country"),
        row.get::<f64, _>("dest_lat"),
        row.get::<f64, _>("dest_lon"),
    )
    .map_err(|e| e.to_string())?;

    let start = DateTime::parse_from_rfc3339(&row.get::<String, _>("period_start"))
        .map_err(|e| e.to_string())?
        .with_timezone(&Utc);
    let end = DateTime::parse_from_rfc3339(&row.get::<String, _>("period_end"))
        .map_err(|e| e.to_string())?
        .with_timezone(&Utc);
    let period = DeliveryPeriod::new(start, end).map_err(|e| e.to_string())?;

    let package =
        PackageInfo::new(parse_decimal(&row.get::<String, _>("weight_kg"))?).map_err(|e| e.to_string())?;

    let priority_tag: String = row.get("priority");
    let priority =
        DeliveryPriority::parse(&priority_tag).ok_or(format!("priority {priority_tag}"))?;
    let stage_tag: String = row.get("stage");
    let stage = DeliveryStage::parse(&stage_tag).ok_or(format!("stage {stage_tag}"))?;

    let contacts = row
        .get::<Option<String>, _>("contact_name")
        .map(|name| RecipientContacts {
            name,
            phone: row.get("contact_phone"),
            email: row.get("contact_email"),
        });

    let mut info = DeliveryInfo::new(pickup, destination, period, package, priority, contacts);
    info.stage = stage;
    info.package_id = row.get("package_id");
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CacheConfig, SqliteStore};
    use chrono::TimeZone;
    use merx_domain::GoodId;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn customer() -> CustomerId {
        CustomerId(Uuid::new_v4())
    }

    fn line(good: &str, quantity: i32) -> OrderItem {
        OrderItem::new(GoodId::new(good).unwrap(), quantity, Decimal::TEN).unwrap()
    }

    fn delivery_info() -> DeliveryInfo {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        DeliveryInfo::new(
            Address::new("1 Warehouse Way", "Springfield", "US", 40.0, -74.0).unwrap(),
            Address::new("9 Home Rd", "Springfield", "US", 40.1, -74.1).unwrap(),
            DeliveryPeriod::new(start, end).unwrap(),
            PackageInfo::new(Decimal::new(25, 1)).unwrap(),
            DeliveryPriority::Urgent,
            Some(RecipientContacts {
                name: "Pat".into(),
                phone: Some("+1-555-0100".into()),
                email: None,
            }),
        )
    }

    async fn store() -> SqliteStore {
        SqliteStore::in_memory(CacheConfig::default()).await.unwrap()
    }

    async fn persist(store: &SqliteStore, order: &mut Order) {
        let uow = store.begin().await.unwrap();
        let ctx = OpContext::with_uow(uow.clone());
        store.orders().save(&ctx, order).await.unwrap();
        uow.commit().await.unwrap();
    }

    #[tokio::test]
    async fn round_trip_with_delivery_info() {
        let store = store().await;
        let mut order = Order::create(customer(), vec![line("g1", 2)]).unwrap();
        order.set_delivery_info(delivery_info()).unwrap();
        order
            .record_delivery_dispatch("pkg-7".into(), DeliveryStage::Requested)
            .unwrap();
        order.drain_events();
        persist(&store, &mut order).await;

        let uow = store.begin().await.unwrap();
        let ctx = OpContext::with_uow(uow.clone());
        let loaded = store.orders().get(&ctx, order.order_id()).await.unwrap();
        uow.commit().await.unwrap();

        assert_eq!(loaded.version(), 1);
        assert_eq!(loaded.items(), order.items());
        let info = loaded.delivery_info().unwrap();
        assert_eq!(info.stage, DeliveryStage::Requested);
        assert_eq!(info.package_id.as_deref(), Some("pkg-7"));
        assert_eq!(info.priority, DeliveryPriority::Urgent);
        assert_eq!(info.contacts.as_ref().unwrap().name, "Pat");
    }

    #[tokio::test]
    async fn get_missing_order_is_not_found() {
        let store = store().await;
        let uow = store.begin().await.unwrap();
        let ctx = OpContext::with_uow(uow.clone());
        let err = store.orders().get(&ctx, OrderId::generate()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        uow.commit().await.unwrap();
    }

    #[tokio::test]
    async fn status_change_persists_through_save() {
        let store = store().await;
        let mut order = Order::create(customer(), vec![line("g1", 1)]).unwrap();
        order.drain_events();
        persist(&store, &mut order).await;

        order.cancel(Some("test".into())).unwrap();
        order.drain_events();
        persist(&store, &mut order).await;
        assert_eq!(order.version(), 2);

        let uow = store.begin().await.unwrap();
        let ctx = OpContext::with_uow(uow.clone());
        let loaded = store.orders().get(&ctx, order.order_id()).await.unwrap();
        uow.commit().await.unwrap();
        assert_eq!(loaded.status(), OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn concurrent_save_of_same_version_conflicts() {
        let store = store().await;
        let mut order = Order::create(customer(), vec![line("g1", 1)]).unwrap();
        order.drain_events();
        persist(&store, &mut order).await;

        let uow = store.begin().await.unwrap();
        let ctx = OpContext::with_uow(uow.clone());
        let mut copy_a = store.orders().get(&ctx, order.order_id()).await.unwrap();
        uow.commit().await.unwrap();
        let mut copy_b = copy_a.clone();

        copy_a.cancel(None).unwrap();
        copy_a.drain_events();
        persist(&store, &mut copy_a).await;

        copy_b.confirm().unwrap();
        let uow = store.begin().await.unwrap();
        let ctx = OpContext::with_uow(uow.clone());
        let err = store.orders().save(&ctx, &mut copy_b).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));
        uow.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn list_filters_and_paginates() {
        let store = store().await;
        let owner = customer();
        let other = customer();

        for _ in 0..3 {
            let mut order = Order::create(owner, vec![line("g1", 1)]).unwrap();
            order.drain_events();
            persist(&store, &mut order).await;
        }
        let mut cancelled = Order::create(owner, vec![line("g2", 1)]).unwrap();
        cancelled.cancel(None).unwrap();
        cancelled.drain_events();
        persist(&store, &mut cancelled).await;
        let mut foreign = Order::create(other, vec![line("g3", 1)]).unwrap();
        foreign.drain_events();
        persist(&store, &mut foreign).await;

        let uow = store.begin().await.unwrap();
        let ctx = OpContext::with_uow(uow.clone());

        // Customer + status filter, two rows per page.
        let page1 = store
            .orders()
            .list(
                &ctx,
                &OrderFilter {
                    customer: Some(owner),
                    statuses: vec![OrderStatus::Created],
                    page: 1,
                    page_size: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(page1.total, 3);
        assert_eq!(page1.total_pages(), 2);
        assert_eq!(page1.orders.len(), 2);

        let page2 = store
            .orders()
            .list(
                &ctx,
                &OrderFilter {
                    customer: Some(owner),
                    statuses: vec![OrderStatus::Created],
                    page: 2,
                    page_size: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(page2.orders.len(), 1);

        // No page overlap.
        let mut seen: Vec<_> = page1
            .orders
            .iter()
            .chain(page2.orders.iter())
            .map(|o| o.order_id())
            .collect();
        seen.sort_by_key(|id| id.to_string());
        seen.dedup();
        assert_eq!(seen.len(), 3);

        let by_customer = store.orders().list_by_customer(&ctx, owner).await.unwrap();
        assert_eq!(by_customer.len(), 4);

        let by_status = store
            .orders()
            .list_by_status(&ctx, OrderStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(by_status.len(), 1);
        assert_eq!(by_status[0].order_id(), cancelled.order_id());

        uow.commit().await.unwrap();
    }
}
