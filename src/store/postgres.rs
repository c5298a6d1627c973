use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use super::{with_timeout, Mutation, OrderFilter, OrderSort, OrderStore, Page};
use crate::domain::{DeliveryInfo, Order, OrderItem, OrderStatus};
use crate::{OrderError, Result};

const ORDER_COLUMNS: &str = "o.id, o.user_id, o.status, o.total_amount, o.contact_info, o.country, o.city, \
     o.first_name, o.last_name, o.delivery_address, o.zip_code, o.created_at";

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: Uuid,
    status: String,
    #[allow(dead_code)]
    total_amount: i64,
    contact_info: Option<String>,
    country: Option<String>,
    city: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    delivery_address: Option<String>,
    zip_code: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderItemRow {
    id: Uuid,
    order_id: Uuid,
    product_id: i64,
    quantity: i32,
    amount: Option<i64>,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Result<Order> {
        let status: OrderStatus = self.status.parse().map_err(|_| {
            OrderError::StorageUnavailable(format!("order {} has unknown status '{}'", self.id, self.status))
        })?;
        let delivery = DeliveryInfo {
            contact_info: self.contact_info, country: self.country, city: self.city,
            first_name: self.first_name, last_name: self.last_name,
            delivery_address: self.delivery_address, zip_code: self.zip_code,
        };
        Ok(Order::restore(self.id, self.user_id, status, delivery, self.created_at, items))
    }
}

impl From<OrderItemRow> for OrderItem {
    fn from(r: OrderItemRow) -> Self {
        Self { id: r.id, product_id: r.product_id, quantity: r.quantity, amount: r.amount }
    }
}

async fn load_items(conn: &mut PgConnection, order_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<OrderItem>>> {
    let rows = sqlx::query_as::<_, OrderItemRow>(
        "SELECT id, order_id, product_id, quantity, amount FROM order_items WHERE order_id = ANY($1) ORDER BY id",
    )
    .bind(order_ids)
    .fetch_all(conn)
    .await?;
    let mut by_order: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
    for row in rows { by_order.entry(row.order_id).or_default().push(row.into()); }
    Ok(by_order)
}

async fn hydrate(conn: &mut PgConnection, rows: Vec<OrderRow>) -> Result<Vec<Order>> {
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let mut items = load_items(conn, &ids).await?;
    rows.into_iter().map(|r| { let its = items.remove(&r.id).unwrap_or_default(); r.into_order(its) }).collect()
}

async fn insert_item(conn: &mut PgConnection, order_id: Uuid, item: &OrderItem) -> Result<()> {
    sqlx::query(
        "INSERT INTO order_items (id, order_id, product_id, quantity, amount) VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (id) DO UPDATE SET quantity = EXCLUDED.quantity, amount = EXCLUDED.amount",
    )
    .bind(item.id).bind(order_id).bind(item.product_id).bind(item.quantity).bind(item.amount)
    .execute(conn)
    .await?;
    Ok(())
}

/// Writes the order columns and replaces the stored item set with `order`'s.
async fn save_order(conn: &mut PgConnection, order: &Order) -> Result<()> {
    let d = order.delivery();
    sqlx::query(
        "UPDATE orders SET status = $2, total_amount = $3, contact_info = $4, country = $5, city = $6, \
         first_name = $7, last_name = $8, delivery_address = $9, zip_code = $10 WHERE id = $1",
    )
    .bind(order.id()).bind(order.status().as_str()).bind(order.total_amount())
    .bind(&d.contact_info).bind(&d.country).bind(&d.city).bind(&d.first_name).bind(&d.last_name)
    .bind(&d.delivery_address).bind(&d.zip_code)
    .execute(&mut *conn)
    .await?;

    let keep: Vec<Uuid> = order.items().iter().map(|i| i.id).collect();
    sqlx::query("DELETE FROM order_items WHERE order_id = $1 AND NOT (id = ANY($2))")
        .bind(order.id()).bind(&keep)
        .execute(&mut *conn)
        .await?;
    for item in order.items() { insert_item(&mut *conn, order.id(), item).await?; }
    Ok(())
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn order_by(sort: OrderSort) -> &'static str {
    match sort {
        OrderSort::TotalAsc => " ORDER BY o.total_amount ASC, o.id DESC",
        OrderSort::TotalDesc => " ORDER BY o.total_amount DESC, o.id DESC",
        OrderSort::CreatedAsc => " ORDER BY o.created_at ASC, o.id ASC",
        OrderSort::CreatedDesc => " ORDER BY o.created_at DESC, o.id DESC",
        OrderSort::NewestId => " ORDER BY o.id DESC",
    }
}

/// Order store backed by the `orders` and `order_items` tables.
pub struct PgOrderStore {
    db: PgPool,
    timeout: Duration,
}

impl PgOrderStore {
    pub fn new(db: PgPool, timeout: Duration) -> Self { Self { db, timeout } }

    async fn begin(&self, read_only: bool) -> Result<sqlx::Transaction<'static, Postgres>> {
        let mut tx = self.db.begin().await?;
        if read_only {
            sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY").execute(&mut *tx).await?;
        }
        let statement_timeout = format!("SET LOCAL statement_timeout = {}", self.timeout.as_millis());
        sqlx::query(&statement_timeout).execute(&mut *tx).await?;
        Ok(tx)
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut tx = self.begin(false).await?;
        let d = order.delivery();
        sqlx::query(
            "INSERT INTO orders (id, user_id, status, total_amount, contact_info, country, city, first_name, \
             last_name, delivery_address, zip_code, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(order.id()).bind(order.owner()).bind(order.status().as_str()).bind(order.total_amount())
        .bind(&d.contact_info).bind(&d.country).bind(&d.city).bind(&d.first_name).bind(&d.last_name)
        .bind(&d.delivery_address).bind(&d.zip_code).bind(order.created_at())
        .execute(&mut *tx)
        .await?;
        for item in order.items() { insert_item(&mut tx, order.id(), item).await?; }
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_order(&self, id: Uuid) -> Result<Option<Order>> {
        let mut tx = self.begin(true).await?;
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders o WHERE o.id = $1");
        let Some(row) = sqlx::query_as::<_, OrderRow>(&sql).bind(id).fetch_optional(&mut *tx).await? else {
            return Ok(None);
        };
        let mut orders = hydrate(&mut tx, vec![row]).await?;
        tx.commit().await?;
        Ok(orders.pop())
    }

    async fn fetch_by_owner(&self, owner: Uuid, page: Page) -> Result<Vec<Order>> {
        let mut tx = self.begin(true).await?;
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders o WHERE o.user_id = $1 ORDER BY o.created_at DESC, o.id DESC LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(owner).bind(page.limit).bind(page.offset)
            .fetch_all(&mut *tx)
            .await?;
        let orders = hydrate(&mut tx, rows).await?;
        tx.commit().await?;
        Ok(orders)
    }

    async fn fetch_filtered(&self, filter: &OrderFilter, sort: OrderSort, page: Page) -> Result<Vec<Order>> {
        let mut tx = self.begin(true).await?;
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {ORDER_COLUMNS} FROM orders o"));
        let mut clause = " WHERE ";
        if let Some(email) = &filter.email {
            qb.push(" JOIN users u ON u.id = o.user_id WHERE u.email ILIKE ")
                .push_bind(format!("%{}%", escape_like(email)));
            clause = " AND ";
        }
        if !filter.statuses.is_empty() {
            qb.push(clause).push("o.status = ANY(").push_bind(filter.statuses.clone()).push(")");
        }
        qb.push(order_by(sort));
        qb.push(" LIMIT ").push_bind(page.limit).push(" OFFSET ").push_bind(page.offset);
        let rows = qb.build_query_as::<OrderRow>().fetch_all(&mut *tx).await?;
        let orders = hydrate(&mut tx, rows).await?;
        tx.commit().await?;
        Ok(orders)
    }

    async fn modify_order(&self, id: Uuid, mutation: Mutation<'_>) -> Result<Order> {
        let mut tx = self.begin(false).await?;
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders o WHERE o.id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(OrderError::NotFound("Order"))?;
        let mut order = hydrate(&mut tx, vec![row]).await?.pop().ok_or(OrderError::NotFound("Order"))?;
        // an error here drops `tx`, which rolls back and releases the row lock
        mutation(&mut order)?;
        save_order(&mut tx, &order).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn remove_order(&self, id: Uuid) -> Result<bool> {
        let mut tx = self.begin(false).await?;
        let deleted = sqlx::query("DELETE FROM orders WHERE id = $1").bind(id).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(deleted.rows_affected() > 0)
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn create(&self, order: &Order) -> Result<()> {
        with_timeout(self.timeout, self.insert_order(order)).await
    }

    async fn get_with_items(&self, id: Uuid) -> Result<Option<Order>> {
        with_timeout(self.timeout, self.fetch_order(id)).await
    }

    async fn list_by_owner(&self, owner: Uuid, page: Page) -> Result<Vec<Order>> {
        with_timeout(self.timeout, self.fetch_by_owner(owner, page)).await
    }

    async fn list_all(&self, filter: &OrderFilter, sort: OrderSort, page: Page) -> Result<Vec<Order>> {
        with_timeout(self.timeout, self.fetch_filtered(filter, sort, page)).await
    }

    async fn update(&self, id: Uuid, mutation: Mutation<'_>) -> Result<Order> {
        with_timeout(self.timeout, self.modify_order(id, mutation)).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        with_timeout(self.timeout, self.remove_order(id)).await
    }
}
