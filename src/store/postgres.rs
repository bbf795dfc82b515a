//! PostgreSQL implementations of the repository traits.
//!
//! Rows are read into flat `FromRow` structs and converted into the domain
//! types; status columns are stored as text and parsed on the way out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use super::{AuditLog, CheckoutTx, OrderStore, StoreError, TemplateStore, VariantSource};
use crate::models::{
    AuditLogEntry, CustomerSnapshot, NewOrder, NotificationTemplate, Order, OrderItem,
    PaymentDetails, PaymentSession, ProductVariant, StatusUpdate,
};

// ============================================================================
// Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    user_id: Option<String>,
    customer_name: String,
    customer_email: String,
    customer_phone: Option<String>,
    shipping_address: serde_json::Value,
    subtotal: i64,
    shipping_cost: i64,
    discount_amount: i64,
    total: i64,
    status: String,
    payment_status: String,
    payment_url: Option<String>,
    payment_method: Option<String>,
    payment_fee: Option<i64>,
    payment_code: Option<String>,
    payment_expires_at: Option<DateTime<Utc>>,
    tracking_number: Option<String>,
    shipping_vendor: String,
    shipping_distance_km: Option<f64>,
    transit_days_max: Option<i32>,
    total_weight_grams: i64,
    weight_override_grams: Option<i64>,
    coupon_code: Option<String>,
    version: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderItemRow {
    id: Uuid,
    order_id: Uuid,
    position: i32,
    variant_id: String,
    product_id: String,
    quantity: i32,
    unit_price: i64,
    total: i64,
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        Self {
            id: row.id,
            order_id: row.order_id,
            position: row.position,
            variant_id: row.variant_id,
            product_id: row.product_id,
            quantity: row.quantity,
            unit_price: row.unit_price,
            total: row.total,
        }
    }
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Result<Order, StoreError> {
        let status = self
            .status
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("order {}: {}", self.order_number, e)))?;
        let payment_status = self
            .payment_status
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("order {}: {}", self.order_number, e)))?;

        Ok(Order {
            id: self.id,
            order_number: self.order_number,
            user_id: self.user_id,
            customer: CustomerSnapshot {
                name: self.customer_name,
                email: self.customer_email,
                phone: self.customer_phone,
            },
            shipping_address: self.shipping_address,
            subtotal: self.subtotal,
            shipping_cost: self.shipping_cost,
            discount_amount: self.discount_amount,
            total: self.total,
            status,
            payment_status,
            payment: PaymentDetails {
                payment_url: self.payment_url,
                payment_method: self.payment_method,
                payment_fee: self.payment_fee,
                payment_code: self.payment_code,
                payment_expires_at: self.payment_expires_at,
            },
            tracking_number: self.tracking_number,
            shipping_vendor: self.shipping_vendor,
            shipping_distance_km: self.shipping_distance_km,
            transit_days_max: self.transit_days_max,
            total_weight_grams: self.total_weight_grams,
            weight_override_grams: self.weight_override_grams,
            coupon_code: self.coupon_code,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
            items,
        })
    }
}

fn map_unique(err: sqlx::Error, what: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Duplicate(what.to_string())
        }
        _ => StoreError::Database(err),
    }
}

const VARIANT_COLUMNS: &str =
    "id, product_id, name, price, weight_grams, length_cm, width_cm, height_cm, stock";

// ============================================================================
// Order Store
// ============================================================================

#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, StoreError> {
        let rows: Vec<OrderItemRow> =
            sqlx::query_as("SELECT * FROM order_items WHERE order_id = $1 ORDER BY position")
                .bind(order_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(OrderItem::from).collect())
    }

    async fn hydrate(&self, row: Option<OrderRow>) -> Result<Option<Order>, StoreError> {
        match row {
            Some(row) => {
                let items = self.load_items(row.id).await?;
                row.into_order(items).map(Some)
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn begin_checkout(&self) -> Result<Box<dyn CheckoutTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgCheckoutTx { tx }))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let row: Option<OrderRow> = sqlx::query_as("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        self.hydrate(row).await
    }

    async fn find_by_number(&self, order_number: &str) -> Result<Option<Order>, StoreError> {
        let row: Option<OrderRow> = sqlx::query_as("SELECT * FROM orders WHERE order_number = $1")
            .bind(order_number)
            .fetch_optional(&self.pool)
            .await?;
        self.hydrate(row).await
    }

    async fn find_by_tracking(&self, tracking_number: &str) -> Result<Option<Order>, StoreError> {
        let row: Option<OrderRow> =
            sqlx::query_as("SELECT * FROM orders WHERE tracking_number = $1")
                .bind(tracking_number)
                .fetch_optional(&self.pool)
                .await?;
        self.hydrate(row).await
    }

    async fn record_payment(
        &self,
        order_id: Uuid,
        session: &PaymentSession,
    ) -> Result<Order, StoreError> {
        let row: Option<OrderRow> = sqlx::query_as(
            r#"
            UPDATE orders
            SET payment_url = $2, payment_method = $3, payment_fee = $4,
                payment_code = $5, payment_expires_at = $6, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(order_id)
        .bind(&session.payment_url)
        .bind(&session.method)
        .bind(session.fee)
        .bind(&session.payment_code)
        .bind(session.expires_at)
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate(row)
            .await?
            .ok_or_else(|| StoreError::NotFound(order_id.to_string()))
    }

    async fn update_status(&self, update: StatusUpdate) -> Result<Order, StoreError> {
        let row: Option<OrderRow> = sqlx::query_as(
            r#"
            UPDATE orders
            SET status = $3, payment_status = $4, tracking_number = $5,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING *
            "#,
        )
        .bind(update.order_id)
        .bind(update.expected_version)
        .bind(update.status.as_str())
        .bind(update.payment_status.as_str())
        .bind(&update.tracking_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_unique(e, "tracking_number"))?;

        if let Some(order) = self.hydrate(row).await? {
            return Ok(order);
        }

        // Nothing matched: either the row is gone or someone else moved it on.
        let current: Option<i32> = sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
            .bind(update.order_id)
            .fetch_optional(&self.pool)
            .await?;
        match current {
            Some(found) => Err(StoreError::VersionConflict {
                expected: update.expected_version,
                found,
            }),
            None => Err(StoreError::NotFound(update.order_id.to_string())),
        }
    }

    async fn delete_order(&self, order_id: Uuid) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let items = sqlx::query("DELETE FROM order_items WHERE order_id = $1")
            .bind(order_id)
            .execute(&mut *tx)
            .await?;
        let header = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(order_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(
            order_id = %order_id,
            items_removed = items.rows_affected(),
            "Order deleted"
        );
        Ok(header.rows_affected() > 0)
    }
}

// ============================================================================
// Checkout Transaction
// ============================================================================

struct PgCheckoutTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl VariantSource for PgCheckoutTx {
    async fn find_variant(&mut self, id: &str) -> Result<Option<ProductVariant>, StoreError> {
        // FOR SHARE keeps the variant from changing until this order commits.
        let sql = format!("SELECT {VARIANT_COLUMNS} FROM product_variants WHERE id = $1 FOR SHARE");
        let variant = sqlx::query_as::<_, ProductVariant>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(variant)
    }

    async fn first_variant_of_product(
        &mut self,
        product_id: &str,
    ) -> Result<Option<ProductVariant>, StoreError> {
        let sql = format!(
            "SELECT {VARIANT_COLUMNS} FROM product_variants WHERE product_id = $1 \
             ORDER BY (stock > 0) DESC, position, id LIMIT 1 FOR SHARE"
        );
        let variant = sqlx::query_as::<_, ProductVariant>(&sql)
            .bind(product_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(variant)
    }
}

#[async_trait]
impl CheckoutTx for PgCheckoutTx {
    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, StoreError> {
        let row: OrderRow = sqlx::query_as(
            r#"
            INSERT INTO orders (
                id, order_number, user_id, customer_name, customer_email, customer_phone,
                shipping_address, subtotal, shipping_cost, discount_amount, total,
                status, payment_status, shipping_vendor, shipping_distance_km,
                transit_days_max, total_weight_grams, weight_override_grams, coupon_code
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                    'PENDING', 'PENDING', $12, $13, $14, $15, $16, $17)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&order.order_number)
        .bind(&order.user_id)
        .bind(&order.customer.name)
        .bind(&order.customer.email)
        .bind(&order.customer.phone)
        .bind(&order.shipping_address)
        .bind(order.subtotal)
        .bind(order.shipping_cost)
        .bind(order.discount_amount)
        .bind(order.total)
        .bind(&order.shipping_vendor)
        .bind(order.shipping_distance_km)
        .bind(order.transit_days_max)
        .bind(order.total_weight_grams)
        .bind(order.weight_override_grams)
        .bind(&order.coupon_code)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_unique(e, &order.order_number))?;

        let mut items = Vec::with_capacity(order.items.len());
        for (position, item) in order.items.iter().enumerate() {
            let item_row: OrderItemRow = sqlx::query_as(
                r#"
                INSERT INTO order_items
                    (id, order_id, position, variant_id, product_id, quantity, unit_price, total)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING *
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(row.id)
            .bind(position as i32)
            .bind(&item.variant_id)
            .bind(&item.product_id)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.total)
            .fetch_one(&mut *self.tx)
            .await?;
            items.push(OrderItem::from(item_row));
        }

        row.into_order(items)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

// ============================================================================
// Templates and Audit Log
// ============================================================================

#[derive(Clone)]
pub struct PgTemplateStore {
    pool: PgPool,
}

impl PgTemplateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateStore for PgTemplateStore {
    async fn find_active(&self, name: &str) -> Result<Option<NotificationTemplate>, StoreError> {
        let template = sqlx::query_as::<_, NotificationTemplate>(
            "SELECT name, body, is_active FROM notification_templates \
             WHERE name = $1 AND is_active",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(template)
    }
}

#[derive(Clone)]
pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn append(&self, entry: AuditLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs
                (id, actor, action, entity_type, entity_id, old_value, new_value, request_meta, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.actor)
        .bind(&entry.action)
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(&entry.old_value)
        .bind(&entry.new_value)
        .bind(&entry.request_meta)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
