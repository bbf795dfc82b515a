//! In-memory repository implementations.
//!
//! Used by the test suite and for running the service without a database.
//! Orders live in an `Arc<RwLock<HashMap>>`; checkout transactions stage
//! their order privately and only publish it on `commit`, so a dropped
//! transaction leaves no trace. Status writes use the same version check as
//! the Postgres store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AuditLog, CheckoutTx, OrderStore, StoreError, TemplateStore, VariantSource};
use crate::models::{
    AuditLogEntry, NewOrder, NotificationTemplate, Order, OrderItem, OrderStatus, PaymentDetails,
    PaymentSession, PaymentStatus, ProductVariant, StatusUpdate,
};

type OrderTable = Arc<RwLock<HashMap<Uuid, Order>>>;

// ============================================================================
// Order Store
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    orders: OrderTable,
    variants: Arc<RwLock<Vec<ProductVariant>>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variants(variants: Vec<ProductVariant>) -> Self {
        Self {
            variants: Arc::new(RwLock::new(variants)),
            ..Self::default()
        }
    }

    pub async fn add_variant(&self, variant: ProductVariant) {
        self.variants.write().await.push(variant);
    }

    /// Make every subsequent write fail as if the database were down.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        check_writable(&self.fail_writes)
    }
}

fn check_writable(flag: &AtomicBool) -> Result<(), StoreError> {
    if flag.load(Ordering::SeqCst) {
        return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
    }
    Ok(())
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn begin_checkout(&self) -> Result<Box<dyn CheckoutTx>, StoreError> {
        let variants = self.variants.read().await.clone();
        Ok(Box::new(InMemoryCheckoutTx {
            variants,
            orders: Arc::clone(&self.orders),
            fail_writes: Arc::clone(&self.fail_writes),
            staged: None,
        }))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn find_by_number(&self, order_number: &str) -> Result<Option<Order>, StoreError> {
        let orders = self.orders.read().await;
        Ok(orders
            .values()
            .find(|order| order.order_number == order_number)
            .cloned())
    }

    async fn find_by_tracking(&self, tracking_number: &str) -> Result<Option<Order>, StoreError> {
        let orders = self.orders.read().await;
        Ok(orders
            .values()
            .find(|order| order.tracking_number.as_deref() == Some(tracking_number))
            .cloned())
    }

    async fn record_payment(
        &self,
        order_id: Uuid,
        session: &PaymentSession,
    ) -> Result<Order, StoreError> {
        self.check_writable()?;
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&order_id)
            .ok_or_else(|| StoreError::NotFound(order_id.to_string()))?;
        order.payment = PaymentDetails {
            payment_url: Some(session.payment_url.clone()),
            payment_method: Some(session.method.clone()),
            payment_fee: Some(session.fee),
            payment_code: session.payment_code.clone(),
            payment_expires_at: Some(session.expires_at),
        };
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn update_status(&self, update: StatusUpdate) -> Result<Order, StoreError> {
        self.check_writable()?;
        let mut orders = self.orders.write().await;

        if let Some(tracking) = update.tracking_number.as_deref() {
            let taken = orders.values().any(|other| {
                other.id != update.order_id && other.tracking_number.as_deref() == Some(tracking)
            });
            if taken {
                return Err(StoreError::Duplicate("tracking_number".to_string()));
            }
        }

        let order = orders
            .get_mut(&update.order_id)
            .ok_or_else(|| StoreError::NotFound(update.order_id.to_string()))?;
        if order.version != update.expected_version {
            return Err(StoreError::VersionConflict {
                expected: update.expected_version,
                found: order.version,
            });
        }

        order.status = update.status;
        order.payment_status = update.payment_status;
        order.tracking_number = update.tracking_number;
        order.version += 1;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn delete_order(&self, order_id: Uuid) -> Result<bool, StoreError> {
        self.check_writable()?;
        Ok(self.orders.write().await.remove(&order_id).is_some())
    }
}

// ============================================================================
// Checkout Transaction
// ============================================================================

struct InMemoryCheckoutTx {
    variants: Vec<ProductVariant>,
    orders: OrderTable,
    fail_writes: Arc<AtomicBool>,
    staged: Option<Order>,
}

#[async_trait]
impl VariantSource for InMemoryCheckoutTx {
    async fn find_variant(&mut self, id: &str) -> Result<Option<ProductVariant>, StoreError> {
        Ok(self.variants.iter().find(|v| v.id == id).cloned())
    }

    async fn first_variant_of_product(
        &mut self,
        product_id: &str,
    ) -> Result<Option<ProductVariant>, StoreError> {
        let mut candidates = self.variants.iter().filter(|v| v.product_id == product_id);
        let first = candidates.clone().next();
        Ok(candidates.find(|v| v.stock > 0).or(first).cloned())
    }
}

#[async_trait]
impl CheckoutTx for InMemoryCheckoutTx {
    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, StoreError> {
        check_writable(&self.fail_writes)?;

        let id = Uuid::new_v4();
        let now = Utc::now();
        let items = order
            .items
            .into_iter()
            .enumerate()
            .map(|(position, item)| OrderItem {
                id: Uuid::new_v4(),
                order_id: id,
                position: position as i32,
                variant_id: item.variant_id,
                product_id: item.product_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
                total: item.total,
            })
            .collect();

        let stored = Order {
            id,
            order_number: order.order_number,
            user_id: order.user_id,
            customer: order.customer,
            shipping_address: order.shipping_address,
            subtotal: order.subtotal,
            shipping_cost: order.shipping_cost,
            discount_amount: order.discount_amount,
            total: order.total,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment: PaymentDetails::default(),
            tracking_number: None,
            shipping_vendor: order.shipping_vendor,
            shipping_distance_km: order.shipping_distance_km,
            transit_days_max: order.transit_days_max,
            total_weight_grams: order.total_weight_grams,
            weight_override_grams: order.weight_override_grams,
            coupon_code: order.coupon_code,
            version: 1,
            created_at: now,
            updated_at: now,
            items,
        };
        self.staged = Some(stored.clone());
        Ok(stored)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        check_writable(&this.fail_writes)?;
        let Some(order) = this.staged else {
            return Ok(());
        };

        let mut orders = this.orders.write().await;
        if orders
            .values()
            .any(|existing| existing.order_number == order.order_number)
        {
            return Err(StoreError::Duplicate(order.order_number));
        }
        orders.insert(order.id, order);
        Ok(())
    }
}

// ============================================================================
// Templates and Audit Log
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemoryTemplateStore {
    templates: Arc<RwLock<HashMap<String, NotificationTemplate>>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, template: NotificationTemplate) {
        self.templates
            .write()
            .await
            .insert(template.name.clone(), template);
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn find_active(&self, name: &str) -> Result<Option<NotificationTemplate>, StoreError> {
        Ok(self
            .templates
            .read()
            .await
            .get(name)
            .filter(|template| template.is_active)
            .cloned())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAuditLog {
    entries: Arc<RwLock<Vec<AuditLogEntry>>>,
    fail: Arc<AtomicBool>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, entry: AuditLogEntry) -> Result<(), StoreError> {
        check_writable(&self.fail)?;
        self.entries.write().await.push(entry);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CustomerSnapshot, NewOrderItem};

    fn variant(id: &str, product_id: &str, stock: i32) -> ProductVariant {
        ProductVariant {
            id: id.to_string(),
            product_id: product_id.to_string(),
            name: id.to_string(),
            price: 100_000,
            weight_grams: 500,
            length_cm: None,
            width_cm: None,
            height_cm: None,
            stock,
        }
    }

    fn new_order(number: &str) -> NewOrder {
        NewOrder {
            order_number: number.to_string(),
            user_id: None,
            customer: CustomerSnapshot {
                name: "Sari".to_string(),
                email: "sari@example.com".to_string(),
                phone: Some("6281234567890".to_string()),
            },
            shipping_address: serde_json::json!({"city": "Bandung"}),
            subtotal: 200_000,
            shipping_cost: 25_000,
            discount_amount: 0,
            total: 225_000,
            shipping_vendor: "INTERNAL".to_string(),
            shipping_distance_km: Some(45.0),
            transit_days_max: Some(2),
            total_weight_grams: 1_000,
            weight_override_grams: None,
            coupon_code: None,
            items: vec![NewOrderItem {
                variant_id: "v-1".to_string(),
                product_id: "p-1".to_string(),
                quantity: 2,
                unit_price: 100_000,
                total: 200_000,
            }],
        }
    }

    async fn committed(store: &InMemoryOrderStore, number: &str) -> Order {
        let mut tx = store.begin_checkout().await.unwrap();
        let order = tx.insert_order(new_order(number)).await.unwrap();
        tx.commit().await.unwrap();
        order
    }

    #[tokio::test]
    async fn test_dropped_checkout_leaves_nothing_behind() {
        let store = InMemoryOrderStore::new();
        {
            let mut tx = store.begin_checkout().await.unwrap();
            tx.insert_order(new_order("ORD-1")).await.unwrap();
        }
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_committed_order_is_found_by_number() {
        let store = InMemoryOrderStore::new();
        let order = committed(&store, "ORD-1").await;

        let found = store.find_by_number("ORD-1").await.unwrap().unwrap();
        assert_eq!(found.id, order.id);
        assert_eq!(found.items.len(), 1);
        assert_eq!(found.version, 1);
    }

    #[tokio::test]
    async fn test_duplicate_order_number_rejected_on_commit() {
        let store = InMemoryOrderStore::new();
        committed(&store, "ORD-1").await;

        let mut tx = store.begin_checkout().await.unwrap();
        tx.insert_order(new_order("ORD-1")).await.unwrap();
        assert!(matches!(tx.commit().await, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_stale_version_is_a_conflict() {
        let store = InMemoryOrderStore::new();
        let order = committed(&store, "ORD-1").await;

        let update = StatusUpdate {
            order_id: order.id,
            expected_version: order.version,
            status: OrderStatus::Paid,
            payment_status: PaymentStatus::Paid,
            tracking_number: None,
        };
        let updated = store.update_status(update.clone()).await.unwrap();
        assert_eq!(updated.version, 2);

        let err = store.update_status(update).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict { expected: 1, found: 2 }
        ));
    }

    #[tokio::test]
    async fn test_first_variant_prefers_stocked_variant() {
        let store = InMemoryOrderStore::with_variants(vec![
            variant("v-red", "p-shirt", 0),
            variant("v-blue", "p-shirt", 4),
        ]);
        let mut tx = store.begin_checkout().await.unwrap();
        let chosen = tx.first_variant_of_product("p-shirt").await.unwrap().unwrap();
        assert_eq!(chosen.id, "v-blue");
    }

    #[tokio::test]
    async fn test_first_variant_falls_back_to_out_of_stock() {
        let store = InMemoryOrderStore::with_variants(vec![variant("v-red", "p-shirt", 0)]);
        let mut tx = store.begin_checkout().await.unwrap();
        let chosen = tx.first_variant_of_product("p-shirt").await.unwrap().unwrap();
        assert_eq!(chosen.id, "v-red");
    }

    #[tokio::test]
    async fn test_delete_removes_order() {
        let store = InMemoryOrderStore::new();
        let order = committed(&store, "ORD-1").await;
        assert!(store.delete_order(order.id).await.unwrap());
        assert!(!store.delete_order(order.id).await.unwrap());
        assert!(store.find_by_id(order.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_inactive_template_is_not_returned() {
        let templates = InMemoryTemplateStore::new();
        templates
            .upsert(NotificationTemplate {
                name: "order_paid".to_string(),
                body: "Paid".to_string(),
                is_active: false,
            })
            .await;
        assert!(templates.find_active("order_paid").await.unwrap().is_none());
    }
}
