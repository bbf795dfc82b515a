//! Repository traits for the fulfillment engine.
//!
//! The engine is written against these traits only. `postgres` backs them
//! with SQLx; `memory` keeps everything in process for tests and demos.
//!
//! Order creation goes through a [`CheckoutTx`]: variant lookups and the
//! header/items insert share one transaction, so the variant chosen for each
//! line is the one that was current at commit time.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AuditLogEntry, NewOrder, NotificationTemplate, Order, PaymentSession, ProductVariant,
    StatusUpdate,
};

pub use memory::{InMemoryAuditLog, InMemoryOrderStore, InMemoryTemplateStore};
pub use postgres::{PgAuditLog, PgOrderStore, PgTemplateStore};

// ============================================================================
// Store Error
// ============================================================================

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic locking conflict.
    #[error("version conflict: expected {expected}, found {found}")]
    VersionConflict { expected: i32, found: i32 },

    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row that no longer decodes into a domain value.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

// ============================================================================
// Traits
// ============================================================================

/// Read access to the catalog's variants.
#[async_trait]
pub trait VariantSource: Send {
    async fn find_variant(&mut self, id: &str) -> Result<Option<ProductVariant>, StoreError>;

    /// The first variant of a product that still has stock, falling back to
    /// the first variant at all.
    async fn first_variant_of_product(
        &mut self,
        product_id: &str,
    ) -> Result<Option<ProductVariant>, StoreError>;
}

/// One order-creation transaction. Dropping it without `commit` discards
/// everything it staged.
#[async_trait]
pub trait CheckoutTx: VariantSource {
    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn begin_checkout(&self) -> Result<Box<dyn CheckoutTx>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn find_by_number(&self, order_number: &str) -> Result<Option<Order>, StoreError>;

    async fn find_by_tracking(&self, tracking_number: &str) -> Result<Option<Order>, StoreError>;

    /// Backfill gateway metadata right after creation or on payment retry.
    async fn record_payment(
        &self,
        order_id: Uuid,
        session: &PaymentSession,
    ) -> Result<Order, StoreError>;

    /// Version-checked status write. Returns `VersionConflict` when another
    /// writer got there first.
    async fn update_status(&self, update: StatusUpdate) -> Result<Order, StoreError>;

    /// Privileged hard delete: items first, then the header. Returns whether
    /// a row was removed.
    async fn delete_order(&self, order_id: Uuid) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn find_active(&self, name: &str) -> Result<Option<NotificationTemplate>, StoreError>;
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: AuditLogEntry) -> Result<(), StoreError>;
}
