//! Domain models for the fulfillment engine.
//!
//! Orders are frozen snapshots: customer contact, shipping address and unit
//! prices are copied at creation time and never follow later account or
//! catalog changes. The only mutable parts of an order after creation are
//! its status fields, payment metadata and tracking number.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whole rupiah. The storefront never deals in fractional currency.
pub type Rupiah = i64;

// ============================================================================
// Status Enums
// ============================================================================

/// Fulfillment status of an order. Only the status controller writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status string that names no known status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(OrderStatus::Pending),
            "PAID" => Ok(OrderStatus::Paid),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "SHIPPED" => Ok(OrderStatus::Shipped),
            "DELIVERED" => Ok(OrderStatus::Delivered),
            "CANCELLED" | "CANCELED" => Ok(OrderStatus::Cancelled),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// Payment state, tracked independently of the fulfillment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(PaymentStatus::Pending),
            "PAID" => Ok(PaymentStatus::Paid),
            "FAILED" => Ok(PaymentStatus::Failed),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

// ============================================================================
// Order Aggregate
// ============================================================================

/// Shipping vendor tag for company-operated delivery.
pub const INTERNAL_FLEET_VENDOR: &str = "INTERNAL";

/// Customer contact details copied onto the order at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerSnapshot {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

/// Payment metadata backfilled after the gateway hands out a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub payment_url: Option<String>,
    pub payment_method: Option<String>,
    pub payment_fee: Option<Rupiah>,
    pub payment_code: Option<String>,
    pub payment_expires_at: Option<DateTime<Utc>>,
}

/// An order and its line items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Option<String>,
    pub customer: CustomerSnapshot,
    pub shipping_address: serde_json::Value,
    pub subtotal: Rupiah,
    pub shipping_cost: Rupiah,
    pub discount_amount: Rupiah,
    pub total: Rupiah,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment: PaymentDetails,
    pub tracking_number: Option<String>,
    pub shipping_vendor: String,
    pub shipping_distance_km: Option<f64>,
    pub transit_days_max: Option<i32>,
    pub total_weight_grams: i64,
    pub weight_override_grams: Option<i64>,
    pub coupon_code: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<OrderItem>,
}

impl Order {
    pub fn is_internal_fleet(&self) -> bool {
        self.shipping_vendor.eq_ignore_ascii_case(INTERNAL_FLEET_VENDOR)
    }

    /// Messaging target for customer notifications, if one is on file.
    pub fn contact_channel(&self) -> Option<&str> {
        self.customer
            .phone
            .as_deref()
            .map(str::trim)
            .filter(|phone| !phone.is_empty())
    }
}

/// A line item, frozen at order creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub position: i32,
    pub variant_id: String,
    pub product_id: String,
    pub quantity: i32,
    pub unit_price: Rupiah,
    pub total: Rupiah,
}

/// Everything the store needs to persist a new order header and its items.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_number: String,
    pub user_id: Option<String>,
    pub customer: CustomerSnapshot,
    pub shipping_address: serde_json::Value,
    pub subtotal: Rupiah,
    pub shipping_cost: Rupiah,
    pub discount_amount: Rupiah,
    pub total: Rupiah,
    pub shipping_vendor: String,
    pub shipping_distance_km: Option<f64>,
    pub transit_days_max: Option<i32>,
    pub total_weight_grams: i64,
    pub weight_override_grams: Option<i64>,
    pub coupon_code: Option<String>,
    pub items: Vec<NewOrderItem>,
}

#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub variant_id: String,
    pub product_id: String,
    pub quantity: i32,
    pub unit_price: Rupiah,
    pub total: Rupiah,
}

/// A guarded status write: applied only if the row is still at
/// `expected_version`.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub order_id: Uuid,
    pub expected_version: i32,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub tracking_number: Option<String>,
}

// ============================================================================
// External Records
// ============================================================================

/// A sellable variant, read-only to this engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProductVariant {
    pub id: String,
    pub product_id: String,
    pub name: String,
    pub price: Rupiah,
    pub weight_grams: i64,
    pub length_cm: Option<i32>,
    pub width_cm: Option<i32>,
    pub height_cm: Option<i32>,
    pub stock: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationTemplate {
    pub name: String,
    pub body: String,
    pub is_active: bool,
}

/// Append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub actor: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub old_value: serde_json::Value,
    pub new_value: serde_json::Value,
    pub request_meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Who triggered an operation, with the request metadata that goes into
/// the audit trail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl Actor {
    pub fn system(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn request_meta(&self) -> serde_json::Value {
        serde_json::json!({
            "ip_address": self.ip_address,
            "user_agent": self.user_agent,
        })
    }
}

/// A payment session handed out by the gateway adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSession {
    pub payment_url: String,
    pub method: String,
    pub fee: Rupiah,
    pub payment_code: Option<String>,
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// Request Models (Deserialize from JSON input)
// ============================================================================

/// Request body for creating a new order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub customer: CustomerInput,
    pub shipping_address: ShippingAddress,
    pub items: Vec<OrderLineInput>,
    /// Shipping cost the client displayed; advisory only.
    #[serde(default)]
    pub shipping_cost: Option<Rupiah>,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub discount_amount: Option<Rupiah>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub shipping_vendor: Option<String>,
    #[serde(default)]
    pub weight_override_grams: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerInput {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Shipping address for an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingAddress {
    #[serde(default)]
    pub recipient: Option<String>,
    pub street: String,
    pub city: String,
    pub province: String,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

/// A single cart line. `variant_id` may turn out to be a product id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLineInput {
    #[serde(alias = "variant_or_product_id")]
    pub variant_id: String,
    pub quantity: i64,
    #[serde(default)]
    pub price: Option<Rupiah>,
}

/// Request body for an operator status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    #[serde(default)]
    pub tracking_number: Option<String>,
}

/// Request body for a live shipping quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingQuoteRequest {
    pub province: String,
    pub city: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub subtotal: Rupiah,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryPaymentRequest {
    #[serde(default)]
    pub payment_method: Option<String>,
}

// ============================================================================
// Response Models
// ============================================================================

/// Generic API response wrapper.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
    pub message: String,
}

/// Result of checkout: the persisted order plus the payment outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub order: Order,
    pub payment: Option<PaymentSession>,
    /// Set when the order was stored but the gateway could not be reached.
    pub payment_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentStatusResponse {
    pub order_number: String,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
}
