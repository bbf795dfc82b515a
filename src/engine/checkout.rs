//! # Checkout
//!
//! Turns a validated cart into a durable order, then hands off to the payment
//! gateway:
//!
//! 1. Validate the request; every problem is reported with its field path.
//! 2. Refuse destinations outside the delivery region.
//! 3. Inside one checkout transaction: resolve each line to a variant, check
//!    stock, price the cart, quote shipping from the address, insert the
//!    header and items, commit.
//! 4. After commit: create the payment session and backfill its metadata.
//!    A gateway failure leaves the order PENDING/PENDING for a later retry.
//! 5. Send the order confirmation.
//!
//! Payment retry, payment status polling and sandbox payment simulation also
//! live here since they drive the gateway for an existing order.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::notifications::{NotificationDispatcher, NotificationEvent};
use super::payment::{PaymentGateway, ANY_METHOD};
use super::pricing::{self, PricedLine};
use super::shipping::{Coordinates, Destination, ShippingEngine, ShippingQuote};
use super::status::StatusController;
use super::variants::resolve_variant;
use crate::config::StoreConfig;
use crate::error::{FieldError, FulfillmentError};
use crate::models::{
    Actor, CreateOrderRequest, CustomerSnapshot, NewOrder, NewOrderItem, Order, OrderStatus,
    PaymentSession, PaymentStatus, PaymentStatusResponse, PlacedOrder, Rupiah,
    ShippingQuoteRequest,
};
use crate::store::OrderStore;

/// Upper bound on a single line's quantity.
pub const MAX_LINE_QUANTITY: i64 = 10_000;

/// Upper bound on a client-supplied unit price. A full line at this price
/// still fits comfortably in a `Rupiah`.
pub const MAX_UNIT_PRICE: Rupiah = 1_000_000_000_000;

pub const PAYMENT_GATEWAY_ACTOR: &str = "payment-gateway";
pub const SANDBOX_ACTOR: &str = "sandbox";

/// `ORD-YYYYMMDD-XXXXXXXX`
pub fn generate_order_number() -> String {
    format!(
        "ORD-{}-{}",
        Utc::now().format("%Y%m%d"),
        &Uuid::new_v4().to_string().replace('-', "")[..8].to_uppercase()
    )
}

// ============================================================================
// Validation
// ============================================================================

fn validate_request(req: &CreateOrderRequest) -> Vec<FieldError> {
    let mut errors = Vec::new();
    let mut require = |field: &str, value: &str| {
        if value.trim().is_empty() {
            errors.push(FieldError::new(field, "is required"));
        }
    };

    require("customer.name", &req.customer.name);
    require("customer.email", &req.customer.email);
    require("shipping_address.street", &req.shipping_address.street);
    require("shipping_address.city", &req.shipping_address.city);
    require("shipping_address.province", &req.shipping_address.province);

    let email = req.customer.email.trim();
    if !email.is_empty() && !is_plausible_email(email) {
        errors.push(FieldError::new("customer.email", "is not a valid email address"));
    }

    match (req.shipping_address.latitude, req.shipping_address.longitude) {
        (Some(lat), Some(lng)) => {
            if !(-90.0..=90.0).contains(&lat) {
                errors.push(FieldError::new("shipping_address.latitude", "must be between -90 and 90"));
            }
            if !(-180.0..=180.0).contains(&lng) {
                errors.push(FieldError::new("shipping_address.longitude", "must be between -180 and 180"));
            }
        }
        (None, None) => {}
        (Some(_), None) => errors.push(FieldError::new(
            "shipping_address.longitude",
            "is required when latitude is given",
        )),
        (None, Some(_)) => errors.push(FieldError::new(
            "shipping_address.latitude",
            "is required when longitude is given",
        )),
    }

    if req.items.is_empty() {
        errors.push(FieldError::new("items", "must contain at least one item"));
    }
    for (i, line) in req.items.iter().enumerate() {
        if line.variant_id.trim().is_empty() {
            errors.push(FieldError::new(format!("items[{i}].variant_id"), "is required"));
        }
        if !(1..=MAX_LINE_QUANTITY).contains(&line.quantity) {
            errors.push(FieldError::new(
                format!("items[{i}].quantity"),
                format!("must be between 1 and {MAX_LINE_QUANTITY}"),
            ));
        }
        match line.price {
            Some(price) if price < 0 => {
                errors.push(FieldError::new(format!("items[{i}].price"), "must not be negative"));
            }
            Some(price) if price > MAX_UNIT_PRICE => {
                errors.push(FieldError::new(
                    format!("items[{i}].price"),
                    format!("must not exceed {MAX_UNIT_PRICE}"),
                ));
            }
            _ => {}
        }
    }

    if req.discount_amount.is_some_and(|d| d < 0) {
        errors.push(FieldError::new("discount_amount", "must not be negative"));
    }
    if req.shipping_cost.is_some_and(|c| c < 0) {
        errors.push(FieldError::new("shipping_cost", "must not be negative"));
    }
    if req.weight_override_grams.is_some_and(|w| w <= 0) {
        errors.push(FieldError::new("weight_override_grams", "must be positive"));
    }

    errors
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// ============================================================================
// Service
// ============================================================================

#[derive(Clone)]
pub struct CheckoutService {
    store: Arc<dyn OrderStore>,
    shipping: ShippingEngine,
    gateway: Arc<dyn PaymentGateway>,
    notifier: NotificationDispatcher,
    status: StatusController,
    config: StoreConfig,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        shipping: ShippingEngine,
        gateway: Arc<dyn PaymentGateway>,
        notifier: NotificationDispatcher,
        status: StatusController,
        config: StoreConfig,
    ) -> Self {
        Self {
            store,
            shipping,
            gateway,
            notifier,
            status,
            config,
        }
    }

    pub fn is_sandbox(&self) -> bool {
        self.gateway.is_sandbox()
    }

    /// Live quote for the checkout page; no order is created.
    pub fn quote(&self, req: &ShippingQuoteRequest) -> ShippingQuote {
        let coordinates = match (req.latitude, req.longitude) {
            (Some(lat), Some(lng)) => Some(Coordinates { lat, lng }),
            _ => None,
        };
        self.shipping.quote(
            &Destination {
                province: &req.province,
                city: &req.city,
                coordinates,
            },
            req.subtotal,
        )
    }

    pub async fn place_order(
        &self,
        user_id: Option<String>,
        req: CreateOrderRequest,
    ) -> Result<PlacedOrder, FulfillmentError> {
        let errors = validate_request(&req);
        if !errors.is_empty() {
            return Err(FulfillmentError::Validation(errors));
        }

        let address = &req.shipping_address;
        if !self.shipping.is_serviceable(&address.province) {
            return Err(FulfillmentError::field(
                "shipping_address.province",
                format!("we do not deliver to {} yet", address.province.trim()),
            ));
        }

        let mut tx = self.store.begin_checkout().await?;

        let mut lines = Vec::with_capacity(req.items.len());
        let mut stock_errors = Vec::new();
        // Quantity claimed so far per resolved variant; several lines may
        // land on the same variant.
        let mut claimed: HashMap<String, i64> = HashMap::new();
        for (i, line) in req.items.iter().enumerate() {
            let resolved = resolve_variant(tx.as_mut(), line.variant_id.trim()).await?;
            let variant = resolved.variant;
            // Validated to 1..=MAX_LINE_QUANTITY above.
            let quantity = line.quantity as i32;

            let total_claimed = claimed.entry(variant.id.clone()).or_insert(0);
            let already_short = *total_claimed > i64::from(variant.stock);
            *total_claimed += line.quantity;
            if !already_short && *total_claimed > i64::from(variant.stock) {
                stock_errors.push(FieldError::new(
                    format!("items[{i}].quantity"),
                    format!("only {} of '{}' in stock", variant.stock.max(0), variant.name),
                ));
            }

            lines.push(PricedLine {
                variant_id: variant.id,
                product_id: variant.product_id,
                quantity,
                unit_price: line.price.unwrap_or(variant.price),
                weight_grams: variant.weight_grams,
            });
        }
        if !stock_errors.is_empty() {
            return Err(FulfillmentError::Validation(stock_errors));
        }

        let coordinates = match (address.latitude, address.longitude) {
            (Some(lat), Some(lng)) => Some(Coordinates { lat, lng }),
            _ => None,
        };
        let quote = self.shipping.quote(
            &Destination {
                province: &address.province,
                city: &address.city,
                coordinates,
            },
            pricing::subtotal(&lines),
        );
        if let Some(client_cost) = req.shipping_cost {
            if client_cost != quote.cost {
                warn!(
                    client_cost,
                    quoted_cost = quote.cost,
                    distance_km = quote.distance_km,
                    "Client shipping cost differs from quote; using quote"
                );
            }
        }

        let totals = pricing::compute_totals(&lines, quote.cost, req.discount_amount.unwrap_or(0))
            .map_err(|err| FulfillmentError::field("items", err.to_string()))?;

        let shipping_address = serde_json::to_value(address)
            .map_err(|e| FulfillmentError::field("shipping_address", e.to_string()))?;
        let new_order = NewOrder {
            order_number: generate_order_number(),
            user_id,
            customer: CustomerSnapshot {
                name: req.customer.name.trim().to_string(),
                email: req.customer.email.trim().to_string(),
                phone: non_empty(req.customer.phone.as_deref()),
            },
            shipping_address,
            subtotal: totals.subtotal,
            shipping_cost: totals.shipping_cost,
            discount_amount: totals.discount,
            total: totals.total,
            shipping_vendor: non_empty(req.shipping_vendor.as_deref())
                .unwrap_or_else(|| self.config.default_shipping_vendor.clone()),
            shipping_distance_km: Some(quote.distance_km),
            transit_days_max: quote.estimate.map(|e| e.max_days),
            total_weight_grams: pricing::total_weight(&lines),
            weight_override_grams: req.weight_override_grams,
            coupon_code: non_empty(req.coupon_code.as_deref()),
            items: lines
                .iter()
                .map(|line| NewOrderItem {
                    variant_id: line.variant_id.clone(),
                    product_id: line.product_id.clone(),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    total: line.line_total(),
                })
                .collect(),
        };

        let order = tx.insert_order(new_order).await?;
        tx.commit().await?;

        info!(
            order_number = %order.order_number,
            subtotal = order.subtotal,
            shipping_cost = order.shipping_cost,
            discount = order.discount_amount,
            total = order.total,
            items = order.items.len(),
            "Order created"
        );

        let method = non_empty(req.payment_method.as_deref()).unwrap_or_else(|| ANY_METHOD.to_string());
        let (order, payment, payment_error) = self.start_payment(order, &method).await;

        self.notifier
            .dispatch(&order, NotificationEvent::OrderPlaced)
            .await;

        Ok(PlacedOrder {
            order,
            payment,
            payment_error,
        })
    }

    /// Gateway hand-off for a freshly committed order. Never fails: the order
    /// is already durable, so problems are reported alongside it.
    async fn start_payment(
        &self,
        order: Order,
        method: &str,
    ) -> (Order, Option<PaymentSession>, Option<String>) {
        if order.total <= 0 {
            info!(order_number = %order.order_number, "Nothing to charge; payment skipped");
            return (order, None, None);
        }

        let redirect_url = self.config.tracking_url(&order.order_number);
        let session = match self
            .gateway
            .create_payment(method, &order.order_number, order.total, &redirect_url)
            .await
        {
            Ok(session) => session,
            Err(err) => {
                warn!(
                    order_number = %order.order_number,
                    error = %err,
                    "Payment creation failed; order left pending"
                );
                return (
                    order,
                    None,
                    Some("Order created, payment pending. Please retry payment.".to_string()),
                );
            }
        };

        match self.store.record_payment(order.id, &session).await {
            Ok(updated) => (updated, Some(session), None),
            Err(err) => {
                error!(
                    order_number = %order.order_number,
                    error = %err,
                    "Failed to store payment metadata"
                );
                (order, Some(session), None)
            }
        }
    }

    pub async fn get_order(&self, order_number: &str) -> Result<Order, FulfillmentError> {
        self.store
            .find_by_number(order_number)
            .await?
            .ok_or_else(|| FulfillmentError::OrderNotFound(order_number.to_string()))
    }

    /// Look up by order number, then by tracking number.
    pub async fn lookup(&self, reference: &str) -> Result<Order, FulfillmentError> {
        let reference = reference.trim();
        if let Some(order) = self.store.find_by_number(reference).await? {
            return Ok(order);
        }
        self.store
            .find_by_tracking(reference)
            .await?
            .ok_or_else(|| FulfillmentError::OrderNotFound(reference.to_string()))
    }

    /// Issue a new payment session for an order that is still unpaid.
    pub async fn retry_payment(
        &self,
        order_number: &str,
        method: Option<String>,
    ) -> Result<PlacedOrder, FulfillmentError> {
        let order = self.get_order(order_number).await?;
        if order.status != OrderStatus::Pending || order.payment_status != PaymentStatus::Pending {
            return Err(FulfillmentError::field(
                "order",
                format!(
                    "payment can only be retried for unpaid pending orders (status {}, payment {})",
                    order.status, order.payment_status
                ),
            ));
        }
        if order.total <= 0 {
            return Err(FulfillmentError::field("order", "nothing to charge"));
        }

        let method = non_empty(method.as_deref())
            .or_else(|| order.payment.payment_method.clone())
            .unwrap_or_else(|| ANY_METHOD.to_string());
        let redirect_url = self.config.tracking_url(&order.order_number);
        let session = self
            .gateway
            .create_payment(&method, &order.order_number, order.total, &redirect_url)
            .await?;
        let order = self.store.record_payment(order.id, &session).await?;

        info!(order_number = %order.order_number, method = %session.method, "Payment session reissued");
        Ok(PlacedOrder {
            order,
            payment: Some(session),
            payment_error: None,
        })
    }

    /// Ask the gateway about an unpaid order; a confirmed payment moves the
    /// order to PAID.
    pub async fn check_payment(&self, order_number: &str) -> Result<PaymentStatusResponse, FulfillmentError> {
        let order = self.get_order(order_number).await?;
        if order.status != OrderStatus::Pending || order.payment_status != PaymentStatus::Pending {
            return Ok(PaymentStatusResponse {
                order_number: order.order_number,
                payment_status: order.payment_status,
                order_status: order.status,
            });
        }

        let remote = self
            .gateway
            .check_status(&order.order_number, order.total)
            .await?;

        match remote {
            PaymentStatus::Paid => {
                let paid = self
                    .status
                    .transition(order, OrderStatus::Paid, None, &Actor::system(PAYMENT_GATEWAY_ACTOR))
                    .await?;
                Ok(PaymentStatusResponse {
                    order_number: paid.order_number,
                    payment_status: paid.payment_status,
                    order_status: paid.status,
                })
            }
            other => {
                if other == PaymentStatus::Failed {
                    warn!(order_number = %order.order_number, "Gateway reports payment failed");
                }
                Ok(PaymentStatusResponse {
                    order_number: order.order_number,
                    payment_status: other,
                    order_status: order.status,
                })
            }
        }
    }

    /// Sandbox only: behave as if the customer paid.
    pub async fn simulate_payment(&self, order_number: &str) -> Result<Order, FulfillmentError> {
        if !self.is_sandbox() {
            return Err(FulfillmentError::OrderNotFound(order_number.to_string()));
        }
        self.status
            .transition_by_number(
                order_number,
                OrderStatus::Paid.as_str(),
                None,
                &Actor::system(SANDBOX_ACTOR),
            )
            .await
    }
}

// ============================================================================
// Tests
// ============================================================================
