//! # Storefront Fulfillment
//!
//! Order fulfillment and payment orchestration for the storefront: checkout,
//! authoritative totals and shipping, payment gateway hand-off, and the order
//! status state machine with its notifications and audit trail.
//!
//! Exposes the Axum router and modules so integration tests can create an
//! in-process server over the in-memory stores.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod routes;
pub mod store;

use std::sync::Arc;

use axum::{Extension, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::StoreConfig;
use crate::engine::notifications::{MessageChannel, NotificationDispatcher};
use crate::engine::shipping::{ShippingEngine, ShippingRates};
use crate::engine::{CheckoutService, PaymentGateway, StatusController};
use crate::store::{AuditLog, OrderStore, TemplateStore};

/// External collaborators the engine is wired against.
pub struct Collaborators {
    pub orders: Arc<dyn OrderStore>,
    pub templates: Arc<dyn TemplateStore>,
    pub audit: Arc<dyn AuditLog>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub channel: Arc<dyn MessageChannel>,
}

/// Shared handler state, cloned into every request.
#[derive(Clone)]
pub struct AppState {
    pub checkout: CheckoutService,
    pub status: StatusController,
}

impl AppState {
    pub fn new(parts: Collaborators, store: StoreConfig, rates: ShippingRates) -> Self {
        let notifier =
            NotificationDispatcher::new(parts.templates, parts.channel, store.store_name.clone());
        let status = StatusController::new(parts.orders.clone(), notifier.clone(), parts.audit);
        let checkout = CheckoutService::new(
            parts.orders,
            ShippingEngine::new(rates),
            parts.gateway,
            notifier,
            status.clone(),
            store,
        );
        Self { checkout, status }
    }
}

/// Build the Axum router with all route modules and middleware.
///
/// The caller is responsible for wiring the state. This function does NOT
/// start a server.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(routes::orders::router())
        .merge(routes::payments::router())
        .merge(routes::shipping::router())
        .merge(routes::admin::router())
        .merge(routes::health_router())
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
