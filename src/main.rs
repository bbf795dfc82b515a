//! # Storefront Fulfillment Service
//!
//! Standalone Axum service for checkout, payment hand-off and order status
//! management.
//!
//! ## Architecture
//!
//! - Axum handles HTTP routing and request/response lifecycle
//! - SQLx manages orders, items, templates and the audit trail in Postgres
//! - reqwest talks to the payment gateway and the messaging webhook
//! - Configuration is read once from the environment (and `.env`)

use std::sync::Arc;

use tracing::{info, warn};

use storefront_fulfillment::config::AppConfig;
use storefront_fulfillment::engine::notifications::channel_from_config;
use storefront_fulfillment::engine::HttpPaymentGateway;
use storefront_fulfillment::store::{PgAuditLog, PgOrderStore, PgTemplateStore};
use storefront_fulfillment::{create_app, db, AppState, Collaborators};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "storefront_fulfillment=debug,variant_recovery=warn,tower_http=debug".into()
            }),
        )
        .init();

    info!("Starting storefront fulfillment service");

    let config = AppConfig::from_env()?;
    if config.gateway.project_slug.is_none() {
        warn!("PAYMENT_PROJECT_SLUG not set; payments will use the local mock");
    }
    if config.gateway.sandbox {
        warn!("Payment sandbox mode enabled; simulate-payment endpoint is open");
    }

    let app_db = db::connect(&config.database_url).await?;
    info!("Connected to application database; migrations complete");

    let gateway = HttpPaymentGateway::new(config.gateway.clone())?;
    let channel = channel_from_config(&config.notify)?;

    let state = AppState::new(
        Collaborators {
            orders: Arc::new(PgOrderStore::new(app_db.clone())),
            templates: Arc::new(PgTemplateStore::new(app_db.clone())),
            audit: Arc::new(PgAuditLog::new(app_db)),
            gateway: Arc::new(gateway),
            channel,
        },
        config.store.clone(),
        config.shipping.clone(),
    );

    let app = create_app(state);

    // Bind and serve
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
