//! Checkout and order lookup routes.
//!
//! POST /orders                     - Validate a cart, persist the order, start payment
//! GET  /orders/{order_number}      - Retrieve an order by number
//! GET  /orders/lookup/{reference}  - Retrieve an order by number or tracking number

use axum::extract::rejection::JsonRejection;
use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use tracing::info;

use super::{json_body, user_id};
use crate::error::ApiErrorResponse;
use crate::models::{ApiResponse, CreateOrderRequest, Order, PlacedOrder};
use crate::AppState;

/// Build the orders router.
pub fn router() -> Router {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/{order_number}", get(get_order))
        .route("/orders/lookup/{reference}", get(lookup_order))
}

/// Create an order from a cart.
///
/// The order is committed before the payment gateway is called, so a gateway
/// failure still answers 201 with `payment_error` set; the client should
/// retry payment rather than checkout.
async fn create_order(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<PlacedOrder>>), ApiErrorResponse> {
    let req = json_body(payload)?;
    let placed = state.checkout.place_order(user_id(&headers), req).await?;

    info!(
        order_number = %placed.order.order_number,
        payment_pending = placed.payment_error.is_some(),
        "Checkout complete"
    );

    let message = match &placed.payment_error {
        Some(_) => "Order created, payment pending. Please retry payment.".to_string(),
        None => format!("Order {} created", placed.order.order_number),
    };
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse {
            data: placed,
            message,
        }),
    ))
}

async fn get_order(
    Extension(state): Extension<AppState>,
    Path(order_number): Path<String>,
) -> Result<Json<ApiResponse<Order>>, ApiErrorResponse> {
    let order = state.checkout.get_order(&order_number).await?;
    Ok(Json(ApiResponse {
        data: order,
        message: "Order retrieved".to_string(),
    }))
}

/// Used by the support chat to answer "where is my order".
async fn lookup_order(
    Extension(state): Extension<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<ApiResponse<Order>>, ApiErrorResponse> {
    let order = state.checkout.lookup(&reference).await?;
    Ok(Json(ApiResponse {
        message: format!("Order {} is {}", order.order_number, order.status),
        data: order,
    }))
}
