//! Payment routes for existing orders.
//!
//! POST /orders/{order_number}/payment          - Issue a new payment session
//! GET  /orders/{order_number}/payment          - Poll the gateway for payment status
//! POST /orders/{order_number}/simulate-payment - Sandbox only: mark the order paid

use axum::extract::Path;
use axum::routing::post;
use axum::{Extension, Json, Router};

use crate::error::ApiErrorResponse;
use crate::models::{ApiResponse, Order, PaymentStatusResponse, PlacedOrder, RetryPaymentRequest};
use crate::AppState;

pub fn router() -> Router {
    Router::new()
        .route(
            "/orders/{order_number}/payment",
            post(retry_payment).get(payment_status),
        )
        .route("/orders/{order_number}/simulate-payment", post(simulate_payment))
}

async fn retry_payment(
    Extension(state): Extension<AppState>,
    Path(order_number): Path<String>,
    payload: Option<Json<RetryPaymentRequest>>,
) -> Result<Json<ApiResponse<PlacedOrder>>, ApiErrorResponse> {
    let method = payload.and_then(|Json(req)| req.payment_method);
    let placed = state.checkout.retry_payment(&order_number, method).await?;
    Ok(Json(ApiResponse {
        data: placed,
        message: "Payment session created".to_string(),
    }))
}

async fn payment_status(
    Extension(state): Extension<AppState>,
    Path(order_number): Path<String>,
) -> Result<Json<ApiResponse<PaymentStatusResponse>>, ApiErrorResponse> {
    let status = state.checkout.check_payment(&order_number).await?;
    Ok(Json(ApiResponse {
        message: format!("Payment is {}", status.payment_status),
        data: status,
    }))
}

async fn simulate_payment(
    Extension(state): Extension<AppState>,
    Path(order_number): Path<String>,
) -> Result<Json<ApiResponse<Order>>, ApiErrorResponse> {
    if !state.checkout.is_sandbox() {
        return Err(ApiErrorResponse::not_found("Not found"));
    }
    let order = state.checkout.simulate_payment(&order_number).await?;
    Ok(Json(ApiResponse {
        data: order,
        message: "Payment simulated".to_string(),
    }))
}
