//! Operator routes.
//!
//! PATCH  /admin/orders/{order_number}/status - Move an order through its lifecycle
//! DELETE /admin/orders/{order_number}        - Hard-delete an order and its items
//!
//! The operator is named by `X-Actor-Id`; authentication happens upstream.

use axum::extract::rejection::JsonRejection;
use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, patch};
use axum::{Extension, Json, Router};
use tracing::info;

use super::{actor, json_body, DEFAULT_ADMIN_ACTOR};
use crate::error::ApiErrorResponse;
use crate::models::{ApiResponse, Order, UpdateStatusRequest};
use crate::AppState;

pub fn router() -> Router {
    Router::new()
        .route("/admin/orders/{order_number}/status", patch(update_status))
        .route("/admin/orders/{order_number}", delete(delete_order))
}

async fn update_status(
    Extension(state): Extension<AppState>,
    Path(order_number): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Order>>, ApiErrorResponse> {
    let req = json_body(payload)?;
    let actor = actor(&headers, DEFAULT_ADMIN_ACTOR);

    let order = state
        .status
        .transition_by_number(&order_number, &req.status, req.tracking_number, &actor)
        .await?;

    info!(order_number = %order.order_number, status = %order.status, actor = %actor.id, "Status updated via admin");
    Ok(Json(ApiResponse {
        message: format!("Order {} is now {}", order.order_number, order.status),
        data: order,
    }))
}

async fn delete_order(
    Extension(state): Extension<AppState>,
    Path(order_number): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiErrorResponse> {
    let actor = actor(&headers, DEFAULT_ADMIN_ACTOR);
    state.status.delete_order(&order_number, &actor).await?;
    Ok(StatusCode::NO_CONTENT)
}
