//! HTTP route modules.
//!
//! - `orders`: checkout and order lookup
//! - `payments`: payment retry, status polling and sandbox simulation
//! - `shipping`: live shipping quotes
//! - `admin`: operator status changes and privileged delete
//!
//! Handlers pull [`AppState`](crate::AppState) from an `Extension` layer and
//! return `ApiResponse<T>` on success or an `ApiErrorResponse` on failure.

pub mod admin;
pub mod orders;
pub mod payments;
pub mod shipping;

use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::error::ApiErrorResponse;
use crate::models::Actor;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const DEFAULT_ADMIN_ACTOR: &str = "admin";

/// Liveness probe.
pub fn health_router() -> Router {
    Router::new().route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
}

/// Unwrap a JSON body, turning extractor rejections into the usual error body.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiErrorResponse> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        ApiErrorResponse::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            rejection.body_text(),
        )
    })
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Already-resolved customer identity, if the auth layer attached one.
pub(crate) fn user_id(headers: &HeaderMap) -> Option<String> {
    header_value(headers, USER_ID_HEADER)
}

/// The operator behind an admin request, with the request metadata that goes
/// into the audit trail.
pub(crate) fn actor(headers: &HeaderMap, default_id: &str) -> Actor {
    let ip_address = header_value(headers, "x-forwarded-for").and_then(|forwarded| {
        forwarded
            .split(',')
            .next()
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_string)
    });

    Actor {
        id: header_value(headers, ACTOR_ID_HEADER).unwrap_or_else(|| default_id.to_string()),
        ip_address,
        user_agent: header_value(headers, "user-agent"),
    }
}
