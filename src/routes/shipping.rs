//! Shipping quote route.
//!
//! POST /shipping/quote - Quote a destination for the current cart subtotal

use axum::extract::rejection::JsonRejection;
use axum::routing::post;
use axum::{Extension, Json, Router};

use super::json_body;
use crate::engine::shipping::ShippingQuote;
use crate::error::{ApiErrorResponse, FieldError, FulfillmentError};
use crate::models::{ApiResponse, ShippingQuoteRequest};
use crate::AppState;

pub fn router() -> Router {
    Router::new().route("/shipping/quote", post(quote))
}

/// Not-serviceable destinations still answer 200 with `is_serviceable: false`
/// so the checkout page can show the message.
async fn quote(
    Extension(state): Extension<AppState>,
    payload: Result<Json<ShippingQuoteRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<ShippingQuote>>, ApiErrorResponse> {
    let req = json_body(payload)?;

    let mut errors = Vec::new();
    if req.province.trim().is_empty() {
        errors.push(FieldError::new("province", "is required"));
    }
    if req.subtotal < 0 {
        errors.push(FieldError::new("subtotal", "must not be negative"));
    }
    if !errors.is_empty() {
        return Err(FulfillmentError::Validation(errors).into());
    }

    let quote = state.checkout.quote(&req);
    Ok(Json(ApiResponse {
        message: quote.message.clone(),
        data: quote,
    }))
}
