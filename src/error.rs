//! Error taxonomy and its HTTP mapping.
//!
//! `FulfillmentError` is what the engine returns. Route handlers convert it
//! into an [`ApiErrorResponse`]; storage details are logged and replaced by a
//! generic message before they reach a client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::engine::payment::PaymentGatewayError;
use crate::models::OrderStatus;
use crate::store::StoreError;

// ============================================================================
// Domain Error
// ============================================================================

#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// Malformed or missing input, rejected before anything is written.
    #[error("validation failed: {}", summarize(.0))]
    Validation(Vec<FieldError>),

    #[error("cart item '{id}' does not match any variant or product")]
    ItemNotFound { id: String },

    #[error("order '{0}' not found")]
    OrderNotFound(String),

    /// `to` is the raw requested status so unknown names can be reported too.
    #[error("cannot move order from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("order '{order_number}' was changed concurrently; reload and retry")]
    ConcurrentModification { order_number: String },

    /// The order is stored; only the payment step failed.
    #[error("payment gateway error: {0}")]
    PaymentGateway(#[from] PaymentGatewayError),

    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),
}

impl FulfillmentError {
    pub fn invalid_transition(from: OrderStatus, to: impl Into<String>) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.into(),
        }
    }

    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Field-level error keyed by JSON path, e.g. `items[1].quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// API Error Response
// ============================================================================

/// JSON error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

#[derive(Debug, Clone)]
pub struct ApiErrorResponse {
    pub status: StatusCode,
    pub error: ApiError,
}

impl ApiErrorResponse {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            error: ApiError {
                code: code.to_string(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(mut self, details: Vec<FieldError>) -> Self {
        self.error.details = Some(details);
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}

impl From<FulfillmentError> for ApiErrorResponse {
    fn from(err: FulfillmentError) -> Self {
        match err {
            FulfillmentError::Validation(details) => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", "Validation failed")
                    .with_details(details)
            }
            FulfillmentError::ItemNotFound { ref id } => {
                let detail = FieldError::new("items", format!("Unknown item '{id}'"));
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, "ITEM_NOT_FOUND", err.to_string())
                    .with_details(vec![detail])
            }
            FulfillmentError::OrderNotFound(_) => Self::not_found(err.to_string()),
            FulfillmentError::InvalidTransition { .. } => {
                Self::new(StatusCode::CONFLICT, "INVALID_TRANSITION", err.to_string())
            }
            FulfillmentError::ConcurrentModification { .. } => {
                Self::new(StatusCode::CONFLICT, "CONCURRENT_MODIFICATION", err.to_string())
            }
            FulfillmentError::PaymentGateway(ref gateway) => {
                error!(error = %gateway, "Payment gateway call failed");
                Self::new(
                    StatusCode::BAD_GATEWAY,
                    "PAYMENT_GATEWAY_ERROR",
                    "Payment is pending; the payment provider could not be reached, please retry payment",
                )
            }
            FulfillmentError::Persistence(ref store) => {
                error!(error = %store, "Persistence failure");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred",
                )
            }
        }
    }
}

impl IntoResponse for FulfillmentError {
    fn into_response(self) -> Response {
        ApiErrorResponse::from(self).into_response()
    }
}
