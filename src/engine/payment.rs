//! # Payment Gateway Adapter
//!
//! One external provider behind a `create_payment` / `check_status` contract.
//!
//! - **Redirect path** (`method = "any"`): the hosted payment page URL is built
//!   locally from the project slug, amount, order id and redirect target. No
//!   network call.
//! - **Direct API path** (a specific method): POST to the provider's
//!   transaction-create endpoint; non-2xx responses become
//!   [`PaymentGatewayError::Upstream`].
//! - **Mock**: without a project slug both paths return a deterministic local
//!   session pointing at the order-tracking page, fee 0, expiring in 24 hours.
//!
//! Network calls are bounded by the configured timeout and retried once on
//! timeout or connect failure.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::models::{PaymentSession, PaymentStatus, Rupiah};

/// Method selector for the hosted page that lets the customer pick.
pub const ANY_METHOD: &str = "any";

const SESSION_TTL_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum PaymentGatewayError {
    #[error("payment gateway not configured: missing {0}")]
    NotConfigured(&'static str),

    #[error("gateway returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("gateway transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),

    #[error("invalid payment URL: {0}")]
    InvalidUrl(String),
}

impl PaymentGatewayError {
    /// Timeouts and connection failures get one more attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            PaymentGatewayError::Transport(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment(
        &self,
        method: &str,
        order_id: &str,
        amount: Rupiah,
        redirect_url: &str,
    ) -> Result<PaymentSession, PaymentGatewayError>;

    async fn check_status(
        &self,
        order_id: &str,
        amount: Rupiah,
    ) -> Result<PaymentStatus, PaymentGatewayError>;

    /// Whether the client may call the payment simulation endpoint.
    fn is_sandbox(&self) -> bool;
}

pub fn is_redirect_method(method: &str) -> bool {
    let method = method.trim();
    method.is_empty() || method.eq_ignore_ascii_case(ANY_METHOD)
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct CreateTransactionBody<'a> {
    project: &'a str,
    order_id: &'a str,
    amount: Rupiah,
    api_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateTransactionResponse {
    payment: GatewayPayment,
}

#[derive(Debug, Deserialize)]
struct GatewayPayment {
    #[serde(default)]
    payment_method: Option<String>,
    #[serde(default)]
    payment_number: Option<String>,
    #[serde(default)]
    fee: Rupiah,
    #[serde(default)]
    expired_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct TransactionDetailResponse {
    transaction: GatewayTransaction,
}

#[derive(Debug, Deserialize)]
struct GatewayTransaction {
    status: String,
}

fn map_remote_status(status: &str) -> PaymentStatus {
    match status.trim().to_ascii_lowercase().as_str() {
        "completed" | "paid" | "success" | "settlement" => PaymentStatus::Paid,
        "pending" | "unpaid" => PaymentStatus::Pending,
        _ => PaymentStatus::Failed,
    }
}

// ============================================================================
// HTTP Gateway
// ============================================================================

pub struct HttpPaymentGateway {
    client: Client,
    config: GatewayConfig,
}

impl HttpPaymentGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, PaymentGatewayError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn is_mock(&self) -> bool {
        self.config.project_slug.is_none()
    }

    fn backoff() -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(1))
            .with_max_times(1)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn mock_session(&self, method: &str, redirect_url: &str) -> PaymentSession {
        PaymentSession {
            payment_url: redirect_url.to_string(),
            method: method.to_string(),
            fee: 0,
            payment_code: None,
            expires_at: Utc::now() + chrono::Duration::hours(SESSION_TTL_HOURS),
        }
    }

    /// The redirect target, with the sandbox marker appended in sandbox mode.
    fn redirect_target(&self, redirect_url: &str) -> Result<String, PaymentGatewayError> {
        if !self.config.sandbox {
            return Ok(redirect_url.to_string());
        }
        let mut url =
            Url::parse(redirect_url).map_err(|e| PaymentGatewayError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut().append_pair("sandbox", "1");
        Ok(url.to_string())
    }

    fn hosted_page_url(
        &self,
        slug: &str,
        order_id: &str,
        amount: Rupiah,
        redirect_url: &str,
        method: Option<&str>,
    ) -> Result<String, PaymentGatewayError> {
        let redirect = self.redirect_target(redirect_url)?;
        let base = self.endpoint(&format!("pay/{slug}/{amount}"));
        let mut url = Url::parse_with_params(
            &base,
            &[("order_id", order_id), ("redirect", redirect.as_str())],
        )
        .map_err(|e| PaymentGatewayError::InvalidUrl(e.to_string()))?;
        if let Some(method) = method {
            url.query_pairs_mut().append_pair("method", method);
        }
        Ok(url.to_string())
    }

    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, PaymentGatewayError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentGatewayError::Upstream {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| PaymentGatewayError::InvalidResponse(e.to_string()))
    }

    async fn post_create(
        &self,
        url: &str,
        body: &CreateTransactionBody<'_>,
    ) -> Result<CreateTransactionResponse, PaymentGatewayError> {
        let response = self.client.post(url).json(body).send().await?;
        Self::decode(response).await
    }

    async fn get_detail(
        &self,
        query: &[(&str, String)],
    ) -> Result<TransactionDetailResponse, PaymentGatewayError> {
        let response = self
            .client
            .get(self.endpoint("api/transactiondetail"))
            .query(query)
            .send()
            .await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_payment(
        &self,
        method: &str,
        order_id: &str,
        amount: Rupiah,
        redirect_url: &str,
    ) -> Result<PaymentSession, PaymentGatewayError> {
        let method = if is_redirect_method(method) {
            ANY_METHOD
        } else {
            method.trim()
        };

        let Some(slug) = self.config.project_slug.as_deref() else {
            debug!(order_id = %order_id, method = %method, "No gateway credentials; issuing mock payment");
            return Ok(self.mock_session(method, redirect_url));
        };

        if method == ANY_METHOD {
            let payment_url = self.hosted_page_url(slug, order_id, amount, redirect_url, None)?;
            info!(order_id = %order_id, amount, "Redirect payment URL issued");
            return Ok(PaymentSession {
                payment_url,
                method: ANY_METHOD.to_string(),
                fee: 0,
                payment_code: None,
                expires_at: Utc::now() + chrono::Duration::hours(SESSION_TTL_HOURS),
            });
        }

        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(PaymentGatewayError::NotConfigured("PAYMENT_API_KEY"))?;
        let url = self.endpoint(&format!("api/transactioncreate/{method}"));
        let body = CreateTransactionBody {
            project: slug,
            order_id,
            amount,
            api_key,
        };

        let created = (|| async { self.post_create(&url, &body).await })
            .retry(Self::backoff())
            .when(PaymentGatewayError::is_transient)
            .notify(|err, delay| {
                warn!(order_id = %order_id, error = %err, ?delay, "Retrying gateway transaction-create");
            })
            .await?;

        let payment = created.payment;
        info!(
            order_id = %order_id,
            amount,
            method = %method,
            fee = payment.fee,
            "Direct payment transaction created"
        );

        Ok(PaymentSession {
            payment_url: self.hosted_page_url(slug, order_id, amount, redirect_url, Some(method))?,
            method: payment.payment_method.unwrap_or_else(|| method.to_string()),
            fee: payment.fee,
            payment_code: payment.payment_number,
            expires_at: payment
                .expired_at
                .unwrap_or_else(|| Utc::now() + chrono::Duration::hours(SESSION_TTL_HOURS)),
        })
    }

    async fn check_status(
        &self,
        order_id: &str,
        amount: Rupiah,
    ) -> Result<PaymentStatus, PaymentGatewayError> {
        let (Some(slug), Some(api_key)) = (
            self.config.project_slug.as_deref(),
            self.config.api_key.as_deref(),
        ) else {
            return Ok(PaymentStatus::Pending);
        };

        let query = [
            ("project", slug.to_string()),
            ("amount", amount.to_string()),
            ("order_id", order_id.to_string()),
            ("api_key", api_key.to_string()),
        ];
        let detail = (|| async { self.get_detail(&query).await })
            .retry(Self::backoff())
            .when(PaymentGatewayError::is_transient)
            .await?;

        Ok(map_remote_status(&detail.transaction.status))
    }

    fn is_sandbox(&self) -> bool {
        self.config.sandbox
    }
}

impl std::fmt::Debug for HttpPaymentGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPaymentGateway")
            .field("base_url", &self.config.base_url)
            .field("mock", &self.is_mock())
            .field("sandbox", &self.config.sandbox)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
