//! # Notification Dispatcher
//!
//! Message text comes from an ordered chain of resolvers: the active
//! template for the event first, then a built-in message per event. The
//! first resolver that produces text wins. The message goes out through a
//! single [`MessageChannel`].
//!
//! Dispatch never fails its caller. A missing contact, an empty chain or a
//! channel error is logged and reported through [`DispatchOutcome`] only.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::pricing::format_rupiah;
use crate::config::NotifyConfig;
use crate::models::{Order, OrderStatus};
use crate::store::{StoreError, TemplateStore};

/// Transit assumption when the order has no estimate stored.
const DEFAULT_TRANSIT_DAYS: i64 = 3;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("template store error: {0}")]
    Store(#[from] StoreError),

    #[error("channel transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unknown placeholder '{0}'")]
    UnknownPlaceholder(String),

    #[error("unterminated placeholder")]
    Unterminated,
}

// ============================================================================
// Events and Context
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationEvent {
    OrderPlaced,
    StatusChanged(OrderStatus),
}

impl NotificationEvent {
    pub fn template_name(&self) -> &'static str {
        match self {
            NotificationEvent::OrderPlaced
            | NotificationEvent::StatusChanged(OrderStatus::Pending) => "order_confirmation",
            NotificationEvent::StatusChanged(OrderStatus::Paid) => "order_paid",
            NotificationEvent::StatusChanged(OrderStatus::Processing) => "order_processing",
            NotificationEvent::StatusChanged(OrderStatus::Shipped) => "order_shipped",
            NotificationEvent::StatusChanged(OrderStatus::Delivered) => "order_delivered",
            NotificationEvent::StatusChanged(OrderStatus::Cancelled) => "order_cancelled",
        }
    }
}

/// Values available to `{{placeholder}}` substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContext {
    pub customer_name: String,
    pub order_number: String,
    pub total: String,
    pub tracking_number: String,
    pub estimated_delivery: String,
    pub store_name: String,
}

impl MessageContext {
    pub fn for_order(order: &Order, store_name: &str) -> Self {
        let transit_days = order
            .transit_days_max
            .map(i64::from)
            .unwrap_or(DEFAULT_TRANSIT_DAYS);
        let estimated = Utc::now() + Duration::days(transit_days);

        Self {
            customer_name: order.customer.name.clone(),
            order_number: order.order_number.clone(),
            total: format_rupiah(order.total),
            tracking_number: order
                .tracking_number
                .clone()
                .unwrap_or_else(|| "-".to_string()),
            estimated_delivery: estimated.format("%d %b %Y").to_string(),
            store_name: store_name.to_string(),
        }
    }

    fn lookup(&self, key: &str) -> Option<&str> {
        match key {
            "customer_name" | "name" => Some(&self.customer_name),
            "order_number" => Some(&self.order_number),
            "total" => Some(&self.total),
            "tracking_number" => Some(&self.tracking_number),
            "estimated_delivery" => Some(&self.estimated_delivery),
            "store_name" => Some(&self.store_name),
            _ => None,
        }
    }
}

/// Substitute every `{{key}}` in `template`. Whitespace inside the braces is
/// ignored.
pub fn render_template(template: &str, ctx: &MessageContext) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or(TemplateError::Unterminated)?;
        let key = after[..end].trim();
        let value = ctx
            .lookup(key)
            .ok_or_else(|| TemplateError::UnknownPlaceholder(key.to_string()))?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

// ============================================================================
// Resolvers
// ============================================================================

#[async_trait]
pub trait MessageResolver: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(
        &self,
        event: NotificationEvent,
        ctx: &MessageContext,
    ) -> Result<Option<String>, NotificationError>;
}

/// Active template from the template store.
pub struct TemplateResolver {
    templates: Arc<dyn TemplateStore>,
}

impl TemplateResolver {
    pub fn new(templates: Arc<dyn TemplateStore>) -> Self {
        Self { templates }
    }
}

#[async_trait]
impl MessageResolver for TemplateResolver {
    fn name(&self) -> &'static str {
        "template"
    }

    async fn resolve(
        &self,
        event: NotificationEvent,
        ctx: &MessageContext,
    ) -> Result<Option<String>, NotificationError> {
        let Some(template) = self.templates.find_active(event.template_name()).await? else {
            return Ok(None);
        };
        Ok(Some(render_template(&template.body, ctx)?))
    }
}

/// Built-in text per event.
pub struct FallbackResolver;

#[async_trait]
impl MessageResolver for FallbackResolver {
    fn name(&self) -> &'static str {
        "fallback"
    }

    async fn resolve(
        &self,
        event: NotificationEvent,
        ctx: &MessageContext,
    ) -> Result<Option<String>, NotificationError> {
        let MessageContext {
            customer_name: name,
            order_number: number,
            total,
            tracking_number: tracking,
            estimated_delivery: eta,
            store_name: store,
        } = ctx;

        let text = match event {
            NotificationEvent::OrderPlaced
            | NotificationEvent::StatusChanged(OrderStatus::Pending) => format!(
                "Hi {name}, thank you for shopping at {store}. Order {number} totalling {total} has been received and is awaiting payment."
            ),
            NotificationEvent::StatusChanged(OrderStatus::Paid) => format!(
                "Hi {name}, payment of {total} for order {number} has been received. We are preparing your package."
            ),
            NotificationEvent::StatusChanged(OrderStatus::Processing) => format!(
                "Hi {name}, order {number} is being packed by the {store} team."
            ),
            NotificationEvent::StatusChanged(OrderStatus::Shipped) => format!(
                "Hi {name}, order {number} is on its way. Tracking number: {tracking}. Estimated arrival: {eta}."
            ),
            NotificationEvent::StatusChanged(OrderStatus::Delivered) => format!(
                "Hi {name}, order {number} has been delivered. Thank you for shopping at {store}!"
            ),
            NotificationEvent::StatusChanged(OrderStatus::Cancelled) => format!(
                "Hi {name}, order {number} has been cancelled. Contact {store} if this was unexpected."
            ),
        };
        Ok(Some(text))
    }
}

// ============================================================================
// Channels
// ============================================================================

#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn send(&self, target: &str, message: &str) -> Result<(), NotificationError>;
}

/// Writes messages to the log instead of delivering them.
pub struct LogChannel;

#[async_trait]
impl MessageChannel for LogChannel {
    async fn send(&self, target: &str, message: &str) -> Result<(), NotificationError> {
        info!(target_contact = %target, message = %message, "Notification (log channel)");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    target: &'a str,
    message: &'a str,
}

/// POSTs `{ "target", "message" }` to a messaging gateway.
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            token,
        })
    }
}

#[async_trait]
impl MessageChannel for WebhookChannel {
    async fn send(&self, target: &str, message: &str) -> Result<(), NotificationError> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&WebhookPayload { target, message });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request.send().await?.error_for_status()?;
        Ok(())
    }
}

/// Webhook channel when a URL is configured, log channel otherwise.
pub fn channel_from_config(config: &NotifyConfig) -> Result<Arc<dyn MessageChannel>, reqwest::Error> {
    match &config.webhook_url {
        Some(url) => Ok(Arc::new(WebhookChannel::new(
            url.clone(),
            config.webhook_token.clone(),
        )?)),
        None => Ok(Arc::new(LogChannel)),
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    NoContact,
    NoMessage,
    Failed,
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    resolvers: Vec<Arc<dyn MessageResolver>>,
    channel: Arc<dyn MessageChannel>,
    store_name: String,
}

impl NotificationDispatcher {
    /// Template lookup first, built-in text second.
    pub fn new(
        templates: Arc<dyn TemplateStore>,
        channel: Arc<dyn MessageChannel>,
        store_name: impl Into<String>,
    ) -> Self {
        Self::with_resolvers(
            vec![
                Arc::new(TemplateResolver::new(templates)),
                Arc::new(FallbackResolver),
            ],
            channel,
            store_name,
        )
    }

    pub fn with_resolvers(
        resolvers: Vec<Arc<dyn MessageResolver>>,
        channel: Arc<dyn MessageChannel>,
        store_name: impl Into<String>,
    ) -> Self {
        Self {
            resolvers,
            channel,
            store_name: store_name.into(),
        }
    }

    async fn resolve_message(&self, event: NotificationEvent, ctx: &MessageContext) -> Option<String> {
        for resolver in &self.resolvers {
            match resolver.resolve(event, ctx).await {
                Ok(Some(message)) => {
                    debug!(resolver = resolver.name(), template = event.template_name(), "Message resolved");
                    return Some(message);
                }
                Ok(None) => continue,
                Err(err) => {
                    warn!(
                        resolver = resolver.name(),
                        template = event.template_name(),
                        error = %err,
                        "Message resolver failed; trying next"
                    );
                }
            }
        }
        None
    }

    /// Attempt one delivery for `event`. Never returns an error.
    pub async fn dispatch(&self, order: &Order, event: NotificationEvent) -> DispatchOutcome {
        let Some(target) = order.contact_channel() else {
            debug!(order_number = %order.order_number, "No contact channel on file; notification skipped");
            return DispatchOutcome::NoContact;
        };

        let ctx = MessageContext::for_order(order, &self.store_name);
        let Some(message) = self.resolve_message(event, &ctx).await else {
            warn!(order_number = %order.order_number, template = event.template_name(), "No message produced");
            return DispatchOutcome::NoMessage;
        };

        match self.channel.send(target, &message).await {
            Ok(()) => {
                info!(order_number = %order.order_number, template = event.template_name(), "Notification sent");
                DispatchOutcome::Sent
            }
            Err(err) => {
                warn!(
                    order_number = %order.order_number,
                    template = event.template_name(),
                    error = %err,
                    "Notification delivery failed"
                );
                DispatchOutcome::Failed
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{CustomerSnapshot, NotificationTemplate, PaymentDetails, PaymentStatus};
    use crate::store::InMemoryTemplateStore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;
    use uuid::Uuid;

    /// Records every send; can be told to fail.
    #[derive(Default)]
    pub(crate) struct RecordingChannel {
        sent: Mutex<Vec<(String, String)>>,
        fail: AtomicBool,
    }

    impl RecordingChannel {
        pub(crate) fn failing() -> Self {
            let channel = Self::default();
            channel.fail.store(true, Ordering::SeqCst);
            channel
        }

        pub(crate) async fn calls(&self) -> usize {
            self.sent.lock().await.len()
        }

        pub(crate) async fn messages(&self) -> Vec<(String, String)> {
            self.sent.lock().await.clone()
        }
    }

    #[async_trait]
    impl MessageChannel for RecordingChannel {
        async fn send(&self, target: &str, message: &str) -> Result<(), NotificationError> {
            self.sent
                .lock()
                .await
                .push((target.to_string(), message.to_string()));
            if self.fail.load(Ordering::SeqCst) {
                return Err(NotificationError::Template(TemplateError::Unterminated));
            }
            Ok(())
        }
    }

    fn order(phone: Option<&str>) -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            order_number: "ORD-20261016-0A1B2C3D".to_string(),
            user_id: None,
            customer: CustomerSnapshot {
                name: "Sari".to_string(),
                email: "sari@example.com".to_string(),
                phone: phone.map(str::to_string),
            },
            shipping_address: serde_json::json!({}),
            subtotal: 2_200_000,
            shipping_cost: 25_000,
            discount_amount: 0,
            total: 2_225_000,
            status: OrderStatus::Shipped,
            payment_status: PaymentStatus::Paid,
            payment: PaymentDetails::default(),
            tracking_number: Some("TRK2610161200000ABC".to_string()),
            shipping_vendor: "INTERNAL".to_string(),
            shipping_distance_km: Some(45.0),
            transit_days_max: Some(2),
            total_weight_grams: 750,
            weight_override_grams: None,
            coupon_code: None,
            version: 3,
            created_at: now,
            updated_at: now,
            items: vec![],
        }
    }

    fn context() -> MessageContext {
        MessageContext::for_order(&order(Some("0812")), "Toko Kita")
    }

    #[test]
    fn test_render_substitutes_all_placeholders() {
        let text = render_template(
            "Hi {{customer_name}}, {{ order_number }} ({{total}}) via {{store_name}}",
            &context(),
        )
        .unwrap();
        assert_eq!(
            text,
            "Hi Sari, ORD-20261016-0A1B2C3D (Rp 2.225.000) via Toko Kita"
        );
    }

    #[test]
    fn test_render_rejects_unknown_and_unterminated() {
        assert_eq!(
            render_template("Hi {{nickname}}", &context()),
            Err(TemplateError::UnknownPlaceholder("nickname".to_string()))
        );
        assert_eq!(
            render_template("Hi {{customer_name", &context()),
            Err(TemplateError::Unterminated)
        );
    }

    #[tokio::test]
    async fn test_active_template_wins() {
        let templates = InMemoryTemplateStore::new();
        templates
            .upsert(NotificationTemplate {
                name: "order_shipped".to_string(),
                body: "Paket {{order_number}} dikirim, resi {{tracking_number}}".to_string(),
                is_active: true,
            })
            .await;
        let channel = Arc::new(RecordingChannel::default());
        let dispatcher = NotificationDispatcher::new(Arc::new(templates), channel.clone(), "Toko");

        let outcome = dispatcher
            .dispatch(&order(Some("0812")), NotificationEvent::StatusChanged(OrderStatus::Shipped))
            .await;

        assert_eq!(outcome, DispatchOutcome::Sent);
        let messages = channel.messages().await;
        assert_eq!(messages[0].0, "0812");
        assert_eq!(
            messages[0].1,
            "Paket ORD-20261016-0A1B2C3D dikirim, resi TRK2610161200000ABC"
        );
    }

    #[tokio::test]
    async fn test_broken_template_falls_back_to_builtin_text() {
        let templates = InMemoryTemplateStore::new();
        templates
            .upsert(NotificationTemplate {
                name: "order_shipped".to_string(),
                body: "Hi {{nickname}}".to_string(),
                is_active: true,
            })
            .await;
        let channel = Arc::new(RecordingChannel::default());
        let dispatcher = NotificationDispatcher::new(Arc::new(templates), channel.clone(), "Toko");

        dispatcher
            .dispatch(&order(Some("0812")), NotificationEvent::StatusChanged(OrderStatus::Shipped))
            .await;

        let messages = channel.messages().await;
        assert!(messages[0].1.contains("TRK2610161200000ABC"));
        assert!(messages[0].1.starts_with("Hi Sari"));
    }

    #[tokio::test]
    async fn test_no_contact_channel_skips_send() {
        let channel = Arc::new(RecordingChannel::default());
        let dispatcher = NotificationDispatcher::new(
            Arc::new(InMemoryTemplateStore::new()),
            channel.clone(),
            "Toko",
        );

        let outcome = dispatcher
            .dispatch(&order(Some("   ")), NotificationEvent::OrderPlaced)
            .await;

        assert_eq!(outcome, DispatchOutcome::NoContact);
        assert_eq!(channel.calls().await, 0);
    }

    #[tokio::test]
    async fn test_empty_chain_produces_no_message() {
        let channel = Arc::new(RecordingChannel::default());
        let dispatcher = NotificationDispatcher::with_resolvers(vec![], channel.clone(), "Toko");

        let outcome = dispatcher
            .dispatch(&order(Some("0812")), NotificationEvent::OrderPlaced)
            .await;

        assert_eq!(outcome, DispatchOutcome::NoMessage);
        assert_eq!(channel.calls().await, 0);
    }

    #[tokio::test]
    async fn test_channel_failure_is_swallowed() {
        let dispatcher = NotificationDispatcher::new(
            Arc::new(InMemoryTemplateStore::new()),
            Arc::new(RecordingChannel::failing()),
            "Toko",
        );
        let outcome = dispatcher
            .dispatch(&order(Some("0812")), NotificationEvent::StatusChanged(OrderStatus::Delivered))
            .await;
        assert_eq!(outcome, DispatchOutcome::Failed);
    }

    #[test]
    fn test_template_names() {
        assert_eq!(NotificationEvent::OrderPlaced.template_name(), "order_confirmation");
        assert_eq!(
            NotificationEvent::StatusChanged(OrderStatus::Cancelled).template_name(),
            "order_cancelled"
        );
    }
}
