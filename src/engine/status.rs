//! # Status Transition Controller
//!
//! The only writer of `Order.status`. Legal moves and their side effects live
//! in one table; the controller looks a move up, persists it with a version
//! check, then runs the side effects the table grants:
//!
//! | From \ To   | PAID              | PROCESSING | SHIPPED          | DELIVERED | CANCELLED |
//! |-------------|-------------------|------------|------------------|-----------|-----------|
//! | PENDING     | notify, mark paid | notify     | tracking, notify |           | notify    |
//! | PAID        |                   | notify     | tracking, notify |           | notify    |
//! | PROCESSING  |                   |            | tracking, notify |           | notify    |
//! | SHIPPED     |                   |            |                  | notify    | notify    |
//!
//! Re-applying the current status of a non-terminal order is persisted and
//! audited with no side effects. Notification and audit failures are logged
//! and never fail the transition.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::notifications::{NotificationDispatcher, NotificationEvent};
use crate::error::FulfillmentError;
use crate::models::{Actor, AuditLogEntry, Order, OrderStatus, PaymentStatus, StatusUpdate};
use crate::store::{AuditLog, OrderStore, StoreError};

pub const TRACKING_PREFIX: &str = "TRK";

pub const AUDIT_STATUS_CHANGED: &str = "ORDER_STATUS_CHANGED";
pub const AUDIT_ORDER_DELETED: &str = "ORDER_DELETED";

// ============================================================================
// Transition Table
// ============================================================================

/// Side effects granted to a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Effects {
    pub issue_tracking: bool,
    pub notify: bool,
    pub mark_paid: bool,
}

impl Effects {
    pub const NONE: Effects = Effects {
        issue_tracking: false,
        notify: false,
        mark_paid: false,
    };
    const NOTIFY: Effects = Effects {
        issue_tracking: false,
        notify: true,
        mark_paid: false,
    };
    const SHIP: Effects = Effects {
        issue_tracking: true,
        notify: true,
        mark_paid: false,
    };
    const PAY: Effects = Effects {
        issue_tracking: false,
        notify: true,
        mark_paid: true,
    };
}

use OrderStatus::{Cancelled, Delivered, Paid, Pending, Processing, Shipped};

const TRANSITIONS: &[(OrderStatus, OrderStatus, Effects)] = &[
    (Pending, Paid, Effects::PAY),
    (Pending, Processing, Effects::NOTIFY),
    (Pending, Shipped, Effects::SHIP),
    (Pending, Cancelled, Effects::NOTIFY),
    (Paid, Processing, Effects::NOTIFY),
    (Paid, Shipped, Effects::SHIP),
    (Paid, Cancelled, Effects::NOTIFY),
    (Processing, Shipped, Effects::SHIP),
    (Processing, Cancelled, Effects::NOTIFY),
    (Shipped, Delivered, Effects::NOTIFY),
    (Shipped, Cancelled, Effects::NOTIFY),
];

/// Effects of moving `from -> to`, or `None` if the move is illegal.
/// Staying put on a non-terminal status is legal and has no effects.
pub fn lookup_transition(from: OrderStatus, to: OrderStatus) -> Option<Effects> {
    if from == to {
        return (!from.is_terminal()).then_some(Effects::NONE);
    }
    TRANSITIONS
        .iter()
        .find(|(f, t, _)| *f == from && *t == to)
        .map(|(_, _, effects)| *effects)
}

/// `TRK` + UTC `YYMMDDHHMMSS` + 4 random hex characters.
pub fn generate_tracking_number() -> String {
    format!(
        "{}{}{}",
        TRACKING_PREFIX,
        Utc::now().format("%y%m%d%H%M%S"),
        &Uuid::new_v4().to_string().replace('-', "")[..4].to_uppercase()
    )
}

// ============================================================================
// Controller
// ============================================================================

#[derive(Clone)]
pub struct StatusController {
    store: Arc<dyn OrderStore>,
    notifier: NotificationDispatcher,
    audit: Arc<dyn AuditLog>,
}

impl StatusController {
    pub fn new(
        store: Arc<dyn OrderStore>,
        notifier: NotificationDispatcher,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            store,
            notifier,
            audit,
        }
    }

    /// Load by order number, parse the requested status, and transition.
    pub async fn transition_by_number(
        &self,
        order_number: &str,
        requested_status: &str,
        tracking_number: Option<String>,
        actor: &Actor,
    ) -> Result<Order, FulfillmentError> {
        let order = self
            .store
            .find_by_number(order_number)
            .await?
            .ok_or_else(|| FulfillmentError::OrderNotFound(order_number.to_string()))?;

        let target: OrderStatus = requested_status
            .parse()
            .map_err(|_| FulfillmentError::invalid_transition(order.status, requested_status))?;

        self.transition(order, target, tracking_number, actor).await
    }

    /// Move `order` to `target`. `order` is the caller's snapshot; if the row
    /// changed since it was read the write is refused with
    /// `ConcurrentModification`.
    pub async fn transition(
        &self,
        order: Order,
        target: OrderStatus,
        tracking_number: Option<String>,
        actor: &Actor,
    ) -> Result<Order, FulfillmentError> {
        let from = order.status;
        let effects = lookup_transition(from, target)
            .ok_or_else(|| FulfillmentError::invalid_transition(from, target.as_str()))?;

        let supplied = tracking_number
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let tracking_number = match supplied {
            Some(tracking) => Some(tracking),
            None if effects.issue_tracking
                && order.is_internal_fleet()
                && order.tracking_number.is_none() =>
            {
                Some(generate_tracking_number())
            }
            None => order.tracking_number.clone(),
        };

        let payment_status = if effects.mark_paid {
            PaymentStatus::Paid
        } else {
            order.payment_status
        };

        let updated = self
            .store
            .update_status(StatusUpdate {
                order_id: order.id,
                expected_version: order.version,
                status: target,
                payment_status,
                tracking_number,
            })
            .await
            .map_err(|err| match err {
                StoreError::VersionConflict { .. } => FulfillmentError::ConcurrentModification {
                    order_number: order.order_number.clone(),
                },
                StoreError::NotFound(_) => {
                    FulfillmentError::OrderNotFound(order.order_number.clone())
                }
                StoreError::Duplicate(_) => FulfillmentError::field(
                    "tracking_number",
                    "already assigned to another order",
                ),
                other => FulfillmentError::Persistence(other),
            })?;

        let changed = from != target;
        info!(
            order_number = %updated.order_number,
            from = %from,
            to = %target,
            changed,
            actor = %actor.id,
            "Order status written"
        );

        if effects.notify {
            self.notifier
                .dispatch(&updated, NotificationEvent::StatusChanged(target))
                .await;
        }

        self.record_audit(
            actor,
            AUDIT_STATUS_CHANGED,
            &updated,
            status_snapshot(&order),
            json!({
                "status": updated.status,
                "payment_status": updated.payment_status,
                "tracking_number": updated.tracking_number,
                "changed": changed,
            }),
        )
        .await;

        Ok(updated)
    }

    /// Privileged hard delete of an order and its items.
    pub async fn delete_order(&self, order_number: &str, actor: &Actor) -> Result<(), FulfillmentError> {
        let order = self
            .store
            .find_by_number(order_number)
            .await?
            .ok_or_else(|| FulfillmentError::OrderNotFound(order_number.to_string()))?;

        if !self.store.delete_order(order.id).await? {
            return Err(FulfillmentError::OrderNotFound(order_number.to_string()));
        }
        warn!(order_number = %order_number, actor = %actor.id, "Order hard-deleted");

        self.record_audit(
            actor,
            AUDIT_ORDER_DELETED,
            &order,
            json!({
                "order_number": order.order_number,
                "status": order.status,
                "total": order.total,
                "items": order.items.len(),
            }),
            serde_json::Value::Null,
        )
        .await;
        Ok(())
    }

    async fn record_audit(
        &self,
        actor: &Actor,
        action: &str,
        order: &Order,
        old_value: serde_json::Value,
        new_value: serde_json::Value,
    ) {
        let entry = AuditLogEntry {
            id: Uuid::new_v4(),
            actor: actor.id.clone(),
            action: action.to_string(),
            entity_type: "order".to_string(),
            entity_id: order.id.to_string(),
            old_value,
            new_value,
            request_meta: actor.request_meta(),
            created_at: Utc::now(),
        };
        if let Err(err) = self.audit.append(entry).await {
            warn!(
                order_number = %order.order_number,
                action = %action,
                error = %err,
                "Failed to write audit entry"
            );
        }
    }
}

fn status_snapshot(order: &Order) -> serde_json::Value {
    json!({
        "status": order.status,
        "payment_status": order.payment_status,
        "tracking_number": order.tracking_number,
    })
}

// ============================================================================
// Tests
// ============================================================================
