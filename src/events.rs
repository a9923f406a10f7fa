use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::models::order::OrderStatus;
use crate::models::payment::SettlementStatus;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "order.status.changed")]
    OrderStatusChanged {
        order_id: Uuid,
        number: String,
        status: OrderStatus,
        at: DateTime<Utc>,
    },
    #[serde(rename = "payment.settlement.changed")]
    SettlementChanged {
        payment_id: Uuid,
        order_id: Uuid,
        status: SettlementStatus,
        at: DateTime<Utc>,
    },
    #[serde(rename = "settlement.reminder")]
    SettlementReminder {
        driver_id: Uuid,
        pending_total: Decimal,
        pending_count: usize,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub channels: Vec<String>,
    pub event: Event,
}

/// Fire-and-forget fan-out: a send error only means nobody is
/// subscribed right now, and never affects the underlying state change.
pub fn publish(state: &AppState, channels: Vec<String>, event: Event) {
    state.metrics.events_published_total.inc();
    let _ = state.events_tx.send(Notification { channels, event });
}

pub fn order_channels(order: &crate::models::order::Order) -> Vec<String> {
    let mut channels = vec![
        format!("order:{}", order.id),
        format!("customer:{}", order.customer_id),
        format!("vendor:{}", order.vendor_id),
        "admin".to_string(),
    ];
    if let Some(driver_id) = order.driver_id {
        channels.push(format!("driver:{driver_id}"));
    }
    channels
}

pub fn payment_channels(payment: &crate::models::payment::CardPayment) -> Vec<String> {
    vec![
        format!("order:{}", payment.order_id),
        format!("customer:{}", payment.customer_id),
        format!("driver:{}", payment.driver_id),
        "admin".to_string(),
    ]
}
