use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{FixedOffset, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::events::Notification;
use crate::models::driver::Driver;
use crate::models::order::Order;
use crate::models::payment::CardPayment;
use crate::models::transaction::Transaction;
use crate::models::vendor::VendorStats;
use crate::observability::metrics::Metrics;

pub struct AppState {
    pub orders: DashMap<Uuid, Order>,
    pub drivers: DashMap<Uuid, Driver>,
    /// Keyed by order id: the map key is what makes "one CardPayment
    /// per order" structural rather than checked.
    pub payments: DashMap<Uuid, CardPayment>,
    /// payment id -> order id, for callers addressing a payment directly.
    pub payment_index: DashMap<Uuid, Uuid>,
    pub transactions: DashMap<Uuid, Transaction>,
    pub vendor_stats: DashMap<Uuid, VendorStats>,
    pub events_tx: broadcast::Sender<Notification>,
    pub metrics: Metrics,
    pub local_offset: FixedOffset,
    pub max_receipt_bytes: usize,
    order_seq: AtomicU64,
}

impl AppState {
    pub fn new(event_buffer_size: usize, utc_offset_minutes: i32, max_receipt_bytes: usize) -> Self {
        // broadcast::channel panics on a zero capacity; clamp rather
        // than fail startup over a misconfigured buffer size.
        let (events_tx, _unused_rx) = broadcast::channel(event_buffer_size.max(1));
        let local_offset = FixedOffset::east_opt(utc_offset_minutes * 60)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));

        Self {
            orders: DashMap::new(),
            drivers: DashMap::new(),
            payments: DashMap::new(),
            payment_index: DashMap::new(),
            transactions: DashMap::new(),
            vendor_stats: DashMap::new(),
            events_tx,
            metrics: Metrics::new(),
            local_offset,
            max_receipt_bytes,
            order_seq: AtomicU64::new(1),
        }
    }

    /// Date-prefixed globally unique order number, e.g. ORD-20250301-0042.
    /// The date is taken in the configured local offset.
    pub fn next_order_number(&self) -> String {
        let seq = self.order_seq.fetch_add(1, Ordering::Relaxed);
        let today = Utc::now().with_timezone(&self.local_offset).date_naive();
        format!("ORD-{}-{:04}", today.format("%Y%m%d"), seq)
    }

    pub fn record_transaction(&self, tx: Transaction) {
        self.transactions.insert(tx.id, tx);
    }
}
