use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Hard cap on concurrently assigned orders per driver.
pub const MAX_ACTIVE_DELIVERIES: usize = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Pending,
    Active,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub is_online: bool,
    pub account_status: AccountStatus,
    /// Orders currently assigned to this driver; len never exceeds
    /// MAX_ACTIVE_DELIVERIES, and an order id appears in at most one
    /// driver's list.
    pub current_orders: Vec<Uuid>,
    /// Card funds collected from customers and not yet settled back
    /// to the platform.
    pub balance: Decimal,
    pub completed_deliveries: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Driver {
    pub fn has_capacity(&self) -> bool {
        self.current_orders.len() < MAX_ACTIVE_DELIVERIES
    }

    pub fn can_accept(&self) -> bool {
        self.account_status == AccountStatus::Active && self.is_online
    }
}
