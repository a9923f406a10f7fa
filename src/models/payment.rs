use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Pending,
    Settled,
    Disputed,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::Settled => "settled",
            SettlementStatus::Disputed => "disputed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptImage {
    pub storage_ref: String,
    /// md5 hex digest of the image bytes, used to flag exact-duplicate
    /// receipts across payments.
    pub content_hash: String,
    pub size_bytes: usize,
    pub content_type: String,
    pub uploaded_at: DateTime<Utc>,
}

/// One row per card-to-driver order, recording the funds a driver holds
/// on the platform's behalf. Never deleted; settlement and dispute state
/// only moves forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardPayment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub order_number: String,
    pub driver_id: Uuid,
    pub customer_id: Uuid,
    pub amount: Decimal,
    pub receipt: Option<ReceiptImage>,
    pub duplicate_receipt: bool,
    pub customer_confirmed: Option<bool>,
    pub customer_responded_at: Option<DateTime<Utc>>,
    pub admin_verified: bool,
    pub admin_verified_at: Option<DateTime<Utc>>,
    pub admin_notes: Option<String>,
    pub driver_confirmed_settlement: bool,
    pub driver_confirmed_at: Option<DateTime<Utc>>,
    pub settlement_status: SettlementStatus,
    pub settled_by: Option<String>,
    pub settled_at: Option<DateTime<Utc>>,
    pub dispute_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CardPayment {
    pub fn new(
        order_id: Uuid,
        order_number: String,
        driver_id: Uuid,
        customer_id: Uuid,
        amount: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            order_number,
            driver_id,
            customer_id,
            amount,
            receipt: None,
            duplicate_receipt: false,
            customer_confirmed: None,
            customer_responded_at: None,
            admin_verified: false,
            admin_verified_at: None,
            admin_notes: None,
            driver_confirmed_settlement: false,
            driver_confirmed_at: None,
            settlement_status: SettlementStatus::Pending,
            settled_by: None,
            settled_at: None,
            dispute_reason: None,
            created_at: Utc::now(),
        }
    }
}
