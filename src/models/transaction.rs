use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Payment,
    Refund,
    Payout,
    Commission,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "party", content = "id")]
pub enum Party {
    Customer(Uuid),
    Vendor(Uuid),
    Driver(Uuid),
    Platform,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
}

/// Immutable ledger row. Completed rows are never edited; corrections
/// are new compensating rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub kind: TransactionKind,
    pub from: Party,
    pub to: Party,
    pub amount: Decimal,
    /// Order number or payment id the movement refers to.
    pub reference: String,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn completed(
        kind: TransactionKind,
        from: Party,
        to: Party,
        amount: Decimal,
        reference: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            from,
            to,
            amount,
            reference,
            status: TransactionStatus::Completed,
            created_at: Utc::now(),
        }
    }
}
