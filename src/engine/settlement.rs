use chrono::{NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::events::{self, Event};
use crate::models::order::PaymentMethod;
use crate::models::payment::{CardPayment, ReceiptImage, SettlementStatus};
use crate::models::transaction::{Party, Transaction, TransactionKind};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct CollectionSummary {
    pub total_amount: Decimal,
    pub count: usize,
    pub rows: Vec<CardPayment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementConfirmation {
    pub driver_id: Uuid,
    pub confirmed_count: usize,
    pub confirmed_total: Decimal,
}

/// Creates the CardPayment row for an order, exactly once. The payments
/// map is keyed by order id, so a repeat call lands on the occupied
/// entry and returns the existing row unchanged.
pub fn create_card_payment(
    state: &AppState,
    order_id: Uuid,
    driver_id: Uuid,
    customer_id: Uuid,
    amount: Decimal,
) -> Result<CardPayment, AppError> {
    let order_number = {
        let order = state
            .orders
            .get(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if order.payment_method != PaymentMethod::CardToDriver {
            return Err(AppError::Validation(format!(
                "order {} is not paid card-to-driver",
                order.number
            )));
        }
        if amount != order.total {
            return Err(AppError::Validation(format!(
                "amount {amount} does not match order total {}",
                order.total
            )));
        }
        order.number.clone()
    };

    if !state.drivers.contains_key(&driver_id) {
        return Err(AppError::NotFound(format!("driver {driver_id} not found")));
    }

    let payment = match state.payments.entry(order_id) {
        dashmap::mapref::entry::Entry::Occupied(existing) => return Ok(existing.get().clone()),
        dashmap::mapref::entry::Entry::Vacant(vacant) => {
            let payment = CardPayment::new(order_id, order_number, driver_id, customer_id, amount);
            vacant.insert(payment.clone());
            payment
        }
    };

    state.payment_index.insert(payment.id, order_id);

    if let Some(mut driver) = state.drivers.get_mut(&driver_id) {
        driver.balance += amount;
        driver.updated_at = Utc::now();
    }

    state
        .metrics
        .settlement_events_total
        .with_label_values(&["created"])
        .inc();

    info!(
        payment_id = %payment.id,
        order_id = %order_id,
        driver_id = %driver_id,
        amount = %amount,
        "card payment recorded"
    );

    Ok(payment)
}

fn resolve(state: &AppState, payment_id: Uuid) -> Result<Uuid, AppError> {
    state
        .payment_index
        .get(&payment_id)
        .map(|entry| *entry.value())
        .ok_or_else(|| AppError::NotFound(format!("payment {payment_id} not found")))
}

pub fn get_payment(state: &AppState, payment_id: Uuid) -> Result<CardPayment, AppError> {
    let order_id = resolve(state, payment_id)?;
    state
        .payments
        .get(&order_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("payment {payment_id} not found")))
}

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const PNG_MAGIC: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

fn sniff_image(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(JPEG_MAGIC) {
        Some("image/jpeg")
    } else if bytes.starts_with(PNG_MAGIC) {
        Some("image/png")
    } else {
        None
    }
}

/// Stores the receipt image metadata and md5 digest on the payment.
/// An exact-duplicate digest on another payment is a fraud signal: it
/// flips `duplicate_receipt` and is logged, but never rejects the
/// upload. Re-upload replaces the previous receipt.
pub fn upload_receipt(
    state: &AppState,
    payment_id: Uuid,
    bytes: &[u8],
) -> Result<CardPayment, AppError> {
    let order_id = resolve(state, payment_id)?;

    if bytes.is_empty() {
        return Err(AppError::InvalidImage("empty image body".to_string()));
    }
    if bytes.len() > state.max_receipt_bytes {
        return Err(AppError::InvalidImage(format!(
            "image is {} bytes, cap is {}",
            bytes.len(),
            state.max_receipt_bytes
        )));
    }
    let content_type = sniff_image(bytes)
        .ok_or_else(|| AppError::InvalidImage("only JPEG and PNG receipts accepted".to_string()))?;

    let digest = format!("{:x}", md5::compute(bytes));

    let mut payment = {
        let mut entry = state
            .payments
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("payment {payment_id} not found")))?;

        entry.receipt = Some(ReceiptImage {
            storage_ref: format!("receipts/{payment_id}/{digest}"),
            content_hash: digest.clone(),
            size_bytes: bytes.len(),
            content_type: content_type.to_string(),
            uploaded_at: Utc::now(),
        });
        // A replacement upload may clear an earlier duplicate verdict;
        // the scan below re-flags against the new digest.
        entry.duplicate_receipt = false;
        entry.clone()
    };

    // Scan after releasing the write guard; iterating the map while
    // holding one of its entries can contend on the same shard. Writing
    // our own receipt first means two concurrent identical uploads each
    // see the other's digest, so at least one gets flagged.
    let duplicate = state.payments.iter().any(|entry| {
        entry.key() != &order_id
            && entry
                .receipt
                .as_ref()
                .is_some_and(|receipt| receipt.content_hash == digest)
    });

    if duplicate {
        if let Some(mut entry) = state.payments.get_mut(&order_id) {
            entry.duplicate_receipt = true;
        }
        payment.duplicate_receipt = true;
        warn!(
            payment_id = %payment_id,
            digest = %digest,
            "receipt digest matches another payment's receipt"
        );
    }

    state
        .metrics
        .settlement_events_total
        .with_label_values(&["receipt_uploaded"])
        .inc();

    Ok(payment)
}

/// Records the customer's answer to "did you pay the driver by card?".
/// A "no" immediately disputes the payment, which is terminal for every
/// automated path.
pub fn customer_respond(
    state: &AppState,
    payment_id: Uuid,
    confirmed: bool,
) -> Result<CardPayment, AppError> {
    let order_id = resolve(state, payment_id)?;

    let (payment, disputed) = {
        let mut entry = state
            .payments
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("payment {payment_id} not found")))?;

        if entry.settlement_status != SettlementStatus::Pending {
            return Err(AppError::NotPending(format!(
                "payment {payment_id} is already {}",
                entry.settlement_status.as_str()
            )));
        }

        entry.customer_confirmed = Some(confirmed);
        entry.customer_responded_at = Some(Utc::now());

        let disputed = !confirmed;
        if disputed {
            entry.settlement_status = SettlementStatus::Disputed;
            entry.dispute_reason = Some("customer denied paying the driver by card".to_string());
        }
        (entry.clone(), disputed)
    };

    if disputed {
        warn!(payment_id = %payment_id, order_id = %order_id, "payment disputed by customer");
        state
            .metrics
            .settlement_events_total
            .with_label_values(&["disputed"])
            .inc();
        publish_settlement_change(state, &payment);
    } else {
        state
            .metrics
            .settlement_events_total
            .with_label_values(&["customer_confirmed"])
            .inc();
    }

    Ok(payment)
}

pub fn admin_verify(
    state: &AppState,
    payment_id: Uuid,
    notes: Option<String>,
) -> Result<CardPayment, AppError> {
    let order_id = resolve(state, payment_id)?;

    let payment = {
        let mut entry = state
            .payments
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("payment {payment_id} not found")))?;

        if entry.settlement_status != SettlementStatus::Pending {
            return Err(AppError::NotPending(format!(
                "payment {payment_id} is already {}",
                entry.settlement_status.as_str()
            )));
        }

        entry.admin_verified = true;
        entry.admin_verified_at = Some(Utc::now());
        entry.admin_notes = notes;
        entry.clone()
    };

    state
        .metrics
        .settlement_events_total
        .with_label_values(&["verified"])
        .inc();

    Ok(payment)
}

pub fn admin_reject(
    state: &AppState,
    payment_id: Uuid,
    reason: String,
) -> Result<CardPayment, AppError> {
    let order_id = resolve(state, payment_id)?;

    let payment = {
        let mut entry = state
            .payments
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("payment {payment_id} not found")))?;

        if entry.settlement_status != SettlementStatus::Pending {
            return Err(AppError::NotPending(format!(
                "payment {payment_id} is already {}",
                entry.settlement_status.as_str()
            )));
        }

        entry.settlement_status = SettlementStatus::Disputed;
        entry.dispute_reason = Some(reason);
        entry.admin_verified_at = Some(Utc::now());
        entry.clone()
    };

    warn!(payment_id = %payment_id, order_id = %order_id, "payment rejected by admin");
    state
        .metrics
        .settlement_events_total
        .with_label_values(&["rejected"])
        .inc();
    publish_settlement_change(state, &payment);

    Ok(payment)
}

/// Marks funds physically reconciled. Only a pending row can settle;
/// disputed and already-settled rows are refused without mutation, so a
/// retried settle call is safe.
pub fn admin_settle(
    state: &AppState,
    payment_id: Uuid,
    settled_by: String,
) -> Result<CardPayment, AppError> {
    let order_id = resolve(state, payment_id)?;

    let payment = {
        let mut entry = state
            .payments
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("payment {payment_id} not found")))?;

        if entry.settlement_status != SettlementStatus::Pending {
            return Err(AppError::NotPending(format!(
                "payment {payment_id} is already {}",
                entry.settlement_status.as_str()
            )));
        }

        entry.settlement_status = SettlementStatus::Settled;
        entry.settled_by = Some(settled_by);
        entry.settled_at = Some(Utc::now());
        entry.clone()
    };

    if let Some(mut driver) = state.drivers.get_mut(&payment.driver_id) {
        driver.balance -= payment.amount;
        driver.updated_at = Utc::now();
    }

    state.record_transaction(Transaction::completed(
        TransactionKind::Payout,
        Party::Driver(payment.driver_id),
        Party::Platform,
        payment.amount,
        payment.id.to_string(),
    ));

    info!(
        payment_id = %payment_id,
        driver_id = %payment.driver_id,
        amount = %payment.amount,
        "payment settled"
    );
    state
        .metrics
        .settlement_events_total
        .with_label_values(&["settled"])
        .inc();
    publish_settlement_change(state, &payment);

    Ok(payment)
}

/// Bulk driver self-report: "I returned the money". Evidence only — it
/// stamps a flag on the driver's pending rows and never moves
/// `settlement_status`; clearing the obligation still takes an admin
/// settle per row.
pub fn driver_confirm_settlement(
    state: &AppState,
    driver_id: Uuid,
) -> Result<SettlementConfirmation, AppError> {
    if !state.drivers.contains_key(&driver_id) {
        return Err(AppError::NotFound(format!("driver {driver_id} not found")));
    }

    let now = Utc::now();
    let mut confirmed_count = 0;
    let mut confirmed_total = Decimal::ZERO;

    for mut entry in state.payments.iter_mut() {
        if entry.driver_id == driver_id && entry.settlement_status == SettlementStatus::Pending {
            entry.driver_confirmed_settlement = true;
            entry.driver_confirmed_at = Some(now);
            confirmed_count += 1;
            confirmed_total += entry.amount;
        }
    }

    info!(
        driver_id = %driver_id,
        count = confirmed_count,
        total = %confirmed_total,
        "driver self-reported settlement"
    );
    state
        .metrics
        .settlement_events_total
        .with_label_values(&["driver_confirmed"])
        .inc();

    Ok(SettlementConfirmation {
        driver_id,
        confirmed_count,
        confirmed_total,
    })
}

/// All of the driver's payments created on `date`, viewed in the
/// configured local offset.
pub fn daily_collection(
    state: &AppState,
    driver_id: Uuid,
    date: NaiveDate,
) -> Result<CollectionSummary, AppError> {
    if !state.drivers.contains_key(&driver_id) {
        return Err(AppError::NotFound(format!("driver {driver_id} not found")));
    }

    let rows = collect(state, |payment| {
        payment.driver_id == driver_id
            && payment
                .created_at
                .with_timezone(&state.local_offset)
                .date_naive()
                == date
    });

    Ok(summarize(rows))
}

/// Everything the driver still owes the platform: pending rows
/// regardless of date.
pub fn pending_settlement(
    state: &AppState,
    driver_id: Uuid,
) -> Result<CollectionSummary, AppError> {
    if !state.drivers.contains_key(&driver_id) {
        return Err(AppError::NotFound(format!("driver {driver_id} not found")));
    }

    let rows = collect(state, |payment| {
        payment.driver_id == driver_id && payment.settlement_status == SettlementStatus::Pending
    });
    let summary = summarize(rows);

    state
        .metrics
        .driver_pending_settlement
        .with_label_values(&[&driver_id.to_string()])
        .set(summary.total_amount.to_f64().unwrap_or(0.0));

    Ok(summary)
}

pub fn list_payments(state: &AppState, status: Option<SettlementStatus>) -> Vec<CardPayment> {
    let mut rows = collect(state, |payment| {
        status.is_none_or(|wanted| payment.settlement_status == wanted)
    });
    rows.sort_by_key(|payment| payment.created_at);
    rows
}

fn collect(state: &AppState, keep: impl Fn(&CardPayment) -> bool) -> Vec<CardPayment> {
    state
        .payments
        .iter()
        .filter(|entry| keep(entry.value()))
        .map(|entry| entry.value().clone())
        .collect()
}

fn summarize(mut rows: Vec<CardPayment>) -> CollectionSummary {
    rows.sort_by_key(|payment| payment.created_at);
    let total_amount = rows.iter().map(|payment| payment.amount).sum();
    CollectionSummary {
        total_amount,
        count: rows.len(),
        rows,
    }
}

fn publish_settlement_change(state: &AppState, payment: &CardPayment) {
    events::publish(
        state,
        events::payment_channels(payment),
        Event::SettlementChanged {
            payment_id: payment.id,
            order_id: payment.order_id,
            status: payment.settlement_status,
            at: Utc::now(),
        },
    );
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::*;
    use crate::models::driver::{AccountStatus, Driver};
    use crate::models::order::{Order, OrderItem, OrderStatus, TimelineEntry};
    use crate::state::AppState;

    fn card_order(state: &AppState, customer_id: Uuid, total: Decimal) -> Uuid {
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            number: state.next_order_number(),
            customer_id,
            vendor_id: Uuid::new_v4(),
            driver_id: None,
            items: vec![OrderItem {
                product_id: Uuid::new_v4(),
                name: "lunch set".to_string(),
                quantity: 1,
                unit_price: total,
                line_total: total,
            }],
            subtotal: total,
            delivery_fee: dec!(0),
            discount: dec!(0),
            total,
            payment_method: PaymentMethod::CardToDriver,
            delivery_address: "12 Harbor Rd".to_string(),
            status: OrderStatus::Assigned,
            timeline: vec![TimelineEntry {
                status: OrderStatus::Pending,
                at: now,
                note: None,
            }],
            created_at: now,
            updated_at: now,
        };
        let id = order.id;
        state.orders.insert(id, order);
        id
    }

    fn active_driver(state: &AppState) -> Uuid {
        let now = Utc::now();
        let driver = Driver {
            id: Uuid::new_v4(),
            name: "Samir".to_string(),
            is_online: true,
            account_status: AccountStatus::Active,
            current_orders: Vec::new(),
            balance: dec!(0),
            completed_deliveries: 0,
            created_at: now,
            updated_at: now,
        };
        let id = driver.id;
        state.drivers.insert(id, driver);
        id
    }

    fn seeded() -> (AppState, Uuid, Uuid, Uuid) {
        let state = AppState::new(16, 0, 1024 * 1024);
        let customer_id = Uuid::new_v4();
        let order_id = card_order(&state, customer_id, dec!(55000));
        let driver_id = active_driver(&state);
        (state, order_id, driver_id, customer_id)
    }

    #[test]
    fn create_is_idempotent_and_credits_the_driver_once() {
        let (state, order_id, driver_id, customer_id) = seeded();

        let first =
            create_card_payment(&state, order_id, driver_id, customer_id, dec!(55000)).unwrap();
        let second =
            create_card_payment(&state, order_id, driver_id, customer_id, dec!(55000)).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(state.payments.len(), 1);
        assert_eq!(
            state.drivers.get(&driver_id).unwrap().balance,
            dec!(55000)
        );
    }

    #[test]
    fn create_rejects_an_amount_that_does_not_match_the_order_total() {
        let (state, order_id, driver_id, customer_id) = seeded();

        let result = create_card_payment(&state, order_id, driver_id, customer_id, dec!(50000));
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(state.payments.is_empty());
    }

    #[test]
    fn customer_denial_disputes_and_blocks_settlement() {
        let (state, order_id, driver_id, customer_id) = seeded();
        let payment =
            create_card_payment(&state, order_id, driver_id, customer_id, dec!(55000)).unwrap();

        let disputed = customer_respond(&state, payment.id, false).unwrap();
        assert_eq!(disputed.settlement_status, SettlementStatus::Disputed);

        let result = admin_settle(&state, payment.id, "ops".to_string());
        assert!(matches!(result, Err(AppError::NotPending(_))));

        let row = get_payment(&state, payment.id).unwrap();
        assert_eq!(row.settlement_status, SettlementStatus::Disputed);
        assert!(row.settled_by.is_none());
    }

    #[test]
    fn settle_clears_the_driver_balance_and_writes_a_payout_row() {
        let (state, order_id, driver_id, customer_id) = seeded();
        let payment =
            create_card_payment(&state, order_id, driver_id, customer_id, dec!(55000)).unwrap();

        let settled = admin_settle(&state, payment.id, "ops".to_string()).unwrap();
        assert_eq!(settled.settlement_status, SettlementStatus::Settled);
        assert_eq!(settled.settled_by.as_deref(), Some("ops"));
        assert_eq!(state.drivers.get(&driver_id).unwrap().balance, dec!(0));

        let payout = state
            .transactions
            .iter()
            .find(|entry| entry.kind == TransactionKind::Payout)
            .expect("payout transaction recorded");
        assert_eq!(payout.amount, dec!(55000));
        assert_eq!(payout.from, Party::Driver(driver_id));
        assert_eq!(payout.to, Party::Platform);

        let again = admin_settle(&state, payment.id, "ops".to_string());
        assert!(matches!(again, Err(AppError::NotPending(_))));
        assert_eq!(state.drivers.get(&driver_id).unwrap().balance, dec!(0));
    }

    #[test]
    fn non_image_receipt_is_rejected() {
        let (state, order_id, driver_id, customer_id) = seeded();
        let payment =
            create_card_payment(&state, order_id, driver_id, customer_id, dec!(55000)).unwrap();

        let result = upload_receipt(&state, payment.id, b"definitely not an image");
        assert!(matches!(result, Err(AppError::InvalidImage(_))));

        let empty = upload_receipt(&state, payment.id, b"");
        assert!(matches!(empty, Err(AppError::InvalidImage(_))));
    }

    #[test]
    fn matching_receipt_digest_on_another_payment_is_flagged_not_rejected() {
        let (state, first_order, driver_id, customer_id) = seeded();
        let second_order = card_order(&state, customer_id, dec!(55000));

        let first =
            create_card_payment(&state, first_order, driver_id, customer_id, dec!(55000)).unwrap();
        let second =
            create_card_payment(&state, second_order, driver_id, customer_id, dec!(55000)).unwrap();

        let image = [&[0xFF, 0xD8, 0xFF][..], b"same receipt bytes"].concat();
        let first = upload_receipt(&state, first.id, &image).unwrap();
        assert!(!first.duplicate_receipt);

        let second = upload_receipt(&state, second.id, &image).unwrap();
        assert!(second.duplicate_receipt);
    }

    #[test]
    fn replacement_receipt_recomputes_the_duplicate_flag() {
        let (state, first_order, driver_id, customer_id) = seeded();
        let second_order = card_order(&state, customer_id, dec!(55000));

        let first =
            create_card_payment(&state, first_order, driver_id, customer_id, dec!(55000)).unwrap();
        let second =
            create_card_payment(&state, second_order, driver_id, customer_id, dec!(55000)).unwrap();

        let image = [&[0xFF, 0xD8, 0xFF][..], b"same receipt bytes"].concat();
        upload_receipt(&state, first.id, &image).unwrap();
        let flagged = upload_receipt(&state, second.id, &image).unwrap();
        assert!(flagged.duplicate_receipt);

        let fresh = [
            &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A][..],
            b"a different receipt",
        ]
        .concat();
        let replaced = upload_receipt(&state, second.id, &fresh).unwrap();
        assert!(!replaced.duplicate_receipt);
        assert!(!get_payment(&state, second.id).unwrap().duplicate_receipt);
    }

    #[test]
    fn driver_self_report_stamps_pending_rows_but_settles_nothing() {
        let (state, order_id, driver_id, customer_id) = seeded();
        let payment =
            create_card_payment(&state, order_id, driver_id, customer_id, dec!(55000)).unwrap();

        let confirmation = driver_confirm_settlement(&state, driver_id).unwrap();
        assert_eq!(confirmation.confirmed_count, 1);
        assert_eq!(confirmation.confirmed_total, dec!(55000));

        let row = get_payment(&state, payment.id).unwrap();
        assert!(row.driver_confirmed_settlement);
        assert_eq!(row.settlement_status, SettlementStatus::Pending);
    }

    #[test]
    fn pending_settlement_matches_an_independent_recomputation() {
        let (state, first_order, driver_id, customer_id) = seeded();
        let second_order = card_order(&state, customer_id, dec!(20000));
        let first =
            create_card_payment(&state, first_order, driver_id, customer_id, dec!(55000)).unwrap();
        create_card_payment(&state, second_order, driver_id, customer_id, dec!(20000)).unwrap();

        admin_settle(&state, first.id, "ops".to_string()).unwrap();

        let summary = pending_settlement(&state, driver_id).unwrap();
        let recomputed: Decimal = state
            .payments
            .iter()
            .filter(|entry| {
                entry.driver_id == driver_id
                    && entry.settlement_status == SettlementStatus::Pending
            })
            .map(|entry| entry.amount)
            .sum();

        assert_eq!(summary.total_amount, recomputed);
        assert_eq!(summary.total_amount, dec!(20000));
        assert_eq!(summary.count, 1);
    }

    #[test]
    fn daily_collection_buckets_by_the_configured_local_day() {
        let (state, order_id, driver_id, customer_id) = seeded();
        create_card_payment(&state, order_id, driver_id, customer_id, dec!(55000)).unwrap();

        let today = Utc::now().with_timezone(&state.local_offset).date_naive();
        let summary = daily_collection(&state, driver_id, today).unwrap();
        assert_eq!(summary.count, 1);
        assert_eq!(summary.total_amount, dec!(55000));

        let yesterday = today.pred_opt().unwrap();
        let empty = daily_collection(&state, driver_id, yesterday).unwrap();
        assert_eq!(empty.count, 0);
        assert_eq!(empty.total_amount, dec!(0));
    }
}
