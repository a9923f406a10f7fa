use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::{settlement, transitions};
use crate::error::AppError;
use crate::events::{self, Event};
use crate::models::order::{Order, OrderStatus, PaymentMethod};
use crate::state::AppState;

/// Atomic acceptance of a ready order by a driver. Which driver to
/// offer is the caller's problem; this operation only guarantees that
/// the capacity cap and the order status hold under concurrency.
///
/// The driver slot is reserved first (the narrower entity), then the
/// order moves ready -> assigned under its own guard; if the order step
/// fails the reservation is rolled back, which is an idempotent removal.
pub fn assign(state: &AppState, order_id: Uuid, driver_id: Uuid) -> Result<Order, AppError> {
    match try_assign(state, order_id, driver_id) {
        Ok(order) => {
            state
                .metrics
                .assignments_total
                .with_label_values(&["success"])
                .inc();
            Ok(order)
        }
        Err(err) => {
            state
                .metrics
                .assignments_total
                .with_label_values(&["rejected"])
                .inc();
            Err(err)
        }
    }
}

fn try_assign(state: &AppState, order_id: Uuid, driver_id: Uuid) -> Result<Order, AppError> {
    // Cheap pre-check so an obviously wrong call never touches the
    // driver's list. The authoritative check re-runs under the guards.
    {
        let order = state
            .orders
            .get(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
        if order.status != OrderStatus::Ready {
            return Err(AppError::NotReady(format!(
                "order {} is {}, not ready",
                order.number,
                order.status.as_str()
            )));
        }
    }

    // `reserved_here` records whether this call appended the slot; the
    // compensating removal below must only undo this call's own work,
    // never a slot a concurrent duplicate of the same pair holds.
    let reserved_here = reserve_slot(state, driver_id, order_id)?;

    let order = {
        let mut entry = match state.orders.get_mut(&order_id) {
            Some(entry) => entry,
            None => {
                if reserved_here {
                    transitions::release_driver_slot(state, driver_id, order_id);
                }
                return Err(AppError::NotFound(format!("order {order_id} not found")));
            }
        };

        // CAS against the current status: a concurrent assignment of
        // the same order already moved it off `ready`.
        if entry.status != OrderStatus::Ready {
            // A duplicate of this exact call already finished the job;
            // report success and keep the slot intact.
            if entry.status == OrderStatus::Assigned && entry.driver_id == Some(driver_id) {
                return Ok(entry.clone());
            }
            let status = entry.status;
            drop(entry);
            if reserved_here {
                transitions::release_driver_slot(state, driver_id, order_id);
            }
            return Err(AppError::NotReady(format!(
                "order {order_id} is {}, not ready",
                status.as_str()
            )));
        }

        entry.driver_id = Some(driver_id);
        transitions::apply(entry.value_mut(), OrderStatus::Assigned, None);
        entry.clone()
    };

    if order.payment_method == PaymentMethod::CardToDriver {
        // Idempotent: a retried assignment finds the existing row. The
        // assignment itself is already committed at this point, so a
        // bookkeeping failure is logged rather than reported.
        if let Err(err) = settlement::create_card_payment(
            state,
            order.id,
            driver_id,
            order.customer_id,
            order.total,
        ) {
            warn!(order_id = %order.id, error = %err, "card payment bookkeeping failed");
        }
    }

    state
        .metrics
        .order_transitions_total
        .with_label_values(&[OrderStatus::Assigned.as_str()])
        .inc();

    info!(
        order_id = %order.id,
        number = %order.number,
        driver_id = %driver_id,
        "order assigned to driver"
    );

    events::publish(
        state,
        events::order_channels(&order),
        Event::OrderStatusChanged {
            order_id: order.id,
            number: order.number.clone(),
            status: order.status,
            at: order.updated_at,
        },
    );

    Ok(order)
}

/// Capacity check and append as one read-modify-write under the
/// driver's exclusive entry guard. Two concurrent acceptances against
/// one remaining slot can never both pass the length check.
///
/// Returns whether this call appended the slot; a retry that finds the
/// slot already held returns `false` so the caller knows the slot is
/// not its own to roll back.
fn reserve_slot(state: &AppState, driver_id: Uuid, order_id: Uuid) -> Result<bool, AppError> {
    let mut driver = state
        .drivers
        .get_mut(&driver_id)
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

    if !driver.can_accept() {
        return Err(AppError::DriverUnavailable(format!(
            "driver {} is {:?}{}",
            driver.name,
            driver.account_status,
            if driver.is_online { "" } else { " and offline" }
        )));
    }

    // A retry of a partially completed assignment already holds the slot.
    if driver.current_orders.contains(&order_id) {
        return Ok(false);
    }

    if !driver.has_capacity() {
        return Err(AppError::CapacityExceeded(format!(
            "driver {} already has {} active orders",
            driver.name,
            driver.current_orders.len()
        )));
    }

    driver.current_orders.push(order_id);
    driver.updated_at = Utc::now();
    Ok(true)
}
