use std::str::FromStr;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::events::{self, Event};
use crate::models::order::{Order, OrderStatus, PaymentMethod, TimelineEntry};
use crate::models::transaction::{Party, Transaction, TransactionKind};
use crate::state::AppState;

use crate::models::order::OrderStatus::{
    Accepted, Assigned, Cancelled, Delivered, OnTheWay, Pending, PickedUp, Preparing, Ready,
    Rejected,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Customer,
    Vendor,
    Driver,
    Admin,
}

impl FromStr for ActorRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(ActorRole::Customer),
            "vendor" => Ok(ActorRole::Vendor),
            "driver" => Ok(ActorRole::Driver),
            "admin" => Ok(ActorRole::Admin),
            other => Err(format!("unknown actor role: {other}")),
        }
    }
}

/// The adjacency-and-authorization table, as data. An empty role list
/// means the edge exists but is driven by the system (assignment) or by
/// admin force only.
const EDGES: &[(OrderStatus, OrderStatus, &[ActorRole])] = &[
    (Pending, Accepted, &[ActorRole::Vendor]),
    (Accepted, Preparing, &[ActorRole::Vendor]),
    (Preparing, Ready, &[ActorRole::Vendor]),
    (Ready, Assigned, &[]),
    (Assigned, PickedUp, &[ActorRole::Driver]),
    (PickedUp, OnTheWay, &[ActorRole::Driver]),
    (OnTheWay, Delivered, &[ActorRole::Driver]),
    // Customer may cancel only pre-dispatch.
    (Pending, Cancelled, &[ActorRole::Customer]),
    (Accepted, Cancelled, &[ActorRole::Customer]),
    (Preparing, Cancelled, &[ActorRole::Customer]),
    (Ready, Cancelled, &[ActorRole::Customer]),
    (Assigned, Cancelled, &[]),
    (PickedUp, Cancelled, &[]),
    (OnTheWay, Cancelled, &[]),
    // Vendor may reject any pre-assignment order.
    (Pending, Rejected, &[ActorRole::Vendor]),
    (Accepted, Rejected, &[ActorRole::Vendor]),
    (Preparing, Rejected, &[ActorRole::Vendor]),
    (Ready, Rejected, &[ActorRole::Vendor]),
    (Assigned, Rejected, &[]),
    (PickedUp, Rejected, &[]),
    (OnTheWay, Rejected, &[]),
];

/// Checks one edge of the state machine for one role. Admin may force
/// any non-self edge out of a non-terminal state; everyone else is held
/// to the table.
pub fn authorize(from: OrderStatus, to: OrderStatus, role: ActorRole) -> Result<(), AppError> {
    if from.is_terminal() {
        return Err(AppError::AlreadyTerminal(format!(
            "order is {} and can no longer change",
            from.as_str()
        )));
    }
    if from == to {
        return Err(AppError::InvalidTransition(format!(
            "order is already {}",
            from.as_str()
        )));
    }
    if role == ActorRole::Admin {
        return Ok(());
    }

    match EDGES.iter().find(|(f, t, _)| *f == from && *t == to) {
        None => Err(AppError::InvalidTransition(format!(
            "no transition from {} to {}",
            from.as_str(),
            to.as_str()
        ))),
        Some((_, _, roles)) if roles.contains(&role) => Ok(()),
        Some(_) => Err(AppError::NotAuthorized(format!(
            "{role:?} may not move an order from {} to {}",
            from.as_str(),
            to.as_str()
        ))),
    }
}

/// The only way an order's status is ever written: set the new status
/// and append the matching timeline entry in one step, so the timeline
/// tail always equals the current status.
pub(crate) fn apply(order: &mut Order, to: OrderStatus, note: Option<String>) {
    let now = Utc::now();
    order.status = to;
    order.timeline.push(TimelineEntry {
        status: to,
        at: now,
        note,
    });
    order.updated_at = now;
}

/// Follow-up work a committed transition owes other entities, applied
/// after the order guard is released.
enum SideEffect {
    ReleaseDriverSlot {
        driver_id: Uuid,
        order_id: Uuid,
    },
    CompleteDelivery {
        order_id: Uuid,
        vendor_id: Uuid,
        customer_id: Uuid,
        driver_id: Option<Uuid>,
        total: Decimal,
        number: String,
    },
    EnsureCardPayment {
        order_id: Uuid,
        driver_id: Uuid,
        customer_id: Uuid,
        amount: Decimal,
    },
}

fn effects_for(order: &Order, from: OrderStatus, to: OrderStatus) -> Vec<SideEffect> {
    let mut effects = Vec::new();
    let was_dispatched = matches!(from, Assigned | PickedUp | OnTheWay);

    match to {
        Delivered => effects.push(SideEffect::CompleteDelivery {
            order_id: order.id,
            vendor_id: order.vendor_id,
            customer_id: order.customer_id,
            driver_id: order.driver_id,
            total: order.total,
            number: order.number.clone(),
        }),
        Cancelled | Rejected if was_dispatched => {
            if let Some(driver_id) = order.driver_id {
                effects.push(SideEffect::ReleaseDriverSlot {
                    driver_id,
                    order_id: order.id,
                });
            }
        }
        Assigned if order.payment_method == PaymentMethod::CardToDriver => {
            if let Some(driver_id) = order.driver_id {
                effects.push(SideEffect::EnsureCardPayment {
                    order_id: order.id,
                    driver_id,
                    customer_id: order.customer_id,
                    amount: order.total,
                });
            }
        }
        _ => {}
    }

    effects
}

/// Transition an order through the state machine. Validation happens
/// under the order's exclusive entry guard against the current status,
/// so a concurrent duplicate request observes the advanced status and
/// is rejected without mutation.
pub fn transition(
    state: &AppState,
    order_id: Uuid,
    new_status: OrderStatus,
    role: ActorRole,
    note: Option<String>,
) -> Result<Order, AppError> {
    let (order, effects) = {
        let mut entry = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        let from = entry.status;
        if let Err(err) = authorize(from, new_status, role) {
            state
                .metrics
                .transition_rejections_total
                .with_label_values(&[err.code()])
                .inc();
            return Err(err);
        }

        apply(entry.value_mut(), new_status, note);
        let effects = effects_for(entry.value(), from, new_status);
        (entry.clone(), effects)
    };

    run_effects(state, &effects);

    state
        .metrics
        .order_transitions_total
        .with_label_values(&[new_status.as_str()])
        .inc();

    info!(
        order_id = %order.id,
        number = %order.number,
        status = new_status.as_str(),
        role = ?role,
        "order transitioned"
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

/// Removes an order from a driver's active list. Idempotent: releasing
/// an already-released slot is a no-op, which makes retries safe.
pub(crate) fn release_driver_slot(state: &AppState, driver_id: Uuid, order_id: Uuid) {
    if let Some(mut driver) = state.drivers.get_mut(&driver_id) {
        let before = driver.current_orders.len();
        driver.current_orders.retain(|id| *id != order_id);
        if driver.current_orders.len() != before {
            driver.updated_at = Utc::now();
        }
    }
}

fn run_effects(state: &AppState, effects: &[SideEffect]) {
    for effect in effects {
        match effect {
            SideEffect::ReleaseDriverSlot {
                driver_id,
                order_id,
            } => release_driver_slot(state, *driver_id, *order_id),
            SideEffect::CompleteDelivery {
                order_id,
                vendor_id,
                customer_id,
                driver_id,
                total,
                number,
            } => {
                {
                    let mut stats = state.vendor_stats.entry(*vendor_id).or_default();
                    stats.completed_orders += 1;
                    stats.updated_at = Utc::now();
                }

                if let Some(driver_id) = driver_id {
                    if let Some(mut driver) = state.drivers.get_mut(driver_id) {
                        driver.current_orders.retain(|id| id != order_id);
                        driver.completed_deliveries += 1;
                        driver.updated_at = Utc::now();
                    }
                }

                state.record_transaction(Transaction::completed(
                    TransactionKind::Payment,
                    Party::Customer(*customer_id),
                    Party::Vendor(*vendor_id),
                    *total,
                    number.clone(),
                ));
            }
            SideEffect::EnsureCardPayment {
                order_id,
                driver_id,
                customer_id,
                amount,
            } => {
                if let Err(err) = crate::engine::settlement::create_card_payment(
                    state,
                    *order_id,
                    *driver_id,
                    *customer_id,
                    *amount,
                ) {
                    warn!(order_id = %order_id, error = %err, "card payment bookkeeping failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn vendor_drives_the_preparation_path() {
        assert!(authorize(Pending, Accepted, ActorRole::Vendor).is_ok());
        assert!(authorize(Accepted, Preparing, ActorRole::Vendor).is_ok());
        assert!(authorize(Preparing, Ready, ActorRole::Vendor).is_ok());
    }

    #[test]
    fn driver_drives_the_delivery_path() {
        assert!(authorize(Assigned, PickedUp, ActorRole::Driver).is_ok());
        assert!(authorize(PickedUp, OnTheWay, ActorRole::Driver).is_ok());
        assert!(authorize(OnTheWay, Delivered, ActorRole::Driver).is_ok());
    }

    #[test]
    fn customer_may_cancel_only_before_dispatch() {
        for from in [Pending, Accepted, Preparing, Ready] {
            assert!(authorize(from, Cancelled, ActorRole::Customer).is_ok());
        }
        for from in [Assigned, PickedUp, OnTheWay] {
            assert!(matches!(
                authorize(from, Cancelled, ActorRole::Customer),
                Err(AppError::NotAuthorized(_))
            ));
        }
    }

    #[test]
    fn wrong_role_on_a_real_edge_is_not_authorized_not_invalid() {
        assert!(matches!(
            authorize(OnTheWay, Delivered, ActorRole::Vendor),
            Err(AppError::NotAuthorized(_))
        ));
        assert!(matches!(
            authorize(Pending, Accepted, ActorRole::Customer),
            Err(AppError::NotAuthorized(_))
        ));
    }

    #[test]
    fn skipping_states_is_an_invalid_transition() {
        assert!(matches!(
            authorize(Pending, Delivered, ActorRole::Driver),
            Err(AppError::InvalidTransition(_))
        ));
        assert!(matches!(
            authorize(Accepted, Assigned, ActorRole::Vendor),
            Err(AppError::InvalidTransition(_))
        ));
    }

    #[test]
    fn admin_may_force_any_edge_out_of_a_live_state() {
        assert!(authorize(Pending, Delivered, ActorRole::Admin).is_ok());
        assert!(authorize(OnTheWay, Cancelled, ActorRole::Admin).is_ok());
        assert!(authorize(Ready, Assigned, ActorRole::Admin).is_ok());
    }

    #[test]
    fn terminal_states_refuse_everyone_including_admin() {
        for from in [Delivered, Cancelled, Rejected] {
            for role in [
                ActorRole::Customer,
                ActorRole::Vendor,
                ActorRole::Driver,
                ActorRole::Admin,
            ] {
                assert!(matches!(
                    authorize(from, Pending, role),
                    Err(AppError::AlreadyTerminal(_))
                ));
            }
        }
    }

    #[test]
    fn self_loops_are_rejected_for_admin_too() {
        assert!(matches!(
            authorize(Preparing, Preparing, ActorRole::Admin),
            Err(AppError::InvalidTransition(_))
        ));
    }
}
