use std::sync::Arc;

use chrono::Utc;
use marketplace_core::engine::transitions::ActorRole;
use marketplace_core::engine::{assignment, reminders, settlement, transitions};
use marketplace_core::models::driver::{AccountStatus, Driver, MAX_ACTIVE_DELIVERIES};
use marketplace_core::models::order::{
    Order, OrderItem, OrderStatus, PaymentMethod, TimelineEntry,
};
use marketplace_core::state::AppState;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn seed_order(
    state: &AppState,
    status: OrderStatus,
    payment_method: PaymentMethod,
    total: Decimal,
) -> Uuid {
    let now = Utc::now();
    let order = Order {
        id: Uuid::new_v4(),
        number: state.next_order_number(),
        customer_id: Uuid::new_v4(),
        vendor_id: Uuid::new_v4(),
        driver_id: None,
        items: vec![OrderItem {
            product_id: Uuid::new_v4(),
            name: "noodle box".to_string(),
            quantity: 1,
            unit_price: total,
            line_total: total,
        }],
        subtotal: total,
        delivery_fee: dec!(0),
        discount: dec!(0),
        total,
        payment_method,
        delivery_address: "9 Dock Lane".to_string(),
        status,
        timeline: vec![TimelineEntry {
            status,
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

fn seed_driver(state: &AppState) -> Uuid {
    let now = Utc::now();
    let driver = Driver {
        id: Uuid::new_v4(),
        name: "Rosa".to_string(),
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

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_assignments_never_exceed_the_capacity_cap() {
    let state = Arc::new(AppState::new(64, 0, 1024));
    let driver_id = seed_driver(&state);

    let order_ids: Vec<Uuid> = (0..6)
        .map(|_| seed_order(&state, OrderStatus::Ready, PaymentMethod::Online, dec!(10000)))
        .collect();

    let mut handles = Vec::new();
    for order_id in order_ids.clone() {
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            assignment::assign(&state, order_id, driver_id).is_ok()
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap() {
            successes += 1;
        }
    }

    assert_eq!(successes, MAX_ACTIVE_DELIVERIES);
    let driver = state.drivers.get(&driver_id).unwrap();
    assert_eq!(driver.current_orders.len(), MAX_ACTIVE_DELIVERIES);

    // Losers were left untouched at ready.
    let still_ready = order_ids
        .iter()
        .filter(|id| state.orders.get(id).unwrap().status == OrderStatus::Ready)
        .count();
    assert_eq!(still_ready, order_ids.len() - MAX_ACTIVE_DELIVERIES);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_order_lands_on_exactly_one_driver() {
    let state = Arc::new(AppState::new(64, 0, 1024));
    let order_id = seed_order(&state, OrderStatus::Ready, PaymentMethod::Online, dec!(10000));
    let first_driver = seed_driver(&state);
    let second_driver = seed_driver(&state);

    let mut handles = Vec::new();
    for driver_id in [first_driver, second_driver] {
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            assignment::assign(&state, order_id, driver_id).is_ok()
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap() {
            successes += 1;
        }
    }
    assert_eq!(successes, 1);

    let holders = [first_driver, second_driver]
        .iter()
        .filter(|id| {
            state
                .drivers
                .get(id)
                .unwrap()
                .current_orders
                .contains(&order_id)
        })
        .count();
    assert_eq!(holders, 1);
    assert_eq!(state.orders.get(&order_id).unwrap().status, OrderStatus::Assigned);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_assignment_of_the_same_pair_keeps_the_slot() {
    // A retried acceptance races its twin: whichever caller loses the
    // order update must not strip the slot the winner holds.
    for _ in 0..50 {
        let state = Arc::new(AppState::new(64, 0, 1024));
        let order_id = seed_order(&state, OrderStatus::Ready, PaymentMethod::Online, dec!(10000));
        let driver_id = seed_driver(&state);

        let mut handles = Vec::new();
        for _ in 0..2 {
            let state = state.clone();
            handles.push(tokio::spawn(async move {
                assignment::assign(&state, order_id, driver_id).is_ok()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert!(successes >= 1);

        let order = state.orders.get(&order_id).unwrap();
        assert_eq!(order.status, OrderStatus::Assigned);
        assert_eq!(order.driver_id, Some(driver_id));

        let driver = state.drivers.get(&driver_id).unwrap();
        assert_eq!(driver.current_orders, vec![order_id]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_transition_is_never_applied_twice_for_the_same_prior_status() {
    let state = Arc::new(AppState::new(64, 0, 1024));
    let order_id = seed_order(&state, OrderStatus::Pending, PaymentMethod::Online, dec!(10000));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            transitions::transition(
                &state,
                order_id,
                OrderStatus::Accepted,
                ActorRole::Vendor,
                None,
            )
            .is_ok()
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap() {
            successes += 1;
        }
    }
    assert_eq!(successes, 1);

    let order = state.orders.get(&order_id).unwrap();
    assert_eq!(order.status, OrderStatus::Accepted);
    assert_eq!(order.timeline.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_payment_creation_yields_one_row_and_one_credit() {
    let state = Arc::new(AppState::new(64, 0, 1024));
    let order_id = seed_order(
        &state,
        OrderStatus::Assigned,
        PaymentMethod::CardToDriver,
        dec!(55000),
    );
    let driver_id = seed_driver(&state);
    let customer_id = state.orders.get(&order_id).unwrap().customer_id;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            settlement::create_card_payment(&state, order_id, driver_id, customer_id, dec!(55000))
                .unwrap()
                .id
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }

    assert_eq!(ids.iter().collect::<std::collections::HashSet<_>>().len(), 1);
    assert_eq!(state.payments.len(), 1);
    assert_eq!(state.drivers.get(&driver_id).unwrap().balance, dec!(55000));
}

#[tokio::test]
async fn timeline_tail_matches_status_at_every_step() {
    let state = Arc::new(AppState::new(64, 0, 1024));
    let order_id = seed_order(&state, OrderStatus::Pending, PaymentMethod::Online, dec!(10000));
    let driver_id = seed_driver(&state);

    let steps = [
        (OrderStatus::Accepted, ActorRole::Vendor),
        (OrderStatus::Preparing, ActorRole::Vendor),
        (OrderStatus::Ready, ActorRole::Vendor),
    ];
    for (status, role) in steps {
        transitions::transition(&state, order_id, status, role, None).unwrap();
        let order = state.orders.get(&order_id).unwrap();
        assert!(!order.timeline.is_empty());
        assert_eq!(order.timeline.last().unwrap().status, order.status);
    }

    assignment::assign(&state, order_id, driver_id).unwrap();
    {
        let order = state.orders.get(&order_id).unwrap();
        assert_eq!(order.timeline.len(), 5);
        assert_eq!(order.timeline.last().unwrap().status, OrderStatus::Assigned);
    }

    for status in [
        OrderStatus::PickedUp,
        OrderStatus::OnTheWay,
        OrderStatus::Delivered,
    ] {
        transitions::transition(&state, order_id, status, ActorRole::Driver, None).unwrap();
        let order = state.orders.get(&order_id).unwrap();
        assert_eq!(order.timeline.last().unwrap().status, order.status);
    }

    assert!(state
        .drivers
        .get(&driver_id)
        .unwrap()
        .current_orders
        .is_empty());
}

#[tokio::test]
async fn cancelling_a_dispatched_order_releases_the_driver_slot() {
    let state = Arc::new(AppState::new(64, 0, 1024));
    let order_id = seed_order(&state, OrderStatus::Ready, PaymentMethod::Online, dec!(10000));
    let driver_id = seed_driver(&state);

    assignment::assign(&state, order_id, driver_id).unwrap();
    assert_eq!(state.drivers.get(&driver_id).unwrap().current_orders.len(), 1);

    transitions::transition(&state, order_id, OrderStatus::Cancelled, ActorRole::Admin, None)
        .unwrap();
    assert!(state
        .drivers
        .get(&driver_id)
        .unwrap()
        .current_orders
        .is_empty());
}

#[tokio::test]
async fn reminder_sweep_reads_but_never_writes() {
    let state = Arc::new(AppState::new(64, 0, 1024));
    let order_id = seed_order(
        &state,
        OrderStatus::Assigned,
        PaymentMethod::CardToDriver,
        dec!(30000),
    );
    let driver_id = seed_driver(&state);
    let customer_id = state.orders.get(&order_id).unwrap().customer_id;
    let payment =
        settlement::create_card_payment(&state, order_id, driver_id, customer_id, dec!(30000))
            .unwrap();

    let before = serde_json::to_value(&*state.payments.get(&order_id).unwrap()).unwrap();
    let balance_before = state.drivers.get(&driver_id).unwrap().balance;

    let mut rx = state.events_tx.subscribe();
    reminders::sweep(&state);

    let after = serde_json::to_value(&*state.payments.get(&order_id).unwrap()).unwrap();
    assert_eq!(before, after);
    assert_eq!(state.drivers.get(&driver_id).unwrap().balance, balance_before);
    assert_eq!(
        state.payments.get(&order_id).unwrap().id,
        payment.id
    );

    // The sweep did notify.
    let notification = rx.try_recv().expect("reminder published");
    assert!(notification
        .channels
        .contains(&format!("driver:{driver_id}")));
}
