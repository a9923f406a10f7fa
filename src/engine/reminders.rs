use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::time::{interval, Duration};
use tracing::info;

use crate::engine::settlement;
use crate::events::{self, Event};
use crate::state::AppState;

/// Fixed-schedule sweep over every driver's pending settlement. Purely
/// read-then-notify: it never touches ledger state, so it cannot race
/// an admin settling rows mid-sweep.
pub async fn run_settlement_reminders(state: Arc<AppState>, interval_secs: u64) {
    info!(interval_secs, "settlement reminder sweep started");

    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
    ticker.tick().await; // first tick fires immediately; skip it

    loop {
        ticker.tick().await;
        sweep(&state);
    }
}

pub fn sweep(state: &AppState) {
    let start = Instant::now();
    let driver_ids: Vec<_> = state.drivers.iter().map(|entry| *entry.key()).collect();
    let mut reminded = 0usize;

    for driver_id in driver_ids {
        let summary = match settlement::pending_settlement(state, driver_id) {
            Ok(summary) => summary,
            Err(_) => continue,
        };
        if summary.count == 0 {
            continue;
        }

        reminded += 1;
        info!(
            driver_id = %driver_id,
            pending_total = %summary.total_amount,
            pending_count = summary.count,
            "driver has unsettled card collections"
        );

        events::publish(
            state,
            vec![format!("driver:{driver_id}"), "admin".to_string()],
            Event::SettlementReminder {
                driver_id,
                pending_total: summary.total_amount,
                pending_count: summary.count,
                at: Utc::now(),
            },
        );
    }

    state
        .metrics
        .reminder_sweep_seconds
        .observe(start.elapsed().as_secs_f64());

    if reminded > 0 {
        info!(reminded, "settlement reminder sweep finished");
    }
}
