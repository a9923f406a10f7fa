pub mod drivers;
pub mod orders;
pub mod payments;
pub mod ws;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::models::transaction::Transaction;
use crate::models::vendor::VendorStats;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(orders::router())
        .merge(drivers::router())
        .merge(payments::router())
        .route("/vendors/:id/stats", get(vendor_stats))
        .route("/transactions", get(list_transactions))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    orders: usize,
    drivers: usize,
    payments: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        orders: state.orders.len(),
        drivers: state.drivers.len(),
        payments: state.payments.len(),
    })
}

async fn vendor_stats(
    State(state): State<Arc<AppState>>,
    axum::extract::Path(id): axum::extract::Path<uuid::Uuid>,
) -> Json<VendorStats> {
    let stats = state
        .vendor_stats
        .get(&id)
        .map(|entry| entry.value().clone())
        .unwrap_or_default();
    Json(stats)
}

async fn list_transactions(State(state): State<Arc<AppState>>) -> Json<Vec<Transaction>> {
    let mut rows: Vec<Transaction> = state
        .transactions
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    rows.sort_by_key(|tx| tx.created_at);
    Json(rows)
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
