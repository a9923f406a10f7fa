use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::settlement;
use crate::error::AppError;
use crate::models::driver::{AccountStatus, Driver};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(register_driver).get(list_drivers))
        .route("/drivers/:id", get(get_driver))
        .route("/drivers/:id/availability", patch(update_availability))
        .route("/drivers/:id/account", patch(update_account_status))
        .route(
            "/drivers/:id/settlement-confirmation",
            post(confirm_settlement),
        )
        .route("/drivers/:id/collections/daily", get(daily_collection))
        .route("/drivers/:id/collections/pending", get(pending_settlement))
}

#[derive(Deserialize)]
pub struct RegisterDriverRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct UpdateAvailabilityRequest {
    pub is_online: bool,
}

#[derive(Deserialize)]
pub struct UpdateAccountRequest {
    pub status: AccountStatus,
}

#[derive(Deserialize)]
pub struct DailyQuery {
    pub date: NaiveDate,
}

async fn register_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterDriverRequest>,
) -> Result<Json<Driver>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::Validation("name cannot be empty".to_string()));
    }

    let now = Utc::now();
    let driver = Driver {
        id: Uuid::new_v4(),
        name: payload.name,
        is_online: false,
        account_status: AccountStatus::Pending,
        current_orders: Vec::new(),
        balance: Decimal::ZERO,
        completed_deliveries: 0,
        created_at: now,
        updated_at: now,
    };

    state.drivers.insert(driver.id, driver.clone());
    Ok(Json(driver))
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Json<Vec<Driver>> {
    let drivers = state
        .drivers
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    Json(drivers)
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    let driver = state
        .drivers
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    Ok(Json(driver.value().clone()))
}

async fn update_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateAvailabilityRequest>,
) -> Result<Json<Driver>, AppError> {
    let mut driver = state
        .drivers
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    driver.is_online = payload.is_online;
    driver.updated_at = Utc::now();

    Ok(Json(driver.clone()))
}

async fn update_account_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateAccountRequest>,
) -> Result<Json<Driver>, AppError> {
    let mut driver = state
        .drivers
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    driver.account_status = payload.status;
    driver.updated_at = Utc::now();

    Ok(Json(driver.clone()))
}

async fn confirm_settlement(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<settlement::SettlementConfirmation>, AppError> {
    let confirmation = settlement::driver_confirm_settlement(&state, id)?;
    Ok(Json(confirmation))
}

async fn daily_collection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<DailyQuery>,
) -> Result<Json<settlement::CollectionSummary>, AppError> {
    let summary = settlement::daily_collection(&state, id, query.date)?;
    Ok(Json(summary))
}

async fn pending_settlement(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<settlement::CollectionSummary>, AppError> {
    let summary = settlement::pending_settlement(&state, id)?;
    Ok(Json(summary))
}
