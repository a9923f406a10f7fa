use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::settlement;
use crate::error::AppError;
use crate::models::payment::{CardPayment, SettlementStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/payments", post(create_payment).get(list_payments))
        .route("/payments/:id", get(get_payment))
        .route("/payments/:id/receipt", post(upload_receipt))
        .route("/payments/:id/customer-response", post(customer_response))
        .route("/payments/:id/verify", post(verify))
        .route("/payments/:id/reject", post(reject))
        .route("/payments/:id/settle", post(settle))
}

#[derive(Deserialize)]
pub struct CreatePaymentRequest {
    pub order_id: Uuid,
    pub driver_id: Uuid,
    pub customer_id: Uuid,
    pub amount: Decimal,
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<SettlementStatus>,
}

#[derive(Deserialize)]
pub struct CustomerResponseRequest {
    pub confirmed: bool,
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

#[derive(Deserialize)]
pub struct SettleRequest {
    pub settled_by: String,
}

async fn create_payment(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<Json<CardPayment>, AppError> {
    let payment = settlement::create_card_payment(
        &state,
        payload.order_id,
        payload.driver_id,
        payload.customer_id,
        payload.amount,
    )?;
    Ok(Json(payment))
}

async fn list_payments(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<CardPayment>> {
    Json(settlement::list_payments(&state, query.status))
}

async fn get_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CardPayment>, AppError> {
    let payment = settlement::get_payment(&state, id)?;
    Ok(Json(payment))
}

async fn upload_receipt(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<CardPayment>, AppError> {
    let payment = settlement::upload_receipt(&state, id, &body)?;
    Ok(Json(payment))
}

async fn customer_response(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CustomerResponseRequest>,
) -> Result<Json<CardPayment>, AppError> {
    let payment = settlement::customer_respond(&state, id, payload.confirmed)?;
    Ok(Json(payment))
}

async fn verify(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<VerifyRequest>,
) -> Result<Json<CardPayment>, AppError> {
    let payment = settlement::admin_verify(&state, id, payload.notes)?;
    Ok(Json(payment))
}

async fn reject(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectRequest>,
) -> Result<Json<CardPayment>, AppError> {
    let payment = settlement::admin_reject(&state, id, payload.reason)?;
    Ok(Json(payment))
}

async fn settle(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SettleRequest>,
) -> Result<Json<CardPayment>, AppError> {
    let payment = settlement::admin_settle(&state, id, payload.settled_by)?;
    Ok(Json(payment))
}
