use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::{assignment, transitions};
use crate::engine::transitions::ActorRole;
use crate::error::AppError;
use crate::models::order::{
    Order, OrderItem, OrderStatus, PaymentMethod, TimelineEntry,
};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/timeline", get(get_timeline))
        .route("/orders/:id/status", post(transition_order))
        .route("/orders/:id/assign", post(assign_driver))
}

#[derive(Deserialize)]
pub struct CreateOrderItem {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub customer_id: Uuid,
    pub vendor_id: Uuid,
    pub items: Vec<CreateOrderItem>,
    pub delivery_address: String,
    pub payment_method: PaymentMethod,
    pub delivery_fee: Decimal,
    #[serde(default)]
    pub discount: Option<Decimal>,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<Order>, AppError> {
    if payload.items.is_empty() {
        return Err(AppError::Validation("order needs at least one item".to_string()));
    }
    if payload.delivery_address.trim().is_empty() {
        return Err(AppError::Validation("delivery address cannot be empty".to_string()));
    }
    if payload.delivery_fee.is_sign_negative() {
        return Err(AppError::Validation("delivery fee cannot be negative".to_string()));
    }

    let discount = payload.discount.unwrap_or(Decimal::ZERO);
    if discount.is_sign_negative() {
        return Err(AppError::Validation("discount cannot be negative".to_string()));
    }

    let mut items = Vec::with_capacity(payload.items.len());
    let mut subtotal = Decimal::ZERO;
    for item in payload.items {
        if item.quantity == 0 {
            return Err(AppError::Validation(format!(
                "item {} has zero quantity",
                item.name
            )));
        }
        if item.unit_price.is_sign_negative() {
            return Err(AppError::Validation(format!(
                "item {} has a negative unit price",
                item.name
            )));
        }

        let line_total = item.unit_price * Decimal::from(item.quantity);
        subtotal += line_total;
        items.push(OrderItem {
            product_id: item.product_id,
            name: item.name,
            quantity: item.quantity,
            unit_price: item.unit_price,
            line_total,
        });
    }

    if discount > subtotal + payload.delivery_fee {
        return Err(AppError::Validation(
            "discount exceeds subtotal plus delivery fee".to_string(),
        ));
    }

    let now = Utc::now();
    let order = Order {
        id: Uuid::new_v4(),
        number: state.next_order_number(),
        customer_id: payload.customer_id,
        vendor_id: payload.vendor_id,
        driver_id: None,
        items,
        subtotal,
        delivery_fee: payload.delivery_fee,
        discount,
        total: subtotal + payload.delivery_fee - discount,
        payment_method: payload.payment_method,
        delivery_address: payload.delivery_address,
        status: OrderStatus::Pending,
        timeline: vec![TimelineEntry {
            status: OrderStatus::Pending,
            at: now,
            note: None,
        }],
        created_at: now,
        updated_at: now,
    };

    state.orders.insert(order.id, order.clone());
    tracing::info!(order_id = %order.id, number = %order.number, total = %order.total, "order created");

    Ok(Json(order))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .orders
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;

    Ok(Json(order.value().clone()))
}

async fn get_timeline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<TimelineEntry>>, AppError> {
    let order = state
        .orders
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;

    Ok(Json(order.timeline.clone()))
}

#[derive(Deserialize)]
pub struct TransitionRequest {
    pub status: String,
    pub actor_role: String,
    #[serde(default)]
    pub note: Option<String>,
}

async fn transition_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TransitionRequest>,
) -> Result<Json<Order>, AppError> {
    let new_status = OrderStatus::from_str(&payload.status).map_err(AppError::Validation)?;
    let role = ActorRole::from_str(&payload.actor_role).map_err(AppError::Validation)?;

    let order = transitions::transition(&state, id, new_status, role, payload.note)?;
    Ok(Json(order))
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub driver_id: Uuid,
}

async fn assign_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<Order>, AppError> {
    let order = assignment::assign(&state, id, payload.driver_id)?;
    Ok(Json(order))
}
