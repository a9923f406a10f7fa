use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tonic::{Request, Response, Status};
use uuid::Uuid;

use crate::engine::transitions::ActorRole;
use crate::engine::{assignment, settlement, transitions};
use crate::events::{Event, Notification};
use crate::models::order::{Order, OrderStatus};
use crate::models::payment::CardPayment;
use crate::state::AppState;

pub mod pb {
    tonic::include_proto!("marketplace");
}

use pb::marketplace_service_server::MarketplaceService;
use pb::{
    AssignDriverRequest, EventReply, GetOrderRequest, OrderReply, PaymentReply,
    PendingSettlementReply, PendingSettlementRequest, TimelineEntryReply, TransitionOrderRequest,
    WatchEventsRequest,
};

pub struct GrpcMarketplaceService {
    state: Arc<AppState>,
}

impl GrpcMarketplaceService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

fn parse_uuid(raw: &str, field: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(raw).map_err(|_| Status::invalid_argument(format!("invalid {field}: {raw}")))
}

fn order_to_proto(order: &Order) -> OrderReply {
    OrderReply {
        id: order.id.to_string(),
        number: order.number.clone(),
        customer_id: order.customer_id.to_string(),
        vendor_id: order.vendor_id.to_string(),
        driver_id: order
            .driver_id
            .map(|id| id.to_string())
            .unwrap_or_default(),
        status: order.status.as_str().to_string(),
        payment_method: order.payment_method.as_str().to_string(),
        subtotal: order.subtotal.to_string(),
        delivery_fee: order.delivery_fee.to_string(),
        discount: order.discount.to_string(),
        total: order.total.to_string(),
        timeline: order
            .timeline
            .iter()
            .map(|entry| TimelineEntryReply {
                status: entry.status.as_str().to_string(),
                at: entry.at.to_rfc3339(),
                note: entry.note.clone().unwrap_or_default(),
            })
            .collect(),
    }
}

fn payment_to_proto(payment: &CardPayment) -> PaymentReply {
    PaymentReply {
        id: payment.id.to_string(),
        order_id: payment.order_id.to_string(),
        order_number: payment.order_number.clone(),
        amount: payment.amount.to_string(),
        settlement_status: payment.settlement_status.as_str().to_string(),
        customer_confirmed: payment.customer_confirmed.unwrap_or(false),
        admin_verified: payment.admin_verified,
        driver_confirmed_settlement: payment.driver_confirmed_settlement,
    }
}

fn notification_to_proto(notification: &Notification) -> EventReply {
    let (event_type, entity_id, status, at) = match &notification.event {
        Event::OrderStatusChanged {
            order_id,
            status,
            at,
            ..
        } => (
            "order.status.changed",
            order_id.to_string(),
            status.as_str().to_string(),
            at.to_rfc3339(),
        ),
        Event::SettlementChanged {
            payment_id,
            status,
            at,
            ..
        } => (
            "payment.settlement.changed",
            payment_id.to_string(),
            status.as_str().to_string(),
            at.to_rfc3339(),
        ),
        Event::SettlementReminder {
            driver_id,
            pending_total,
            at,
            ..
        } => (
            "settlement.reminder",
            driver_id.to_string(),
            pending_total.to_string(),
            at.to_rfc3339(),
        ),
    };

    EventReply {
        event_type: event_type.to_string(),
        entity_id,
        status,
        at,
        channels: notification.channels.clone(),
    }
}

#[tonic::async_trait]
impl MarketplaceService for GrpcMarketplaceService {
    async fn get_order(
        &self,
        request: Request<GetOrderRequest>,
    ) -> Result<Response<OrderReply>, Status> {
        let req = request.into_inner();
        let order_id = parse_uuid(&req.order_id, "order id")?;

        let order = self
            .state
            .orders
            .get(&order_id)
            .ok_or_else(|| Status::not_found(format!("order {order_id} not found")))?;

        Ok(Response::new(order_to_proto(order.value())))
    }

    async fn transition_order(
        &self,
        request: Request<TransitionOrderRequest>,
    ) -> Result<Response<OrderReply>, Status> {
        let req = request.into_inner();
        let order_id = parse_uuid(&req.order_id, "order id")?;
        let new_status = OrderStatus::from_str(&req.status).map_err(Status::invalid_argument)?;
        let role = ActorRole::from_str(&req.actor_role).map_err(Status::invalid_argument)?;
        let note = (!req.note.is_empty()).then_some(req.note);

        let order = transitions::transition(&self.state, order_id, new_status, role, note)?;
        Ok(Response::new(order_to_proto(&order)))
    }

    async fn assign_driver(
        &self,
        request: Request<AssignDriverRequest>,
    ) -> Result<Response<OrderReply>, Status> {
        let req = request.into_inner();
        let order_id = parse_uuid(&req.order_id, "order id")?;
        let driver_id = parse_uuid(&req.driver_id, "driver id")?;

        let order = assignment::assign(&self.state, order_id, driver_id)?;
        Ok(Response::new(order_to_proto(&order)))
    }

    async fn get_pending_settlement(
        &self,
        request: Request<PendingSettlementRequest>,
    ) -> Result<Response<PendingSettlementReply>, Status> {
        let req = request.into_inner();
        let driver_id = parse_uuid(&req.driver_id, "driver id")?;

        let summary = settlement::pending_settlement(&self.state, driver_id)?;
        Ok(Response::new(PendingSettlementReply {
            total_amount: summary.total_amount.to_string(),
            count: summary.count as u32,
            rows: summary.rows.iter().map(payment_to_proto).collect(),
        }))
    }

    type WatchEventsStream = Pin<Box<dyn Stream<Item = Result<EventReply, Status>> + Send>>;

    async fn watch_events(
        &self,
        request: Request<WatchEventsRequest>,
    ) -> Result<Response<Self::WatchEventsStream>, Status> {
        let wanted = {
            let channel = request.into_inner().channel;
            (!channel.is_empty()).then_some(channel)
        };

        let rx = self.state.events_tx.subscribe();
        let stream = BroadcastStream::new(rx).filter_map(move |result| match result {
            Ok(notification) => {
                if let Some(wanted) = &wanted {
                    if !notification.channels.iter().any(|c| c == wanted) {
                        return None;
                    }
                }
                Some(Ok(notification_to_proto(&notification)))
            }
            Err(_) => None,
        });

        Ok(Response::new(Box::pin(stream)))
    }
}
