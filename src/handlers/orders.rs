use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::entities::order::{DeliveryWindow, OrderStatus};
use crate::entities::{order, order_line, order_status_history};
use crate::errors::ServiceError;
use crate::{ApiResponse, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/history", get(get_order_history))
        .route("/orders/:id/cancel", post(cancel_order))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderLineResponse {
    pub product_id: Uuid,
    pub sku: String,
    pub name: String,
    pub quantity: i32,
    pub unit_price: rust_decimal::Decimal,
    pub tax_rate: rust_decimal::Decimal,
    pub line_total: rust_decimal::Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderHistoryEntry {
    pub status: OrderStatus,
    pub changed_by: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub delivery_date: NaiveDate,
    pub delivery_window: DeliveryWindow,
    pub subtotal: rust_decimal::Decimal,
    pub tax_amount: rust_decimal::Decimal,
    pub total: rust_decimal::Decimal,
    pub notes: Option<String>,
    pub promo_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<OrderLineResponse>,
}

fn line_to_response(line: order_line::Model) -> OrderLineResponse {
    OrderLineResponse {
        product_id: line.product_id,
        sku: line.sku,
        name: line.name,
        quantity: line.quantity,
        unit_price: line.unit_price,
        tax_rate: line.tax_rate,
        line_total: line.line_total,
    }
}

fn history_to_response(entry: order_status_history::Model) -> OrderHistoryEntry {
    OrderHistoryEntry {
        status: entry.status,
        changed_by: entry.changed_by,
        note: entry.note,
        created_at: entry.created_at,
    }
}

/// Enforces ownership: an order with an owning user is only visible to
/// that user.
fn check_access(order: &order::Model, auth: &Option<AuthUser>) -> Result<(), ServiceError> {
    if let Some(owner) = order.user_id {
        match auth {
            Some(user) if user.user_id == owner => Ok(()),
            _ => Err(ServiceError::OwnershipMismatch),
        }
    } else {
        Ok(())
    }
}

/// Fetch an order with its lines.
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "The order", body = OrderResponse),
        (status = 403, description = "Order belongs to another account"),
        (status = 404, description = "No such order")
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    auth: Option<AuthUser>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let details = state
        .services
        .orders
        .get_order_details(order_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

    check_access(&details.order, &auth)?;

    let order = details.order;
    Ok(Json(ApiResponse::ok(OrderResponse {
        id: order.id,
        order_number: order.order_number,
        status: order.status,
        delivery_date: order.delivery_date,
        delivery_window: order.delivery_window,
        subtotal: order.subtotal,
        tax_amount: order.tax_amount,
        total: order.total,
        notes: order.notes,
        promo_code: order.promo_code,
        created_at: order.created_at,
        lines: details.lines.into_iter().map(line_to_response).collect(),
    })))
}

/// The order's append-only status audit trail.
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/history",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Audit trail, oldest first"),
        (status = 404, description = "No such order")
    ),
    tag = "Orders"
)]
pub async fn get_order_history(
    State(state): State<AppState>,
    auth: Option<AuthUser>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<OrderHistoryEntry>>>, ServiceError> {
    let order = state
        .services
        .orders
        .get_order(order_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

    check_access(&order, &auth)?;

    let history = state.services.orders.history(order_id).await?;
    Ok(Json(ApiResponse::ok(
        history.into_iter().map(history_to_response).collect(),
    )))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

/// Cancels an order, releasing its delivery slot.
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = CancelRequest,
    responses(
        (status = 200, description = "Order cancelled"),
        (status = 403, description = "Order belongs to another account"),
        (status = 404, description = "No such order"),
        (status = 409, description = "Order is in a terminal state")
    ),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    auth: Option<AuthUser>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ServiceError> {
    let order = state
        .services
        .orders
        .get_order(order_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

    check_access(&order, &auth)?;

    let changed_by = auth
        .map(|a| a.user_id.to_string())
        .unwrap_or_else(|| "guest".to_string());
    let updated = state
        .services
        .orders
        .cancel(order_id, Some(&changed_by), request.reason.as_deref())
        .await?;

    Ok(Json(ApiResponse::ok(serde_json::json!({
        "id": updated.id,
        "status": updated.status,
    }))))
}
