use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::collaborators::{AddressSnapshot, GuestContact};
use crate::entities::order::DeliveryWindow;
use crate::errors::ServiceError;
use crate::handlers::resolve_buyer;
use crate::services::checkout::{AddressInput, DeliveryChoice};
use crate::services::slots::SlotAvailability;
use crate::{ApiResponse, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/delivery/availability", get(availability))
        .route("/checkout/validate", post(validate))
        .route("/checkout/initiate", post(initiate))
        .route("/checkout/capture", post(capture))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AvailabilityQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// Delivery capacity for every slot in the inclusive date range.
#[utoipa::path(
    get,
    path = "/api/v1/delivery/availability",
    params(
        ("from" = NaiveDate, Query, description = "First date, inclusive"),
        ("to" = NaiveDate, Query, description = "Last date, inclusive")
    ),
    responses(
        (status = 200, description = "Availability per (date, window)"),
        (status = 400, description = "Inverted range")
    ),
    tag = "Checkout"
)]
pub async fn availability(
    State(state): State<AppState>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<ApiResponse<Vec<SlotAvailability>>>, ServiceError> {
    let slots = state
        .services
        .slots
        .list_availability(&*state.db, query.from, query.to)
        .await?;
    Ok(Json(ApiResponse::ok(slots)))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ValidateRequest {
    pub delivery_date: NaiveDate,
    pub delivery_window: DeliveryWindow,
    #[validate]
    pub guest_contact: Option<GuestContact>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ValidateResponse {
    pub line_count: usize,
    pub subtotal: rust_decimal::Decimal,
    pub tax_amount: rust_decimal::Decimal,
    pub total: rust_decimal::Decimal,
}

/// Pre-checkout validation of the buyer's cart and slot choice.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/validate",
    request_body = ValidateRequest,
    responses(
        (status = 200, description = "Cart and slot are valid"),
        (status = 400, description = "Empty cart or invalid input"),
        (status = 409, description = "Slot has no remaining capacity")
    ),
    tag = "Checkout"
)]
pub async fn validate(
    State(state): State<AppState>,
    auth: Option<AuthUser>,
    Json(request): Json<ValidateRequest>,
) -> Result<Json<ApiResponse<ValidateResponse>>, ServiceError> {
    request.validate()?;
    let buyer = resolve_buyer(auth, request.guest_contact)?;

    let validated = state
        .services
        .checkout
        .validate(
            &buyer,
            DeliveryChoice {
                date: request.delivery_date,
                window: request.delivery_window,
            },
        )
        .await?;

    let cart = validated.cart();
    Ok(Json(ApiResponse::ok(ValidateResponse {
        line_count: cart.lines.len(),
        subtotal: cart.subtotal,
        tax_amount: cart.tax_amount,
        total: cart.total,
    })))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct InitiateRequest {
    pub delivery_date: NaiveDate,
    pub delivery_window: DeliveryWindow,
    /// Reference to a saved address (authenticated buyers only)...
    pub address_id: Option<Uuid>,
    /// ...or an inline address snapshot. Exactly one of the two.
    #[validate]
    pub address: Option<AddressSnapshot>,
    #[validate]
    pub guest_contact: Option<GuestContact>,
    pub notes: Option<String>,
    pub promo_code: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InitiateResponse {
    pub order_id: Uuid,
    pub order_number: String,
    pub amount_centimos: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_preorder_id: Option<String>,
}

/// Creates the order, reserves the slot and opens a pending payment.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/initiate",
    request_body = InitiateRequest,
    responses(
        (status = 201, description = "Order created", body = InitiateResponse),
        (status = 400, description = "Empty cart or invalid address"),
        (status = 409, description = "Slot sold out while checking out")
    ),
    tag = "Checkout"
)]
pub async fn initiate(
    State(state): State<AppState>,
    auth: Option<AuthUser>,
    Json(request): Json<InitiateRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    request.validate()?;
    let buyer = resolve_buyer(auth, request.guest_contact)?;

    let address = match (request.address_id, request.address) {
        (Some(id), None) => AddressInput::Saved(id),
        (None, Some(snapshot)) => AddressInput::Inline(snapshot),
        _ => {
            return Err(ServiceError::ValidationError(
                "provide exactly one of address_id or address".to_string(),
            ))
        }
    };

    let choice = DeliveryChoice {
        date: request.delivery_date,
        window: request.delivery_window,
    };

    let validated = state.services.checkout.validate(&buyer, choice).await?;
    let receipt = state
        .services
        .checkout
        .initiate(
            &buyer,
            validated,
            choice,
            address,
            request.notes,
            request.promo_code,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(InitiateResponse {
            order_id: receipt.order_id,
            order_number: receipt.order_number,
            amount_centimos: receipt.amount_centimos,
            gateway_preorder_id: receipt.gateway_preorder_id,
        })),
    ))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CaptureRequest {
    pub order_id: Uuid,
    #[validate(length(min = 1))]
    pub gateway_token: String,
    #[validate(email)]
    pub payer_email: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CaptureResponse {
    pub order_id: Uuid,
    pub order_number: String,
}

/// Charges the order's pending payment with the supplied gateway token.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/capture",
    request_body = CaptureRequest,
    responses(
        (status = 200, description = "Payment captured", body = CaptureResponse),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Order already settled or no pending payment"),
        (status = 422, description = "Charge declined; a fresh attempt is open"),
        (status = 503, description = "Gateway unreachable; retry later")
    ),
    tag = "Checkout"
)]
pub async fn capture(
    State(state): State<AppState>,
    auth: Option<AuthUser>,
    Json(request): Json<CaptureRequest>,
) -> Result<Json<ApiResponse<CaptureResponse>>, ServiceError> {
    request.validate()?;

    let receipt = state
        .services
        .settlement
        .capture(
            request.order_id,
            &request.gateway_token,
            &request.payer_email,
            auth.map(|a| a.user_id),
        )
        .await?;

    Ok(Json(ApiResponse::ok(CaptureResponse {
        order_id: receipt.order_id,
        order_number: receipt.order_number,
    })))
}
