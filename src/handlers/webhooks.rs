use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};

use crate::errors::ServiceError;
use crate::webhooks::SIGNATURE_HEADER;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/gateway", post(gateway_webhook))
}

/// Inbound gateway webhook.
///
/// The body is taken as raw bytes so signature verification runs over
/// exactly what the gateway signed; parsing happens afterwards, inside the
/// settlement layer. Every authenticated delivery is answered with
/// `{"received": true}` — replays and unknown event types included. Only a
/// bad signature is rejected.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/gateway",
    request_body(content = String, description = "Raw gateway webhook payload", content_type = "application/json"),
    responses(
        (status = 200, description = "Delivery processed or deliberately ignored"),
        (status = 400, description = "Invalid signature")
    ),
    tag = "Webhooks"
)]
pub async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    state
        .services
        .settlement
        .reconcile(&body, signature)
        .await?;

    Ok(Json(json!({ "received": true })))
}
