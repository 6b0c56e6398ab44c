//! Thin client for the external card-payment gateway.
//!
//! Owns request formatting and authentication only; no business state.
//! Calls use a bounded timeout and are never retried here — a failed
//! capture surfaces to the settlement layer, which creates a fresh payment
//! attempt instead of re-sending the original request.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{instrument, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network failure, timeout or a 5xx: nothing can be assumed about the
    /// charge, and nothing was mutated locally. Safe to retry.
    #[error("gateway unreachable: {0}")]
    Unavailable(String),
    /// The gateway answered but not in the shape we expect.
    #[error("unexpected gateway response: {0}")]
    Protocol(String),
}

/// Result of a pre-authorization call.
#[derive(Debug, Clone)]
pub struct PreOrder {
    pub preorder_id: String,
}

/// Classified outcome of a capture call. A decline is a *successful*
/// classification, not a transport error.
#[derive(Debug, Clone)]
pub enum ChargeOutcome {
    Succeeded { charge_id: String },
    Declined { reason: String },
}

#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub token: String,
    pub amount_centimos: i64,
    pub currency: String,
    pub payer_email: String,
    pub preorder_id: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Advisory funds reservation ahead of capture. Callers treat failure
    /// as non-fatal.
    async fn pre_order(
        &self,
        amount_centimos: i64,
        currency: &str,
        order_id: Uuid,
    ) -> Result<PreOrder, GatewayError>;

    /// Attempts to charge the buyer's instrument.
    async fn capture(&self, request: CaptureRequest) -> Result<ChargeOutcome, GatewayError>;
}

#[derive(Debug, Serialize)]
struct PreOrderBody<'a> {
    amount: i64,
    currency_code: &'a str,
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct PreOrderResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct ChargeBody<'a> {
    source_id: &'a str,
    amount: i64,
    currency_code: &'a str,
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    preorder_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    id: String,
    outcome: ChargeResponseOutcome,
}

#[derive(Debug, Deserialize)]
struct ChargeResponseOutcome {
    code: String,
    user_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    user_message: Option<String>,
    merchant_message: Option<String>,
}

/// HTTP implementation of [`PaymentGateway`].
#[derive(Clone)]
pub struct CardGatewayClient {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl CardGatewayClient {
    pub fn new(
        base_url: String,
        secret_key: String,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Protocol(format!("failed to build client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key,
        })
    }

    fn decline_reason(body: GatewayErrorBody) -> String {
        body.user_message
            .or(body.merchant_message)
            .unwrap_or_else(|| "card declined".to_string())
    }
}

#[async_trait]
impl PaymentGateway for CardGatewayClient {
    #[instrument(skip(self), fields(order_id = %order_id, amount = amount_centimos))]
    async fn pre_order(
        &self,
        amount_centimos: i64,
        currency: &str,
        order_id: Uuid,
    ) -> Result<PreOrder, GatewayError> {
        let url = format!("{}/v2/orders", self.base_url);
        let body = PreOrderBody {
            amount: amount_centimos,
            currency_code: currency,
            order_id: order_id.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Protocol(format!(
                "pre-order returned {status}"
            )));
        }

        let parsed: PreOrderResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Protocol(format!("malformed pre-order response: {e}")))?;

        Ok(PreOrder {
            preorder_id: parsed.id,
        })
    }

    #[instrument(skip(self, request), fields(amount = request.amount_centimos))]
    async fn capture(&self, request: CaptureRequest) -> Result<ChargeOutcome, GatewayError> {
        let url = format!("{}/v2/charges", self.base_url);
        let body = ChargeBody {
            source_id: &request.token,
            amount: request.amount_centimos,
            currency_code: &request.currency,
            email: &request.payer_email,
            preorder_id: request.preorder_id.as_deref(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        let status = response.status();

        if status.is_success() {
            let parsed: ChargeResponse = response
                .json()
                .await
                .map_err(|e| GatewayError::Protocol(format!("malformed charge response: {e}")))?;
            if parsed.outcome.code == "authorized" {
                return Ok(ChargeOutcome::Succeeded {
                    charge_id: parsed.id,
                });
            }
            return Ok(ChargeOutcome::Declined {
                reason: parsed
                    .outcome
                    .user_message
                    .unwrap_or_else(|| parsed.outcome.code.clone()),
            });
        }

        if status.is_client_error() {
            let parsed: GatewayErrorBody = response.json().await.unwrap_or(GatewayErrorBody {
                user_message: None,
                merchant_message: None,
            });
            let reason = Self::decline_reason(parsed);
            warn!(%status, %reason, "charge declined by gateway");
            return Ok(ChargeOutcome::Declined { reason });
        }

        Err(GatewayError::Unavailable(format!(
            "gateway returned {status}"
        )))
    }
}
