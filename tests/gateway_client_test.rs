//! HTTP gateway client against a mocked gateway: request shape, outcome
//! classification and the unreachable/declined distinction.

use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use despensa_api::gateway::{
    CaptureRequest, CardGatewayClient, ChargeOutcome, GatewayError, PaymentGateway,
};

fn client_for(server: &MockServer) -> CardGatewayClient {
    CardGatewayClient::new(
        server.uri(),
        "sk_test_secret".to_string(),
        Duration::from_secs(2),
    )
    .unwrap()
}

fn capture_request(amount: i64) -> CaptureRequest {
    CaptureRequest {
        token: "tok_abc".to_string(),
        amount_centimos: amount,
        currency: "PEN".to_string(),
        payer_email: "buyer@example.com".to_string(),
        preorder_id: None,
    }
}

#[tokio::test]
async fn pre_order_sends_amount_and_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/orders"))
        .and(header("authorization", "Bearer sk_test_secret"))
        .and(body_partial_json(json!({
            "amount": 2360,
            "currency_code": "PEN"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "ord_123" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let pre = client.pre_order(2360, "PEN", Uuid::new_v4()).await.unwrap();
    assert_eq!(pre.preorder_id, "ord_123");
}

#[tokio::test]
async fn authorized_charge_is_a_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/charges"))
        .and(body_partial_json(json!({
            "source_id": "tok_abc",
            "amount": 2360,
            "email": "buyer@example.com"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chr_ok",
            "outcome": { "code": "authorized", "user_message": "Venta exitosa" }
        })))
        .mount(&server)
        .await;

    let outcome = client_for(&server)
        .capture(capture_request(2360))
        .await
        .unwrap();
    assert_matches!(outcome, ChargeOutcome::Succeeded { charge_id } if charge_id == "chr_ok");
}

#[tokio::test]
async fn non_authorized_outcome_is_a_decline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/charges"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chr_review",
            "outcome": { "code": "card_declined", "user_message": "Tarjeta rechazada" }
        })))
        .mount(&server)
        .await;

    let outcome = client_for(&server)
        .capture(capture_request(1000))
        .await
        .unwrap();
    assert_matches!(outcome, ChargeOutcome::Declined { reason } if reason == "Tarjeta rechazada");
}

#[tokio::test]
async fn client_error_status_is_a_decline_with_reason() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/charges"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "user_message": "Fondos insuficientes",
            "merchant_message": "insufficient_funds"
        })))
        .mount(&server)
        .await;

    let outcome = client_for(&server)
        .capture(capture_request(1000))
        .await
        .unwrap();
    assert_matches!(outcome, ChargeOutcome::Declined { reason } if reason == "Fondos insuficientes");
}

#[tokio::test]
async fn server_errors_are_unavailable_not_declines() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/charges"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .capture(capture_request(1000))
        .await
        .unwrap_err();
    assert_matches!(err, GatewayError::Unavailable(_));
}

#[tokio::test]
async fn unreachable_gateway_is_unavailable() {
    // nothing is listening on this port
    let client = CardGatewayClient::new(
        "http://127.0.0.1:9".to_string(),
        "sk_test_secret".to_string(),
        Duration::from_millis(300),
    )
    .unwrap();

    let err = client.capture(capture_request(1000)).await.unwrap_err();
    assert_matches!(err, GatewayError::Unavailable(_));
}
