//! Webhook reconciliation: signature gating over raw bytes, idempotent
//! replays, refund propagation and forward-compatible event handling.

mod common;

use assert_matches::assert_matches;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, Set};
use tower::ServiceExt;

use common::{guest_buyer, sample_address, sample_cart, slot_on, TestApp};
use despensa_api::entities::order::OrderStatus;
use despensa_api::entities::payment::{self, PaymentStatus};
use despensa_api::errors::ServiceError;
use despensa_api::message_queue::TOPIC_INVOICE_GENERATE;
use despensa_api::services::checkout::{AddressInput, CheckoutReceipt, DeliveryChoice};
use despensa_api::services::settlement::ReconcileOutcome;
use despensa_api::webhooks::SIGNATURE_HEADER;

async fn initiate_order(app: &TestApp, email: &str, day: u32) -> CheckoutReceipt {
    let buyer = guest_buyer(email);
    app.cart_store.put_cart(&buyer, sample_cart());
    let (date, window) = slot_on(day);
    let choice = DeliveryChoice { date, window };
    let validated = app
        .state
        .services
        .checkout
        .validate(&buyer, choice)
        .await
        .unwrap();
    app.state
        .services
        .checkout
        .initiate(
            &buyer,
            validated,
            choice,
            AddressInput::Inline(sample_address()),
            None,
            None,
        )
        .await
        .unwrap()
}

/// Stamps a gateway charge id onto the order's pending payment, standing in
/// for a charge the gateway created but has not yet confirmed.
async fn attach_charge_id(app: &TestApp, order_id: uuid::Uuid, charge_id: &str) {
    payment::Entity::update_many()
        .set(payment::ActiveModel {
            gateway_charge_id: Set(Some(charge_id.to_string())),
            ..Default::default()
        })
        .filter(payment::Column::OrderId.eq(order_id))
        .filter(payment::Column::Status.eq(PaymentStatus::Pending))
        .exec(&*app.state.db)
        .await
        .unwrap();
}

fn event_body(event_type: &str, charge_id: &str, reason: Option<&str>) -> Vec<u8> {
    let mut data = serde_json::json!({ "id": charge_id });
    if let Some(reason) = reason {
        data["failure_reason"] = serde_json::Value::String(reason.to_string());
    }
    serde_json::to_vec(&serde_json::json!({ "type": event_type, "data": data })).unwrap()
}

#[tokio::test]
async fn bad_signature_is_rejected_without_state_change() {
    let app = TestApp::new().await;
    let receipt = initiate_order(&app, "sig@example.com", 1).await;
    attach_charge_id(&app, receipt.order_id, "chr_sig").await;

    let body = event_body("charge.succeeded", "chr_sig", None);

    let err = app
        .state
        .services
        .settlement
        .reconcile(&body, Some("deadbeef"))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidSignature);

    let err = app
        .state
        .services
        .settlement
        .reconcile(&body, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidSignature);

    let order = app
        .state
        .services
        .orders
        .get_order(receipt.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::PendingPayment);
}

#[tokio::test]
async fn charge_succeeded_settles_and_replays_are_noops() {
    let app = TestApp::new().await;
    let receipt = initiate_order(&app, "hook@example.com", 2).await;
    attach_charge_id(&app, receipt.order_id, "chr_hook").await;

    let body = event_body("charge.succeeded", "chr_hook", None);
    let signature = app.verifier.sign(&body);

    let outcome = app
        .state
        .services
        .settlement
        .reconcile(&body, Some(&signature))
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Applied);

    let details = app
        .state
        .services
        .orders
        .get_order_details(receipt.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(details.order.status, OrderStatus::Paid);
    assert_eq!(details.history.len(), 2);
    assert_eq!(app.queue.depth(TOPIC_INVOICE_GENERATE), 1);

    // identical delivery again: accepted, nothing moves
    let outcome = app
        .state
        .services
        .settlement
        .reconcile(&body, Some(&signature))
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Ignored);

    let details = app
        .state
        .services
        .orders
        .get_order_details(receipt.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(details.order.status, OrderStatus::Paid);
    assert_eq!(details.history.len(), 2, "history did not grow on replay");
    assert_eq!(app.queue.depth(TOPIC_INVOICE_GENERATE), 1);
}

#[tokio::test]
async fn capture_then_webhook_for_the_same_charge_settles_once() {
    let app = TestApp::new().await;
    let receipt = initiate_order(&app, "race@example.com", 3).await;

    app.state
        .services
        .settlement
        .capture(receipt.order_id, "tok_ok", "race@example.com", None)
        .await
        .unwrap();

    let payments = app
        .state
        .services
        .payments
        .list_for_order(receipt.order_id)
        .await
        .unwrap();
    let charge_id = payments[0].gateway_charge_id.clone().unwrap();

    // the gateway's own confirmation arrives after the synchronous capture
    let body = event_body("charge.succeeded", &charge_id, None);
    let signature = app.verifier.sign(&body);
    let outcome = app
        .state
        .services
        .settlement
        .reconcile(&body, Some(&signature))
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Ignored);

    let details = app
        .state
        .services
        .orders
        .get_order_details(receipt.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(details.order.status, OrderStatus::Paid);
    assert_eq!(
        details.history.len(),
        2,
        "exactly one paid transition between both paths"
    );
}

#[tokio::test]
async fn charge_failed_marks_without_opening_a_retry() {
    let app = TestApp::new().await;
    let receipt = initiate_order(&app, "fail@example.com", 4).await;
    attach_charge_id(&app, receipt.order_id, "chr_fail").await;

    let body = event_body("charge.failed", "chr_fail", Some("tarjeta vencida"));
    let signature = app.verifier.sign(&body);
    let outcome = app
        .state
        .services
        .settlement
        .reconcile(&body, Some(&signature))
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Applied);

    let payments = app
        .state
        .services
        .payments
        .list_for_order(receipt.order_id)
        .await
        .unwrap();
    assert_eq!(payments.len(), 1, "no retry payment from the webhook path");
    assert_eq!(payments[0].status, PaymentStatus::Failed);
    assert_eq!(payments[0].failure_reason.as_deref(), Some("tarjeta vencida"));

    let order = app
        .state
        .services
        .orders
        .get_order(receipt.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::PendingPayment);

    // a capture now finds no pending payment
    let err = app
        .state
        .services
        .settlement
        .capture(receipt.order_id, "tok", "fail@example.com", None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NoPendingPayment);
}

#[tokio::test]
async fn charge_refunded_propagates_to_the_order() {
    let app = TestApp::new().await;
    let receipt = initiate_order(&app, "refund@example.com", 5).await;

    app.state
        .services
        .settlement
        .capture(receipt.order_id, "tok_ok", "refund@example.com", None)
        .await
        .unwrap();
    let payments = app
        .state
        .services
        .payments
        .list_for_order(receipt.order_id)
        .await
        .unwrap();
    let charge_id = payments[0].gateway_charge_id.clone().unwrap();

    let history_before = app
        .state
        .services
        .orders
        .history(receipt.order_id)
        .await
        .unwrap()
        .len();

    let body = event_body("charge.refunded", &charge_id, None);
    let signature = app.verifier.sign(&body);
    let outcome = app
        .state
        .services
        .settlement
        .reconcile(&body, Some(&signature))
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Applied);

    let payments = app
        .state
        .services
        .payments
        .list_for_order(receipt.order_id)
        .await
        .unwrap();
    assert_eq!(payments[0].status, PaymentStatus::Refunded);
    assert!(payments[0].refunded_at.is_some());

    let details = app
        .state
        .services
        .orders
        .get_order_details(receipt.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(details.order.status, OrderStatus::Refunded);
    assert_eq!(
        details.history.len(),
        history_before + 1,
        "exactly one refund entry appended"
    );

    // refund replay: accepted, unchanged
    let outcome = app
        .state
        .services
        .settlement
        .reconcile(&body, Some(&signature))
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Ignored);
    let history_after = app
        .state
        .services
        .orders
        .history(receipt.order_id)
        .await
        .unwrap()
        .len();
    assert_eq!(history_after, history_before + 1);
}

#[tokio::test]
async fn unknown_charges_and_event_types_are_accepted_and_ignored() {
    let app = TestApp::new().await;

    let body = event_body("charge.succeeded", "chr_never_seen", None);
    let signature = app.verifier.sign(&body);
    let outcome = app
        .state
        .services
        .settlement
        .reconcile(&body, Some(&signature))
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Ignored);

    let body = event_body("dispute.created", "dsp_1", None);
    let signature = app.verifier.sign(&body);
    let outcome = app
        .state
        .services
        .settlement
        .reconcile(&body, Some(&signature))
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Ignored);

    // authentic but unparseable: accepted, ignored
    let body = b"not json at all".to_vec();
    let signature = app.verifier.sign(&body);
    let outcome = app
        .state
        .services
        .settlement
        .reconcile(&body, Some(&signature))
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Ignored);
}

#[tokio::test]
async fn webhook_endpoint_gates_on_the_signature() {
    let app = TestApp::new().await;
    let body = event_body("charge.succeeded", "chr_http", None);
    let signature = app.verifier.sign(&body);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/webhooks/gateway")
                .header("content-type", "application/json")
                .header(SIGNATURE_HEADER, signature)
                .body(Body::from(body.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["received"], true);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/webhooks/gateway")
                .header("content-type", "application/json")
                .header(SIGNATURE_HEADER, "deadbeef")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
