//! HTTP surface: the checkout endpoints end to end through the router,
//! guest and authenticated flows included.

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use common::{guest_buyer, sample_cart, slot_on, TestApp};
use despensa_api::auth::issue_token;
use despensa_api::collaborators::BuyerContext;

async fn send(
    app: &TestApp,
    method: Method,
    uri: &str,
    body: Option<Value>,
    token: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn inline_address() -> Value {
    json!({
        "line1": "Av. Arequipa 1234",
        "district": "Miraflores",
        "city": "Lima",
        "contact_name": "Lucía Quispe",
        "contact_phone": "+51 999 111 222"
    })
}

#[tokio::test]
async fn availability_reports_both_windows_per_date() {
    let app = TestApp::new().await;
    let (status, body) = send(
        &app,
        Method::GET,
        "/api/v1/delivery/availability?from=2026-11-02&to=2026-11-03",
        None,
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let slots = body["data"].as_array().unwrap();
    assert_eq!(slots.len(), 4);
    assert!(slots.iter().all(|slot| slot["available"] == true));
    assert!(slots
        .iter()
        .all(|slot| slot["remaining"] == app.state.config.default_slot_capacity));
}

#[tokio::test]
async fn guest_checkout_then_capture_over_http() {
    let app = TestApp::new().await;
    let buyer = guest_buyer("http-guest@example.com");
    app.cart_store.put_cart(&buyer, sample_cart());
    let (date, _) = slot_on(20);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/checkout/validate",
        Some(json!({
            "delivery_date": date,
            "delivery_window": "morning",
            "guest_contact": { "email": "http-guest@example.com" }
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], "23.60");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/checkout/initiate",
        Some(json!({
            "delivery_date": date,
            "delivery_window": "morning",
            "address": inline_address(),
            "guest_contact": { "email": "http-guest@example.com" }
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["amount_centimos"], 2360);
    let order_id = body["data"]["order_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/checkout/capture",
        Some(json!({
            "order_id": order_id,
            "gateway_token": "tok_visa",
            "payer_email": "http-guest@example.com"
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["order_number"]
        .as_str()
        .unwrap()
        .starts_with("ORD-"));

    // replaying the capture conflicts: the order is already settled
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/checkout/capture",
        Some(json!({
            "order_id": body["data"]["order_id"],
            "gateway_token": "tok_visa",
            "payer_email": "http-guest@example.com"
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn checkout_requires_a_buyer_identity() {
    let app = TestApp::new().await;
    let (date, _) = slot_on(21);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/checkout/validate",
        Some(json!({
            "delivery_date": date,
            "delivery_window": "morning"
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn orders_are_hidden_from_other_accounts() {
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();
    let buyer = BuyerContext::User(owner);
    app.cart_store.put_cart(&buyer, sample_cart());
    let (date, _) = slot_on(22);

    let owner_token = issue_token(&app.state.config.jwt_secret, owner, 3600).unwrap();
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/checkout/initiate",
        Some(json!({
            "delivery_date": date,
            "delivery_window": "afternoon",
            "address": inline_address()
        })),
        Some(&owner_token),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let order_id = body["data"]["order_id"].as_str().unwrap().to_string();

    // the owner can read it
    let (status, _) = send(
        &app,
        Method::GET,
        &format!("/api/v1/orders/{order_id}"),
        None,
        Some(&owner_token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // a different account cannot
    let stranger_token =
        issue_token(&app.state.config.jwt_secret, Uuid::new_v4(), 3600).unwrap();
    let (status, _) = send(
        &app,
        Method::GET,
        &format!("/api/v1/orders/{order_id}"),
        None,
        Some(&stranger_token),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // and an anonymous caller cannot either
    let (status, _) = send(
        &app,
        Method::GET,
        &format!("/api/v1/orders/{order_id}"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn cancel_endpoint_walks_the_state_machine() {
    let app = TestApp::new().await;
    let buyer = guest_buyer("cancel-http@example.com");
    app.cart_store.put_cart(&buyer, sample_cart());
    let (date, _) = slot_on(23);

    let (_, body) = send(
        &app,
        Method::POST,
        "/api/v1/checkout/initiate",
        Some(json!({
            "delivery_date": date,
            "delivery_window": "morning",
            "address": inline_address(),
            "guest_contact": { "email": "cancel-http@example.com" }
        })),
        None,
    )
    .await;
    let order_id = body["data"]["order_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/v1/orders/{order_id}/cancel"),
        Some(json!({ "reason": "ordered twice" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "cancelled");

    // cancelling a terminal order conflicts
    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/v1/orders/{order_id}/cancel"),
        Some(json!({})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = send(
        &app,
        Method::GET,
        &format!("/api/v1/orders/{order_id}/history"),
        None,
        None,
    )
    .await;
    let history = body["data"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1]["status"], "cancelled");
}

#[tokio::test]
async fn unknown_order_capture_is_a_404() {
    let app = TestApp::new().await;
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/checkout/capture",
        Some(json!({
            "order_id": Uuid::new_v4(),
            "gateway_token": "tok",
            "payer_email": "x@example.com"
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
