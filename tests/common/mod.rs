#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::Router;
use chrono::NaiveDate;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use uuid::Uuid;

use despensa_api::collaborators::{
    AddressSnapshot, BuyerContext, GuestContact, InMemoryAddressBook, InMemoryCartStore,
    PricedCart, PricedLine,
};
use despensa_api::config::AppConfig;
use despensa_api::entities::order::DeliveryWindow;
use despensa_api::events::{self, EventSender};
use despensa_api::gateway::{CaptureRequest, ChargeOutcome, GatewayError, PaymentGateway, PreOrder};
use despensa_api::handlers::AppServices;
use despensa_api::message_queue::{InMemoryMessageQueue, MessageQueue};
use despensa_api::webhooks::SignatureVerifier;
use despensa_api::{build_router, db, AppState};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Scriptable gateway double. Capture outcomes are consumed from a queue;
/// with nothing scripted every capture succeeds with a fresh charge id.
#[derive(Default)]
pub struct StubGateway {
    capture_outcomes: Mutex<VecDeque<Result<ChargeOutcome, GatewayError>>>,
    pre_order_fails: Mutex<bool>,
    pub capture_calls: AtomicUsize,
    pub captured_amounts: Mutex<Vec<i64>>,
}

impl StubGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_capture(&self, outcome: Result<ChargeOutcome, GatewayError>) {
        self.capture_outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn fail_pre_orders(&self) {
        *self.pre_order_fails.lock().unwrap() = true;
    }
}

#[async_trait::async_trait]
impl PaymentGateway for StubGateway {
    async fn pre_order(
        &self,
        _amount_centimos: i64,
        _currency: &str,
        order_id: Uuid,
    ) -> Result<PreOrder, GatewayError> {
        if *self.pre_order_fails.lock().unwrap() {
            return Err(GatewayError::Unavailable("connection refused".to_string()));
        }
        Ok(PreOrder {
            preorder_id: format!("ord_{}", &order_id.simple().to_string()[..12]),
        })
    }

    async fn capture(&self, request: CaptureRequest) -> Result<ChargeOutcome, GatewayError> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        self.captured_amounts
            .lock()
            .unwrap()
            .push(request.amount_centimos);
        match self.capture_outcomes.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None => Ok(ChargeOutcome::Succeeded {
                charge_id: format!("chr_{}", Uuid::new_v4().simple()),
            }),
        }
    }
}

/// Test application backed by an in-memory SQLite database.
pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub cart_store: Arc<InMemoryCartStore>,
    pub address_book: Arc<InMemoryAddressBook>,
    pub queue: Arc<InMemoryMessageQueue>,
    pub gateway: Arc<StubGateway>,
    pub verifier: SignatureVerifier,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::build(None).await
    }

    /// Harness variant with a custom job queue (e.g. a failing one).
    pub async fn with_queue(queue: Arc<dyn MessageQueue>) -> Self {
        Self::build(Some(queue)).await
    }

    async fn build(queue_override: Option<Arc<dyn MessageQueue>>) -> Self {
        let cfg = test_config();

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("db connect");
        db::run_migrations(&pool).await.expect("migrations");
        let db_arc = Arc::new(pool);

        let (tx, rx) = mpsc::channel(256);
        let event_sender = EventSender::new(tx);
        let event_task = tokio::spawn(events::process_events(rx));

        let gateway = Arc::new(StubGateway::new());
        let cart_store = Arc::new(InMemoryCartStore::new());
        let address_book = Arc::new(InMemoryAddressBook::new());
        let queue = Arc::new(InMemoryMessageQueue::new());

        let effective_queue: Arc<dyn MessageQueue> = match queue_override {
            Some(q) => q,
            None => queue.clone(),
        };

        let services = AppServices::new(
            db_arc.clone(),
            &cfg,
            Arc::new(event_sender.clone()),
            gateway.clone(),
            cart_store.clone(),
            address_book.clone(),
            effective_queue,
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        let router = build_router(state.clone());

        Self {
            state,
            router,
            cart_store,
            address_book,
            queue,
            gateway,
            verifier: SignatureVerifier::new(WEBHOOK_SECRET.to_string()),
            _event_task: event_task,
        }
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        jwt_secret: "test_secret_key_for_testing_purposes_only_32chars".to_string(),
        host: "127.0.0.1".to_string(),
        port: 18080,
        environment: "test".to_string(),
        log_level: "info".to_string(),
        log_json: false,
        auto_migrate: true,
        db_max_connections: 1,
        db_min_connections: 1,
        db_connect_timeout_secs: 5,
        gateway_base_url: "https://gateway.invalid".to_string(),
        gateway_secret_key: "sk_test_000".to_string(),
        gateway_webhook_secret: WEBHOOK_SECRET.to_string(),
        gateway_timeout_secs: 2,
        default_slot_capacity: 12,
        currency: "PEN".to_string(),
    }
}

/// The spec's worked pricing example: subtotal 20.00, tax 3.60, total 23.60.
pub fn sample_cart() -> PricedCart {
    PricedCart {
        lines: vec![
            PricedLine {
                product_id: Uuid::new_v4(),
                sku: "RICE-5KG".to_string(),
                name: "Arroz extra 5kg".to_string(),
                quantity: 1,
                unit_price: dec!(12.00),
                tax_rate: dec!(0.18),
            },
            PricedLine {
                product_id: Uuid::new_v4(),
                sku: "OIL-1L".to_string(),
                name: "Aceite vegetal 1L".to_string(),
                quantity: 2,
                unit_price: dec!(4.00),
                tax_rate: dec!(0.18),
            },
        ],
        subtotal: dec!(20.00),
        tax_amount: dec!(3.60),
        total: dec!(23.60),
    }
}

pub fn guest_buyer(email: &str) -> BuyerContext {
    BuyerContext::Guest(GuestContact {
        email: email.to_string(),
        phone: Some("+51 999 111 222".to_string()),
    })
}

pub fn sample_address() -> AddressSnapshot {
    AddressSnapshot {
        line1: "Av. Arequipa 1234".to_string(),
        line2: Some("Dpto 501".to_string()),
        district: "Miraflores".to_string(),
        city: "Lima".to_string(),
        reference: Some("Frente al parque".to_string()),
        contact_name: "Lucía Quispe".to_string(),
        contact_phone: Some("+51 999 111 222".to_string()),
    }
}

pub fn slot_on(day: u32) -> (NaiveDate, DeliveryWindow) {
    (
        NaiveDate::from_ymd_opt(2026, 9, day).unwrap(),
        DeliveryWindow::Morning,
    )
}
