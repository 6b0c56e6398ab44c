use std::sync::Arc;

use crate::auth::AuthUser;
use crate::collaborators::{AddressBook, BuyerContext, CartStore, GuestContact};
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::events::EventSender;
use crate::gateway::PaymentGateway;
use crate::message_queue::MessageQueue;
use crate::services::checkout::CheckoutService;
use crate::services::orders::OrderService;
use crate::services::payments::PaymentService;
use crate::services::sequencer::OrderNumberSequencer;
use crate::services::settlement::SettlementService;
use crate::services::slots::SlotAllocator;
use crate::webhooks::SignatureVerifier;

pub mod checkout;
pub mod health;
pub mod orders;
pub mod webhooks;

/// Services shared by the HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub slots: SlotAllocator,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub checkout: Arc<CheckoutService>,
    pub settlement: Arc<SettlementService>,
}

impl AppServices {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DbPool>,
        cfg: &AppConfig,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        cart_store: Arc<dyn CartStore>,
        address_book: Arc<dyn AddressBook>,
        queue: Arc<dyn MessageQueue>,
    ) -> Self {
        let slots = SlotAllocator::new(cfg.default_slot_capacity);
        let sequencer = OrderNumberSequencer::new();
        let payments = Arc::new(PaymentService::new(db.clone()));
        let orders = Arc::new(OrderService::new(
            db.clone(),
            slots,
            Some(event_sender.clone()),
        ));
        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            slots,
            sequencer,
            payments.clone(),
            gateway.clone(),
            cart_store.clone(),
            address_book,
            event_sender.clone(),
            cfg.currency.clone(),
        ));
        let verifier = Arc::new(SignatureVerifier::new(cfg.gateway_webhook_secret.clone()));
        let settlement = Arc::new(SettlementService::new(
            db,
            orders.clone(),
            payments.clone(),
            gateway,
            cart_store,
            queue,
            verifier,
            event_sender,
            cfg.currency.clone(),
        ));

        Self {
            slots,
            orders,
            payments,
            checkout,
            settlement,
        }
    }
}

/// Builds the buyer context from the (optional) authenticated user and the
/// (optional) guest contact. Exactly one path must be populated.
pub(crate) fn resolve_buyer(
    auth: Option<AuthUser>,
    guest_contact: Option<GuestContact>,
) -> Result<BuyerContext, ServiceError> {
    match (auth, guest_contact) {
        (Some(user), None) => Ok(BuyerContext::User(user.user_id)),
        (None, Some(contact)) => Ok(BuyerContext::Guest(contact)),
        (Some(_), Some(_)) => Err(ServiceError::ValidationError(
            "provide either an authenticated session or a guest contact, not both".to_string(),
        )),
        (None, None) => Err(ServiceError::ValidationError(
            "authentication or a guest contact is required".to_string(),
        )),
    }
}
