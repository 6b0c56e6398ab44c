use chrono::{NaiveDate, Utc};
use sea_orm::{ActiveModelTrait, Set, TransactionTrait};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::collaborators::{AddressBook, AddressSnapshot, BuyerContext, CartStore, PricedCart};
use crate::db::DbPool;
use crate::entities::order::{self, DeliveryWindow, OrderStatus};
use crate::entities::order_line;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateway::PaymentGateway;
use crate::money;
use crate::services::orders::OrderService;
use crate::services::payments::PaymentService;
use crate::services::sequencer::OrderNumberSequencer;
use crate::services::slots::SlotAllocator;

/// The buyer's slot choice.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryChoice {
    pub date: NaiveDate,
    pub window: DeliveryWindow,
}

/// Delivery address: a reference to a saved address, or an inline snapshot.
#[derive(Debug, Clone)]
pub enum AddressInput {
    Saved(Uuid),
    Inline(AddressSnapshot),
}

/// Proof that a cart passed [`CheckoutService::validate`]. Consumed by
/// `initiate`.
#[derive(Debug, Clone)]
pub struct ValidatedCart(PricedCart);

impl ValidatedCart {
    pub fn cart(&self) -> &PricedCart {
        &self.0
    }
}

/// What a successful checkout hands back to the caller.
#[derive(Debug, Clone)]
pub struct CheckoutReceipt {
    pub order_id: Uuid,
    pub order_number: String,
    pub amount_centimos: i64,
    /// Present only when the best-effort gateway pre-order succeeded.
    pub gateway_preorder_id: Option<String>,
}

/// Turns a priced cart into a durable order with a reserved slot and a
/// pending payment.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DbPool>,
    slots: SlotAllocator,
    sequencer: OrderNumberSequencer,
    payments: Arc<PaymentService>,
    gateway: Arc<dyn PaymentGateway>,
    cart_store: Arc<dyn CartStore>,
    address_book: Arc<dyn AddressBook>,
    event_sender: Arc<EventSender>,
    currency: String,
}

impl CheckoutService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DbPool>,
        slots: SlotAllocator,
        sequencer: OrderNumberSequencer,
        payments: Arc<PaymentService>,
        gateway: Arc<dyn PaymentGateway>,
        cart_store: Arc<dyn CartStore>,
        address_book: Arc<dyn AddressBook>,
        event_sender: Arc<EventSender>,
        currency: String,
    ) -> Self {
        Self {
            db,
            slots,
            sequencer,
            payments,
            gateway,
            cart_store,
            address_book,
            event_sender,
            currency,
        }
    }

    /// Pre-checkout validation: the cart must have priced lines with
    /// consistent totals, and the chosen slot must have capacity. Read-only;
    /// nothing is reserved yet.
    #[instrument(skip(self, buyer))]
    pub async fn validate(
        &self,
        buyer: &BuyerContext,
        choice: DeliveryChoice,
    ) -> Result<ValidatedCart, ServiceError> {
        let cart = self
            .cart_store
            .priced_cart(buyer)
            .await?
            .ok_or(ServiceError::EmptyCart)?;

        if cart.lines.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        for line in &cart.lines {
            if line.quantity < 1 {
                return Err(ServiceError::ValidationError(format!(
                    "line {} has non-positive quantity",
                    line.sku
                )));
            }
        }

        if !money::totals_consistent(cart.subtotal, cart.tax_amount, cart.total) {
            return Err(ServiceError::ValidationError(
                "cart totals are inconsistent: total != subtotal + tax".to_string(),
            ));
        }

        if !self
            .slots
            .has_capacity(&*self.db, choice.date, choice.window)
            .await?
        {
            return Err(ServiceError::SlotUnavailable {
                date: choice.date.to_string(),
                window: choice.window.to_string(),
            });
        }

        Ok(ValidatedCart(cart))
    }

    /// Creates the order aggregate in one transaction: Order + OrderLines +
    /// initial history row + pending Payment + slot reservation. If the slot
    /// cannot be reserved the whole transaction rolls back; a successful
    /// checkout can never oversell capacity.
    ///
    /// After commit, a best-effort gateway pre-order runs; its failure never
    /// fails the checkout.
    #[instrument(skip(self, buyer, validated, address))]
    pub async fn initiate(
        &self,
        buyer: &BuyerContext,
        validated: ValidatedCart,
        choice: DeliveryChoice,
        address: AddressInput,
        notes: Option<String>,
        promo_code: Option<String>,
    ) -> Result<CheckoutReceipt, ServiceError> {
        let cart = validated.0;

        if let BuyerContext::Guest(contact) = buyer {
            contact.validate()?;
        }

        let snapshot = self.resolve_address(buyer, address).await?;
        snapshot.validate()?;

        let amount_centimos = money::to_centimos(cart.total)?;

        // The number is consumed here, before the transaction: a rollback
        // below leaves a gap in the day's sequence.
        let order_number = self.sequencer.next(&*self.db).await?;

        let order_id = Uuid::new_v4();
        let now = Utc::now();

        let txn = self.db.begin().await?;

        let order_row = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            user_id: Set(buyer.user_id()),
            guest_email: Set(match buyer {
                BuyerContext::Guest(c) => Some(c.email.clone()),
                BuyerContext::User(_) => None,
            }),
            guest_phone: Set(match buyer {
                BuyerContext::Guest(c) => c.phone.clone(),
                BuyerContext::User(_) => None,
            }),
            status: Set(OrderStatus::PendingPayment),
            delivery_date: Set(choice.date),
            delivery_window: Set(choice.window),
            address_snapshot: Set(serde_json::to_value(&snapshot)
                .map_err(|e| ServiceError::InternalError(format!("address snapshot: {e}")))?),
            subtotal: Set(cart.subtotal),
            tax_amount: Set(cart.tax_amount),
            total: Set(cart.total),
            notes: Set(notes),
            promo_code: Set(promo_code),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        };
        order_row.insert(&txn).await?;

        for line in &cart.lines {
            let line_row = order_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                sku: Set(line.sku.clone()),
                name: Set(line.name.clone()),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                tax_rate: Set(line.tax_rate),
                line_total: Set(money::line_total(
                    line.unit_price,
                    line.tax_rate,
                    line.quantity,
                )),
                created_at: Set(now),
            };
            line_row.insert(&txn).await?;
        }

        OrderService::append_history(
            &txn,
            order_id,
            OrderStatus::PendingPayment,
            Some("checkout"),
            None,
        )
        .await?;

        let payment = self
            .payments
            .create_pending(&txn, order_id, amount_centimos)
            .await?;

        if let Err(e) = self.slots.reserve(&txn, choice.date, choice.window).await {
            txn.rollback().await?;
            return Err(e);
        }

        txn.commit().await?;

        info!(
            order_id = %order_id,
            order_number = %order_number,
            amount_centimos,
            "checkout initiated"
        );

        if let Err(e) = self.event_sender.send(Event::OrderCreated(order_id)).await {
            warn!(error = %e, order_id = %order_id, "failed to send order created event");
        }
        if let Err(e) = self
            .event_sender
            .send(Event::SlotReserved {
                date: choice.date,
                window: choice.window,
            })
            .await
        {
            warn!(error = %e, "failed to send slot reserved event");
        }

        // Best-effort pre-authorization. The order stays payable by charge
        // token alone if this fails.
        let gateway_preorder_id = match self
            .gateway
            .pre_order(amount_centimos, &self.currency, order_id)
            .await
        {
            Ok(pre) => {
                if let Err(e) = self.payments.set_preorder_id(payment.id, &pre.preorder_id).await {
                    warn!(error = %e, payment_id = %payment.id, "failed to persist pre-order id");
                }
                Some(pre.preorder_id)
            }
            Err(e) => {
                warn!(error = %e, order_id = %order_id, "gateway pre-order failed; continuing without it");
                None
            }
        };

        Ok(CheckoutReceipt {
            order_id,
            order_number,
            amount_centimos,
            gateway_preorder_id,
        })
    }

    async fn resolve_address(
        &self,
        buyer: &BuyerContext,
        address: AddressInput,
    ) -> Result<AddressSnapshot, ServiceError> {
        match address {
            AddressInput::Inline(snapshot) => Ok(snapshot),
            AddressInput::Saved(address_id) => {
                let user_id = buyer.user_id().ok_or_else(|| {
                    ServiceError::ValidationError(
                        "guest checkout requires an inline address".to_string(),
                    )
                })?;
                self.address_book
                    .resolve(user_id, address_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Address {address_id} not found"))
                    })
            }
        }
    }
}
