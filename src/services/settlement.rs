use sea_orm::{EntityTrait, TransactionTrait};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::collaborators::{BuyerContext, CartStore, GuestContact};
use crate::db::DbPool;
use crate::entities::order::{self, OrderStatus};
use crate::entities::payment::PaymentStatus;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateway::{CaptureRequest, ChargeOutcome, GatewayError, PaymentGateway};
use crate::message_queue::{
    Message, MessageQueue, TOPIC_INVOICE_GENERATE, TOPIC_ORDER_CONFIRMED,
};
use crate::services::orders::OrderService;
use crate::services::payments::PaymentService;
use crate::webhooks::{GatewayEvent, SignatureVerifier};

/// Non-critical effects of a settlement, reported separately from the
/// critical state transition so callers (and tests) can tell them apart.
/// A `false` flag means the effect failed or was skipped and was logged,
/// never that the settlement failed.
#[derive(Debug, Clone, Default)]
pub struct SideEffects {
    pub cart_cleared: bool,
    pub invoice_enqueued: bool,
    pub notification_enqueued: bool,
}

/// Outcome of a successful capture.
#[derive(Debug, Clone)]
pub struct SettlementReceipt {
    pub order_id: Uuid,
    pub order_number: String,
    pub payment_id: Uuid,
    pub side_effects: SideEffects,
}

/// What a webhook delivery did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// State was transitioned by this delivery.
    Applied,
    /// Recognized but deliberately ignored: replay, unknown charge, or an
    /// event type we do not handle.
    Ignored,
}

/// Drives a payment to its final state, from the synchronous capture call
/// or from the asynchronous webhook stream, keeping order status, payment
/// status and slot occupancy consistent.
#[derive(Clone)]
pub struct SettlementService {
    db: Arc<DbPool>,
    orders: Arc<OrderService>,
    payments: Arc<PaymentService>,
    gateway: Arc<dyn PaymentGateway>,
    cart_store: Arc<dyn CartStore>,
    queue: Arc<dyn MessageQueue>,
    verifier: Arc<SignatureVerifier>,
    event_sender: Arc<EventSender>,
    currency: String,
}

impl SettlementService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DbPool>,
        orders: Arc<OrderService>,
        payments: Arc<PaymentService>,
        gateway: Arc<dyn PaymentGateway>,
        cart_store: Arc<dyn CartStore>,
        queue: Arc<dyn MessageQueue>,
        verifier: Arc<SignatureVerifier>,
        event_sender: Arc<EventSender>,
        currency: String,
    ) -> Self {
        Self {
            db,
            orders,
            payments,
            gateway,
            cart_store,
            queue,
            verifier,
            event_sender,
            currency,
        }
    }

    /// Captures the active pending payment for an order.
    ///
    /// Preconditions are checked in order, each with its own failure:
    /// the order exists, is exactly `PendingPayment`, belongs to the
    /// requesting user (when both sides are known), and has one pending
    /// payment. The gateway is charged the *stored* amount, never a
    /// caller-supplied one. A gateway outage mutates nothing and is safe
    /// to retry; a decline fails this attempt and opens a fresh pending
    /// payment so the order stays payable.
    #[instrument(skip(self, gateway_token, payer_email), fields(order_id = %order_id))]
    pub async fn capture(
        &self,
        order_id: Uuid,
        gateway_token: &str,
        payer_email: &str,
        requesting_user_id: Option<Uuid>,
    ) -> Result<SettlementReceipt, ServiceError> {
        let order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        if order.status != OrderStatus::PendingPayment {
            return Err(ServiceError::AlreadySettled(order.status.to_string()));
        }

        if let (Some(requester), Some(owner)) = (requesting_user_id, order.user_id) {
            if requester != owner {
                return Err(ServiceError::OwnershipMismatch);
            }
        }

        let pending = self
            .payments
            .find_active_pending(&*self.db, order_id)
            .await?
            .ok_or(ServiceError::NoPendingPayment)?;

        let outcome = self
            .gateway
            .capture(CaptureRequest {
                token: gateway_token.to_string(),
                amount_centimos: pending.amount_centimos,
                currency: self.currency.clone(),
                payer_email: payer_email.to_string(),
                preorder_id: pending.gateway_preorder_id.clone(),
            })
            .await
            .map_err(|e| match e {
                GatewayError::Unavailable(msg) | GatewayError::Protocol(msg) => {
                    ServiceError::GatewayUnavailable(msg)
                }
            })?;

        match outcome {
            ChargeOutcome::Succeeded { charge_id } => {
                self.settle_success(&order, pending.id, &charge_id).await
            }
            ChargeOutcome::Declined { reason } => {
                self.settle_decline(&order, pending.id, pending.amount_centimos, &reason)
                    .await
            }
        }
    }

    async fn settle_success(
        &self,
        order: &order::Model,
        payment_id: Uuid,
        charge_id: &str,
    ) -> Result<SettlementReceipt, ServiceError> {
        let txn = self.db.begin().await?;

        let transitioned = self
            .payments
            .mark_succeeded(&txn, payment_id, charge_id)
            .await?;

        if transitioned {
            // Re-read inside the transaction so the version bump applies to
            // the current row.
            let fresh = order::Entity::find_by_id(order.id)
                .one(&txn)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order.id)))?;
            self.orders
                .transition_in(
                    &txn,
                    fresh,
                    OrderStatus::Paid,
                    Some("settlement"),
                    Some(&format!("charge {charge_id}")),
                )
                .await?;
        }

        txn.commit().await?;

        if transitioned {
            info!(order_id = %order.id, %charge_id, "payment captured");
            if let Err(e) = self.event_sender.send(Event::PaymentCaptured(payment_id)).await {
                warn!(error = %e, "failed to send capture event");
            }
        } else {
            info!(order_id = %order.id, "payment already settled; capture treated as no-op");
        }

        let mut side_effects = SideEffects::default();
        side_effects.cart_cleared = self.clear_buyer_cart(order).await;
        if transitioned {
            side_effects.invoice_enqueued = self
                .enqueue_job(TOPIC_INVOICE_GENERATE, order, payment_id)
                .await;
            side_effects.notification_enqueued = self
                .enqueue_job(TOPIC_ORDER_CONFIRMED, order, payment_id)
                .await;
        }

        Ok(SettlementReceipt {
            order_id: order.id,
            order_number: order.order_number.clone(),
            payment_id,
            side_effects,
        })
    }

    async fn settle_decline(
        &self,
        order: &order::Model,
        payment_id: Uuid,
        amount_centimos: i64,
        reason: &str,
    ) -> Result<SettlementReceipt, ServiceError> {
        let txn = self.db.begin().await?;

        let marked = self.payments.mark_failed(&txn, payment_id, reason).await?;
        if marked {
            // Keep the order payable: the next attempt gets its own row.
            self.payments
                .create_pending(&txn, order.id, amount_centimos)
                .await?;
        }

        txn.commit().await?;

        warn!(order_id = %order.id, %reason, "charge declined");
        if let Err(e) = self.event_sender.send(Event::PaymentFailed(payment_id)).await {
            warn!(error = %e, "failed to send payment failed event");
        }

        Err(ServiceError::PaymentDeclined(reason.to_string()))
    }

    /// Reconciles one webhook delivery against local state.
    ///
    /// The HMAC is checked over the raw bytes before anything is parsed;
    /// a mismatch rejects the delivery with no state change and no detail.
    /// Everything that verifies is either applied or deliberately ignored —
    /// replays and unknown event types are successes, not errors.
    #[instrument(skip(self, raw_body, signature_header))]
    pub async fn reconcile(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let signature = signature_header.ok_or(ServiceError::InvalidSignature)?;
        self.verifier.verify(raw_body, signature)?;

        let event: GatewayEvent = match serde_json::from_slice(raw_body) {
            Ok(event) => event,
            Err(e) => {
                // Authentic but unparseable: accept and ignore rather than
                // bounce a delivery the gateway will only resend.
                warn!(error = %e, "authenticated webhook body did not parse; ignoring");
                return Ok(ReconcileOutcome::Ignored);
            }
        };

        match event {
            GatewayEvent::ChargeSucceeded { data } => self.reconcile_succeeded(&data.id).await,
            GatewayEvent::ChargeFailed { data } => {
                let reason = data
                    .failure_reason
                    .unwrap_or_else(|| "charge failed".to_string());
                self.reconcile_failed(&data.id, &reason).await
            }
            GatewayEvent::ChargeRefunded { data } => self.reconcile_refunded(&data.id).await,
            GatewayEvent::Unknown => {
                info!("ignoring unrecognized webhook event type");
                Ok(ReconcileOutcome::Ignored)
            }
        }
    }

    async fn reconcile_succeeded(&self, charge_id: &str) -> Result<ReconcileOutcome, ServiceError> {
        let txn = self.db.begin().await?;

        let Some(payment) = self.payments.find_by_charge_id(&txn, charge_id).await? else {
            txn.commit().await?;
            info!(%charge_id, "charge.succeeded for unknown charge; ignoring");
            return Ok(ReconcileOutcome::Ignored);
        };

        if payment.status == PaymentStatus::Succeeded {
            txn.commit().await?;
            info!(%charge_id, "charge.succeeded replay; ignoring");
            return Ok(ReconcileOutcome::Ignored);
        }

        let transitioned = self
            .payments
            .mark_succeeded(&txn, payment.id, charge_id)
            .await?;
        if !transitioned {
            txn.commit().await?;
            return Ok(ReconcileOutcome::Ignored);
        }

        let order = order::Entity::find_by_id(payment.order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", payment.order_id))
            })?;
        let order_id = order.id;
        self.orders
            .transition_in(
                &txn,
                order,
                OrderStatus::Paid,
                Some("webhook"),
                Some(&format!("charge {charge_id}")),
            )
            .await?;

        txn.commit().await?;

        info!(order_id = %order_id, %charge_id, "webhook settled payment");
        if let Err(e) = self.event_sender.send(Event::PaymentCaptured(payment.id)).await {
            warn!(error = %e, "failed to send capture event");
        }
        if let Some(order) = self.orders.get_order(order_id).await? {
            self.enqueue_job(TOPIC_INVOICE_GENERATE, &order, payment.id)
                .await;
        }

        Ok(ReconcileOutcome::Applied)
    }

    async fn reconcile_failed(
        &self,
        charge_id: &str,
        reason: &str,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let txn = self.db.begin().await?;

        let Some(payment) = self.payments.find_by_charge_id(&txn, charge_id).await? else {
            txn.commit().await?;
            info!(%charge_id, "charge.failed for unknown charge; ignoring");
            return Ok(ReconcileOutcome::Ignored);
        };

        // Unlike the synchronous decline path, no retry payment is created
        // here; the buyer re-attempts explicitly.
        let marked = self.payments.mark_failed(&txn, payment.id, reason).await?;
        txn.commit().await?;

        if marked {
            warn!(%charge_id, %reason, "webhook marked payment failed");
            if let Err(e) = self.event_sender.send(Event::PaymentFailed(payment.id)).await {
                warn!(error = %e, "failed to send payment failed event");
            }
            Ok(ReconcileOutcome::Applied)
        } else {
            Ok(ReconcileOutcome::Ignored)
        }
    }

    async fn reconcile_refunded(&self, charge_id: &str) -> Result<ReconcileOutcome, ServiceError> {
        let txn = self.db.begin().await?;

        let Some(payment) = self.payments.find_by_charge_id(&txn, charge_id).await? else {
            txn.commit().await?;
            info!(%charge_id, "charge.refunded for unknown charge; ignoring");
            return Ok(ReconcileOutcome::Ignored);
        };

        let marked = self.payments.mark_refunded(&txn, payment.id).await?;
        if !marked {
            txn.commit().await?;
            info!(%charge_id, "charge.refunded replay; ignoring");
            return Ok(ReconcileOutcome::Ignored);
        }

        let order = order::Entity::find_by_id(payment.order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", payment.order_id))
            })?;
        let order_id = order.id;
        self.orders
            .transition_in(
                &txn,
                order,
                OrderStatus::Refunded,
                Some("webhook"),
                Some(&format!("charge {charge_id} refunded")),
            )
            .await?;

        txn.commit().await?;

        info!(order_id = %order_id, %charge_id, "webhook refunded payment");
        if let Err(e) = self.event_sender.send(Event::PaymentRefunded(payment.id)).await {
            warn!(error = %e, "failed to send refund event");
        }

        Ok(ReconcileOutcome::Applied)
    }

    /// Best-effort cart clear after a successful capture.
    async fn clear_buyer_cart(&self, order: &order::Model) -> bool {
        let buyer = if let Some(user_id) = order.user_id {
            BuyerContext::User(user_id)
        } else if let Some(email) = order.guest_email.clone() {
            BuyerContext::Guest(GuestContact {
                email,
                phone: order.guest_phone.clone(),
            })
        } else {
            return false;
        };

        match self.cart_store.clear_cart(&buyer).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, order_id = %order.id, "failed to clear buyer cart");
                false
            }
        }
    }

    /// Fire-and-forget job publish; failure is logged and isolated from the
    /// settlement decision.
    async fn enqueue_job(&self, topic: &str, order: &order::Model, payment_id: Uuid) -> bool {
        let message = Message::new(
            topic,
            json!({
                "order_id": order.id,
                "order_number": order.order_number,
                "payment_id": payment_id,
            }),
        );
        match self.queue.publish(message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, %topic, order_id = %order.id, "failed to enqueue job");
                false
            }
        }
    }
}
