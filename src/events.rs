use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::order::DeliveryWindow;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

// The events that can occur in the checkout/settlement pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderCancelled(Uuid),

    // Payment events
    PaymentCaptured(Uuid),
    PaymentFailed(Uuid),
    PaymentRefunded(Uuid),

    // Slot events
    SlotReserved {
        date: NaiveDate,
        window: DeliveryWindow,
    },
    SlotReleased {
        date: NaiveDate,
        window: DeliveryWindow,
    },
}

// Processes incoming events. Runs as a background task for the lifetime of
// the server; senders never block on handlers.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderCreated(order_id) => {
                info!(order_id = %order_id, "order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(order_id = %order_id, %old_status, %new_status, "order status changed");
            }
            Event::OrderCancelled(order_id) => {
                info!(order_id = %order_id, "order cancelled");
            }
            Event::PaymentCaptured(payment_id) => {
                info!(payment_id = %payment_id, "payment captured");
            }
            Event::PaymentFailed(payment_id) => {
                warn!(payment_id = %payment_id, "payment failed");
            }
            Event::PaymentRefunded(payment_id) => {
                info!(payment_id = %payment_id, "payment refunded");
            }
            Event::SlotReserved { date, window } => {
                info!(%date, %window, "delivery slot reserved");
            }
            Event::SlotReleased { date, window } => {
                info!(%date, %window, "delivery slot released");
            }
        }
    }

    info!("Event processing loop stopped");
}
