use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::order::{self, Entity as OrderEntity, OrderStatus};
use crate::entities::order_line::{self, Entity as OrderLineEntity};
use crate::entities::order_status_history::{self, Entity as OrderStatusHistoryEntity};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::slots::SlotAllocator;

/// An order with its lines and audit trail.
#[derive(Debug, Clone)]
pub struct OrderDetails {
    pub order: order::Model,
    pub lines: Vec<order_line::Model>,
    pub history: Vec<order_status_history::Model>,
}

/// Persists the order aggregate and enforces the status state machine.
///
/// Every transition is one transaction: validate, update the status field,
/// append a history row, and release the delivery slot when the new status
/// is `Cancelled`. Partial application is impossible by construction.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    slots: SlotAllocator,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(db: Arc<DbPool>, slots: SlotAllocator, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db,
            slots,
            event_sender,
        }
    }

    /// Retrieves an order by id.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        Ok(OrderEntity::find_by_id(order_id).one(&*self.db).await?)
    }

    /// Retrieves an order with its lines and status history.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order_details(
        &self,
        order_id: Uuid,
    ) -> Result<Option<OrderDetails>, ServiceError> {
        let Some(order) = OrderEntity::find_by_id(order_id).one(&*self.db).await? else {
            return Ok(None);
        };

        let lines = OrderLineEntity::find()
            .filter(order_line::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;

        let history = self.history(order_id).await?;

        Ok(Some(OrderDetails {
            order,
            lines,
            history,
        }))
    }

    /// The order's audit trail, oldest entry first.
    pub async fn history(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_status_history::Model>, ServiceError> {
        Ok(OrderStatusHistoryEntity::find()
            .filter(order_status_history::Column::OrderId.eq(order_id))
            .order_by_asc(order_status_history::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Transitions an order to `new_status` in its own transaction.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn transition(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        changed_by: Option<&str>,
        note: Option<&str>,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let old_status = order.status;
        let (delivery_date, delivery_window) = (order.delivery_date, order.delivery_window);
        let updated = self
            .transition_in(&txn, order, new_status, changed_by, note)
            .await?;

        txn.commit().await?;

        info!(
            order_id = %order_id,
            old_status = %old_status,
            new_status = %new_status,
            "order status updated"
        );

        if let Some(event_sender) = &self.event_sender {
            let event = Event::OrderStatusChanged {
                order_id,
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
            };
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, order_id = %order_id, "failed to send status change event");
            }
            if new_status == OrderStatus::Cancelled {
                if let Err(e) = event_sender.send(Event::OrderCancelled(order_id)).await {
                    warn!(error = %e, order_id = %order_id, "failed to send cancel event");
                }
                let released = Event::SlotReleased {
                    date: delivery_date,
                    window: delivery_window,
                };
                if let Err(e) = event_sender.send(released).await {
                    warn!(error = %e, order_id = %order_id, "failed to send slot released event");
                }
            }
        }

        Ok(updated)
    }

    /// Transition body, composable into a caller's transaction.
    ///
    /// Validates the move out of the current status, bumps the status and
    /// version, appends the history row, and frees the delivery slot on
    /// cancellation — all against `conn`.
    pub async fn transition_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: order::Model,
        new_status: OrderStatus,
        changed_by: Option<&str>,
        note: Option<&str>,
    ) -> Result<order::Model, ServiceError> {
        if !order.status.can_transition_to(new_status) {
            return Err(ServiceError::InvalidTransition {
                from: order.status.to_string(),
                to: new_status.to_string(),
            });
        }

        let order_id = order.id;
        let delivery_date = order.delivery_date;
        let delivery_window = order.delivery_window;
        let version = order.version;

        let mut active: order::ActiveModel = order.into();
        active.status = Set(new_status);
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);
        let updated = active.update(conn).await?;

        Self::append_history(conn, order_id, new_status, changed_by, note).await?;

        if new_status == OrderStatus::Cancelled {
            self.slots.release(conn, delivery_date, delivery_window).await?;
        }

        Ok(updated)
    }

    /// Appends one audit row. Also used at order creation for the initial
    /// `PendingPayment` entry.
    pub async fn append_history<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
        status: OrderStatus,
        changed_by: Option<&str>,
        note: Option<&str>,
    ) -> Result<(), ServiceError> {
        let row = order_status_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            status: Set(status),
            changed_by: Set(changed_by.map(str::to_string)),
            note: Set(note.map(str::to_string)),
            created_at: Set(Utc::now()),
        };
        row.insert(conn).await?;
        Ok(())
    }

    /// Cancels an order, releasing its delivery slot in the same
    /// transaction.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel(
        &self,
        order_id: Uuid,
        changed_by: Option<&str>,
        reason: Option<&str>,
    ) -> Result<order::Model, ServiceError> {
        self.transition(order_id, OrderStatus::Cancelled, changed_by, reason)
            .await
    }
}
