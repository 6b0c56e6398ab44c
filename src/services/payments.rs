use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::payment::{self, Entity as PaymentEntity, PaymentStatus};
use crate::errors::ServiceError;

/// Persists payment attempts and enforces the payment state machine.
///
/// Status marks are conditional updates filtered on the expected current
/// status; a mark that affects zero rows means another path settled the
/// payment first, which callers treat as an idempotent no-op.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DbPool>,
}

impl PaymentService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Creates a `Pending` payment row inside the caller's transaction.
    pub async fn create_pending<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
        amount_centimos: i64,
    ) -> Result<payment::Model, ServiceError> {
        let model = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            amount_centimos: Set(amount_centimos),
            status: Set(PaymentStatus::Pending),
            gateway_preorder_id: Set(None),
            gateway_charge_id: Set(None),
            failure_reason: Set(None),
            refunded_at: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        };

        Ok(model.insert(conn).await?)
    }

    /// The order's single active (pending) payment, if any.
    #[instrument(skip(self, conn))]
    pub async fn find_active_pending<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<Option<payment::Model>, ServiceError> {
        Ok(PaymentEntity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .filter(payment::Column::Status.eq(PaymentStatus::Pending))
            .order_by_desc(payment::Column::CreatedAt)
            .one(conn)
            .await?)
    }

    /// Lookup by the gateway's charge id, for webhook reconciliation.
    pub async fn find_by_charge_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        charge_id: &str,
    ) -> Result<Option<payment::Model>, ServiceError> {
        Ok(PaymentEntity::find()
            .filter(payment::Column::GatewayChargeId.eq(charge_id))
            .one(conn)
            .await?)
    }

    /// All payment rows for an order, oldest first.
    pub async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<payment::Model>, ServiceError> {
        Ok(PaymentEntity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .order_by_asc(payment::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Marks `Pending → Succeeded`, storing the gateway charge id.
    ///
    /// Returns `false` when the payment was no longer pending (a racing
    /// path already settled it).
    #[instrument(skip(self, conn))]
    pub async fn mark_succeeded<C: ConnectionTrait>(
        &self,
        conn: &C,
        payment_id: Uuid,
        gateway_charge_id: &str,
    ) -> Result<bool, ServiceError> {
        let result = PaymentEntity::update_many()
            .set(payment::ActiveModel {
                status: Set(PaymentStatus::Succeeded),
                gateway_charge_id: Set(Some(gateway_charge_id.to_string())),
                updated_at: Set(Some(Utc::now())),
                ..Default::default()
            })
            .filter(payment::Column::Id.eq(payment_id))
            .filter(payment::Column::Status.eq(PaymentStatus::Pending))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            info!(payment_id = %payment_id, "payment already settled; succeed mark skipped");
        }
        Ok(result.rows_affected == 1)
    }

    /// Marks `Pending → Failed` with a human-readable reason.
    #[instrument(skip(self, conn))]
    pub async fn mark_failed<C: ConnectionTrait>(
        &self,
        conn: &C,
        payment_id: Uuid,
        reason: &str,
    ) -> Result<bool, ServiceError> {
        let result = PaymentEntity::update_many()
            .set(payment::ActiveModel {
                status: Set(PaymentStatus::Failed),
                failure_reason: Set(Some(reason.to_string())),
                updated_at: Set(Some(Utc::now())),
                ..Default::default()
            })
            .filter(payment::Column::Id.eq(payment_id))
            .filter(payment::Column::Status.eq(PaymentStatus::Pending))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            warn!(payment_id = %payment_id, "payment not pending; fail mark skipped");
        }
        Ok(result.rows_affected == 1)
    }

    /// Marks `Succeeded → Refunded`, stamping `refunded_at`.
    #[instrument(skip(self, conn))]
    pub async fn mark_refunded<C: ConnectionTrait>(
        &self,
        conn: &C,
        payment_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let result = PaymentEntity::update_many()
            .set(payment::ActiveModel {
                status: Set(PaymentStatus::Refunded),
                refunded_at: Set(Some(Utc::now())),
                updated_at: Set(Some(Utc::now())),
                ..Default::default()
            })
            .filter(payment::Column::Id.eq(payment_id))
            .filter(payment::Column::Status.eq(PaymentStatus::Succeeded))
            .exec(conn)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Persists the gateway pre-order id after a successful (best-effort)
    /// pre-authorization. Runs outside any transaction.
    pub async fn set_preorder_id(
        &self,
        payment_id: Uuid,
        preorder_id: &str,
    ) -> Result<(), ServiceError> {
        PaymentEntity::update_many()
            .set(payment::ActiveModel {
                gateway_preorder_id: Set(Some(preorder_id.to_string())),
                updated_at: Set(Some(Utc::now())),
                ..Default::default()
            })
            .filter(payment::Column::Id.eq(payment_id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }
}
