use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::delivery_slot::{self, Entity as DeliverySlotEntity};
use crate::entities::order::DeliveryWindow;
use crate::errors::ServiceError;

/// Availability of one `(date, window)` pair.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SlotAvailability {
    pub date: NaiveDate,
    pub window: DeliveryWindow,
    pub available: bool,
    pub remaining: i32,
}

/// Manages finite delivery capacity keyed by `(date, window)`.
///
/// Reservation is one conditional `UPDATE` at the storage layer, so
/// capacity holds under arbitrary request interleaving; there is no
/// check-then-act window anywhere in this type.
#[derive(Debug, Clone, Copy)]
pub struct SlotAllocator {
    default_capacity: i32,
}

impl SlotAllocator {
    pub fn new(default_capacity: i32) -> Self {
        Self { default_capacity }
    }

    /// Reserves one capacity unit, creating the slot row lazily on first use.
    ///
    /// Returns `SlotUnavailable` when the slot is blocked or full.
    #[instrument(skip(self, conn))]
    pub async fn reserve<C: ConnectionTrait>(
        &self,
        conn: &C,
        date: NaiveDate,
        window: DeliveryWindow,
    ) -> Result<(), ServiceError> {
        if self.try_increment(conn, date, window).await? {
            return Ok(());
        }

        // No row incremented: either the row does not exist yet, or it is
        // full/blocked. Try the lazy insert with the unit already booked.
        if self.default_capacity >= 1 && self.try_insert_booked(conn, date, window).await? {
            return Ok(());
        }

        // Insert lost a race with a concurrent first reservation; the row
        // exists now, so the conditional increment settles it.
        if self.try_increment(conn, date, window).await? {
            return Ok(());
        }

        Err(ServiceError::SlotUnavailable {
            date: date.to_string(),
            window: window.to_string(),
        })
    }

    /// Frees one previously reserved unit. Floored at zero; releasing an
    /// already-empty slot is a no-op.
    #[instrument(skip(self, conn))]
    pub async fn release<C: ConnectionTrait>(
        &self,
        conn: &C,
        date: NaiveDate,
        window: DeliveryWindow,
    ) -> Result<(), ServiceError> {
        let result = DeliverySlotEntity::update_many()
            .col_expr(
                delivery_slot::Column::BookedCount,
                Expr::col(delivery_slot::Column::BookedCount).sub(1),
            )
            .col_expr(
                delivery_slot::Column::UpdatedAt,
                Expr::value(Some(Utc::now())),
            )
            .filter(delivery_slot::Column::SlotDate.eq(date))
            .filter(delivery_slot::Column::Window.eq(window))
            .filter(delivery_slot::Column::BookedCount.gt(0))
            .exec(conn)
            .await?;

        debug!(
            %date, %window,
            released = result.rows_affected,
            "slot release"
        );
        Ok(())
    }

    /// Read-only capacity probe, used by checkout validation. Does not
    /// reserve anything.
    pub async fn has_capacity<C: ConnectionTrait>(
        &self,
        conn: &C,
        date: NaiveDate,
        window: DeliveryWindow,
    ) -> Result<bool, ServiceError> {
        let slot = DeliverySlotEntity::find()
            .filter(delivery_slot::Column::SlotDate.eq(date))
            .filter(delivery_slot::Column::Window.eq(window))
            .one(conn)
            .await?;

        Ok(match slot {
            Some(slot) => !slot.is_blocked && slot.booked_count < slot.max_capacity,
            None => self.default_capacity > 0,
        })
    }

    /// Availability for every `(date, window)` pair in the inclusive range.
    /// Pairs with no row yet report the default capacity, zero booked.
    #[instrument(skip(self, conn))]
    pub async fn list_availability<C: ConnectionTrait>(
        &self,
        conn: &C,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<SlotAvailability>, ServiceError> {
        if from > to {
            return Err(ServiceError::InvalidInput(format!(
                "availability range is inverted: {from} > {to}"
            )));
        }

        let rows = DeliverySlotEntity::find()
            .filter(delivery_slot::Column::SlotDate.gte(from))
            .filter(delivery_slot::Column::SlotDate.lte(to))
            .all(conn)
            .await?;

        let mut by_key: std::collections::HashMap<(NaiveDate, DeliveryWindow), delivery_slot::Model> =
            rows.into_iter()
                .map(|row| ((row.slot_date, row.window), row))
                .collect();

        let mut out = Vec::new();
        let mut date = from;
        while date <= to {
            for window in DeliveryWindow::ALL {
                let entry = match by_key.remove(&(date, window)) {
                    Some(slot) => {
                        let remaining = (slot.max_capacity - slot.booked_count).max(0);
                        SlotAvailability {
                            date,
                            window,
                            available: !slot.is_blocked && remaining > 0,
                            remaining,
                        }
                    }
                    None => SlotAvailability {
                        date,
                        window,
                        available: self.default_capacity > 0,
                        remaining: self.default_capacity.max(0),
                    },
                };
                out.push(entry);
            }
            date = date
                .succ_opt()
                .ok_or_else(|| ServiceError::InvalidInput("date out of range".to_string()))?;
        }

        Ok(out)
    }

    /// One conditional increment: succeeds only while the row is unblocked
    /// and below capacity.
    async fn try_increment<C: ConnectionTrait>(
        &self,
        conn: &C,
        date: NaiveDate,
        window: DeliveryWindow,
    ) -> Result<bool, ServiceError> {
        let result = DeliverySlotEntity::update_many()
            .col_expr(
                delivery_slot::Column::BookedCount,
                Expr::col(delivery_slot::Column::BookedCount).add(1),
            )
            .col_expr(
                delivery_slot::Column::UpdatedAt,
                Expr::value(Some(Utc::now())),
            )
            .filter(delivery_slot::Column::SlotDate.eq(date))
            .filter(delivery_slot::Column::Window.eq(window))
            .filter(delivery_slot::Column::IsBlocked.eq(false))
            .filter(
                Expr::col(delivery_slot::Column::BookedCount)
                    .lt(Expr::col(delivery_slot::Column::MaxCapacity)),
            )
            .exec(conn)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Lazy slot creation carrying the first booked unit. Loses cleanly to
    /// a concurrent insert via the `(slot_date, window)` unique index.
    async fn try_insert_booked<C: ConnectionTrait>(
        &self,
        conn: &C,
        date: NaiveDate,
        window: DeliveryWindow,
    ) -> Result<bool, ServiceError> {
        let now: DateTime<Utc> = Utc::now();
        let row = delivery_slot::ActiveModel {
            id: Set(Uuid::new_v4()),
            slot_date: Set(date),
            window: Set(window),
            max_capacity: Set(self.default_capacity),
            booked_count: Set(1),
            is_blocked: Set(false),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        let insert = DeliverySlotEntity::insert(row)
            .on_conflict(
                OnConflict::columns([
                    delivery_slot::Column::SlotDate,
                    delivery_slot::Column::Window,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec(conn)
            .await;

        match insert {
            Ok(_) => Ok(true),
            Err(DbErr::RecordNotInserted) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Administrative upsert used by seeding and tests to pin a slot's
    /// capacity or block it.
    pub async fn configure_slot<C: ConnectionTrait>(
        &self,
        conn: &C,
        date: NaiveDate,
        window: DeliveryWindow,
        max_capacity: i32,
        is_blocked: bool,
    ) -> Result<(), ServiceError> {
        let now: DateTime<Utc> = Utc::now();
        let row = delivery_slot::ActiveModel {
            id: Set(Uuid::new_v4()),
            slot_date: Set(date),
            window: Set(window),
            max_capacity: Set(max_capacity),
            booked_count: Set(0),
            is_blocked: Set(is_blocked),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        let insert = DeliverySlotEntity::insert(row)
            .on_conflict(
                OnConflict::columns([
                    delivery_slot::Column::SlotDate,
                    delivery_slot::Column::Window,
                ])
                .update_columns([
                    delivery_slot::Column::MaxCapacity,
                    delivery_slot::Column::IsBlocked,
                ])
                .to_owned(),
            )
            .exec(conn)
            .await;

        match insert {
            Ok(_) | Err(DbErr::RecordNotInserted) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
