use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order::DeliveryWindow;

/// Finite delivery capacity for one `(date, window)` pair.
///
/// Rows are created lazily on first reservation; a missing row is
/// equivalent to `booked_count = 0` at the configured default capacity.
/// Invariant: `0 <= booked_count <= max_capacity`, concurrency included.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "delivery_slots")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub slot_date: Date,
    pub window: DeliveryWindow,
    pub max_capacity: i32,
    pub booked_count: i32,
    pub is_blocked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
