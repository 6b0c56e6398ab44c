use chrono::{NaiveDate, Utc};
use sea_orm::{ConnectionTrait, DbBackend, Statement};
use tracing::instrument;

use crate::errors::ServiceError;

/// Generates day-scoped, human-readable order numbers: `ORD-YYYYMMDD-NNNN`.
///
/// The per-day counter is a single upsert-returning statement, so numbers
/// stay unique and strictly increasing under concurrency across service
/// instances. The counter increments before the order-creation transaction
/// opens: a checkout that later rolls back burns its number, leaving a gap.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderNumberSequencer;

impl OrderNumberSequencer {
    pub fn new() -> Self {
        Self
    }

    /// Next order number for the current UTC date.
    #[instrument(skip(self, conn))]
    pub async fn next<C: ConnectionTrait>(&self, conn: &C) -> Result<String, ServiceError> {
        let today = Utc::now().date_naive();
        let counter = self.next_counter(conn, today).await?;
        Ok(format!("ORD-{}-{:04}", today.format("%Y%m%d"), counter))
    }

    /// Atomically increments and returns the counter for `date`.
    async fn next_counter<C: ConnectionTrait>(
        &self,
        conn: &C,
        date: NaiveDate,
    ) -> Result<i64, ServiceError> {
        let backend = conn.get_database_backend();
        let sql = match backend {
            DbBackend::Postgres => {
                "INSERT INTO order_number_sequences (seq_date, counter) VALUES ($1, 1) \
                 ON CONFLICT (seq_date) DO UPDATE SET counter = order_number_sequences.counter + 1 \
                 RETURNING counter"
            }
            _ => {
                "INSERT INTO order_number_sequences (seq_date, counter) VALUES (?, 1) \
                 ON CONFLICT (seq_date) DO UPDATE SET counter = counter + 1 \
                 RETURNING counter"
            }
        };

        let row = conn
            .query_one(Statement::from_sql_and_values(backend, sql, [date.into()]))
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError("sequence upsert returned no row".to_string())
            })?;

        let counter: i64 = row.try_get("", "counter")?;
        Ok(counter)
    }
}
