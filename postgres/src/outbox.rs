//! Publish side of the outbox.

use crate::PostgresBookingStore;
use crate::error::map_sqlx_error;
use booking_core::event::OutboxEntry;
use booking_core::store::{OutboxStore, StoreFuture};
use booking_core::{DateTime, StoreError, Utc};
use sqlx::Row;
use sqlx::postgres::PgRow;

fn row_to_entry(row: &PgRow) -> Result<OutboxEntry, StoreError> {
    Ok(OutboxEntry {
        id: row.try_get("id").map_err(map_sqlx_error)?,
        topic: row.try_get("topic").map_err(map_sqlx_error)?,
        aggregate_type: row.try_get("aggregate_type").map_err(map_sqlx_error)?,
        aggregate_id: row.try_get("aggregate_id").map_err(map_sqlx_error)?,
        event_type: row.try_get("event_type").map_err(map_sqlx_error)?,
        payload: row.try_get("payload").map_err(map_sqlx_error)?,
        created_at: row.try_get("created_at").map_err(map_sqlx_error)?,
        published_at: row.try_get("published_at").map_err(map_sqlx_error)?,
    })
}

impl OutboxStore for PostgresBookingStore {
    fn next_unpublished(&self, limit: u32) -> StoreFuture<'_, Vec<OutboxEntry>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT id, topic, aggregate_type, aggregate_id, event_type, payload,
                       created_at, published_at
                FROM outbox
                WHERE published_at IS NULL
                ORDER BY id ASC
                LIMIT $1
                ",
            )
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            rows.iter().map(row_to_entry).collect()
        })
    }

    fn mark_published(&self, id: i64, at: DateTime<Utc>) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let updated = sqlx::query(
                "UPDATE outbox SET published_at = $2 WHERE id = $1 AND published_at IS NULL",
            )
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();

            Ok(updated == 1)
        })
    }

    fn count_unpublished(&self) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let (count,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM outbox WHERE published_at IS NULL")
                    .fetch_one(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

            Ok(u64::try_from(count).unwrap_or_default())
        })
    }
}
