//! [`BookingStore`] over `PostgreSQL`.

use crate::PostgresBookingStore;
use crate::error::map_sqlx_error;
use booking_core::event::{BookingEvent, NewOutboxEntry};
use booking_core::store::{BookingStore, StatusChange, StoreFuture};
use booking_core::types::{AvailabilityQuery, Page, Resource};
use booking_core::{
    DateTime, Reservation, ReservationId, ReservationStatus, ResourceId, StayRange, StoreError,
    UserId, Utc,
};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};

const RESERVATION_COLUMNS: &str =
    "id, resource_id, user_id, start_date, end_date, status, expires_at, created_at, updated_at";

/// Shared predicate for the availability search.
/// `$1` city, `$2` min capacity, `$3` start date, `$4` end date.
const AVAILABLE_FILTER: &str = r"
    ($1::text IS NULL OR lower(r.city) = lower($1::text))
    AND ($2::int IS NULL OR r.capacity >= $2::int)
    AND NOT EXISTS (
        SELECT 1 FROM reservations b
        WHERE b.resource_id = r.id
          AND b.status IN ('HOLD', 'CONFIRMED')
          AND b.start_date < $4
          AND b.end_date > $3
    )
";

fn row_to_reservation(row: &PgRow) -> Result<Reservation, StoreError> {
    let status: String = row.try_get("status").map_err(map_sqlx_error)?;
    let stay = StayRange::new(
        row.try_get("start_date").map_err(map_sqlx_error)?,
        row.try_get("end_date").map_err(map_sqlx_error)?,
    )
    .map_err(|e| StoreError::Database(format!("Corrupt reservation range: {e}")))?;

    Ok(Reservation {
        id: ReservationId::from_uuid(row.try_get("id").map_err(map_sqlx_error)?),
        resource_id: ResourceId::from_uuid(row.try_get("resource_id").map_err(map_sqlx_error)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(map_sqlx_error)?),
        stay,
        status: ReservationStatus::parse(&status)?,
        expires_at: row.try_get("expires_at").map_err(map_sqlx_error)?,
        created_at: row.try_get("created_at").map_err(map_sqlx_error)?,
        updated_at: row.try_get("updated_at").map_err(map_sqlx_error)?,
    })
}

fn row_to_resource(row: &PgRow) -> Result<Resource, StoreError> {
    Ok(Resource {
        id: ResourceId::from_uuid(row.try_get("id").map_err(map_sqlx_error)?),
        name: row.try_get("name").map_err(map_sqlx_error)?,
        city: row.try_get("city").map_err(map_sqlx_error)?,
        capacity: row.try_get("capacity").map_err(map_sqlx_error)?,
        created_at: row.try_get("created_at").map_err(map_sqlx_error)?,
    })
}

/// Append an outbox row on the caller's transaction.
pub(crate) async fn insert_outbox(
    conn: &mut PgConnection,
    entry: &NewOutboxEntry,
    at: DateTime<Utc>,
) -> Result<i64, StoreError> {
    let (id,): (i64,) = sqlx::query_as(
        r"
        INSERT INTO outbox (topic, aggregate_type, aggregate_id, event_type, payload, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
        ",
    )
    .bind(&entry.topic)
    .bind(&entry.aggregate_type)
    .bind(entry.aggregate_id)
    .bind(&entry.event_type)
    .bind(&entry.payload)
    .bind(at)
    .fetch_one(conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(id)
}

impl BookingStore for PostgresBookingStore {
    fn create_resource<'a>(&'a self, resource: &'a Resource) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO resources (id, name, city, capacity, created_at)
                VALUES ($1, $2, $3, $4, $5)
                ",
            )
            .bind(resource.id.as_uuid())
            .bind(&resource.name)
            .bind(&resource.city)
            .bind(resource.capacity)
            .bind(resource.created_at)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            tracing::info!(resource_id = %resource.id, city = %resource.city, "Resource created");
            Ok(())
        })
    }

    fn find_resource(&self, id: ResourceId) -> StoreFuture<'_, Option<Resource>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT id, name, city, capacity, created_at FROM resources WHERE id = $1",
            )
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            row.as_ref().map(row_to_resource).transpose()
        })
    }

    fn search_available<'a>(
        &'a self,
        query: &'a AvailabilityQuery,
    ) -> StoreFuture<'a, Page<Resource>> {
        Box::pin(async move {
            let size = query.effective_size();
            let city = query.city.as_deref().map(str::trim);
            let offset = i64::try_from(query.offset()).unwrap_or(i64::MAX);

            let page_sql = format!(
                r"
                SELECT r.id, r.name, r.city, r.capacity, r.created_at
                FROM resources r
                WHERE {AVAILABLE_FILTER}
                ORDER BY r.created_at, r.id
                LIMIT $5 OFFSET $6
                "
            );
            let rows = sqlx::query(&page_sql)
                .bind(city)
                .bind(query.min_capacity)
                .bind(query.stay.start())
                .bind(query.stay.end())
                .bind(i64::from(size))
                .bind(offset)
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

            let count_sql = format!("SELECT COUNT(*) FROM resources r WHERE {AVAILABLE_FILTER}");
            let (total,): (i64,) = sqlx::query_as(&count_sql)
                .bind(city)
                .bind(query.min_capacity)
                .bind(query.stay.start())
                .bind(query.stay.end())
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

            Ok(Page {
                items: rows.iter().map(row_to_resource).collect::<Result<_, _>>()?,
                page: query.page,
                size,
                total: u64::try_from(total).unwrap_or_default(),
            })
        })
    }

    fn exists_overlap(&self, resource: ResourceId, stay: StayRange) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let (exists,): (bool,) = sqlx::query_as(
                r"
                SELECT EXISTS (
                    SELECT 1 FROM reservations
                    WHERE resource_id = $1
                      AND status IN ('HOLD', 'CONFIRMED')
                      AND start_date < $3
                      AND end_date > $2
                )
                ",
            )
            .bind(resource.as_uuid())
            .bind(stay.start())
            .bind(stay.end())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            Ok(exists)
        })
    }

    fn find_reservation(&self, id: ReservationId) -> StoreFuture<'_, Option<Reservation>> {
        Box::pin(async move {
            let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1");
            let row = sqlx::query(&sql)
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

            row.as_ref().map(row_to_reservation).transpose()
        })
    }

    fn insert_hold<'a>(
        &'a self,
        hold: &'a Reservation,
        outbox: NewOutboxEntry,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

            sqlx::query(
                r"
                INSERT INTO reservations
                    (id, resource_id, user_id, start_date, end_date, status, expires_at, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ",
            )
            .bind(hold.id.as_uuid())
            .bind(hold.resource_id.as_uuid())
            .bind(hold.user_id.as_uuid())
            .bind(hold.stay.start())
            .bind(hold.stay.end())
            .bind(hold.status.as_str())
            .bind(hold.expires_at)
            .bind(hold.created_at)
            .bind(hold.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            insert_outbox(&mut tx, &outbox, hold.created_at).await?;
            tx.commit().await.map_err(map_sqlx_error)?;
            Ok(())
        })
    }

    fn transition(&self, change: StatusChange) -> StoreFuture<'_, Option<Reservation>> {
        Box::pin(async move {
            let expected: Vec<String> = change
                .expected
                .iter()
                .map(|s| s.as_str().to_string())
                .collect();

            let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

            let sql = format!(
                r"
                UPDATE reservations
                SET status = $2::text,
                    expires_at = CASE WHEN $2::text = 'HOLD' THEN expires_at ELSE NULL END,
                    updated_at = $3
                WHERE id = $1 AND status = ANY($4::text[])
                RETURNING {RESERVATION_COLUMNS}
                "
            );
            let row = sqlx::query(&sql)
                .bind(change.id.as_uuid())
                .bind(change.to.as_str())
                .bind(change.at)
                .bind(&expected)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;

            let Some(row) = row else {
                // Lost the compare-and-set; dropping the transaction rolls back
                return Ok(None);
            };
            let updated = row_to_reservation(&row)?;

            insert_outbox(&mut tx, &change.outbox, change.at).await?;
            tx.commit().await.map_err(map_sqlx_error)?;

            Ok(Some(updated))
        })
    }

    fn expire_holds<'a>(&'a self, now: DateTime<Utc>, topic: &'a str) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

            let expired = sqlx::query(
                r"
                UPDATE reservations
                SET status = 'EXPIRED', expires_at = NULL, updated_at = $1
                WHERE status = 'HOLD' AND expires_at < $1
                ",
            )
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();

            if expired > 0 {
                let entry =
                    NewOutboxEntry::for_event(topic, &BookingEvent::holds_expired(expired, now))?;
                insert_outbox(&mut tx, &entry, now).await?;
            }
            tx.commit().await.map_err(map_sqlx_error)?;

            Ok(expired)
        })
    }
}
