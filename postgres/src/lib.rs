//! `PostgreSQL` interval store and transactional outbox for the booking engine.
//!
//! [`PostgresBookingStore`] implements both [`BookingStore`] and
//! [`OutboxStore`] from `booking-core` on top of a sqlx [`PgPool`]:
//!
//! - Overlap safety comes from the `reservations_no_overlap` exclusion
//!   constraint (`btree_gist`), never from in-process locks
//! - Every state change and its outbox row are written in one transaction
//! - Status transitions are compare-and-set (`WHERE status = ANY(..)`)
//!
//! # Example
//!
//! ```ignore
//! use booking_postgres::{PoolSettings, PostgresBookingStore};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresBookingStore::connect(
//!         "postgres://localhost/booking",
//!         &PoolSettings::default(),
//!     )
//!     .await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```
//!
//! [`BookingStore`]: booking_core::store::BookingStore
//! [`OutboxStore`]: booking_core::store::OutboxStore

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod booking_store;
mod error;
mod outbox;

pub use error::{EXCLUSION_VIOLATION, FOREIGN_KEY_VIOLATION, map_sqlx_error};

use booking_core::StoreError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// Connection pool sizing.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Maximum pool size
    pub max_connections: u32,
    /// Connections kept open when idle
    pub min_connections: u32,
    /// Time to wait for a connection before failing
    pub connect_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// `PostgreSQL`-backed booking store.
///
/// Cheap to clone; clones share the pool.
#[derive(Clone, Debug)]
pub struct PostgresBookingStore {
    pool: PgPool,
}

impl PostgresBookingStore {
    /// Connect a new pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the database is unreachable.
    pub async fn connect(database_url: &str, settings: &PoolSettings) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.connect_timeout)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect: {e}")))?;

        tracing::info!(
            max_connections = settings.max_connections,
            min_connections = settings.min_connections,
            "Connected to PostgreSQL"
        );

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;

        tracing::info!("Database migrations applied");
        Ok(())
    }
}
