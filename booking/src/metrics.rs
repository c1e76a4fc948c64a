//! Booking metrics.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `booking.holds.created` - Holds committed
//! - `booking.holds.conflicts` - Holds rejected by the overlap constraint
//! - `booking.confirmed` - Holds confirmed
//! - `booking.cancelled` - Reservations cancelled
//! - `booking.holds.expired` - Holds expired, lazily or by the sweeper
//! - `booking.outbox.published` - Outbox entries acknowledged by the broker
//! - `booking.outbox.publish_failures` - Failed or timed out publishes
//! - `booking.availability.cache.hits` - Searches served from the cache
//! - `booking.availability.cache.misses` - Searches that went to the store

use metrics::describe_counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;

/// Holds committed.
pub const HOLDS_CREATED: &str = "booking.holds.created";
/// Holds rejected because the dates were taken.
pub const HOLDS_CONFLICTS: &str = "booking.holds.conflicts";
/// Holds confirmed.
pub const CONFIRMED: &str = "booking.confirmed";
/// Reservations cancelled.
pub const CANCELLED: &str = "booking.cancelled";
/// Holds expired.
pub const HOLDS_EXPIRED: &str = "booking.holds.expired";
/// Outbox entries published.
pub const OUTBOX_PUBLISHED: &str = "booking.outbox.published";
/// Outbox publish failures.
pub const OUTBOX_PUBLISH_FAILURES: &str = "booking.outbox.publish_failures";
/// Availability searches served from the cache.
pub const AVAILABILITY_CACHE_HITS: &str = "booking.availability.cache.hits";
/// Availability searches that missed the cache.
pub const AVAILABILITY_CACHE_MISSES: &str = "booking.availability.cache.misses";

/// Errors from the metrics exporter.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Listen address could not be parsed
    #[error("Invalid metrics address: {0}")]
    Address(String),
    /// Failed to install the exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Register descriptions for every booking metric.
///
/// Call once at startup, before anything is recorded.
pub fn register_metrics() {
    describe_counter!(HOLDS_CREATED, "Total number of holds committed");
    describe_counter!(
        HOLDS_CONFLICTS,
        "Total number of holds rejected because the dates overlap an active reservation"
    );
    describe_counter!(CONFIRMED, "Total number of confirmed holds");
    describe_counter!(CANCELLED, "Total number of cancelled reservations");
    describe_counter!(HOLDS_EXPIRED, "Total number of expired holds");
    describe_counter!(
        OUTBOX_PUBLISHED,
        "Total number of outbox entries acknowledged by the broker"
    );
    describe_counter!(
        OUTBOX_PUBLISH_FAILURES,
        "Total number of outbox publishes that failed or timed out"
    );
    describe_counter!(
        AVAILABILITY_CACHE_HITS,
        "Total number of availability searches served from the cache"
    );
    describe_counter!(
        AVAILABILITY_CACHE_MISSES,
        "Total number of availability searches that missed the cache"
    );

    tracing::info!("Booking metrics registered");
}

/// Record a committed hold.
pub fn record_hold_created() {
    metrics::counter!(HOLDS_CREATED).increment(1);
}

/// Record a hold rejected by the overlap constraint.
pub fn record_hold_conflict() {
    metrics::counter!(HOLDS_CONFLICTS).increment(1);
}

/// Record a confirmation.
pub fn record_confirmed() {
    metrics::counter!(CONFIRMED).increment(1);
}

/// Record a cancellation.
pub fn record_cancelled() {
    metrics::counter!(CANCELLED).increment(1);
}

/// Record `count` expired holds.
pub fn record_holds_expired(count: u64) {
    metrics::counter!(HOLDS_EXPIRED).increment(count);
}

/// Record an acknowledged outbox entry.
pub fn record_outbox_published() {
    metrics::counter!(OUTBOX_PUBLISHED).increment(1);
}

/// Record a failed or timed out publish.
pub fn record_outbox_publish_failure() {
    metrics::counter!(OUTBOX_PUBLISH_FAILURES).increment(1);
}

/// Record an availability search served from the cache.
pub fn record_availability_cache_hit() {
    metrics::counter!(AVAILABILITY_CACHE_HITS).increment(1);
}

/// Record an availability search that missed the cache.
pub fn record_availability_cache_miss() {
    metrics::counter!(AVAILABILITY_CACHE_MISSES).increment(1);
}

/// Install the Prometheus recorder with an HTTP listener on `host:port`.
///
/// # Errors
///
/// Returns [`MetricsError`] if the address is invalid or a recorder is
/// already installed.
pub fn install_prometheus(host: &str, port: u16) -> Result<SocketAddr, MetricsError> {
    let ip: IpAddr = host
        .parse()
        .map_err(|e| MetricsError::Address(format!("{host}: {e}")))?;
    let addr = SocketAddr::new(ip, port);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    tracing::info!(%addr, "Metrics exporter listening at http://{}/metrics", addr);
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_host_is_rejected() {
        let result = install_prometheus("not-an-ip", 9090);
        assert!(matches!(result, Err(MetricsError::Address(_))));
    }

    #[test]
    fn registering_without_recorder_is_harmless() {
        register_metrics();
        record_hold_created();
        record_holds_expired(3);
    }
}
