//! Periodic background jobs.
//!
//! Each job runs on its own `tokio::time::interval`. A tick awaits the job to
//! completion before the next tick is taken and missed ticks are skipped, so
//! a job never overlaps itself. All jobs stop when the shared `watch`
//! shutdown flag flips to `true`.

use crate::outbox::OutboxPublisher;
use crate::sweeper::HoldExpirySweeper;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Run `job` every `period` until `shutdown` becomes `true`.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(job = name, period = ?period, "Starting periodic job");

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => job().await,
                changed = shutdown.changed() => {
                    // Sender dropped counts as shutdown
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(job = name, "Periodic job stopped");
    })
}

/// Drive an [`OutboxPublisher`] every `period`.
pub fn spawn_outbox_publisher(
    publisher: OutboxPublisher,
    period: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    spawn_periodic("outbox-publisher", period, shutdown, move || {
        let publisher = publisher.clone();
        async move {
            match publisher.publish_pending().await {
                Ok(report) if report.published > 0 || report.failed => {
                    tracing::debug!(
                        published = report.published,
                        failed = report.failed,
                        "Outbox tick"
                    );
                },
                Ok(_) => {},
                Err(e) => tracing::warn!(error = %e, "Failed to read outbox"),
            }
        }
    })
}

/// Drive a [`HoldExpirySweeper`] every `period`.
pub fn spawn_hold_sweeper(
    sweeper: HoldExpirySweeper,
    period: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    spawn_periodic("hold-expiry-sweeper", period, shutdown, move || {
        let sweeper = sweeper.clone();
        async move {
            if let Err(e) = sweeper.run_once().await {
                tracing::warn!(error = %e, "Hold expiry sweep failed");
            }
        }
    })
}
