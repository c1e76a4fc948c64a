//! In-memory event bus.

#![allow(clippy::unwrap_used)] // Test infrastructure: mutex poisoning is a test failure

use booking_core::event::BusMessage;
use booking_core::event_bus::{EventBus, EventBusError, EventStream};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// In-memory [`EventBus`].
///
/// - Every acknowledged message is recorded and visible via [`published`](Self::published)
/// - [`fail_next`](Self::fail_next) makes the next `n` publishes fail
/// - [`with_latency`](Self::with_latency) delays each acknowledgement, for
///   timeout tests under `tokio::time::pause`
/// - Subscribers receive messages published after they subscribed
#[derive(Clone, Debug)]
pub struct InMemoryEventBus {
    published: Arc<Mutex<Vec<BusMessage>>>,
    failures_remaining: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
    latency: Option<Duration>,
    sender: broadcast::Sender<BusMessage>,
}

impl InMemoryEventBus {
    /// Create an empty bus
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            published: Arc::new(Mutex::new(Vec::new())),
            failures_remaining: Arc::new(AtomicUsize::new(0)),
            attempts: Arc::new(AtomicUsize::new(0)),
            latency: None,
            sender,
        }
    }

    /// Delay every acknowledgement by `latency`
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next `n` publish calls
    pub fn fail_next(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Messages acknowledged so far, in publish order
    #[must_use]
    pub fn published(&self) -> Vec<BusMessage> {
        self.published.lock().unwrap().clone()
    }

    /// Number of publish calls, successful or not
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish<'a>(
        &'a self,
        message: &'a BusMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + 'a>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            if self.take_failure() {
                return Err(EventBusError::PublishFailed {
                    topic: message.topic.clone(),
                    reason: "injected failure".to_string(),
                });
            }
            self.published.lock().unwrap().push(message.clone());
            // No receivers is not an error
            let _ = self.sender.send(message.clone());
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let mut rx = self.sender.subscribe();

        Box::pin(async move {
            let stream = async_stream::stream! {
                loop {
                    match rx.recv().await {
                        Ok(message) => {
                            if topics.contains(&message.topic) {
                                yield Ok(message);
                            }
                        },
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            yield Err(EventBusError::TransportError(format!(
                                "subscriber lagged, {skipped} messages skipped"
                            )));
                        },
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            };
            Ok(Box::pin(stream) as EventStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn message(topic: &str, key: &str) -> BusMessage {
        BusMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            event_type: "BookingHeld".to_string(),
            aggregate_type: "Booking".to_string(),
            payload: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let bus = InMemoryEventBus::new();
        bus.fail_next(1);

        assert!(bus.publish(&message("booking-events", "a")).await.is_err());
        assert!(bus.publish(&message("booking-events", "a")).await.is_ok());
        assert_eq!(bus.published().len(), 1);
        assert_eq!(bus.attempts(), 2);
    }

    #[tokio::test]
    async fn subscribers_only_see_their_topics() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe(&["booking-events"]).await.expect("subscribe");

        bus.publish(&message("other-events", "x")).await.expect("publish");
        bus.publish(&message("booking-events", "y")).await.expect("publish");

        let received = stream.next().await.expect("item").expect("message");
        assert_eq!(received.key, "y");
    }
}
