//! Hold-expiry sweeper.

use crate::service::BookingService;
use booking_core::BookingError;
use booking_core::environment::Clock;
use std::sync::Arc;

/// Expires lapsed holds in bulk so they stop blocking the calendar.
///
/// Holds that are confirmed after expiry are caught lazily by
/// [`BookingService::confirm`]; the sweeper covers the ones nobody touches.
#[derive(Clone)]
pub struct HoldExpirySweeper {
    service: BookingService,
    clock: Arc<dyn Clock>,
}

impl HoldExpirySweeper {
    /// Create a sweeper over `service`.
    #[must_use]
    pub fn new(service: BookingService, clock: Arc<dyn Clock>) -> Self {
        Self { service, clock }
    }

    /// Expire every hold lapsed as of now. Returns the number expired.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Internal`] on storage failure.
    pub async fn run_once(&self) -> Result<u64, BookingError> {
        self.service.expire_holds(self.clock.now()).await
    }
}

impl std::fmt::Debug for HoldExpirySweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HoldExpirySweeper")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}
