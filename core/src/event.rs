//! Booking events and the transactional outbox model.
//!
//! Every externally visible reservation state change produces exactly one
//! [`BookingEvent`]. The event is converted into a [`NewOutboxEntry`] and
//! written in the same transaction as the state change; the outbox publisher
//! later turns the persisted [`OutboxEntry`] into a [`BusMessage`] for the
//! broker.
//!
//! Payloads are flat JSON objects with camelCase keys:
//!
//! ```text
//! BookingHeld          {bookingId, resourceId, userId, startDate, endDate, status, expiresAt}
//! BookingConfirmed     {bookingId, paymentRef, status}
//! BookingCancelled     {bookingId, status}
//! BookingExpired       {bookingId, status}
//! BookingHoldsExpired  {count, at}
//! ```

use crate::error::StoreError;
use crate::types::{Reservation, ReservationId, ReservationStatus, ResourceId, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Aggregate type recorded on every booking outbox entry.
pub const AGGREGATE_TYPE: &str = "Booking";

/// Default topic booking events are published to.
pub const DEFAULT_TOPIC: &str = "booking-events";

/// Payload of `BookingHeld`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeldPayload {
    /// Reservation id
    pub booking_id: ReservationId,
    /// Held resource
    pub resource_id: ResourceId,
    /// Holder
    pub user_id: UserId,
    /// Check-in date
    pub start_date: NaiveDate,
    /// Check-out date (exclusive)
    pub end_date: NaiveDate,
    /// Always `HOLD`
    pub status: ReservationStatus,
    /// Hold expiry
    pub expires_at: Option<DateTime<Utc>>,
}

/// Payload of `BookingConfirmed`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedPayload {
    /// Reservation id
    pub booking_id: ReservationId,
    /// Opaque payment reference supplied by the caller
    pub payment_ref: String,
    /// Always `CONFIRMED`
    pub status: ReservationStatus,
}

/// Payload of `BookingCancelled` and `BookingExpired`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    /// Reservation id
    pub booking_id: ReservationId,
    /// New status
    pub status: ReservationStatus,
}

/// Payload of `BookingHoldsExpired`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldsExpiredPayload {
    /// Number of holds transitioned by the sweep
    pub count: u64,
    /// Sweep cut-off instant
    pub at: DateTime<Utc>,
}

/// A reservation state change, as published downstream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BookingEvent {
    /// A hold was placed
    Held(HeldPayload),
    /// A hold was confirmed
    Confirmed(ConfirmedPayload),
    /// A hold or confirmed reservation was cancelled
    Cancelled(StatusPayload),
    /// A single hold was expired lazily on confirm
    Expired(StatusPayload),
    /// A sweep expired a batch of holds
    HoldsExpired(HoldsExpiredPayload),
}

impl BookingEvent {
    /// `BookingHeld` for a freshly inserted hold.
    #[must_use]
    pub fn held(reservation: &Reservation) -> Self {
        Self::Held(HeldPayload {
            booking_id: reservation.id,
            resource_id: reservation.resource_id,
            user_id: reservation.user_id,
            start_date: reservation.stay.start(),
            end_date: reservation.stay.end(),
            status: reservation.status,
            expires_at: reservation.expires_at,
        })
    }

    /// `BookingConfirmed` carrying the caller's payment reference.
    #[must_use]
    pub fn confirmed(id: ReservationId, payment_ref: impl Into<String>) -> Self {
        Self::Confirmed(ConfirmedPayload {
            booking_id: id,
            payment_ref: payment_ref.into(),
            status: ReservationStatus::Confirmed,
        })
    }

    /// `BookingCancelled`.
    #[must_use]
    pub const fn cancelled(id: ReservationId) -> Self {
        Self::Cancelled(StatusPayload {
            booking_id: id,
            status: ReservationStatus::Cancelled,
        })
    }

    /// `BookingExpired`.
    #[must_use]
    pub const fn expired(id: ReservationId) -> Self {
        Self::Expired(StatusPayload {
            booking_id: id,
            status: ReservationStatus::Expired,
        })
    }

    /// `BookingHoldsExpired` summarizing one sweep.
    #[must_use]
    pub const fn holds_expired(count: u64, at: DateTime<Utc>) -> Self {
        Self::HoldsExpired(HoldsExpiredPayload { count, at })
    }

    /// Stable event type name, stored in the outbox and sent as a header.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Held(_) => "BookingHeld",
            Self::Confirmed(_) => "BookingConfirmed",
            Self::Cancelled(_) => "BookingCancelled",
            Self::Expired(_) => "BookingExpired",
            Self::HoldsExpired(_) => "BookingHoldsExpired",
        }
    }

    /// Reservation this event belongs to, `None` for sweep summaries.
    #[must_use]
    pub const fn reservation_id(&self) -> Option<ReservationId> {
        match self {
            Self::Held(p) => Some(p.booking_id),
            Self::Confirmed(p) => Some(p.booking_id),
            Self::Cancelled(p) | Self::Expired(p) => Some(p.booking_id),
            Self::HoldsExpired(_) => None,
        }
    }

    /// Flat JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the payload cannot be encoded.
    pub fn payload(&self) -> Result<serde_json::Value, StoreError> {
        let value = match self {
            Self::Held(p) => serde_json::to_value(p)?,
            Self::Confirmed(p) => serde_json::to_value(p)?,
            Self::Cancelled(p) | Self::Expired(p) => serde_json::to_value(p)?,
            Self::HoldsExpired(p) => serde_json::to_value(p)?,
        };
        Ok(value)
    }

    /// Decode an event from its type name and JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] for unknown event types or
    /// payloads that do not match the type.
    pub fn decode(event_type: &str, payload: &str) -> Result<Self, StoreError> {
        let event = match event_type {
            "BookingHeld" => Self::Held(serde_json::from_str(payload)?),
            "BookingConfirmed" => Self::Confirmed(serde_json::from_str(payload)?),
            "BookingCancelled" => Self::Cancelled(serde_json::from_str(payload)?),
            "BookingExpired" => Self::Expired(serde_json::from_str(payload)?),
            "BookingHoldsExpired" => Self::HoldsExpired(serde_json::from_str(payload)?),
            other => {
                return Err(StoreError::Serialization(format!(
                    "Unknown event type: {other}"
                )));
            },
        };
        Ok(event)
    }
}

/// An outbox row about to be inserted alongside a state change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewOutboxEntry {
    /// Destination topic
    pub topic: String,
    /// Always [`AGGREGATE_TYPE`] for booking events
    pub aggregate_type: String,
    /// Partition key (reservation id, random for sweep summaries)
    pub aggregate_id: Uuid,
    /// Event type name
    pub event_type: String,
    /// Flat JSON payload
    pub payload: serde_json::Value,
}

impl NewOutboxEntry {
    /// Build the outbox row for `event` on `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the payload cannot be encoded.
    pub fn for_event(topic: &str, event: &BookingEvent) -> Result<Self, StoreError> {
        let aggregate_id = event
            .reservation_id()
            .map_or_else(Uuid::new_v4, |id| *id.as_uuid());
        Ok(Self {
            topic: topic.to_string(),
            aggregate_type: AGGREGATE_TYPE.to_string(),
            aggregate_id,
            event_type: event.event_type().to_string(),
            payload: event.payload()?,
        })
    }
}

/// A persisted outbox row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxEntry {
    /// Monotonic sequence id, the publish order
    pub id: i64,
    /// Destination topic
    pub topic: String,
    /// Aggregate type
    pub aggregate_type: String,
    /// Partition key
    pub aggregate_id: Uuid,
    /// Event type name
    pub event_type: String,
    /// Flat JSON payload
    pub payload: serde_json::Value,
    /// Commit time of the state change
    pub created_at: DateTime<Utc>,
    /// Set once the broker acknowledged the message
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    /// Broker message for this row, keyed by aggregate id.
    #[must_use]
    pub fn to_message(&self) -> BusMessage {
        BusMessage {
            topic: self.topic.clone(),
            key: self.aggregate_id.to_string(),
            event_type: self.event_type.clone(),
            aggregate_type: self.aggregate_type.clone(),
            payload: self.payload.to_string(),
        }
    }
}

/// Wire representation of an event on the message broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusMessage {
    /// Topic
    pub topic: String,
    /// Partition key (aggregate id); equal keys keep their relative order
    pub key: String,
    /// Event type, carried in the `event_type` header
    pub event_type: String,
    /// Aggregate type, carried in the `aggregate_type` header
    pub aggregate_type: String,
    /// JSON payload
    pub payload: String,
}

impl BusMessage {
    /// Decode the payload into a typed event.
    ///
    /// # Errors
    ///
    /// See [`BookingEvent::decode`].
    pub fn decode(&self) -> Result<BookingEvent, StoreError> {
        BookingEvent::decode(&self.event_type, &self.payload)
    }
}

impl fmt::Display for BusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BusMessage {{ topic: {}, type: {}, key: {}, size: {} bytes }}",
            self.topic,
            self.event_type,
            self.key,
            self.payload.len()
        )
    }
}
