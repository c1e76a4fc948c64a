//! Domain types for the booking consistency engine.
//!
//! Value objects (identifiers, stay ranges, principals) and entities
//! (resources and reservations). Date semantics everywhere: `start` is the
//! check-in date (inclusive), `end` is the check-out date (exclusive).

use crate::error::BookingError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a bookable resource (an apartment)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId(Uuid);

impl ResourceId {
    /// Creates a new random `ResourceId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `ResourceId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a reservation
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReservationId(Uuid);

impl ReservationId {
    /// Creates a new random `ReservationId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `ReservationId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ReservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ReservationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Unique identifier for a user (reservation holder)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new random `UserId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `UserId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Principal
// ============================================================================

/// Role granted to an authenticated principal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Regular customer
    User,
    /// Operator with access to every reservation
    Admin,
}

impl Role {
    /// Parse a role claim (case-insensitive, e.g. `"ADMIN"`).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USER" => Some(Self::User),
            "ADMIN" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// The already-authenticated caller of a booking command.
///
/// Produced once per request by the authentication layer and never
/// re-derived inside the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Authenticated user id
    pub user_id: UserId,
    /// Granted roles
    pub roles: BTreeSet<Role>,
}

impl Principal {
    /// Create a principal with the given roles.
    #[must_use]
    pub fn new(user_id: UserId, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            user_id,
            roles: roles.into_iter().collect(),
        }
    }

    /// A principal holding only the `USER` role.
    #[must_use]
    pub fn user(user_id: UserId) -> Self {
        Self::new(user_id, [Role::User])
    }

    /// A principal holding the `ADMIN` role.
    #[must_use]
    pub fn admin(user_id: UserId) -> Self {
        Self::new(user_id, [Role::User, Role::Admin])
    }

    /// Whether this principal has the `ADMIN` role.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Admin)
    }

    /// Owner-or-admin access check.
    #[must_use]
    pub fn can_access(&self, reservation: &Reservation) -> bool {
        self.is_admin() || reservation.user_id == self.user_id
    }
}

// ============================================================================
// Stay range
// ============================================================================

/// Half-open date interval `[start, end)`.
///
/// Construction guarantees `start < end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StayRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl StayRange {
    /// Create a validated range.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::BadRequest`] if `start >= end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, BookingError> {
        if start >= end {
            return Err(BookingError::BadRequest(
                "start date must be before end date (end date is the exclusive checkout date)"
                    .to_string(),
            ));
        }
        Ok(Self { start, end })
    }

    /// Check-in date (inclusive)
    #[must_use]
    pub const fn start(&self) -> NaiveDate {
        self.start
    }

    /// Check-out date (exclusive)
    #[must_use]
    pub const fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of nights covered by the range.
    #[must_use]
    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Half-open overlap test, identical to the storage constraint:
    /// `existing.start < new.end AND existing.end > new.start`.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && self.end > other.start
    }
}

impl fmt::Display for StayRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ============================================================================
// Reservation
// ============================================================================

/// Reservation lifecycle status.
///
/// ```text
///            confirm            cancel
///   HOLD ─────────────► CONFIRMED ─────► CANCELLED
///    │  \                                  ▲
///    │   └──────────── cancel ─────────────┘
///    └── expire ──► EXPIRED
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    /// Provisional, auto-expiring unless confirmed
    Hold,
    /// Confirmed by the owner or an admin
    Confirmed,
    /// Cancelled by the owner or an admin
    Cancelled,
    /// Hold timed out before confirmation
    Expired,
}

impl ReservationStatus {
    /// Statuses that occupy the resource calendar.
    pub const ACTIVE: [Self; 2] = [Self::Hold, Self::Confirmed];

    /// Convert status to its storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Hold => "HOLD",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        }
    }

    /// Parse status from its storage representation.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, crate::error::StoreError> {
        match s {
            "HOLD" => Ok(Self::Hold),
            "CONFIRMED" => Ok(Self::Confirmed),
            "CANCELLED" => Ok(Self::Cancelled),
            "EXPIRED" => Ok(Self::Expired),
            _ => Err(crate::error::StoreError::Database(format!(
                "Invalid reservation status: {s}"
            ))),
        }
    }

    /// Whether a reservation in this status blocks overlapping reservations.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Hold | Self::Confirmed)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Hold, Self::Confirmed | Self::Cancelled | Self::Expired)
                | (Self::Confirmed, Self::Cancelled)
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reservation entity.
///
/// `expires_at` is `Some` iff `status == Hold`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    /// Unique reservation identifier
    pub id: ReservationId,
    /// Reserved resource
    pub resource_id: ResourceId,
    /// Holder
    pub user_id: UserId,
    /// Reserved dates
    pub stay: StayRange,
    /// Lifecycle status
    pub status: ReservationStatus,
    /// Hold expiry, only while `HOLD`
    pub expires_at: Option<DateTime<Utc>>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// Create a new hold.
    #[must_use]
    pub fn new_hold(
        resource_id: ResourceId,
        user_id: UserId,
        stay: StayRange,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            resource_id,
            user_id,
            stay,
            status: ReservationStatus::Hold,
            expires_at: Some(expires_at),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this is a hold whose expiry lies strictly before `now`.
    #[must_use]
    pub fn is_hold_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Hold && self.expires_at.is_some_and(|at| at < now)
    }

    /// A copy of this reservation moved to `status`, with the hold expiry
    /// cleared for every non-hold status.
    #[must_use]
    pub fn with_status(&self, status: ReservationStatus, now: DateTime<Utc>) -> Self {
        Self {
            status,
            expires_at: if status == ReservationStatus::Hold {
                self.expires_at
            } else {
                None
            },
            updated_at: now,
            ..self.clone()
        }
    }
}

// ============================================================================
// Resources
// ============================================================================

/// Bookable resource (apartment).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Unique resource identifier
    pub id: ResourceId,
    /// Display name
    pub name: String,
    /// City the resource is located in
    pub city: String,
    /// Maximum number of guests
    pub capacity: i32,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Request to register a new resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewResource {
    /// Display name (1..=200 chars)
    pub name: String,
    /// City (1..=120 chars)
    pub city: String,
    /// Maximum number of guests (1..=50)
    pub capacity: i32,
}

impl NewResource {
    /// Maximum name length
    pub const MAX_NAME_LEN: usize = 200;
    /// Maximum city length
    pub const MAX_CITY_LEN: usize = 120;
    /// Allowed capacity range
    pub const CAPACITY: std::ops::RangeInclusive<i32> = 1..=50;

    /// Validate field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::BadRequest`] describing the first violated constraint.
    pub fn validate(&self) -> Result<(), BookingError> {
        if self.name.trim().is_empty() || self.name.chars().count() > Self::MAX_NAME_LEN {
            return Err(BookingError::BadRequest(format!(
                "name must be between 1 and {} characters",
                Self::MAX_NAME_LEN
            )));
        }
        if self.city.trim().is_empty() || self.city.chars().count() > Self::MAX_CITY_LEN {
            return Err(BookingError::BadRequest(format!(
                "city must be between 1 and {} characters",
                Self::MAX_CITY_LEN
            )));
        }
        if !Self::CAPACITY.contains(&self.capacity) {
            return Err(BookingError::BadRequest(format!(
                "capacity must be between {} and {}",
                Self::CAPACITY.start(),
                Self::CAPACITY.end()
            )));
        }
        Ok(())
    }

    /// Materialize the resource.
    #[must_use]
    pub fn into_resource(self, now: DateTime<Utc>) -> Resource {
        Resource {
            id: ResourceId::new(),
            name: self.name.trim().to_string(),
            city: self.city.trim().to_string(),
            capacity: self.capacity,
            created_at: now,
        }
    }
}

/// Availability search over the resource catalogue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AvailabilityQuery {
    /// City filter, case-insensitive
    pub city: Option<String>,
    /// Minimum capacity filter
    pub min_capacity: Option<i32>,
    /// Requested stay
    pub stay: StayRange,
    /// Zero-based page index
    pub page: u32,
    /// Page size
    pub size: u32,
}

impl AvailabilityQuery {
    /// Largest page size served.
    pub const MAX_PAGE_SIZE: u32 = 200;

    /// Create a query for the first page with the default size (20).
    #[must_use]
    pub const fn new(stay: StayRange) -> Self {
        Self {
            city: None,
            min_capacity: None,
            stay,
            page: 0,
            size: 20,
        }
    }

    /// Page size clamped to `1..=MAX_PAGE_SIZE`.
    #[must_use]
    pub fn effective_size(&self) -> u32 {
        self.size.clamp(1, Self::MAX_PAGE_SIZE)
    }

    /// Row offset of the requested page.
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.effective_size())
    }
}

/// One page of results.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items on this page
    pub items: Vec<T>,
    /// Zero-based page index
    pub page: u32,
    /// Page size used
    pub size: u32,
    /// Total matching items across all pages
    pub total: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn stay_range_rejects_empty_and_inverted() {
        assert!(StayRange::new(date(2026, 2, 1), date(2026, 2, 1)).is_err());
        assert!(matches!(
            StayRange::new(date(2026, 2, 5), date(2026, 2, 1)),
            Err(BookingError::BadRequest(_))
        ));
        let stay = StayRange::new(date(2026, 2, 1), date(2026, 2, 5)).unwrap();
        assert_eq!(stay.nights(), 4);
    }

    #[test]
    fn back_to_back_stays_do_not_overlap() {
        let first = StayRange::new(date(2026, 2, 1), date(2026, 2, 5)).unwrap();
        let second = StayRange::new(date(2026, 2, 5), date(2026, 2, 8)).unwrap();
        assert!(!first.overlaps(&second));
        assert!(!second.overlaps(&first));

        let inner = StayRange::new(date(2026, 2, 2), date(2026, 2, 3)).unwrap();
        assert!(first.overlaps(&inner));
    }

    #[test]
    fn lifecycle_transitions() {
        use ReservationStatus::{Cancelled, Confirmed, Expired, Hold};

        assert!(Hold.can_transition_to(Confirmed));
        assert!(Hold.can_transition_to(Cancelled));
        assert!(Hold.can_transition_to(Expired));
        assert!(Confirmed.can_transition_to(Cancelled));

        assert!(!Confirmed.can_transition_to(Expired));
        assert!(!Expired.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Hold));
        assert!(!Expired.can_transition_to(Confirmed));
    }

    #[test]
    fn status_roundtrip() {
        for status in [
            ReservationStatus::Hold,
            ReservationStatus::Confirmed,
            ReservationStatus::Cancelled,
            ReservationStatus::Expired,
        ] {
            assert_eq!(ReservationStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(ReservationStatus::parse("PENDING").is_err());
    }

    #[test]
    fn with_status_clears_expiry_outside_hold() {
        let now = Utc::now();
        let stay = StayRange::new(date(2026, 2, 1), date(2026, 2, 5)).unwrap();
        let hold = Reservation::new_hold(ResourceId::new(), UserId::new(), stay, now, now);
        assert!(hold.expires_at.is_some());

        for status in [
            ReservationStatus::Confirmed,
            ReservationStatus::Cancelled,
            ReservationStatus::Expired,
        ] {
            assert_eq!(hold.with_status(status, now).expires_at, None);
        }
    }

    #[test]
    fn hold_expiry_is_strict() {
        let now = Utc::now();
        let stay = StayRange::new(date(2026, 2, 1), date(2026, 2, 5)).unwrap();
        let hold = Reservation::new_hold(ResourceId::new(), UserId::new(), stay, now, now);
        assert!(!hold.is_hold_expired(now));
        assert!(hold.is_hold_expired(now + chrono::Duration::seconds(1)));
    }

    #[test]
    fn owner_or_admin_access() {
        let owner = UserId::new();
        let now = Utc::now();
        let stay = StayRange::new(date(2026, 2, 1), date(2026, 2, 5)).unwrap();
        let reservation = Reservation::new_hold(ResourceId::new(), owner, stay, now, now);

        assert!(Principal::user(owner).can_access(&reservation));
        assert!(Principal::admin(UserId::new()).can_access(&reservation));
        assert!(!Principal::user(UserId::new()).can_access(&reservation));
    }

    #[test]
    fn role_parsing_is_case_insensitive() {
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse(" USER "), Some(Role::User));
        assert_eq!(Role::parse("root"), None);
    }

    #[test]
    fn new_resource_validation() {
        let valid = NewResource {
            name: "Loft".to_string(),
            city: "Gdansk".to_string(),
            capacity: 2,
        };
        assert!(valid.validate().is_ok());

        let blank = NewResource { name: "  ".to_string(), ..valid.clone() };
        assert!(blank.validate().is_err());

        let crowded = NewResource { capacity: 51, ..valid.clone() };
        assert!(crowded.validate().is_err());

        let empty = NewResource { capacity: 0, ..valid };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn availability_query_clamps_page_size() {
        let stay = StayRange::new(date(2026, 2, 1), date(2026, 2, 5)).unwrap();
        let mut query = AvailabilityQuery::new(stay);
        query.size = 0;
        assert_eq!(query.effective_size(), 1);
        query.size = 10_000;
        query.page = 2;
        assert_eq!(query.effective_size(), AvailabilityQuery::MAX_PAGE_SIZE);
        assert_eq!(query.offset(), 400);
    }

    proptest! {
        #[test]
        fn overlap_is_symmetric_and_matches_day_sets(
            a_start in 0i64..60, a_len in 1i64..20,
            b_start in 0i64..60, b_len in 1i64..20,
        ) {
            let base = date(2026, 1, 1);
            let a = StayRange::new(
                base + chrono::Duration::days(a_start),
                base + chrono::Duration::days(a_start + a_len),
            ).unwrap();
            let b = StayRange::new(
                base + chrono::Duration::days(b_start),
                base + chrono::Duration::days(b_start + b_len),
            ).unwrap();

            let shares_a_night = (a_start..a_start + a_len)
                .any(|day| day >= b_start && day < b_start + b_len);

            prop_assert_eq!(a.overlaps(&b), b.overlaps(&a));
            prop_assert_eq!(a.overlaps(&b), shares_a_night);
        }
    }
}
