use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Whole minutes. The only duration unit the engine works in.
pub type Minutes = u32;

pub fn minutes(m: Minutes) -> TimeDelta {
    TimeDelta::minutes(i64::from(m))
}

/// Drop seconds and sub-seconds. Lock and hold keys are minute-granular.
pub fn truncate_to_minute(t: NaiveDateTime) -> NaiveDateTime {
    t - TimeDelta::seconds(i64::from(t.second())) - TimeDelta::nanoseconds(i64::from(t.nanosecond()))
}

/// Half-open business-local interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Span {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn starting_at(start: NaiveDateTime, duration: Minutes) -> Self {
        Self::new(start, start + minutes(duration))
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Collaborator-owned records ───────────────────────────────────

/// A physical table. Lifecycle is owned by location management.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    pub business_id: Ulid,
    pub location_id: Option<Ulid>,
    #[serde(default)]
    pub name: Option<String>,
    pub capacity: u32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Opening hours for one day. A `close` at or before `open` runs past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingWindow {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl OperatingWindow {
    pub fn new(open: NaiveTime, close: NaiveTime) -> Self {
        Self { open, close }
    }

    /// The concrete open interval on `date`.
    pub fn span_on(&self, date: NaiveDate) -> Span {
        let open = date.and_time(self.open);
        let mut close = date.and_time(self.close);
        if close <= open {
            close += TimeDelta::days(1);
        }
        Span::new(open, close)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    CheckedIn,
    Seated,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    /// Whether a booking in this status keeps its table occupied.
    pub fn is_occupying(self) -> bool {
        matches!(
            self,
            BookingStatus::Pending
                | BookingStatus::Confirmed
                | BookingStatus::CheckedIn
                | BookingStatus::Seated
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub business_id: Ulid,
    pub location_id: Option<Ulid>,
    pub resource_id: Ulid,
    pub start: NaiveDateTime,
    pub duration: Minutes,
    pub party_size: u32,
    pub status: BookingStatus,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span::starting_at(self.start, self.duration)
    }
}

// ── Engine-owned records ─────────────────────────────────────────

/// Short-lived claim on a table between slot selection and durable commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftHold {
    pub business_id: Ulid,
    pub location_id: Option<Ulid>,
    pub resource_id: Ulid,
    pub start: NaiveDateTime,
    pub duration: Minutes,
    pub requester: String,
    pub created_at: DateTime<Utc>,
}

impl SoftHold {
    pub fn span(&self) -> Span {
        Span::starting_at(self.start, self.duration)
    }
}

/// (business, location, date): the unit of cache invalidation and broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AvailabilityKey {
    pub business_id: Ulid,
    pub location_id: Option<Ulid>,
    pub date: NaiveDate,
}

impl AvailabilityKey {
    pub fn new(business_id: Ulid, location_id: Option<Ulid>, date: NaiveDate) -> Self {
        Self { business_id, location_id, date }
    }

    /// The same date without a location filter.
    pub fn business_wide(&self) -> Self {
        Self { location_id: None, ..*self }
    }
}

// ── Evaluation results ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Occupancy {
    Free,
    /// Covered by a persisted booking in an occupying status.
    Booked,
    /// Covered by a live soft hold.
    Held,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub resource_id: Ulid,
    pub capacity: u32,
    pub occupancy: Occupancy,
    /// Free and large enough for the requested party.
    pub suitable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub slot: Span,
    pub party_size: u32,
    pub available: bool,
    pub total_capacity: u32,
    pub reserved_capacity: u32,
    pub resources: Vec<ResourceStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub available: bool,
    /// Tables that could seat the party at this time.
    pub suitable_resources: u32,
    pub total_capacity: u32,
    pub reserved_capacity: u32,
}

impl From<&Evaluation> for Slot {
    fn from(e: &Evaluation) -> Self {
        Self {
            start: e.slot.start,
            end: e.slot.end,
            available: e.available,
            suitable_resources: e.resources.iter().filter(|r| r.suitable).count() as u32,
            total_capacity: e.total_capacity,
            reserved_capacity: e.reserved_capacity,
        }
    }
}

// ── Reservation flow ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub business_id: Ulid,
    pub location_id: Option<Ulid>,
    pub start: NaiveDateTime,
    pub party_size: u32,
    pub duration: Minutes,
    pub requester: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictKind {
    TimeConflict,
    TableUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub message: String,
    /// Nearby start times that could seat the party instead.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<NaiveDateTime>,
}

impl Conflict {
    pub fn outside_hours() -> Self {
        Self {
            kind: ConflictKind::TimeConflict,
            message: "requested time is outside operating hours".into(),
            alternatives: Vec::new(),
        }
    }

    pub fn lock_contention() -> Self {
        Self {
            kind: ConflictKind::TimeConflict,
            message: "another reservation for this time is in progress".into(),
            alternatives: Vec::new(),
        }
    }

    pub fn table_unavailable(alternatives: Vec<NaiveDateTime>) -> Self {
        Self {
            kind: ConflictKind::TableUnavailable,
            message: "no table available for the requested party size".into(),
            alternatives,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReservationOutcome {
    Reserved { resource_id: Ulid, hold: SoftHold },
    Rejected { conflicts: Vec<Conflict> },
}

impl ReservationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ReservationOutcome::Reserved { .. })
    }

    pub fn resource_id(&self) -> Option<Ulid> {
        match self {
            ReservationOutcome::Reserved { resource_id, .. } => Some(*resource_id),
            ReservationOutcome::Rejected { .. } => None,
        }
    }

    pub fn conflicts(&self) -> &[Conflict] {
        match self {
            ReservationOutcome::Reserved { .. } => &[],
            ReservationOutcome::Rejected { conflicts } => conflicts,
        }
    }
}

// ── Change notification ──────────────────────────────────────────

/// The booking-lifecycle transition that changed occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateCause {
    BookingCreated,
    BookingCancelled,
    BookingRescheduled,
    NoShow,
    TableStatusChanged,
    HoldPlaced,
    HoldReleased,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartySizeSlots {
    pub party_size: u32,
    pub slots: Vec<Slot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityUpdate {
    pub business_id: Ulid,
    pub location_id: Option<Ulid>,
    pub date: NaiveDate,
    pub slots: Vec<PartySizeSlots>,
    pub cause: UpdateCause,
    pub timestamp: DateTime<Utc>,
}
