//! Read-side collaborators: tables, opening hours and persisted bookings.
//!
//! The engine only ever reads through these traits. `InMemoryDirectory`
//! implements all three for tests and for the standalone binary.

use async_trait::async_trait;
use chrono::Weekday;
use dashmap::DashMap;
use serde::Deserialize;
use ulid::Ulid;

use crate::model::*;
use crate::store::StoreResult;

#[async_trait]
pub trait ResourceDirectory: Send + Sync {
    /// Active tables for a business. With a location, only that location's tables.
    async fn list_active_resources(
        &self,
        business_id: Ulid,
        location_id: Option<Ulid>,
    ) -> StoreResult<Vec<Resource>>;
}

#[async_trait]
pub trait OperatingCalendar: Send + Sync {
    /// `None` means closed all day.
    async fn operating_window(
        &self,
        business_id: Ulid,
        location_id: Option<Ulid>,
        weekday: Weekday,
    ) -> StoreResult<Option<OperatingWindow>>;
}

#[async_trait]
pub trait BookingLedger: Send + Sync {
    /// Bookings on `resource_id` in an occupying status whose start falls in
    /// `[window.start, window.end)`.
    async fn find_occupying_bookings(
        &self,
        resource_id: Ulid,
        window: Span,
    ) -> StoreResult<Vec<Booking>>;
}

// ── In-memory implementation ─────────────────────────────────────

type HoursKey = (Ulid, Option<Ulid>, Weekday);

pub struct InMemoryDirectory {
    resources: DashMap<Ulid, Resource>,
    /// `None` value marks an explicitly closed day.
    hours: DashMap<HoursKey, Option<OperatingWindow>>,
    bookings: DashMap<Ulid, Booking>,
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
            hours: DashMap::new(),
            bookings: DashMap::new(),
        }
    }

    pub fn from_fixture(fixture: Fixture) -> Self {
        let dir = Self::new();
        for r in fixture.resources {
            dir.upsert_resource(r);
        }
        for h in fixture.hours {
            let window = match (h.open, h.close) {
                (Some(open), Some(close)) => Some(OperatingWindow::new(open, close)),
                _ => None,
            };
            dir.set_hours(h.business_id, h.location_id, h.weekday, window);
        }
        for b in fixture.bookings {
            dir.upsert_booking(b);
        }
        dir
    }

    pub fn upsert_resource(&self, resource: Resource) {
        self.resources.insert(resource.id, resource);
    }

    pub fn set_resource_active(&self, id: Ulid, active: bool) -> bool {
        match self.resources.get_mut(&id) {
            Some(mut r) => {
                r.active = active;
                true
            }
            None => false,
        }
    }

    /// Set hours for a weekday. `location_id: None` sets the business default,
    /// used by locations without their own entry.
    pub fn set_hours(
        &self,
        business_id: Ulid,
        location_id: Option<Ulid>,
        weekday: Weekday,
        window: Option<OperatingWindow>,
    ) {
        self.hours.insert((business_id, location_id, weekday), window);
    }

    pub fn upsert_booking(&self, booking: Booking) {
        self.bookings.insert(booking.id, booking);
    }

    pub fn set_booking_status(&self, id: Ulid, status: BookingStatus) -> Option<Booking> {
        let mut b = self.bookings.get_mut(&id)?;
        b.status = status;
        Some(b.value().clone())
    }
}

#[async_trait]
impl ResourceDirectory for InMemoryDirectory {
    async fn list_active_resources(
        &self,
        business_id: Ulid,
        location_id: Option<Ulid>,
    ) -> StoreResult<Vec<Resource>> {
        let mut out: Vec<Resource> = self
            .resources
            .iter()
            .filter(|r| r.business_id == business_id && r.active)
            .filter(|r| location_id.is_none() || r.location_id == location_id)
            .map(|r| r.value().clone())
            .collect();
        out.sort_by_key(|r| r.id);
        Ok(out)
    }
}

#[async_trait]
impl OperatingCalendar for InMemoryDirectory {
    async fn operating_window(
        &self,
        business_id: Ulid,
        location_id: Option<Ulid>,
        weekday: Weekday,
    ) -> StoreResult<Option<OperatingWindow>> {
        if location_id.is_some()
            && let Some(w) = self.hours.get(&(business_id, location_id, weekday))
        {
            return Ok(*w);
        }
        Ok(self
            .hours
            .get(&(business_id, None, weekday))
            .and_then(|w| *w))
    }
}

#[async_trait]
impl BookingLedger for InMemoryDirectory {
    async fn find_occupying_bookings(
        &self,
        resource_id: Ulid,
        window: Span,
    ) -> StoreResult<Vec<Booking>> {
        let mut out: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|b| b.resource_id == resource_id && b.status.is_occupying())
            .filter(|b| window.start <= b.start && b.start < window.end)
            .map(|b| b.value().clone())
            .collect();
        out.sort_by_key(|b| b.start);
        Ok(out)
    }
}

// ── Fixture format ───────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub hours: Vec<HoursEntry>,
    #[serde(default)]
    pub bookings: Vec<Booking>,
}

/// One weekday's hours. Omitting `open`/`close` marks the day closed.
#[derive(Debug, Deserialize)]
pub struct HoursEntry {
    pub business_id: Ulid,
    #[serde(default)]
    pub location_id: Option<Ulid>,
    pub weekday: Weekday,
    #[serde(default)]
    pub open: Option<chrono::NaiveTime>,
    #[serde(default)]
    pub close: Option<chrono::NaiveTime>,
}
