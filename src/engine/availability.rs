use futures::future::try_join_all;
use ulid::Ulid;

use crate::limits::OVERLAP_LOOKBACK_MINUTES;
use crate::model::*;

use super::{Engine, EngineError};

// ── Occupancy evaluation ──────────────────────────────────────────

/// Fold per-table occupancy into an evaluation.
///
/// Capacity totals cover every table regardless of whether it fits the
/// party; `suitable` and `available` apply the party-size filter.
pub fn tally(slot: Span, party_size: u32, occupancy: &[(Resource, Occupancy)]) -> Evaluation {
    let mut total_capacity = 0;
    let mut reserved_capacity = 0;
    let mut resources = Vec::with_capacity(occupancy.len());

    for (resource, occ) in occupancy {
        total_capacity += resource.capacity;
        if *occ != Occupancy::Free {
            reserved_capacity += resource.capacity;
        }
        resources.push(ResourceStatus {
            resource_id: resource.id,
            capacity: resource.capacity,
            occupancy: *occ,
            suitable: *occ == Occupancy::Free && resource.capacity >= party_size,
        });
    }

    Evaluation {
        slot,
        party_size,
        available: resources.iter().any(|r| r.suitable),
        total_capacity,
        reserved_capacity,
        resources,
    }
}

/// Whether any of `bookings` overlaps `slot` on its own booked duration.
pub fn booked_during(bookings: &[Booking], slot: &Span) -> bool {
    bookings
        .iter()
        .any(|b| b.status.is_occupying() && b.span().overlaps(slot))
}

impl Engine {
    /// Evaluate one slot against the current tables of a business/location.
    pub(crate) async fn evaluate(
        &self,
        business_id: Ulid,
        location_id: Option<Ulid>,
        slot: Span,
        party_size: u32,
    ) -> Result<Evaluation, EngineError> {
        let resources = self
            .directory
            .list_active_resources(business_id, location_id)
            .await?;
        self.evaluate_with(&resources, slot, party_size).await
    }

    /// Evaluate one slot against an already-fetched table list.
    pub(crate) async fn evaluate_with(
        &self,
        resources: &[Resource],
        slot: Span,
        party_size: u32,
    ) -> Result<Evaluation, EngineError> {
        let occupancy = try_join_all(resources.iter().map(|r| async move {
            let occ = self.occupancy_of(r.id, slot).await?;
            Ok::<_, EngineError>((r.clone(), occ))
        }))
        .await?;
        Ok(tally(slot, party_size, &occupancy))
    }

    async fn occupancy_of(&self, resource_id: Ulid, slot: Span) -> Result<Occupancy, EngineError> {
        // Bookings are looked up by start time only, so anything that began
        // more than the lookback before the slot is not seen.
        let lookup = Span::new(slot.start - minutes(OVERLAP_LOOKBACK_MINUTES), slot.end);
        let bookings = self
            .bookings
            .find_occupying_bookings(resource_id, lookup)
            .await?;
        if booked_during(&bookings, &slot) {
            return Ok(Occupancy::Booked);
        }
        if self.holds.find_overlapping(resource_id, slot).await?.is_some() {
            return Ok(Occupancy::Held);
        }
        Ok(Occupancy::Free)
    }
}
