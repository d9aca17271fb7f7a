use chrono::{NaiveDateTime, Utc};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::limits::MAX_REQUESTER_LEN;
use crate::lock::LockKey;
use crate::model::*;
use crate::observability::{self, HOLDS_RELEASED_TOTAL, LOCK_CONTENTION_TOTAL, RESERVATIONS_TOTAL};

use super::conflict::{SlotCheck, rank_candidates};
use super::{Engine, EngineError, validate_shape};

impl Engine {
    /// Try to place a soft hold on the best-fitting table.
    ///
    /// Attempts for the same (business, location, minute) are serialized by
    /// the reservation lock; a held lock rejects immediately with a time
    /// conflict. On success the caller commits the booking and then calls
    /// [`Engine::release_slot`], or lets the hold expire.
    pub async fn reserve_slot(
        &self,
        request: ReservationRequest,
    ) -> Result<ReservationOutcome, EngineError> {
        validate_shape(request.party_size, request.duration)?;
        if request.requester.len() > MAX_REQUESTER_LEN {
            return Err(EngineError::InvalidInput("requester too long".into()));
        }
        let start = truncate_to_minute(request.start);
        let key = LockKey::new(request.business_id, request.location_id, start);

        let Some(token) = self.lock.try_acquire(key).await? else {
            metrics::counter!(LOCK_CONTENTION_TOTAL).increment(1);
            return Ok(record(ReservationOutcome::Rejected {
                conflicts: vec![Conflict::lock_contention()],
            }));
        };

        let result = self.reserve_locked(&request, start).await;

        if let Err(e) = self.lock.release(token).await {
            // The TTL reclaims it; the reservation result stands.
            warn!("failed to release reservation lock: {e}");
        }

        let outcome = result?;
        if outcome.is_success() {
            self.notify_occupancy_changed(
                request.business_id,
                request.location_id,
                start,
                UpdateCause::HoldPlaced,
            );
        }
        Ok(record(outcome))
    }

    /// Critical section: runs with the reservation lock held.
    async fn reserve_locked(
        &self,
        request: &ReservationRequest,
        start: NaiveDateTime,
    ) -> Result<ReservationOutcome, EngineError> {
        let slot = Span::starting_at(start, request.duration);
        let evaluation = match self
            .check_slot_conflicts(request.business_id, request.location_id, slot, request.party_size)
            .await?
        {
            SlotCheck::Clear(evaluation) => evaluation,
            SlotCheck::Conflicted(conflicts) => return Ok(ReservationOutcome::Rejected { conflicts }),
        };

        // The lock covers one (business, location, minute) key, so requests
        // keyed on another location or a neighbouring minute can race for the
        // same table. Set-if-absent on the hold key settles same-minute races.
        // For overlapping holds at different minutes, each side looks for the
        // other after placing and backs off if it finds one. Both holds exist
        // when the later of the two checks runs, so that side always backs off.
        for candidate in rank_candidates(&evaluation) {
            let hold = SoftHold {
                business_id: request.business_id,
                location_id: request.location_id,
                resource_id: candidate.resource_id,
                start,
                duration: request.duration,
                requester: request.requester.clone(),
                created_at: Utc::now(),
            };
            if !self.holds.place(&hold).await? {
                debug!("hold key for {} at {start} already taken", candidate.resource_id);
                continue;
            }
            if let Some(rival) = self.holds.find_rival(&hold).await? {
                debug!(
                    "hold on {} at {start} overlaps one placed at {}, backing off",
                    candidate.resource_id, rival.start
                );
                self.holds.withdraw(&hold).await?;
                continue;
            }
            debug!(
                "hold placed on {} (capacity {}) at {start} for party of {}",
                candidate.resource_id, candidate.capacity, request.party_size
            );
            return Ok(ReservationOutcome::Reserved {
                resource_id: candidate.resource_id,
                hold,
            });
        }

        Ok(ReservationOutcome::Rejected {
            conflicts: vec![Conflict::table_unavailable(Vec::new())],
        })
    }

    /// Drop the soft hold on `resource_id` at `start`. Releasing a hold that
    /// doesn't exist, or no longer exists, succeeds.
    pub async fn release_slot(
        &self,
        business_id: Ulid,
        location_id: Option<Ulid>,
        start: NaiveDateTime,
        resource_id: Ulid,
        duration: Minutes,
    ) -> Result<(), EngineError> {
        if duration == 0 {
            return Err(EngineError::InvalidInput("duration must be positive".into()));
        }
        let start = truncate_to_minute(start);
        self.holds.release(resource_id, start).await?;
        metrics::counter!(HOLDS_RELEASED_TOTAL).increment(1);

        self.notify_occupancy_changed(business_id, location_id, start, UpdateCause::HoldReleased);
        let last_minute = Span::starting_at(start, duration).end - minutes(1);
        if last_minute.date() != start.date() {
            self.notify_occupancy_changed(business_id, location_id, last_minute, UpdateCause::HoldReleased);
        }
        Ok(())
    }
}

fn record(outcome: ReservationOutcome) -> ReservationOutcome {
    metrics::counter!(RESERVATIONS_TOTAL, "outcome" => observability::outcome_label(&outcome))
        .increment(1);
    outcome
}
