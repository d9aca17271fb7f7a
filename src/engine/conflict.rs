use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeDelta, Timelike};
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, validate_shape};

/// Suitable tables, smallest capacity first; equal capacities in id order.
pub fn rank_candidates(evaluation: &Evaluation) -> Vec<&ResourceStatus> {
    let mut candidates: Vec<&ResourceStatus> =
        evaluation.resources.iter().filter(|r| r.suitable).collect();
    candidates.sort_by_key(|r| (r.capacity, r.resource_id));
    candidates
}

/// Smallest table that seats the party. A party of 3 gets a 4-top even when
/// a 6-top is free.
pub fn select_best_resource(evaluation: &Evaluation) -> Option<Ulid> {
    rank_candidates(evaluation).first().map(|r| r.resource_id)
}

/// Whether `slot` fits inside `window` as opened on `date`. An overnight
/// window opened on `date` also covers the early hours of the next day.
pub fn within_operating_hours(window: Option<&OperatingWindow>, date: NaiveDate, slot: &Span) -> bool {
    window.is_some_and(|w| w.span_on(date).contains_span(slot))
}

fn within_sanity_window(start: NaiveDateTime) -> bool {
    let minute_of_day = start.hour() * 60 + start.minute();
    (SANITY_WINDOW_OPEN_HOUR * 60..=SANITY_WINDOW_CLOSE_HOUR * 60).contains(&minute_of_day)
}

/// Result of running both conflict checks on one slot.
pub(super) enum SlotCheck {
    /// No conflicts. Carries the evaluation table selection should use.
    Clear(Evaluation),
    Conflicted(Vec<Conflict>),
}

impl Engine {
    /// Why a party can't be seated at `start`, or an empty list if it can.
    pub async fn detect_conflicts(
        &self,
        business_id: Ulid,
        location_id: Option<Ulid>,
        start: NaiveDateTime,
        party_size: u32,
        duration: Minutes,
    ) -> Result<Vec<Conflict>, EngineError> {
        validate_shape(party_size, duration)?;
        let slot = Span::starting_at(truncate_to_minute(start), duration);
        match self.check_slot_conflicts(business_id, location_id, slot, party_size).await? {
            SlotCheck::Clear(_) => Ok(Vec::new()),
            SlotCheck::Conflicted(conflicts) => Ok(conflicts),
        }
    }

    /// Operating hours first, then table availability.
    pub(super) async fn check_slot_conflicts(
        &self,
        business_id: Ulid,
        location_id: Option<Ulid>,
        slot: Span,
        party_size: u32,
    ) -> Result<SlotCheck, EngineError> {
        let Some((service_date, window)) = self
            .service_window(business_id, location_id, &slot)
            .await?
        else {
            debug!("slot {} outside operating hours", slot.start);
            return Ok(SlotCheck::Conflicted(vec![Conflict::outside_hours()]));
        };

        let resources = self
            .directory
            .list_active_resources(business_id, location_id)
            .await?;
        let evaluation = self.evaluate_with(&resources, slot, party_size).await?;
        if evaluation.available {
            return Ok(SlotCheck::Clear(evaluation));
        }

        let alternatives = self
            .alternative_starts(&resources, window.span_on(service_date), slot, party_size)
            .await?;
        debug!(
            "no table for party of {party_size} at {}, {} alternatives",
            slot.start,
            alternatives.len()
        );
        Ok(SlotCheck::Conflicted(vec![Conflict::table_unavailable(alternatives)]))
    }

    /// The operating day `slot` belongs to and its window: the start date, or
    /// the day before when that day's overnight window still covers the slot.
    /// `None` when neither window contains the whole slot.
    pub(crate) async fn service_window(
        &self,
        business_id: Ulid,
        location_id: Option<Ulid>,
        slot: &Span,
    ) -> Result<Option<(NaiveDate, OperatingWindow)>, EngineError> {
        let date = slot.start.date();
        for day in [Some(date), date.pred_opt()].into_iter().flatten() {
            let window = self
                .calendar
                .operating_window(business_id, location_id, day.weekday())
                .await?;
            if let Some(w) = window
                && within_operating_hours(Some(&w), day, slot)
            {
                return Ok(Some((day, w)));
            }
        }
        Ok(None)
    }

    /// The date whose availability a change at `at` affects.
    pub(crate) async fn service_date(
        &self,
        business_id: Ulid,
        location_id: Option<Ulid>,
        at: NaiveDateTime,
    ) -> Result<NaiveDate, EngineError> {
        let minute = Span::starting_at(truncate_to_minute(at), 1);
        Ok(self
            .service_window(business_id, location_id, &minute)
            .await?
            .map_or(at.date(), |(date, _)| date))
    }

    /// Search outward from `slot` in slot-interval steps, earlier before later
    /// at equal distance, for starts that could seat the party.
    async fn alternative_starts(
        &self,
        resources: &[Resource],
        open: Span,
        slot: Span,
        party_size: u32,
    ) -> Result<Vec<NaiveDateTime>, EngineError> {
        let step = self.config.slot_interval.max(1);
        let duration = slot.duration_minutes();
        let mut found = Vec::new();

        'search: for k in 1..=(ALTERNATIVE_SEARCH_RADIUS_MINUTES / step) {
            let offset = i64::from(k * step);
            for delta in [-offset, offset] {
                let start = slot.start + TimeDelta::minutes(delta);
                let candidate = Span::new(start, start + TimeDelta::minutes(duration));
                if !within_sanity_window(start) || !open.contains_span(&candidate) {
                    continue;
                }
                if self.evaluate_with(resources, candidate, party_size).await?.available {
                    found.push(start);
                    if found.len() == MAX_ALTERNATIVES {
                        break 'search;
                    }
                }
            }
        }
        Ok(found)
    }
}
