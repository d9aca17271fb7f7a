use chrono::{Datelike, NaiveDate, NaiveDateTime, Utc};
use futures::future::try_join_all;
use ulid::Ulid;

use crate::model::*;
use crate::observability::{AVAILABILITY_QUERY_DURATION_SECONDS, SLOT_CACHE_TOTAL};

use super::slots::generate_slots;
use super::{Engine, EngineError, validate_shape};

impl Engine {
    /// Every candidate slot of the day with its availability for the party.
    /// A closed day yields an empty list.
    pub async fn get_available_slots(
        &self,
        business_id: Ulid,
        location_id: Option<Ulid>,
        date: NaiveDate,
        party_size: u32,
        duration: Option<Minutes>,
    ) -> Result<Vec<Slot>, EngineError> {
        let duration = duration.unwrap_or(self.config.default_duration);
        validate_shape(party_size, duration)?;

        let key = AvailabilityKey::new(business_id, location_id, date);
        let generation = self.slot_cache.generation(&key);
        if let Some(slots) = self.slot_cache.get(&key, party_size, duration) {
            metrics::counter!(SLOT_CACHE_TOTAL, "result" => "hit").increment(1);
            return Ok(slots);
        }
        metrics::counter!(SLOT_CACHE_TOTAL, "result" => "miss").increment(1);

        let started = std::time::Instant::now();
        let window = self
            .calendar
            .operating_window(business_id, location_id, date.weekday())
            .await?;
        let candidates = generate_slots(date, window.as_ref(), duration, self.config.slot_interval);

        let slots = if candidates.is_empty() {
            Vec::new()
        } else {
            let resources = self
                .directory
                .list_active_resources(business_id, location_id)
                .await?;
            let evaluations = try_join_all(
                candidates
                    .iter()
                    .map(|slot| self.evaluate_with(&resources, *slot, party_size)),
            )
            .await?;
            evaluations.iter().map(Slot::from).collect()
        };

        metrics::histogram!(AVAILABILITY_QUERY_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        self.slot_cache.put(key, generation, party_size, duration, slots.clone());
        Ok(slots)
    }

    /// Evaluate a single start time without placing anything.
    pub async fn check_slot(
        &self,
        business_id: Ulid,
        location_id: Option<Ulid>,
        start: NaiveDateTime,
        party_size: u32,
        duration: Minutes,
    ) -> Result<Evaluation, EngineError> {
        validate_shape(party_size, duration)?;
        let slot = Span::starting_at(truncate_to_minute(start), duration);
        self.evaluate(business_id, location_id, slot, party_size).await
    }

    /// Fresh availability for every configured party size, at the default
    /// duration. Drops cached results for the key first.
    pub(crate) async fn availability_update(
        &self,
        key: AvailabilityKey,
        cause: UpdateCause,
    ) -> Result<AvailabilityUpdate, EngineError> {
        self.slot_cache.invalidate(&key);
        let slots = try_join_all(self.config.party_sizes.iter().map(|&party_size| async move {
            let slots = self
                .get_available_slots(key.business_id, key.location_id, key.date, party_size, None)
                .await?;
            Ok::<_, EngineError>(PartySizeSlots { party_size, slots })
        }))
        .await?;

        Ok(AvailabilityUpdate {
            business_id: key.business_id,
            location_id: key.location_id,
            date: key.date,
            slots,
            cause,
            timestamp: Utc::now(),
        })
    }
}
