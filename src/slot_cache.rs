use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::time::Instant;
use ulid::Ulid;

use crate::model::{AvailabilityKey, Minutes, Slot};

/// Snapshot of a key's invalidation counters. Read it before computing and
/// hand it to [`SlotCache::put`]; a result computed across an invalidation
/// is then never served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
    key: u64,
    sweep: u64,
}

struct CachedSlots {
    slots: Vec<Slot>,
    stored_at: Instant,
    generation: Generation,
}

/// Computed slot lists per (business, location, date), then per
/// (party size, duration). Invalidation drops a whole date at once.
pub struct SlotCache {
    entries: DashMap<AvailabilityKey, HashMap<(u32, Minutes), CachedSlots>>,
    /// Bumped for a key when it is invalidated, and for the business-wide
    /// key when any of its locations is.
    generations: DashMap<AvailabilityKey, u64>,
    /// Bumped when a business-wide key is invalidated; covers every location.
    sweeps: DashMap<(Ulid, NaiveDate), u64>,
    ttl: Duration,
}

impl SlotCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            generations: DashMap::new(),
            sweeps: DashMap::new(),
            ttl,
        }
    }

    pub fn generation(&self, key: &AvailabilityKey) -> Generation {
        Generation {
            key: self.generations.get(key).map_or(0, |g| *g),
            sweep: self
                .sweeps
                .get(&(key.business_id, key.date))
                .map_or(0, |g| *g),
        }
    }

    pub fn get(&self, key: &AvailabilityKey, party_size: u32, duration: Minutes) -> Option<Vec<Slot>> {
        let current = self.generation(key);
        let entry = self.entries.get(key)?;
        let cached = entry.get(&(party_size, duration))?;
        if cached.generation != current || cached.stored_at.elapsed() >= self.ttl {
            return None;
        }
        Some(cached.slots.clone())
    }

    /// Store `slots` computed under `generation`. Dropped if the key has been
    /// invalidated since.
    pub fn put(
        &self,
        key: AvailabilityKey,
        generation: Generation,
        party_size: u32,
        duration: Minutes,
        slots: Vec<Slot>,
    ) {
        if self.generation(&key) != generation {
            return;
        }
        self.entries.entry(key).or_default().insert(
            (party_size, duration),
            CachedSlots {
                slots,
                stored_at: Instant::now(),
                generation,
            },
        );
    }

    /// Drop everything cached for the key's date that the change can affect:
    /// the location itself and the business-wide view. A business-wide key
    /// drops every location of that business for the date.
    pub fn invalidate(&self, key: &AvailabilityKey) {
        *self.generations.entry(key.business_wide()).or_insert(0) += 1;
        match key.location_id {
            Some(_) => {
                *self.generations.entry(*key).or_insert(0) += 1;
                self.entries.remove(key);
                self.entries.remove(&key.business_wide());
            }
            None => {
                *self.sweeps.entry((key.business_id, key.date)).or_insert(0) += 1;
                self.entries
                    .retain(|k, _| !(k.business_id == key.business_id && k.date == key.date));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
