mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod slots;

pub use availability::{booked_during, tally};
pub use conflict::{rank_candidates, select_best_resource, within_operating_hours};
pub use error::EngineError;
pub use slots::generate_slots;

use std::sync::Arc;

use chrono::NaiveDateTime;
use tokio::sync::mpsc;
use tracing::debug;
use ulid::Ulid;

use crate::config::EngineConfig;
use crate::directory::{BookingLedger, OperatingCalendar, ResourceDirectory};
use crate::hold::HoldCache;
use crate::limits::*;
use crate::lock::ReservationLock;
use crate::model::*;
use crate::notify::{self, ChangeNotice, UpdateSink};
use crate::slot_cache::SlotCache;
use crate::store::KvStore;

/// Everything the engine reads from or writes to outside the process.
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn ResourceDirectory>,
    pub calendar: Arc<dyn OperatingCalendar>,
    pub bookings: Arc<dyn BookingLedger>,
    pub store: Arc<dyn KvStore>,
}

/// Availability and reservation engine. Build one per process with
/// [`Engine::new`] and share the `Arc`.
pub struct Engine {
    pub(crate) directory: Arc<dyn ResourceDirectory>,
    pub(crate) calendar: Arc<dyn OperatingCalendar>,
    pub(crate) bookings: Arc<dyn BookingLedger>,
    pub(crate) lock: ReservationLock,
    pub(crate) holds: HoldCache,
    pub(crate) slot_cache: SlotCache,
    pub(crate) config: EngineConfig,
    changes: mpsc::UnboundedSender<ChangeNotice>,
}

impl Engine {
    /// Must be called inside a tokio runtime: spawns the update broadcaster,
    /// which stops once the engine is dropped.
    pub fn new(
        collaborators: Collaborators,
        config: EngineConfig,
        sink: Arc<dyn UpdateSink>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(notify::run_broadcaster(weak.clone(), rx, sink, config.debounce));

            Self {
                directory: collaborators.directory,
                calendar: collaborators.calendar,
                bookings: collaborators.bookings,
                lock: ReservationLock::new(collaborators.store.clone(), config.lock_ttl),
                holds: HoldCache::new(
                    collaborators.store,
                    config.hold_ttl,
                    OVERLAP_LOOKBACK_MINUTES,
                ),
                slot_cache: SlotCache::new(config.cache_ttl),
                config,
                changes: tx,
            }
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn holds(&self) -> &HoldCache {
        &self.holds
    }

    /// Record that occupancy changed around `at`. Cached availability is
    /// dropped now; a recomputed update is broadcast once changes for the same
    /// (business, location, date) stop arriving for the debounce window.
    ///
    /// After midnight `at` may belong to the previous evening's service, which
    /// only the calendar can tell. Both dates are invalidated here and the
    /// broadcaster resolves the one to recompute.
    pub fn notify_occupancy_changed(
        &self,
        business_id: Ulid,
        location_id: Option<Ulid>,
        at: NaiveDateTime,
        cause: UpdateCause,
    ) {
        let date = at.date();
        for day in [Some(date), date.pred_opt()].into_iter().flatten() {
            self.slot_cache
                .invalidate(&AvailabilityKey::new(business_id, location_id, day));
        }
        let notice = ChangeNotice {
            business_id,
            location_id,
            at,
            cause,
        };
        if self.changes.send(notice).is_err() {
            debug!("broadcaster stopped, dropping change at {at}");
        }
    }

    /// The cache and broadcast key a change at `at` falls under.
    pub(crate) async fn affected_key(
        &self,
        business_id: Ulid,
        location_id: Option<Ulid>,
        at: NaiveDateTime,
    ) -> Result<AvailabilityKey, EngineError> {
        let date = self.service_date(business_id, location_id, at).await?;
        Ok(AvailabilityKey::new(business_id, location_id, date))
    }
}

pub(crate) fn validate_shape(party_size: u32, duration: Minutes) -> Result<(), EngineError> {
    if !(MIN_PARTY_SIZE..=MAX_PARTY_SIZE).contains(&party_size) {
        return Err(EngineError::InvalidInput(format!(
            "party size {party_size} outside {MIN_PARTY_SIZE}..={MAX_PARTY_SIZE}"
        )));
    }
    if duration == 0 || duration > MAX_DURATION_MINUTES {
        return Err(EngineError::InvalidInput(format!(
            "duration {duration} minutes outside 1..={MAX_DURATION_MINUTES}"
        )));
    }
    Ok(())
}
