use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::NaiveDateTime;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, warn};
use ulid::Ulid;

use crate::engine::Engine;
use crate::model::{AvailabilityKey, AvailabilityUpdate, UpdateCause};
use crate::observability::{BROADCASTS_TOTAL, BROADCAST_BATCH_SIZE};

const CHANNEL_CAPACITY: usize = 256;

/// Receives every broadcast availability update.
pub trait UpdateSink: Send + Sync {
    fn publish(&self, update: AvailabilityUpdate);
}

impl<F> UpdateSink for F
where
    F: Fn(AvailabilityUpdate) + Send + Sync,
{
    fn publish(&self, update: AvailabilityUpdate) {
        self(update)
    }
}

/// Broadcast hub for availability updates per business.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<AvailabilityUpdate>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to updates for a business. Creates the channel if needed.
    pub fn subscribe(&self, business_id: Ulid) -> broadcast::Receiver<AvailabilityUpdate> {
        let sender = self
            .channels
            .entry(business_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an update. No-op if nobody is listening.
    pub fn send(&self, update: &AvailabilityUpdate) {
        if let Some(sender) = self.channels.get(&update.business_id) {
            let _ = sender.send(update.clone());
        }
    }
}

impl UpdateSink for NotifyHub {
    fn publish(&self, update: AvailabilityUpdate) {
        self.send(&update);
    }
}

// ── Debounced broadcaster ────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub(crate) struct ChangeNotice {
    pub business_id: Ulid,
    pub location_id: Option<Ulid>,
    pub at: NaiveDateTime,
    pub cause: UpdateCause,
}

/// Background task that coalesces occupancy changes and broadcasts them.
/// 1. Resolve each notice to the (business, location, service date) it
///    affects and buffer it by that key; a later notice replaces the cause.
/// 2. Every notice pushes the single deadline out to `now + window`.
/// 3. When the deadline passes, recompute and publish one update per buffered key.
///
/// Exits when the engine is dropped.
pub(crate) async fn run_broadcaster(
    engine: Weak<Engine>,
    mut rx: mpsc::UnboundedReceiver<ChangeNotice>,
    sink: Arc<dyn UpdateSink>,
    window: Duration,
) {
    let mut pending: HashMap<AvailabilityKey, UpdateCause> = HashMap::new();
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            notice = rx.recv() => match notice {
                Some(notice) => {
                    let Some(engine) = engine.upgrade() else { break };
                    let key = resolve(&engine, &notice).await;
                    pending.insert(key, notice.cause);
                    deadline = Some(Instant::now() + window);
                }
                None => break,
            },
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                let batch = std::mem::take(&mut pending);
                let Some(engine) = engine.upgrade() else { break };
                flush(&engine, batch, sink.as_ref()).await;
            }
        }
    }
    debug!("availability broadcaster stopped");
}

async fn resolve(engine: &Engine, notice: &ChangeNotice) -> AvailabilityKey {
    let ChangeNotice {
        business_id,
        location_id,
        at,
        ..
    } = *notice;
    match engine.affected_key(business_id, location_id, at).await {
        Ok(key) => key,
        Err(e) => {
            warn!("could not resolve service date for change at {at}: {e}");
            AvailabilityKey::new(business_id, location_id, at.date())
        }
    }
}

async fn flush(engine: &Engine, batch: HashMap<AvailabilityKey, UpdateCause>, sink: &dyn UpdateSink) {
    metrics::histogram!(BROADCAST_BATCH_SIZE).record(batch.len() as f64);
    for (key, cause) in batch {
        match engine.availability_update(key, cause).await {
            Ok(update) => {
                sink.publish(update);
                metrics::counter!(BROADCASTS_TOTAL).increment(1);
            }
            // No caller to hand this to; the next change for the key retries.
            Err(e) => error!(
                "availability recompute failed for {} on {}: {e}",
                key.business_id, key.date
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn update(business_id: Ulid) -> AvailabilityUpdate {
        AvailabilityUpdate {
            business_id,
            location_id: None,
            date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            slots: Vec::new(),
            cause: UpdateCause::BookingCancelled,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let biz = Ulid::new();
        let mut rx = hub.subscribe(biz);

        let u = update(biz);
        hub.publish(u.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received, u);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(&update(Ulid::new()));
    }

    #[tokio::test]
    async fn other_business_updates_are_not_delivered() {
        let hub = NotifyHub::new();
        let biz = Ulid::new();
        let mut rx = hub.subscribe(biz);
        hub.send(&update(Ulid::new()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closures_are_sinks() {
        let seen = std::sync::Mutex::new(Vec::new());
        let sink = |u: AvailabilityUpdate| seen.lock().unwrap().push(u.business_id);
        let biz = Ulid::new();
        sink.publish(update(biz));
        assert_eq!(*seen.lock().unwrap(), vec![biz]);
    }
}
