use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::observability::STORE_EVICTED_TOTAL;
use crate::store::InMemoryKvStore;

/// Background task that periodically drops expired locks and holds from the
/// in-memory store. Readers already ignore expired entries; this bounds memory.
pub async fn run_sweeper(store: Arc<InMemoryKvStore>, every: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let evicted = store.evict_expired();
                if evicted > 0 {
                    debug!("swept {evicted} expired store entries");
                    metrics::counter!(STORE_EVICTED_TOTAL).increment(evicted as u64);
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}
