use std::net::SocketAddr;

use crate::model::{ConflictKind, ReservationOutcome};

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: reservation attempts. Labels: outcome.
pub const RESERVATIONS_TOTAL: &str = "seatwise_reservations_total";

/// Counter: attempts rejected because another request held the lock.
pub const LOCK_CONTENTION_TOTAL: &str = "seatwise_lock_contention_total";

/// Counter: release_slot calls.
pub const HOLDS_RELEASED_TOTAL: &str = "seatwise_holds_released_total";

/// Histogram: uncached get_available_slots latency in seconds.
pub const AVAILABILITY_QUERY_DURATION_SECONDS: &str = "seatwise_availability_query_duration_seconds";

/// Counter: slot cache lookups. Labels: result (hit, miss).
pub const SLOT_CACHE_TOTAL: &str = "seatwise_slot_cache_total";

// ── Broadcast metrics ────────────────────────────────────────────

/// Counter: availability updates published.
pub const BROADCASTS_TOTAL: &str = "seatwise_broadcasts_total";

/// Histogram: distinct keys flushed per debounce window.
pub const BROADCAST_BATCH_SIZE: &str = "seatwise_broadcast_batch_size";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: expired entries swept from the in-memory store.
pub const STORE_EVICTED_TOTAL: &str = "seatwise_store_evicted_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a reservation outcome to a short label for metrics.
pub fn outcome_label(outcome: &ReservationOutcome) -> &'static str {
    match outcome {
        ReservationOutcome::Reserved { .. } => "reserved",
        ReservationOutcome::Rejected { conflicts } => match conflicts.first().map(|c| c.kind) {
            Some(ConflictKind::TimeConflict) => "time_conflict",
            Some(ConflictKind::TableUnavailable) => "table_unavailable",
            None => "rejected",
        },
    }
}
