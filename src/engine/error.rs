use crate::store::StoreError;

/// Failures returned to the caller. Lock contention and unavailable tables
/// are not errors: they come back as conflicts on `ReservationOutcome`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(#[from] StoreError),
}
