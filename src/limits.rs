use crate::model::Minutes;

// ── Request bounds ───────────────────────────────────────────────

pub const MIN_PARTY_SIZE: u32 = 1;
pub const MAX_PARTY_SIZE: u32 = 50;
pub const MAX_DURATION_MINUTES: Minutes = 12 * 60;
pub const MAX_REQUESTER_LEN: usize = 256;

// ── Occupancy lookups ────────────────────────────────────────────

/// How far before a candidate slot to look for bookings and holds that
/// might still be running. Bookings that started earlier than this are not
/// considered, whatever their duration.
pub const OVERLAP_LOOKBACK_MINUTES: Minutes = 120;

// ── Alternative-time search ──────────────────────────────────────

pub const MAX_ALTERNATIVES: usize = 5;
pub const ALTERNATIVE_SEARCH_RADIUS_MINUTES: Minutes = 120;
/// Alternatives are only suggested for start times within [08:00, 22:00].
pub const SANITY_WINDOW_OPEN_HOUR: u32 = 8;
pub const SANITY_WINDOW_CLOSE_HOUR: u32 = 22;
