use std::str::FromStr;
use std::time::Duration;

use crate::model::Minutes;

/// Engine tunables. Constructed once at process start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Granularity of generated slots and of the alternative-time search.
    pub slot_interval: Minutes,
    /// Duration used when the caller doesn't supply one.
    pub default_duration: Minutes,
    pub hold_ttl: Duration,
    pub lock_ttl: Duration,
    /// Quiet period before buffered occupancy changes are broadcast.
    pub debounce: Duration,
    pub cache_ttl: Duration,
    /// Party sizes precomputed for every availability broadcast.
    pub party_sizes: Vec<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            slot_interval: 15,
            default_duration: 120,
            hold_ttl: Duration::from_secs(600),
            lock_ttl: Duration::from_secs(30),
            debounce: Duration::from_millis(500),
            cache_ttl: Duration::from_secs(300),
            party_sizes: vec![1, 2, 4, 6, 8],
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

impl EngineConfig {
    /// Read `SEATWISE_*` overrides. Missing or unparseable values keep the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let party_sizes = std::env::var("SEATWISE_PARTY_SIZES")
            .ok()
            .map(|s| parse_party_sizes(&s))
            .filter(|sizes| !sizes.is_empty())
            .unwrap_or(defaults.party_sizes);

        Self {
            slot_interval: env_parse("SEATWISE_SLOT_INTERVAL_MINUTES")
                .filter(|m| *m > 0)
                .unwrap_or(defaults.slot_interval),
            default_duration: env_parse("SEATWISE_DEFAULT_DURATION_MINUTES")
                .filter(|m| *m > 0)
                .unwrap_or(defaults.default_duration),
            hold_ttl: env_parse("SEATWISE_HOLD_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.hold_ttl),
            lock_ttl: env_parse("SEATWISE_LOCK_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.lock_ttl),
            debounce: env_parse("SEATWISE_DEBOUNCE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.debounce),
            cache_ttl: env_parse("SEATWISE_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            party_sizes,
        }
    }
}

fn parse_party_sizes(raw: &str) -> Vec<u32> {
    let mut sizes: Vec<u32> = raw
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .filter(|n| *n > 0)
        .collect();
    sizes.sort_unstable();
    sizes.dedup();
    sizes
}
