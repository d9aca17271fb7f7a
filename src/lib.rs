//! Availability and reservation engine for table-based venues.
//!
//! [`engine::Engine`] computes slot availability from opening hours, tables,
//! persisted bookings and short-lived soft holds; serializes concurrent
//! reservation attempts through a TTL lock in a shared key-value store; and
//! broadcasts debounced availability updates when occupancy changes.

pub mod config;
pub mod directory;
pub mod engine;
pub mod hold;
pub mod limits;
pub mod lock;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod slot_cache;
pub mod store;
