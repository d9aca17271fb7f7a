use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::NaiveDateTime;
use tracing::debug;
use ulid::Ulid;

use crate::store::{KvStore, StoreResult};

/// `lock:{business}:{location|-}:{YYYY-MM-DDTHH:mm}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    pub fn new(business_id: Ulid, location_id: Option<Ulid>, at: NaiveDateTime) -> Self {
        let location = location_id.map_or_else(|| "-".to_string(), |l| l.to_string());
        Self(format!(
            "lock:{business_id}:{location}:{}",
            at.format("%Y-%m-%dT%H:%M")
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Proof of a successful acquire. The holder id is the stored value, so a
/// release only deletes a lock this caller still owns.
#[derive(Debug)]
pub struct LockToken {
    key: LockKey,
    holder: Ulid,
}

/// Mutual exclusion for reservation attempts on the same
/// (business, location, minute). Single attempt, no waiting: a taken key is
/// reported immediately. The TTL reclaims locks of crashed holders.
pub struct ReservationLock {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl ReservationLock {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn try_acquire(&self, key: LockKey) -> StoreResult<Option<LockToken>> {
        let holder = Ulid::new();
        let acquired = self
            .store
            .set_if_absent(key.as_str(), Bytes::from(holder.to_string()), self.ttl)
            .await?;
        if acquired {
            Ok(Some(LockToken { key, holder }))
        } else {
            debug!("lock {key} is held by another request");
            Ok(None)
        }
    }

    pub async fn release(&self, token: LockToken) -> StoreResult<()> {
        let holder = token.holder.to_string();
        if !self.store.delete_if_eq(token.key.as_str(), holder.as_bytes()).await? {
            debug!("lock {} expired before release", token.key);
        }
        Ok(())
    }
}
