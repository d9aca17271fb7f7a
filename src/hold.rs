use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::model::*;
use crate::store::{KvStore, StoreError, StoreResult};

/// `hold:{resource}:{YYYY-MM-DD-HH-mm}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HoldKey(String);

impl HoldKey {
    pub fn new(resource_id: Ulid, start: NaiveDateTime) -> Self {
        Self(format!("hold:{resource_id}:{}", start.format("%Y-%m-%d-%H-%M")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HoldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn encode(hold: &SoftHold) -> StoreResult<Bytes> {
    bincode::serialize(hold)
        .map(Bytes::from)
        .map_err(|e| StoreError::Codec(e.to_string()))
}

fn decode(raw: &[u8]) -> StoreResult<SoftHold> {
    bincode::deserialize(raw).map_err(|e| StoreError::Codec(e.to_string()))
}

/// Soft holds in the shared KV store, one key per (table, start minute).
pub struct HoldCache {
    store: Arc<dyn KvStore>,
    ttl: Duration,
    lookback: Minutes,
}

impl HoldCache {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration, lookback: Minutes) -> Self {
        Self {
            store,
            ttl,
            lookback,
        }
    }

    /// Returns false if a live hold already exists for the same table and minute.
    pub async fn place(&self, hold: &SoftHold) -> StoreResult<bool> {
        let key = HoldKey::new(hold.resource_id, truncate_to_minute(hold.start));
        self.store
            .set_if_absent(key.as_str(), encode(hold)?, self.ttl)
            .await
    }

    pub async fn get(&self, resource_id: Ulid, start: NaiveDateTime) -> StoreResult<Option<SoftHold>> {
        let key = HoldKey::new(resource_id, truncate_to_minute(start));
        match self.store.get(key.as_str()).await? {
            Some(raw) => decode(&raw).map(Some),
            None => Ok(None),
        }
    }

    /// Idempotent.
    pub async fn release(&self, resource_id: Ulid, start: NaiveDateTime) -> StoreResult<()> {
        let key = HoldKey::new(resource_id, truncate_to_minute(start));
        self.store.delete(key.as_str()).await
    }

    /// Remove `hold` only if the stored value is still this exact hold.
    pub async fn withdraw(&self, hold: &SoftHold) -> StoreResult<bool> {
        let key = HoldKey::new(hold.resource_id, truncate_to_minute(hold.start));
        self.store.delete_if_eq(key.as_str(), &encode(hold)?).await
    }

    /// First live hold on `resource_id` whose own span overlaps `span`.
    ///
    /// Probes every minute from `lookback` before `span.start` up to
    /// `span.end`, the same horizon used for persisted bookings.
    pub async fn find_overlapping(&self, resource_id: Ulid, span: Span) -> StoreResult<Option<SoftHold>> {
        self.scan(resource_id, span, None).await
    }

    /// Another live hold on the same table overlapping `hold`, ignoring
    /// `hold`'s own key.
    pub async fn find_rival(&self, hold: &SoftHold) -> StoreResult<Option<SoftHold>> {
        let own = HoldKey::new(hold.resource_id, truncate_to_minute(hold.start));
        self.scan(hold.resource_id, hold.span(), Some(&own)).await
    }

    async fn scan(
        &self,
        resource_id: Ulid,
        span: Span,
        skip: Option<&HoldKey>,
    ) -> StoreResult<Option<SoftHold>> {
        let from = truncate_to_minute(span.start) - minutes(self.lookback);
        let count = (span.end - from).num_minutes().max(0);
        let keys: Vec<String> = (0..count)
            .map(|m| HoldKey::new(resource_id, from + chrono::TimeDelta::minutes(m)).0)
            .filter(|k| skip.is_none_or(|own| own.0 != *k))
            .collect();

        for raw in self.store.get_many(&keys).await?.into_iter().flatten() {
            let hold = decode(&raw)?;
            if hold.span().overlaps(&span) {
                return Ok(Some(hold));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryKvStore;
    use chrono::{NaiveDate, Utc};

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 14)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn hold(resource_id: Ulid, start: NaiveDateTime, duration: Minutes) -> SoftHold {
        SoftHold {
            business_id: Ulid::new(),
            location_id: None,
            resource_id,
            start,
            duration,
            requester: "test".into(),
            created_at: Utc::now(),
        }
    }

    fn cache() -> HoldCache {
        HoldCache::new(Arc::new(InMemoryKvStore::new()), Duration::from_secs(600), 120)
    }

    #[test]
    fn key_format() {
        let rid: Ulid = "01ARZ3NDEKTSV4RRFFQ69G5FAV".parse().unwrap();
        assert_eq!(
            HoldKey::new(rid, at(9, 5)).as_str(),
            "hold:01ARZ3NDEKTSV4RRFFQ69G5FAV:2025-03-14-09-05"
        );
    }

    #[tokio::test]
    async fn place_get_release_roundtrip() {
        let cache = cache();
        let rid = Ulid::new();
        let h = hold(rid, at(19, 0), 90);

        assert!(cache.place(&h).await.unwrap());
        assert!(!cache.place(&h).await.unwrap());
        assert_eq!(cache.get(rid, at(19, 0)).await.unwrap(), Some(h));

        cache.release(rid, at(19, 0)).await.unwrap();
        cache.release(rid, at(19, 0)).await.unwrap();
        assert_eq!(cache.get(rid, at(19, 0)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn finds_holds_started_earlier_that_still_run() {
        let cache = cache();
        let rid = Ulid::new();
        cache.place(&hold(rid, at(18, 7), 90)).await.unwrap();

        let later = Span::starting_at(at(19, 0), 60);
        assert!(cache.find_overlapping(rid, later).await.unwrap().is_some());

        let after_end = Span::starting_at(at(19, 37), 60);
        assert!(cache.find_overlapping(rid, after_end).await.unwrap().is_none());

        let other_table = cache.find_overlapping(Ulid::new(), later).await.unwrap();
        assert!(other_table.is_none());
    }

    #[tokio::test]
    async fn finds_holds_starting_inside_the_span() {
        let cache = cache();
        let rid = Ulid::new();
        cache.place(&hold(rid, at(20, 15), 60)).await.unwrap();

        let span = Span::starting_at(at(19, 0), 90);
        assert!(cache.find_overlapping(rid, span).await.unwrap().is_some());
        let ends_first = Span::starting_at(at(19, 0), 75);
        assert!(cache.find_overlapping(rid, ends_first).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rival_ignores_own_key_but_sees_other_minutes() {
        let cache = cache();
        let rid = Ulid::new();
        let seven = hold(rid, at(19, 0), 90);
        cache.place(&seven).await.unwrap();
        assert_eq!(cache.find_rival(&seven).await.unwrap(), None);

        let quarter_past = hold(rid, at(19, 15), 90);
        cache.place(&quarter_past).await.unwrap();
        assert_eq!(cache.find_rival(&seven).await.unwrap(), Some(quarter_past.clone()));
        assert_eq!(cache.find_rival(&quarter_past).await.unwrap(), Some(seven));

        let elsewhere = hold(Ulid::new(), at(19, 15), 90);
        assert_eq!(cache.find_rival(&elsewhere).await.unwrap(), None);
    }

    #[tokio::test]
    async fn withdraw_leaves_a_replacement_hold_alone() {
        let cache = cache();
        let rid = Ulid::new();
        let mine = hold(rid, at(19, 0), 90);
        cache.place(&mine).await.unwrap();
        assert!(cache.withdraw(&mine).await.unwrap());
        assert!(!cache.withdraw(&mine).await.unwrap());

        let theirs = hold(rid, at(19, 0), 60);
        cache.place(&theirs).await.unwrap();
        assert!(!cache.withdraw(&mine).await.unwrap());
        assert_eq!(cache.get(rid, at(19, 0)).await.unwrap(), Some(theirs));
    }
}
