use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use ulid::Ulid;

use seatwise::config::EngineConfig;
use seatwise::directory::{Fixture, InMemoryDirectory};
use seatwise::engine::{Collaborators, Engine};
use seatwise::model::*;
use seatwise::notify::NotifyHub;
use seatwise::store::InMemoryKvStore;

// ── Test infrastructure ──────────────────────────────────────

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
}

fn at(h: u32, m: u32) -> NaiveDateTime {
    day().and_hms_opt(h, m, 0).unwrap()
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        debounce: Duration::from_millis(20),
        ..EngineConfig::default()
    }
}

/// Business open Fridays 11:00–23:00 with the given tables, updates fanned
/// out through a `NotifyHub`.
fn restaurant(
    capacities: &[u32],
    location_id: Option<Ulid>,
) -> (Arc<Engine>, Arc<NotifyHub>, Ulid, Vec<Ulid>) {
    let business = Ulid::new();
    let dir = Arc::new(InMemoryDirectory::new());
    dir.set_hours(
        business,
        None,
        Weekday::Fri,
        Some(OperatingWindow::new(
            NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(23, 0, 0).unwrap(),
        )),
    );
    let mut ids = Vec::new();
    for &capacity in capacities {
        let id = Ulid::new();
        dir.upsert_resource(Resource {
            id,
            business_id: business,
            location_id,
            name: None,
            capacity,
            active: true,
        });
        ids.push(id);
    }

    let hub = Arc::new(NotifyHub::new());
    let engine = Engine::new(
        Collaborators {
            directory: dir.clone(),
            calendar: dir.clone(),
            bookings: dir,
            store: Arc::new(InMemoryKvStore::new()),
        },
        fast_config(),
        hub.clone(),
    );
    (engine, hub, business, ids)
}

fn request(business: Ulid, location_id: Option<Ulid>, party_size: u32) -> ReservationRequest {
    ReservationRequest {
        business_id: business,
        location_id,
        start: at(19, 0),
        party_size,
        duration: 90,
        requester: format!("guest-{}", Ulid::new()),
    }
}

fn is_lock_contention(outcome: &ReservationOutcome) -> bool {
    outcome
        .conflicts()
        .first()
        .is_some_and(|c| c.kind == ConflictKind::TimeConflict)
}

// ── Concurrency ──────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_never_double_hold_a_table() {
    let (engine, _hub, business, tables) = restaurant(&[2, 2, 4], None);

    let mut handles = Vec::new();
    for _ in 0..24 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.reserve_slot(request(business, None, 2)).await.unwrap()
        }));
    }

    let mut held = Vec::new();
    for h in handles {
        if let Some(rid) = h.await.unwrap().resource_id() {
            held.push(rid);
        }
    }

    assert!(held.len() <= tables.len());
    let distinct: HashSet<Ulid> = held.iter().copied().collect();
    assert_eq!(distinct.len(), held.len(), "a table was held twice: {held:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn retrying_through_contention_fills_every_table_exactly_once() {
    let (engine, _hub, business, tables) = restaurant(&[2, 2, 4], None);

    let mut handles = Vec::new();
    for _ in 0..12 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let outcome = engine.reserve_slot(request(business, None, 2)).await.unwrap();
                if is_lock_contention(&outcome) {
                    tokio::task::yield_now().await;
                    continue;
                }
                break outcome;
            }
        }));
    }

    let mut held = HashSet::new();
    let mut unavailable = 0;
    for h in handles {
        match h.await.unwrap() {
            ReservationOutcome::Reserved { resource_id, .. } => {
                assert!(held.insert(resource_id));
            }
            ReservationOutcome::Rejected { conflicts } => {
                assert_eq!(conflicts[0].kind, ConflictKind::TableUnavailable);
                unavailable += 1;
            }
        }
    }

    let expected: HashSet<Ulid> = tables.into_iter().collect();
    assert_eq!(held, expected);
    assert_eq!(unavailable, 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn location_and_business_wide_requests_share_one_table() {
    let location = Ulid::new();
    for _ in 0..20 {
        let (engine, _hub, business, _tables) = restaurant(&[4], Some(location));

        let scoped = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine.reserve_slot(request(business, Some(location), 2)).await.unwrap()
            })
        };
        let wide = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine.reserve_slot(request(business, None, 2)).await.unwrap()
            })
        };

        let successes = [scoped.await.unwrap(), wide.await.unwrap()]
            .iter()
            .filter(|o| o.is_success())
            .count();
        assert!(successes <= 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn neighbouring_minutes_never_share_one_table() {
    for _ in 0..100 {
        let (engine, _hub, business, tables) = restaurant(&[4], None);
        let spawn_at = |start: NaiveDateTime| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let mut req = request(business, None, 2);
                req.start = start;
                engine.reserve_slot(req).await.unwrap()
            })
        };
        let early = spawn_at(at(19, 0));
        let late = spawn_at(at(19, 15));

        let successes = [early.await.unwrap(), late.await.unwrap()]
            .iter()
            .filter(|o| o.is_success())
            .count();
        assert!(successes <= 1);

        let holds = engine.holds();
        let live = [
            holds.get(tables[0], at(19, 0)).await.unwrap(),
            holds.get(tables[0], at(19, 15)).await.unwrap(),
        ];
        assert!(live.iter().flatten().count() <= 1, "overlapping holds: {live:?}");
    }
}

// ── Update fan-out ───────────────────────────────────────────

#[tokio::test]
async fn subscribers_see_hold_placed_and_released() {
    let (engine, hub, business, _tables) = restaurant(&[4], None);
    let mut rx = hub.subscribe(business);

    let outcome = engine.reserve_slot(request(business, None, 2)).await.unwrap();
    let rid = outcome.resource_id().unwrap();

    let placed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(placed.cause, UpdateCause::HoldPlaced);
    assert_eq!(placed.date, day());
    let for_two = placed.slots.iter().find(|p| p.party_size == 2).unwrap();
    assert!(!for_two.slots.iter().find(|s| s.start == at(19, 0)).unwrap().available);

    engine
        .release_slot(business, None, at(19, 0), rid, 90)
        .await
        .unwrap();
    let released = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(released.cause, UpdateCause::HoldReleased);
    let for_two = released.slots.iter().find(|p| p.party_size == 2).unwrap();
    assert!(for_two.slots.iter().find(|s| s.start == at(19, 0)).unwrap().available);
}

#[tokio::test]
async fn subscribers_of_other_businesses_hear_nothing() {
    let (engine, hub, business, _tables) = restaurant(&[4], None);
    let mut other = hub.subscribe(Ulid::new());

    engine.reserve_slot(request(business, None, 2)).await.unwrap();

    let heard = tokio::time::timeout(Duration::from_millis(200), other.recv()).await;
    assert!(heard.is_err());
}

// ── Fixture ──────────────────────────────────────────────────

#[tokio::test]
async fn fixture_seeds_a_working_directory() {
    let business = Ulid::new();
    let table = Ulid::new();
    let json = format!(
        r#"{{
            "resources": [
                {{ "id": "{table}", "business_id": "{business}", "location_id": null, "name": "Window", "capacity": 4 }}
            ],
            "hours": [
                {{ "business_id": "{business}", "weekday": "Fri", "open": "17:00:00", "close": "22:00:00" }},
                {{ "business_id": "{business}", "weekday": "Sat" }}
            ],
            "bookings": [
                {{ "id": "{booking}", "business_id": "{business}", "location_id": null,
                   "resource_id": "{table}", "start": "2025-03-14T18:00:00",
                   "duration": 120, "party_size": 4, "status": "CONFIRMED" }}
            ]
        }}"#,
        booking = Ulid::new(),
    );
    let fixture: Fixture = serde_json::from_str(&json).unwrap();
    let dir = Arc::new(InMemoryDirectory::from_fixture(fixture));
    let engine = Engine::new(
        Collaborators {
            directory: dir.clone(),
            calendar: dir.clone(),
            bookings: dir,
            store: Arc::new(InMemoryKvStore::new()),
        },
        fast_config(),
        Arc::new(NotifyHub::new()),
    );

    let slots = engine
        .get_available_slots(business, None, day(), 2, Some(60))
        .await
        .unwrap();
    assert_eq!(slots.first().unwrap().start, at(17, 0));
    assert_eq!(slots.last().unwrap().start, at(21, 0));
    let open: Vec<NaiveDateTime> = slots.iter().filter(|s| s.available).map(|s| s.start).collect();
    assert!(open.contains(&at(17, 0)));
    assert!(!open.contains(&at(18, 30)));
    assert!(open.contains(&at(20, 0)));

    let saturday = day().succ_opt().unwrap();
    let closed = engine
        .get_available_slots(business, None, saturday, 2, None)
        .await
        .unwrap();
    assert!(closed.is_empty());
}
