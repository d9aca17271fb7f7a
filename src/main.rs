use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

use seatwise::config::EngineConfig;
use seatwise::directory::{Fixture, InMemoryDirectory};
use seatwise::engine::{Collaborators, Engine, EngineError};
use seatwise::model::{AvailabilityUpdate, Minutes, ReservationRequest, UpdateCause};
use seatwise::reaper;
use seatwise::store::InMemoryKvStore;

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// One JSON object per stdin line, tagged by `op`.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Command {
    Slots {
        business_id: Ulid,
        #[serde(default)]
        location_id: Option<Ulid>,
        date: NaiveDate,
        party_size: u32,
        #[serde(default)]
        duration: Option<Minutes>,
    },
    Check {
        business_id: Ulid,
        #[serde(default)]
        location_id: Option<Ulid>,
        start: NaiveDateTime,
        party_size: u32,
        duration: Minutes,
    },
    Reserve(ReservationRequest),
    Release {
        business_id: Ulid,
        #[serde(default)]
        location_id: Option<Ulid>,
        start: NaiveDateTime,
        resource_id: Ulid,
        duration: Minutes,
    },
    Notify {
        business_id: Ulid,
        #[serde(default)]
        location_id: Option<Ulid>,
        at: NaiveDateTime,
        cause: UpdateCause,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum Line<'a> {
    Result(serde_json::Value),
    Error(&'a str),
    Update(&'a AvailabilityUpdate),
}

fn emit(line: &Line<'_>) {
    match serde_json::to_string(line) {
        Ok(json) => println!("{json}"),
        Err(e) => warn!("failed to encode output: {e}"),
    }
}

async fn execute(engine: &Engine, command: Command) -> Result<serde_json::Value, EngineError> {
    let value = match command {
        Command::Slots {
            business_id,
            location_id,
            date,
            party_size,
            duration,
        } => {
            let slots = engine
                .get_available_slots(business_id, location_id, date, party_size, duration)
                .await?;
            serde_json::to_value(slots)
        }
        Command::Check {
            business_id,
            location_id,
            start,
            party_size,
            duration,
        } => {
            let evaluation = engine
                .check_slot(business_id, location_id, start, party_size, duration)
                .await?;
            serde_json::to_value(evaluation)
        }
        Command::Reserve(request) => serde_json::to_value(engine.reserve_slot(request).await?),
        Command::Release {
            business_id,
            location_id,
            start,
            resource_id,
            duration,
        } => {
            engine
                .release_slot(business_id, location_id, start, resource_id, duration)
                .await?;
            Ok(serde_json::Value::Null)
        }
        Command::Notify {
            business_id,
            location_id,
            at,
            cause,
        } => {
            engine.notify_occupancy_changed(business_id, location_id, at, cause);
            Ok(serde_json::Value::Null)
        }
    };
    value.map_err(|e| EngineError::InvalidInput(format!("unencodable result: {e}")))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries results and updates.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let metrics_port: Option<u16> = std::env::var("SEATWISE_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    seatwise::observability::init(metrics_port)?;

    let config = EngineConfig::from_env();
    let directory = match std::env::var("SEATWISE_FIXTURE") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)?;
            let fixture: Fixture = serde_json::from_str(&raw)?;
            info!(
                "loaded fixture {path}: {} resources, {} bookings",
                fixture.resources.len(),
                fixture.bookings.len()
            );
            InMemoryDirectory::from_fixture(fixture)
        }
        Err(_) => {
            warn!("SEATWISE_FIXTURE not set, starting with an empty directory");
            InMemoryDirectory::new()
        }
    };
    let directory = Arc::new(directory);
    let store = Arc::new(InMemoryKvStore::new());

    let cancel = CancellationToken::new();
    let sweeper = tokio::spawn(reaper::run_sweeper(store.clone(), SWEEP_INTERVAL, cancel.clone()));

    info!(
        "seatwise ready: slot interval {} min, hold ttl {:?}, debounce {:?}",
        config.slot_interval, config.hold_ttl, config.debounce
    );
    let engine = Engine::new(
        Collaborators {
            directory: directory.clone(),
            calendar: directory.clone(),
            bookings: directory,
            store: store.clone(),
        },
        config,
        Arc::new(|update: AvailabilityUpdate| emit(&Line::Update(&update))),
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("stdin read error: {e}");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Command>(&line) {
                    Ok(command) => match execute(&engine, command).await {
                        Ok(value) => emit(&Line::Result(value)),
                        Err(e) => emit(&Line::Error(&e.to_string())),
                    },
                    Err(e) => emit(&Line::Error(&format!("bad command: {e}"))),
                }
            }
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    // Let the broadcaster flush anything still inside its window.
    tokio::time::sleep(engine.config().debounce * 2).await;
    cancel.cancel();
    sweeper.await?;
    info!("seatwise stopped");
    Ok(())
}
