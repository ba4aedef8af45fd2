#![allow(unused_imports, dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tandem_core::clock::ManualClock;
use tandem_core::config::SessionsConfig;
use tandem_core::history::HistoryLogger;
use tandem_core::model::{Actor, Engagement, Role};
use tandem_core::service::SessionService;
use tandem_core::storage::{MemoryStorage, SqliteStorage, StorageBackend};

pub const MENTOR: &str = "mentor-ada";
pub const LEARNER: &str = "learner-lin";
pub const PROJECT: &str = "project-compiler";

/// Fixed start instant so every scenario reads the same way.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 14, 0, 0).unwrap()
}

pub fn mentor() -> Actor {
    Actor::mentor(MENTOR)
}

pub fn learner() -> Actor {
    Actor::learner(LEARNER)
}

pub struct Harness<S: StorageBackend> {
    pub service: SessionService<S>,
    pub storage: Arc<S>,
    pub clock: Arc<ManualClock>,
    pub history: Arc<HistoryLogger>,
    history_dir: std::path::PathBuf,
}

impl<S: StorageBackend> Drop for Harness<S> {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.history_dir);
    }
}

/// A service over `storage` with a manual clock at `t0()`, a temp audit
/// log, and one in-progress engagement between `MENTOR` and `LEARNER`.
pub async fn harness<S: StorageBackend + 'static>(storage: S) -> Harness<S> {
    let storage = Arc::new(storage);
    let clock = Arc::new(ManualClock::new(t0()));
    let history_dir = std::env::temp_dir().join(format!("tandem-it-{}", uuid::Uuid::now_v7()));
    let history = Arc::new(HistoryLogger::with_path(history_dir.join("history.jsonl"), true));

    let service = SessionService::new(
        storage.clone(),
        clock.clone(),
        history.clone(),
        &SessionsConfig::default(),
    );
    service
        .upsert_engagement(Engagement::new(PROJECT, MENTOR, LEARNER).with_title("Toy compiler"))
        .await
        .expect("seed engagement");

    Harness {
        service,
        storage,
        clock,
        history,
        history_dir,
    }
}

pub async fn memory_harness() -> Harness<MemoryStorage> {
    harness(MemoryStorage::new()).await
}

pub async fn sqlite_harness() -> Harness<SqliteStorage> {
    harness(SqliteStorage::open_in_memory().expect("open sqlite")).await
}

/// (scheduled, completed, booked) for a participant.
pub async fn counts<S: StorageBackend>(storage: &S, id: &str, role: Role) -> (i64, i64, i64) {
    let c = storage.get_counters(id, role).await.expect("counters");
    (c.sessions_scheduled, c.sessions_completed, c.sessions_booked)
}
