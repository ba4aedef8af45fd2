//! Expiry sweeper: time-driven transitions.
//!
//! A pass starts sessions whose time has come, then closes ongoing sessions
//! whose attendance window has passed. The decision for one session is the
//! pure [`plan`] function, which listing endpoints reuse to reconcile
//! records lazily between passes.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TandemError};
use crate::history::SWEEPER_ACTOR;
use crate::lifecycle::{LifecycleEngine, Trigger};
use crate::model::{Role, Session, SessionQuery, SessionStatus};
use crate::storage::StorageBackend;

/// What the sweep would do to a session right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepAction {
    Start,
    Complete,
    Expire { reason: String },
}

impl SweepAction {
    pub fn target(&self) -> SessionStatus {
        match self {
            Self::Start => SessionStatus::Ongoing,
            Self::Complete => SessionStatus::Completed,
            Self::Expire { .. } => SessionStatus::Expired,
        }
    }
}

/// Decide the next time-driven step for `session`, if any.
pub fn plan(session: &Session, now: DateTime<Utc>, window: Duration) -> Option<SweepAction> {
    match session.status {
        SessionStatus::Scheduled if session.scheduled_at <= now => Some(SweepAction::Start),
        SessionStatus::Ongoing if session.both_present() => Some(SweepAction::Complete),
        SessionStatus::Ongoing if now > session.attendance_deadline(window) => {
            Some(SweepAction::Expire {
                reason: absence_reason(&session.absent_roles()),
            })
        }
        _ => None,
    }
}

fn absence_reason(absent: &[Role]) -> String {
    let names: Vec<String> = absent.iter().map(Role::to_string).collect();
    format!(
        "{} did not attend within the attendance window",
        names.join(" and ")
    )
}

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub started: usize,
    pub completed: usize,
    pub expired: usize,
    /// Transitions another writer committed first.
    pub stale: usize,
    pub errors: usize,
    /// Another pass was already running; nothing was done.
    pub skipped: bool,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.started + self.completed + self.expired
    }
}

pub struct Sweeper<S: StorageBackend> {
    engine: Arc<LifecycleEngine<S>>,
    running: tokio::sync::Mutex<()>,
}

impl<S: StorageBackend + 'static> Sweeper<S> {
    pub fn new(engine: Arc<LifecycleEngine<S>>) -> Self {
        Self {
            engine,
            running: tokio::sync::Mutex::new(()),
        }
    }

    /// Run one pass. Returns a skipped report if a pass is already running.
    pub async fn run_once(&self) -> Result<SweepReport> {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::debug!("sweep already in progress, skipping");
            return Ok(SweepReport {
                skipped: true,
                ..Default::default()
            });
        };

        let mut report = SweepReport::default();
        let now = self.engine.now();

        let due = self
            .engine
            .storage()
            .list_sessions(&SessionQuery {
                status: Some(SessionStatus::Scheduled),
                scheduled_until: Some(now),
                ..Default::default()
            })
            .await?;
        for session in &due {
            self.step(session, &mut report).await;
        }

        let ongoing = self
            .engine
            .storage()
            .list_sessions(&SessionQuery::with_status(SessionStatus::Ongoing))
            .await?;
        for session in &ongoing {
            self.step(session, &mut report).await;
        }

        if report.total() > 0 || report.errors > 0 {
            tracing::info!(
                started = report.started,
                completed = report.completed,
                expired = report.expired,
                stale = report.stale,
                errors = report.errors,
                "sweep finished"
            );
        } else {
            tracing::debug!(stale = report.stale, "sweep finished with nothing to do");
        }
        Ok(report)
    }

    async fn step(&self, session: &Session, report: &mut SweepReport) {
        let now = self.engine.now();
        let Some(action) = plan(session, now, self.engine.window()) else {
            return;
        };

        match apply(&self.engine, session, &action).await {
            Ok(_) => match action {
                SweepAction::Start => report.started += 1,
                SweepAction::Complete => report.completed += 1,
                SweepAction::Expire { .. } => report.expired += 1,
            },
            Err(e) if e.is_stale() => {
                tracing::debug!(session_id = %session.id, "sweep lost race: {e}");
                report.stale += 1;
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %session.id,
                    to = %action.target(),
                    "sweep step failed: {e}"
                );
                report.errors += 1;
            }
        }
    }

    /// Run passes every `every` until `cancel` fires. Missed ticks are
    /// skipped rather than bunched up.
    pub fn spawn(
        self: Arc<Self>,
        every: std::time::Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tracing::info!(interval_secs = every.as_secs(), "sweeper started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = self.run_once().await {
                            tracing::error!("sweep pass failed: {e}");
                        }
                    }
                }
            }
            tracing::info!("sweeper stopped");
        })
    }
}

async fn apply<S: StorageBackend>(
    engine: &LifecycleEngine<S>,
    session: &Session,
    action: &SweepAction,
) -> Result<Session> {
    let reason = match action {
        SweepAction::Expire { reason } => Some(reason.as_str()),
        _ => None,
    };
    engine
        .transition(
            session.id,
            session.status,
            action.target(),
            Trigger::Sweep,
            reason,
            SWEEPER_ACTOR,
        )
        .await
}

/// Bring a session read outside a sweep up to date with the clock.
///
/// Failures are logged and the freshest known state is returned, so a read
/// never fails because reconciliation did.
pub async fn reconcile<S: StorageBackend>(
    engine: &LifecycleEngine<S>,
    mut session: Session,
) -> Session {
    // scheduled -> ongoing -> closed, plus one re-read after a lost race
    for _ in 0..3 {
        let Some(action) = plan(&session, engine.now(), engine.window()) else {
            break;
        };
        match apply(engine, &session, &action).await {
            Ok(next) => session = next,
            Err(e) if e.is_stale() => match engine.storage().get_session(session.id).await {
                Ok(fresh) => session = fresh,
                Err(e) => {
                    tracing::warn!(session_id = %session.id, "reconcile re-read failed: {e}");
                    break;
                }
            },
            Err(TandemError::NotFound(_)) => break,
            Err(e) => {
                tracing::warn!(session_id = %session.id, "reconcile failed: {e}");
                break;
            }
        }
    }
    session
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::SessionsConfig;
    use crate::history::HistoryLogger;
    use crate::model::{Engagement, SessionDetails};
    use crate::storage::MemoryStorage;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn session_at(scheduled_at: DateTime<Utc>) -> Session {
        Session::new(
            &Engagement::new("p1", "m1", "l1"),
            scheduled_at,
            SessionDetails::default(),
            t0(),
        )
    }

    struct Fixture {
        sweeper: Arc<Sweeper<MemoryStorage>>,
        engine: Arc<LifecycleEngine<MemoryStorage>>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(t0()));
        let engine = Arc::new(LifecycleEngine::new(
            Arc::new(MemoryStorage::new()),
            clock.clone(),
            Arc::new(HistoryLogger::disabled()),
            &SessionsConfig::default(),
        ));
        Fixture {
            sweeper: Arc::new(Sweeper::new(engine.clone())),
            engine,
            clock,
        }
    }

    #[test]
    fn plan_future_session_is_untouched() {
        let s = session_at(t0() + Duration::hours(1));
        assert_eq!(plan(&s, t0(), Duration::minutes(10)), None);
    }

    #[test]
    fn plan_starts_due_session() {
        let s = session_at(t0());
        assert_eq!(plan(&s, t0(), Duration::minutes(10)), Some(SweepAction::Start));
    }

    #[test]
    fn plan_leaves_ongoing_within_window() {
        let mut s = session_at(t0());
        s.status = SessionStatus::Ongoing;
        assert_eq!(plan(&s, t0() + Duration::minutes(10), Duration::minutes(10)), None);
    }

    #[test]
    fn plan_expires_after_window_naming_absentees() {
        let mut s = session_at(t0());
        s.status = SessionStatus::Ongoing;
        s.mentor_attendance.mark(t0());
        match plan(&s, t0() + Duration::minutes(11), Duration::minutes(10)) {
            Some(SweepAction::Expire { reason }) => {
                assert!(reason.starts_with("learner did not attend"));
            }
            other => panic!("unexpected plan: {other:?}"),
        }
    }

    #[test]
    fn plan_completes_when_both_present() {
        let mut s = session_at(t0());
        s.status = SessionStatus::Ongoing;
        s.mentor_attendance.mark(t0());
        s.learner_attendance.mark(t0());
        assert_eq!(
            plan(&s, t0() + Duration::hours(2), Duration::minutes(10)),
            Some(SweepAction::Complete)
        );
    }

    #[test]
    fn plan_ignores_terminal_sessions() {
        for status in [SessionStatus::Completed, SessionStatus::Cancelled, SessionStatus::Expired] {
            let mut s = session_at(t0());
            s.status = status;
            assert_eq!(plan(&s, t0() + Duration::days(1), Duration::minutes(10)), None);
        }
    }

    #[tokio::test]
    async fn pass_starts_then_expires() {
        let f = fixture();
        let s = f.engine.create(session_at(t0() + Duration::hours(1)), "m").await.unwrap();

        f.clock.advance(Duration::hours(1));
        let report = f.sweeper.run_once().await.unwrap();
        assert_eq!(report.started, 1);
        assert_eq!(
            f.engine.storage().get_session(s.id).await.unwrap().status,
            SessionStatus::Ongoing
        );

        f.clock.advance(Duration::minutes(11));
        let report = f.sweeper.run_once().await.unwrap();
        assert_eq!(report.expired, 1);
        let stored = f.engine.storage().get_session(s.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Expired);
        assert!(stored.expire_reason.unwrap().contains("mentor and learner"));
    }

    #[tokio::test]
    async fn overdue_session_is_started_and_closed_in_one_pass() {
        let f = fixture();
        f.engine.create(session_at(t0() + Duration::minutes(5)), "m").await.unwrap();
        f.clock.advance(Duration::hours(3));

        let report = f.sweeper.run_once().await.unwrap();
        assert_eq!(report.started, 1);
        assert_eq!(report.expired, 1);
    }

    #[tokio::test]
    async fn overlapping_pass_is_skipped() {
        let f = fixture();
        let _held = f.sweeper.running.try_lock().unwrap();
        let report = f.sweeper.run_once().await.unwrap();
        assert!(report.skipped);
        assert_eq!(report.total(), 0);
    }

    #[tokio::test]
    async fn reconcile_applies_pending_steps() {
        let f = fixture();
        let s = f.engine.create(session_at(t0() + Duration::minutes(5)), "m").await.unwrap();
        f.clock.advance(Duration::minutes(30));

        let reconciled = reconcile(&f.engine, s).await;
        assert_eq!(reconciled.status, SessionStatus::Expired);
        assert_eq!(reconciled, f.engine.storage().get_session(reconciled.id).await.unwrap());
    }

    #[tokio::test]
    async fn spawned_sweeper_stops_on_cancel() {
        let f = fixture();
        let s = f.engine.create(session_at(t0() + Duration::minutes(1)), "m").await.unwrap();
        f.clock.advance(Duration::minutes(2));

        let cancel = CancellationToken::new();
        let handle = f
            .sweeper
            .clone()
            .spawn(std::time::Duration::from_millis(10), cancel.clone());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(
            f.engine.storage().get_session(s.id).await.unwrap().status,
            SessionStatus::Ongoing
        );
        assert_eq!(f.clock.now(), t0() + Duration::minutes(2));
    }
}
