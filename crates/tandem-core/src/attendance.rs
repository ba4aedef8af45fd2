use std::sync::Arc;

use uuid::Uuid;

use crate::error::{Result, TandemError};
use crate::history::{EventAction, SessionEvent};
use crate::lifecycle::{LifecycleEngine, Trigger};
use crate::model::{Role, Session, SessionStatus};
use crate::storage::StorageBackend;

/// Records presence and completes the session once both sides are in.
pub struct AttendanceTracker<S: StorageBackend> {
    engine: Arc<LifecycleEngine<S>>,
}

impl<S: StorageBackend> AttendanceTracker<S> {
    pub fn new(engine: Arc<LifecycleEngine<S>>) -> Self {
        Self { engine }
    }

    pub async fn mark_mentor_present(&self, id: Uuid, actor: &str) -> Result<Session> {
        self.mark_present(id, Role::Mentor, actor).await
    }

    pub async fn mark_learner_present(&self, id: Uuid, actor: &str) -> Result<Session> {
        self.mark_present(id, Role::Learner, actor).await
    }

    /// Mark `role` present. Already-present is a no-op. The window is
    /// checked before the status, so a session the sweep has expired
    /// reports `WindowExpired`.
    pub async fn mark_present(&self, id: Uuid, role: Role, actor: &str) -> Result<Session> {
        let window = self.engine.window();
        let (session, changed) = self
            .engine
            .modify(id, |s, now| {
                let deadline = s.attendance_deadline(window);
                if now > deadline {
                    return Err(TandemError::WindowExpired(format!(
                        "attendance closed at {deadline}"
                    )));
                }
                if !s.status.accepts_attendance() {
                    return Err(TandemError::invalid_state(
                        s.status,
                        "attendance can only be marked on scheduled or ongoing sessions",
                    ));
                }
                if s.attendance(role).present {
                    return Ok(false);
                }
                s.attendance_mut(role).mark(now);
                Ok(true)
            })
            .await?;

        if changed {
            self.engine.history().log(
                &SessionEvent::new(id, EventAction::AttendanceMarked, actor, session.updated_at)
                    .with_detail(role.to_string()),
            );
            tracing::info!(session_id = %id, %role, "presence marked");
        }

        if !(session.both_present() && session.status.accepts_attendance()) {
            return Ok(session);
        }
        self.complete(id, session.status, actor).await
    }

    /// Fire the completion for a session with both sides present. When the
    /// sweep starts the session first, completion is retried from the status
    /// it left behind.
    async fn complete(&self, id: Uuid, mut from: SessionStatus, actor: &str) -> Result<Session> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let err = match self
                .engine
                .transition(
                    id,
                    from,
                    SessionStatus::Completed,
                    Trigger::Attendance,
                    None,
                    actor,
                )
                .await
            {
                Ok(completed) => return Ok(completed),
                Err(e) if e.is_stale() => e,
                Err(e) => return Err(e),
            };

            let current = self.engine.storage().get_session(id).await?;
            if current.status == SessionStatus::Completed {
                tracing::debug!(session_id = %id, "completion already committed by another writer");
                return Ok(current);
            }
            let completable = current.status.accepts_attendance() && current.both_present();
            if !completable || attempts >= self.engine.max_write_retries() {
                return Err(err);
            }
            tracing::debug!(
                session_id = %id,
                %from,
                current = %current.status,
                "session moved before completion, retrying"
            );
            from = current.status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::SessionsConfig;
    use crate::history::HistoryLogger;
    use crate::model::{
        CounterKind, Engagement, EngagementStatus, ParticipantCounters, SessionDetails,
        SessionQuery,
    };
    use crate::storage::{MemoryStorage, WriteCondition};
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Fixture {
        tracker: AttendanceTracker<MemoryStorage>,
        engine: Arc<LifecycleEngine<MemoryStorage>>,
        clock: Arc<ManualClock>,
        session: Session,
    }

    async fn fixture() -> Fixture {
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()));
        let engine = Arc::new(LifecycleEngine::new(
            storage,
            clock.clone(),
            Arc::new(HistoryLogger::disabled()),
            &SessionsConfig::default(),
        ));
        let now = clock.now();
        let session = engine
            .create(
                Session::new(
                    &Engagement::new("p1", "m1", "l1"),
                    now + Duration::hours(1),
                    SessionDetails::default(),
                    now,
                ),
                "mentor:m1",
            )
            .await
            .unwrap();
        Fixture {
            tracker: AttendanceTracker::new(engine.clone()),
            engine,
            clock,
            session,
        }
    }

    #[tokio::test]
    async fn one_side_present_stays_open() {
        let f = fixture().await;
        let s = f.tracker.mark_mentor_present(f.session.id, "mentor:m1").await.unwrap();
        assert!(s.mentor_attendance.present);
        assert_eq!(s.mentor_attendance.attended_at, Some(f.clock.now()));
        assert!(!s.learner_attendance.present);
        assert_eq!(s.status, SessionStatus::Scheduled);
    }

    #[tokio::test]
    async fn both_present_completes() {
        let f = fixture().await;
        f.clock.advance(Duration::minutes(62));
        f.tracker.mark_mentor_present(f.session.id, "m").await.unwrap();
        let s = f.tracker.mark_learner_present(f.session.id, "l").await.unwrap();
        assert_eq!(s.status, SessionStatus::Completed);
        assert!(s.both_present());
    }

    #[tokio::test]
    async fn marking_twice_is_a_noop() {
        let f = fixture().await;
        let first = f.tracker.mark_learner_present(f.session.id, "l").await.unwrap();
        f.clock.advance(Duration::minutes(1));
        let second = f.tracker.mark_learner_present(f.session.id, "l").await.unwrap();
        assert_eq!(first.version, second.version);
        assert_eq!(first.learner_attendance.attended_at, second.learner_attendance.attended_at);
    }

    #[tokio::test]
    async fn window_boundary_is_inclusive() {
        let f = fixture().await;
        f.clock.advance(Duration::minutes(70));
        assert!(f.tracker.mark_mentor_present(f.session.id, "m").await.is_ok());

        f.clock.advance(Duration::seconds(1));
        let err = f.tracker.mark_learner_present(f.session.id, "l").await.unwrap_err();
        assert!(matches!(err, TandemError::WindowExpired(_)));
    }

    #[tokio::test]
    async fn cancelled_session_rejects_attendance() {
        let f = fixture().await;
        f.engine
            .transition(
                f.session.id,
                SessionStatus::Scheduled,
                SessionStatus::Cancelled,
                Trigger::Mentor,
                Some("illness"),
                "m",
            )
            .await
            .unwrap();
        let err = f.tracker.mark_mentor_present(f.session.id, "m").await.unwrap_err();
        assert!(matches!(err, TandemError::InvalidState(_)));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let f = fixture().await;
        let err = f.tracker.mark_mentor_present(Uuid::now_v7(), "m").await.unwrap_err();
        assert!(matches!(err, TandemError::NotFound(_)));
    }

    /// Store that starts the session (as a sweep would) right after the
    /// write that records the second presence.
    struct StartsAfterBothPresent {
        inner: MemoryStorage,
        fired: AtomicBool,
    }

    impl StorageBackend for StartsAfterBothPresent {
        async fn insert_session(&self, session: &Session) -> Result<()> {
            self.inner.insert_session(session).await
        }

        async fn get_session(&self, id: Uuid) -> Result<Session> {
            self.inner.get_session(id).await
        }

        async fn list_sessions(&self, query: &SessionQuery) -> Result<Vec<Session>> {
            self.inner.list_sessions(query).await
        }

        async fn update_session_if(
            &self,
            session: &Session,
            expected: WriteCondition,
        ) -> Result<bool> {
            let committed = self.inner.update_session_if(session, expected).await?;
            if committed
                && session.status == SessionStatus::Scheduled
                && session.both_present()
                && !self.fired.swap(true, Ordering::SeqCst)
            {
                let mut started = session.clone();
                started.status = SessionStatus::Ongoing;
                started.version = session.version + 1;
                assert!(
                    self.inner
                        .update_session_if(&started, WriteCondition::of(session))
                        .await?
                );
            }
            Ok(committed)
        }

        async fn delete_session_if(&self, id: Uuid, expected: SessionStatus) -> Result<bool> {
            self.inner.delete_session_if(id, expected).await
        }

        async fn upsert_engagement(&self, engagement: &Engagement) -> Result<()> {
            self.inner.upsert_engagement(engagement).await
        }

        async fn engagements_for_mentor(
            &self,
            mentor_id: &str,
            status: Option<EngagementStatus>,
        ) -> Result<Vec<Engagement>> {
            self.inner.engagements_for_mentor(mentor_id, status).await
        }

        async fn adjust_counter(
            &self,
            participant_id: &str,
            role: Role,
            kind: CounterKind,
            delta: i64,
        ) -> Result<()> {
            self.inner.adjust_counter(participant_id, role, kind, delta).await
        }

        async fn get_counters(
            &self,
            participant_id: &str,
            role: Role,
        ) -> Result<ParticipantCounters> {
            self.inner.get_counters(participant_id, role).await
        }
    }

    #[tokio::test]
    async fn completes_when_sweep_starts_session_first() {
        let storage = Arc::new(StartsAfterBothPresent {
            inner: MemoryStorage::new(),
            fired: AtomicBool::new(false),
        });
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()));
        let engine = Arc::new(LifecycleEngine::new(
            storage.clone(),
            clock.clone(),
            Arc::new(HistoryLogger::disabled()),
            &SessionsConfig::default(),
        ));
        let now = clock.now();
        let session = engine
            .create(
                Session::new(
                    &Engagement::new("p1", "m1", "l1"),
                    now + Duration::minutes(30),
                    SessionDetails::default(),
                    now,
                ),
                "mentor:m1",
            )
            .await
            .unwrap();
        let tracker = AttendanceTracker::new(engine);

        clock.advance(Duration::minutes(31));
        tracker.mark_mentor_present(session.id, "mentor:m1").await.unwrap();
        let s = tracker
            .mark_learner_present(session.id, "learner:l1")
            .await
            .unwrap();

        assert!(storage.fired.load(Ordering::SeqCst));
        assert_eq!(s.status, SessionStatus::Completed);
        let stored = storage.get_session(session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert!(stored.both_present());

        for (id, role) in [("m1", Role::Mentor), ("l1", Role::Learner)] {
            let c = storage.get_counters(id, role).await.unwrap();
            assert_eq!(c.sessions_scheduled, 0);
            assert_eq!(c.sessions_completed, 1);
        }
    }
}
