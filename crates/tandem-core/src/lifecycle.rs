//! Lifecycle transition engine.
//!
//! All status changes go through [`LifecycleEngine::transition`], which
//! checks the transition table, then commits with a conditional write
//! against the stored `(status, version)`. Counter effects and audit events
//! are applied only after a commit, so a lost race never double-counts.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::SessionsConfig;
use crate::counters::CounterSynchronizer;
use crate::error::{Result, TandemError};
use crate::history::{EventAction, HistoryLogger, SessionEvent};
use crate::model::{validate_reason, Session, SessionStatus};
use crate::storage::{StorageBackend, WriteCondition};

/// What initiated a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The background sweep.
    Sweep,
    /// Both participants having marked presence.
    Attendance,
    /// An explicit mentor action.
    Mentor,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sweep => write!(f, "sweep"),
            Self::Attendance => write!(f, "attendance"),
            Self::Mentor => write!(f, "mentor"),
        }
    }
}

/// Check `from -> to` against the transition table for `trigger`.
pub fn check_transition(from: SessionStatus, to: SessionStatus, trigger: Trigger) -> Result<()> {
    use SessionStatus::*;

    let allowed = match (from, to) {
        (Scheduled, Ongoing) => trigger == Trigger::Sweep,
        (Scheduled | Ongoing, Completed) => {
            matches!(trigger, Trigger::Attendance | Trigger::Sweep)
        }
        (Scheduled | Ongoing, Expired) => matches!(trigger, Trigger::Sweep | Trigger::Mentor),
        (Scheduled, Cancelled) | (Scheduled, Rescheduled) => trigger == Trigger::Mentor,
        _ => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(TandemError::IllegalTransition { from, to })
    }
}

pub struct LifecycleEngine<S: StorageBackend> {
    storage: Arc<S>,
    counters: CounterSynchronizer<S>,
    clock: Arc<dyn Clock>,
    history: Arc<HistoryLogger>,
    window: Duration,
    max_write_retries: usize,
}

impl<S: StorageBackend> LifecycleEngine<S> {
    pub fn new(
        storage: Arc<S>,
        clock: Arc<dyn Clock>,
        history: Arc<HistoryLogger>,
        config: &SessionsConfig,
    ) -> Self {
        Self {
            counters: CounterSynchronizer::new(storage.clone()),
            storage,
            clock,
            history,
            window: config.attendance_window(),
            max_write_retries: config.max_write_retries.max(1),
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn history(&self) -> &HistoryLogger {
        &self.history
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Minutes after `scheduled_at` during which presence may still be marked.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Conditional-write attempts before a conflict is reported as stale.
    pub fn max_write_retries(&self) -> usize {
        self.max_write_retries
    }

    /// Persist a freshly built session and book it on both participants.
    pub async fn create(&self, session: Session, actor: &str) -> Result<Session> {
        self.storage.insert_session(&session).await?;
        self.counters.on_created(&session).await;
        self.history.log(
            &SessionEvent::new(session.id, EventAction::Created, actor, session.created_at)
                .with_detail(session.scheduled_at.to_rfc3339()),
        );
        tracing::info!(
            session_id = %session.id,
            mentor_id = %session.mentor_id,
            learner_id = %session.learner_id,
            scheduled_at = %session.scheduled_at,
            "session created"
        );
        Ok(session)
    }

    /// Move a session from `from` to `to`.
    ///
    /// Fails with `StaleTransition` when the stored status is no longer
    /// `from`. A conflict on version alone (a concurrent non-status write)
    /// re-reads and retries, re-checking guards each time.
    pub async fn transition(
        &self,
        id: Uuid,
        from: SessionStatus,
        to: SessionStatus,
        trigger: Trigger,
        reason: Option<&str>,
        actor: &str,
    ) -> Result<Session> {
        check_transition(from, to, trigger)?;
        if to == SessionStatus::Rescheduled {
            return Err(TandemError::InvalidInput(
                "rescheduling requires a new time".into(),
            ));
        }

        let reason = match (to, trigger) {
            (SessionStatus::Cancelled, _) | (SessionStatus::Expired, Trigger::Mentor) => {
                Some(validate_reason(reason)?)
            }
            _ => reason.map(str::to_string),
        };

        for _ in 0..self.max_write_retries {
            let current = self.storage.get_session(id).await?;
            if current.status != from {
                return Err(TandemError::StaleTransition {
                    expected: from,
                    actual: current.status,
                });
            }

            let now = self.clock.now();
            self.check_guards(&current, to, trigger, now)?;

            let mut next = current.clone();
            next.status = to;
            next.updated_at = now;
            next.version = current.version + 1;
            match to {
                SessionStatus::Cancelled => next.mentor_reason = reason.clone(),
                SessionStatus::Expired => next.expire_reason = reason.clone(),
                _ => {}
            }

            if self
                .storage
                .update_session_if(&next, WriteCondition::of(&current))
                .await?
            {
                self.after_transition(&next, from, trigger, actor).await;
                return Ok(next);
            }
            tracing::debug!(session_id = %id, %from, %to, "conditional write lost, re-reading");
        }

        let actual = self.storage.get_session(id).await?.status;
        Err(TandemError::StaleTransition {
            expected: from,
            actual,
        })
    }

    fn check_guards(
        &self,
        session: &Session,
        to: SessionStatus,
        trigger: Trigger,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match to {
            SessionStatus::Ongoing if now < session.scheduled_at => Err(TandemError::invalid_state(
                session.status,
                "session has not reached its start time",
            )),
            SessionStatus::Completed if !session.both_present() => Err(TandemError::invalid_state(
                session.status,
                "both participants must be present to complete",
            )),
            SessionStatus::Expired if session.both_present() => Err(TandemError::invalid_state(
                session.status,
                "both participants are present; the session completes instead",
            )),
            SessionStatus::Expired
                if trigger == Trigger::Sweep && now <= session.attendance_deadline(self.window) =>
            {
                Err(TandemError::invalid_state(
                    session.status,
                    "attendance window is still open",
                ))
            }
            _ => Ok(()),
        }
    }

    async fn after_transition(
        &self,
        session: &Session,
        from: SessionStatus,
        trigger: Trigger,
        actor: &str,
    ) {
        let action = match session.status {
            SessionStatus::Ongoing => EventAction::Started,
            SessionStatus::Completed => {
                self.counters.on_completed(session).await;
                EventAction::Completed
            }
            SessionStatus::Cancelled => {
                self.counters.on_closed(session).await;
                EventAction::Cancelled
            }
            SessionStatus::Expired => {
                self.counters.on_closed(session).await;
                EventAction::Expired
            }
            SessionStatus::Scheduled | SessionStatus::Rescheduled => return,
        };

        let mut event = SessionEvent::new(session.id, action, actor, session.updated_at)
            .with_statuses(from, session.status);
        let reason = match session.status {
            SessionStatus::Cancelled => session.mentor_reason.as_deref(),
            SessionStatus::Expired => session.expire_reason.as_deref(),
            _ => None,
        };
        if let Some(r) = reason {
            event = event.with_detail(r);
        }
        self.history.log(&event);

        tracing::info!(
            session_id = %session.id,
            %from,
            to = %session.status,
            %trigger,
            "session transitioned"
        );
    }

    /// Move a `scheduled` session to a new time. `rescheduled` is recorded
    /// in the audit log only; the stored status stays `scheduled` and both
    /// presence flags are cleared.
    pub async fn reschedule(
        &self,
        id: Uuid,
        new_time: DateTime<Utc>,
        actor: &str,
    ) -> Result<Session> {
        let now = self.clock.now();
        if new_time <= now {
            return Err(TandemError::InvalidSchedule(format!(
                "requested time {new_time} is not in the future"
            )));
        }

        for _ in 0..self.max_write_retries {
            let current = self.storage.get_session(id).await?;
            if current.status != SessionStatus::Scheduled {
                return Err(TandemError::invalid_state(
                    current.status,
                    "only scheduled sessions can be rescheduled",
                ));
            }
            check_transition(current.status, SessionStatus::Rescheduled, Trigger::Mentor)?;

            let mut next = current.clone();
            next.scheduled_at = new_time;
            next.reset_attendance();
            next.updated_at = self.clock.now();
            next.version = current.version + 1;

            if self
                .storage
                .update_session_if(&next, WriteCondition::of(&current))
                .await?
            {
                self.history.log(
                    &SessionEvent::new(id, EventAction::Rescheduled, actor, next.updated_at)
                        .with_statuses(SessionStatus::Scheduled, SessionStatus::Rescheduled)
                        .with_detail(format!(
                            "{} -> {}",
                            current.scheduled_at.to_rfc3339(),
                            new_time.to_rfc3339()
                        )),
                );
                tracing::info!(session_id = %id, scheduled_at = %new_time, "session rescheduled");
                return Ok(next);
            }
            tracing::debug!(session_id = %id, "reschedule lost a conditional write, re-reading");
        }

        let actual = self.storage.get_session(id).await?.status;
        Err(TandemError::StaleTransition {
            expected: SessionStatus::Scheduled,
            actual,
        })
    }

    /// Apply a change that keeps the status, re-reading on conflicts.
    ///
    /// `apply` mutates a copy of the stored session and returns `false` to
    /// signal a no-op, in which case the stored session is returned as is.
    /// It runs again against fresh state after every lost write.
    pub async fn modify<F>(&self, id: Uuid, mut apply: F) -> Result<(Session, bool)>
    where
        F: FnMut(&mut Session, DateTime<Utc>) -> Result<bool> + Send,
    {
        let mut last_status = None;
        for _ in 0..self.max_write_retries {
            let current = self.storage.get_session(id).await?;
            let now = self.clock.now();
            let mut next = current.clone();
            if !apply(&mut next, now)? {
                return Ok((current, false));
            }
            if next.status != current.status {
                return Err(TandemError::InvalidInput(
                    "status changes must go through a transition".into(),
                ));
            }
            next.updated_at = now;
            next.version = current.version + 1;

            if self
                .storage
                .update_session_if(&next, WriteCondition::of(&current))
                .await?
            {
                return Ok((next, true));
            }
            last_status = Some(current.status);
            tracing::debug!(session_id = %id, "conditional write lost, re-reading");
        }

        let actual = self.storage.get_session(id).await?.status;
        Err(TandemError::StaleTransition {
            expected: last_status.unwrap_or(actual),
            actual,
        })
    }

    /// Hard-delete a cancelled session and release its booking.
    pub async fn delete_cancelled(&self, id: Uuid, actor: &str) -> Result<Session> {
        let session = self.storage.get_session(id).await?;
        if session.status != SessionStatus::Cancelled {
            return Err(TandemError::invalid_state(
                session.status,
                "only cancelled sessions can be deleted",
            ));
        }
        if !self
            .storage
            .delete_session_if(id, SessionStatus::Cancelled)
            .await?
        {
            let actual = self.storage.get_session(id).await?.status;
            return Err(TandemError::StaleTransition {
                expected: SessionStatus::Cancelled,
                actual,
            });
        }

        self.counters.on_deleted(&session).await;
        self.history.log(&SessionEvent::new(
            id,
            EventAction::Deleted,
            actor,
            self.clock.now(),
        ));
        tracing::info!(session_id = %id, "cancelled session deleted");
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::{Engagement, Role, SessionDetails};
    use crate::storage::MemoryStorage;
    use chrono::TimeZone;

    struct Fixture {
        engine: LifecycleEngine<MemoryStorage>,
        storage: Arc<MemoryStorage>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()));
        let engine = LifecycleEngine::new(
            storage.clone(),
            clock.clone(),
            Arc::new(HistoryLogger::disabled()),
            &SessionsConfig::default(),
        );
        Fixture {
            engine,
            storage,
            clock,
        }
    }

    async fn created(f: &Fixture) -> Session {
        let now = f.clock.now();
        let session = Session::new(
            &Engagement::new("p1", "m1", "l1"),
            now + Duration::hours(1),
            SessionDetails::default(),
            now,
        );
        f.engine.create(session, "mentor:m1").await.unwrap()
    }

    #[test]
    fn table_allows_documented_edges() {
        use SessionStatus::*;
        assert!(check_transition(Scheduled, Ongoing, Trigger::Sweep).is_ok());
        assert!(check_transition(Ongoing, Completed, Trigger::Attendance).is_ok());
        assert!(check_transition(Scheduled, Completed, Trigger::Sweep).is_ok());
        assert!(check_transition(Ongoing, Expired, Trigger::Sweep).is_ok());
        assert!(check_transition(Scheduled, Expired, Trigger::Mentor).is_ok());
        assert!(check_transition(Scheduled, Cancelled, Trigger::Mentor).is_ok());
        assert!(check_transition(Scheduled, Rescheduled, Trigger::Mentor).is_ok());
    }

    #[test]
    fn table_rejects_everything_else() {
        use SessionStatus::*;
        assert!(check_transition(Scheduled, Ongoing, Trigger::Mentor).is_err());
        assert!(check_transition(Ongoing, Cancelled, Trigger::Mentor).is_err());
        assert!(check_transition(Ongoing, Scheduled, Trigger::Sweep).is_err());
        for terminal in [Completed, Cancelled, Expired] {
            for to in [Scheduled, Ongoing, Completed, Cancelled, Rescheduled, Expired] {
                for trigger in [Trigger::Sweep, Trigger::Attendance, Trigger::Mentor] {
                    let err = check_transition(terminal, to, trigger).unwrap_err();
                    assert!(matches!(err, TandemError::IllegalTransition { .. }));
                }
            }
        }
    }

    #[tokio::test]
    async fn create_books_both_participants() {
        let f = fixture();
        let session = created(&f).await;
        assert_eq!(session.status, SessionStatus::Scheduled);
        let c = f.storage.get_counters("l1", Role::Learner).await.unwrap();
        assert_eq!((c.sessions_scheduled, c.sessions_booked), (1, 1));
    }

    #[tokio::test]
    async fn start_requires_start_time() {
        let f = fixture();
        let session = created(&f).await;
        let err = f
            .engine
            .transition(
                session.id,
                SessionStatus::Scheduled,
                SessionStatus::Ongoing,
                Trigger::Sweep,
                None,
                "s",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TandemError::InvalidState(_)));

        f.clock.advance(Duration::hours(1));
        let started = f
            .engine
            .transition(
                session.id,
                SessionStatus::Scheduled,
                SessionStatus::Ongoing,
                Trigger::Sweep,
                None,
                "s",
            )
            .await
            .unwrap();
        assert_eq!(started.status, SessionStatus::Ongoing);
        assert_eq!(started.version, 1);
    }

    #[tokio::test]
    async fn stale_expected_status_is_reported() {
        let f = fixture();
        let session = created(&f).await;
        f.engine
            .transition(
                session.id,
                SessionStatus::Scheduled,
                SessionStatus::Cancelled,
                Trigger::Mentor,
                Some("illness"),
                "m",
            )
            .await
            .unwrap();

        let err = f
            .engine
            .transition(
                session.id,
                SessionStatus::Scheduled,
                SessionStatus::Expired,
                Trigger::Mentor,
                Some("late"),
                "m",
            )
            .await
            .unwrap_err();
        match err {
            TandemError::StaleTransition { expected, actual } => {
                assert_eq!(expected, SessionStatus::Scheduled);
                assert_eq!(actual, SessionStatus::Cancelled);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn cancel_requires_reason_and_decrements_once() {
        let f = fixture();
        let session = created(&f).await;
        let err = f
            .engine
            .transition(
                session.id,
                SessionStatus::Scheduled,
                SessionStatus::Cancelled,
                Trigger::Mentor,
                Some("  "),
                "m",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TandemError::InvalidInput(_)));

        let cancelled = f
            .engine
            .transition(
                session.id,
                SessionStatus::Scheduled,
                SessionStatus::Cancelled,
                Trigger::Mentor,
                Some("illness"),
                "m",
            )
            .await
            .unwrap();
        assert_eq!(cancelled.mentor_reason.as_deref(), Some("illness"));
        let c = f.storage.get_counters("m1", Role::Mentor).await.unwrap();
        assert_eq!(c.sessions_scheduled, 0);
        assert_eq!(c.sessions_booked, 1);
    }

    #[tokio::test]
    async fn complete_requires_both_present() {
        let f = fixture();
        let session = created(&f).await;
        let err = f
            .engine
            .transition(
                session.id,
                SessionStatus::Scheduled,
                SessionStatus::Completed,
                Trigger::Attendance,
                None,
                "l",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TandemError::InvalidState(_)));
    }

    #[tokio::test]
    async fn reschedule_clears_attendance_and_keeps_scheduled() {
        let f = fixture();
        let session = created(&f).await;
        f.engine
            .modify(session.id, |s, now| {
                s.mentor_attendance.mark(now);
                Ok(true)
            })
            .await
            .unwrap();

        let new_time = f.clock.now() + Duration::days(1);
        let moved = f.engine.reschedule(session.id, new_time, "mentor:m1").await.unwrap();
        assert_eq!(moved.status, SessionStatus::Scheduled);
        assert_eq!(moved.scheduled_at, new_time);
        assert!(!moved.mentor_attendance.present);
        assert!(moved.mentor_attendance.attended_at.is_none());
    }

    #[tokio::test]
    async fn reschedule_into_the_past_is_rejected() {
        let f = fixture();
        let session = created(&f).await;
        let err = f
            .engine
            .reschedule(session.id, f.clock.now() - Duration::minutes(1), "m")
            .await
            .unwrap_err();
        assert!(matches!(err, TandemError::InvalidSchedule(_)));
    }

    #[tokio::test]
    async fn modify_cannot_change_status() {
        let f = fixture();
        let session = created(&f).await;
        let err = f
            .engine
            .modify(session.id, |s, _| {
                s.status = SessionStatus::Completed;
                Ok(true)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TandemError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn delete_only_cancelled() {
        let f = fixture();
        let session = created(&f).await;
        let err = f.engine.delete_cancelled(session.id, "m").await.unwrap_err();
        assert!(matches!(err, TandemError::InvalidState(_)));

        f.engine
            .transition(
                session.id,
                SessionStatus::Scheduled,
                SessionStatus::Cancelled,
                Trigger::Mentor,
                Some("x"),
                "m",
            )
            .await
            .unwrap();
        f.engine.delete_cancelled(session.id, "m").await.unwrap();

        assert!(matches!(
            f.storage.get_session(session.id).await,
            Err(TandemError::NotFound(_))
        ));
        let c = f.storage.get_counters("l1", Role::Learner).await.unwrap();
        assert_eq!((c.sessions_scheduled, c.sessions_booked), (0, 0));
    }
}
