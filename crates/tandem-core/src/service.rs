//! Caller-facing operations.
//!
//! [`SessionService`] wires the scheduling validator, attendance tracker,
//! lifecycle engine and sweeper together, and checks that the acting
//! participant may perform each operation. HTTP handlers and the CLI both
//! go through it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::attendance::AttendanceTracker;
use crate::clock::Clock;
use crate::config::SessionsConfig;
use crate::error::{Result, TandemError};
use crate::history::{EventAction, HistoryLogger, SessionEvent};
use crate::lifecycle::{LifecycleEngine, Trigger};
use crate::model::*;
use crate::scheduling::SchedulingValidator;
use crate::storage::StorageBackend;
use crate::sweeper::{reconcile, SweepReport, Sweeper};

pub struct SessionService<S: StorageBackend> {
    engine: Arc<LifecycleEngine<S>>,
    scheduler: SchedulingValidator<S>,
    attendance: AttendanceTracker<S>,
    sweeper: Arc<Sweeper<S>>,
}

impl<S: StorageBackend + 'static> SessionService<S> {
    pub fn new(
        storage: Arc<S>,
        clock: Arc<dyn Clock>,
        history: Arc<HistoryLogger>,
        config: &SessionsConfig,
    ) -> Self {
        let engine = Arc::new(LifecycleEngine::new(storage, clock, history, config));
        Self {
            scheduler: SchedulingValidator::new(engine.clone(), config.default_duration_minutes),
            attendance: AttendanceTracker::new(engine.clone()),
            sweeper: Arc::new(Sweeper::new(engine.clone())),
            engine,
        }
    }

    pub fn engine(&self) -> &Arc<LifecycleEngine<S>> {
        &self.engine
    }

    pub fn sweeper(&self) -> &Arc<Sweeper<S>> {
        &self.sweeper
    }

    // -- Reads --

    /// Sessions the actor takes part in, reconciled with the clock,
    /// ordered by `scheduled_at`.
    pub async fn list_for(
        &self,
        actor: &Actor,
        status: Option<SessionStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<Session>> {
        let stored = self
            .engine
            .storage()
            .list_sessions(&SessionQuery::for_participant(actor))
            .await?;

        let mut sessions = Vec::with_capacity(stored.len());
        for session in stored {
            let session = reconcile(&self.engine, session).await;
            if status.map_or(true, |s| session.status == s) {
                sessions.push(session);
            }
        }
        if let Some(limit) = limit {
            sessions.truncate(limit);
        }
        Ok(sessions)
    }

    pub async fn get(&self, actor: &Actor, id: Uuid) -> Result<Session> {
        self.load(actor, id, Access::Participant).await
    }

    pub async fn history(&self, actor: &Actor, id: Uuid) -> Result<Vec<SessionEvent>> {
        let session = self.engine.storage().get_session(id).await?;
        authorize(&session, actor, Access::Participant)?;
        Ok(self.engine.history().history_for(id))
    }

    pub async fn counters(&self, participant_id: &str, role: Role) -> Result<ParticipantCounters> {
        self.engine.storage().get_counters(participant_id, role).await
    }

    // -- Mutations --

    pub async fn create(
        &self,
        actor: &Actor,
        scheduled_at: DateTime<Utc>,
        details: SessionDetails,
    ) -> Result<Session> {
        if actor.role != Role::Mentor {
            return Err(TandemError::AccessDenied(
                "only mentors can schedule sessions".into(),
            ));
        }
        self.scheduler.schedule(&actor.id, scheduled_at, details).await
    }

    /// Mark the actor present in the role they act for.
    pub async fn mark_attendance(&self, actor: &Actor, id: Uuid) -> Result<Session> {
        self.load(actor, id, Access::Participant).await?;
        self.attendance
            .mark_present(id, actor.role, &actor.to_string())
            .await
    }

    pub async fn reschedule(
        &self,
        actor: &Actor,
        id: Uuid,
        new_time: DateTime<Utc>,
    ) -> Result<Session> {
        self.load(actor, id, Access::Mentor).await?;
        self.engine
            .reschedule(id, new_time, &actor.to_string())
            .await
    }

    pub async fn cancel(&self, actor: &Actor, id: Uuid, reason: Option<&str>) -> Result<Session> {
        let session = self.load(actor, id, Access::Mentor).await?;
        if session.status != SessionStatus::Scheduled {
            return Err(TandemError::invalid_state(
                session.status,
                "only scheduled sessions can be cancelled",
            ));
        }
        self.engine
            .transition(
                id,
                SessionStatus::Scheduled,
                SessionStatus::Cancelled,
                Trigger::Mentor,
                reason,
                &actor.to_string(),
            )
            .await
    }

    /// Administrative status update. Only `cancelled` and `expired` may be
    /// requested; both go through the transition table.
    pub async fn set_status(
        &self,
        actor: &Actor,
        id: Uuid,
        status: SessionStatus,
        reason: Option<&str>,
    ) -> Result<Session> {
        if !matches!(status, SessionStatus::Cancelled | SessionStatus::Expired) {
            return Err(TandemError::InvalidInput(format!(
                "status can only be set to cancelled or expired, not {status}"
            )));
        }
        let session = self.load(actor, id, Access::Mentor).await?;
        self.engine
            .transition(
                id,
                session.status,
                status,
                Trigger::Mentor,
                reason,
                &actor.to_string(),
            )
            .await
    }

    pub async fn set_recording(&self, actor: &Actor, id: Uuid, link: &str) -> Result<Session> {
        validate_link("recording link", link)?;
        self.load(actor, id, Access::Mentor).await?;
        let link = link.trim().to_string();

        let (session, _) = self
            .engine
            .modify(id, |s, _| {
                if s.status != SessionStatus::Completed {
                    return Err(TandemError::invalid_state(
                        s.status,
                        "recordings can only be added to completed sessions",
                    ));
                }
                if s.recording_link.as_deref() == Some(link.as_str()) {
                    return Ok(false);
                }
                s.recording_link = Some(link.clone());
                Ok(true)
            })
            .await?;

        self.engine.history().log(&SessionEvent::new(
            id,
            EventAction::RecordingAdded,
            actor.to_string(),
            session.updated_at,
        ));
        Ok(session)
    }

    /// Record why the actor missed an expired session.
    pub async fn add_absence_reason(
        &self,
        actor: &Actor,
        id: Uuid,
        reason: Option<&str>,
    ) -> Result<Session> {
        let reason = validate_reason(reason)?;
        self.load(actor, id, Access::Participant).await?;
        let role = actor.role;

        let (session, _) = self
            .engine
            .modify(id, |s, _| {
                if s.status != SessionStatus::Expired {
                    return Err(TandemError::invalid_state(
                        s.status,
                        "absence reasons can only be given for expired sessions",
                    ));
                }
                *s.reason_mut(role) = Some(reason.clone());
                Ok(true)
            })
            .await?;

        self.engine.history().log(
            &SessionEvent::new(
                id,
                EventAction::AbsenceReason,
                actor.to_string(),
                session.updated_at,
            )
            .with_detail(reason),
        );
        Ok(session)
    }

    pub async fn delete(&self, actor: &Actor, id: Uuid) -> Result<Session> {
        let session = self.engine.storage().get_session(id).await?;
        authorize(&session, actor, Access::Mentor)?;
        self.engine.delete_cancelled(id, &actor.to_string()).await
    }

    /// Mirror an engagement from the project collaborator.
    pub async fn upsert_engagement(&self, mut engagement: Engagement) -> Result<Engagement> {
        for (field, value) in [
            ("project_id", &engagement.project_id),
            ("mentor_id", &engagement.mentor_id),
            ("learner_id", &engagement.learner_id),
        ] {
            if value.trim().is_empty() {
                return Err(TandemError::InvalidInput(format!("{field} cannot be empty")));
            }
        }
        engagement.updated_at = self.engine.now();
        self.engine.storage().upsert_engagement(&engagement).await?;
        tracing::debug!(
            project_id = %engagement.project_id,
            status = %engagement.status,
            "engagement mirrored"
        );
        Ok(engagement)
    }

    /// Run one sweep pass now.
    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweeper.run_once().await
    }

    async fn load(&self, actor: &Actor, id: Uuid, access: Access) -> Result<Session> {
        let session = self.engine.storage().get_session(id).await?;
        authorize(&session, actor, access)?;
        Ok(reconcile(&self.engine, session).await)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    /// Either participant, in the role they hold on the session.
    Participant,
    /// The session's mentor only.
    Mentor,
}

fn authorize(session: &Session, actor: &Actor, access: Access) -> Result<()> {
    if session.participant_id(actor.role) != actor.id {
        return Err(TandemError::AccessDenied(format!(
            "{actor} is not a participant of session {}",
            session.id
        )));
    }
    if access == Access::Mentor && actor.role != Role::Mentor {
        return Err(TandemError::AccessDenied(format!(
            "only the mentor of session {} may do this",
            session.id
        )));
    }
    Ok(())
}
