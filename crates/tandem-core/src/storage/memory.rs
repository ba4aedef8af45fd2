use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

use super::backend::{StorageBackend, WriteCondition};
use crate::error::{Result, TandemError};
use crate::model::*;

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, Session>,
    engagements: HashMap<String, Engagement>,
    counters: HashMap<(String, Role), ParticipantCounters>,
}

/// Process-local document store keyed by session id.
///
/// Each operation holds the map lock only for the duration of a single
/// check-and-set, never across an await point.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| TandemError::Storage(format!("memory store poisoned: {e}")))
    }
}

impl StorageBackend for MemoryStorage {
    async fn insert_session(&self, session: &Session) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.sessions.contains_key(&session.id) {
            return Err(TandemError::Storage(format!(
                "session {} already exists",
                session.id
            )));
        }
        inner.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Session> {
        self.lock()?
            .sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| TandemError::NotFound(format!("session {id}")))
    }

    async fn list_sessions(&self, query: &SessionQuery) -> Result<Vec<Session>> {
        let inner = self.lock()?;
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| query.matches(s))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = query.limit {
            sessions.truncate(limit);
        }
        Ok(sessions)
    }

    async fn update_session_if(&self, session: &Session, expected: WriteCondition) -> Result<bool> {
        let mut inner = self.lock()?;
        let Some(stored) = inner.sessions.get_mut(&session.id) else {
            return Ok(false);
        };
        if stored.status != expected.status || stored.version != expected.version {
            return Ok(false);
        }
        *stored = session.clone();
        Ok(true)
    }

    async fn delete_session_if(&self, id: Uuid, expected: SessionStatus) -> Result<bool> {
        let mut inner = self.lock()?;
        let matched = inner
            .sessions
            .get(&id)
            .is_some_and(|s| s.status == expected);
        if matched {
            inner.sessions.remove(&id);
        }
        Ok(matched)
    }

    async fn upsert_engagement(&self, engagement: &Engagement) -> Result<()> {
        self.lock()?
            .engagements
            .insert(engagement.project_id.clone(), engagement.clone());
        Ok(())
    }

    async fn engagements_for_mentor(
        &self,
        mentor_id: &str,
        status: Option<EngagementStatus>,
    ) -> Result<Vec<Engagement>> {
        let inner = self.lock()?;
        let mut found: Vec<Engagement> = inner
            .engagements
            .values()
            .filter(|e| e.mentor_id == mentor_id)
            .filter(|e| status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.project_id.cmp(&b.project_id));
        Ok(found)
    }

    async fn adjust_counter(
        &self,
        participant_id: &str,
        role: Role,
        kind: CounterKind,
        delta: i64,
    ) -> Result<()> {
        let mut inner = self.lock()?;
        inner
            .counters
            .entry((participant_id.to_string(), role))
            .or_insert_with(|| ParticipantCounters::empty(participant_id, role))
            .apply(kind, delta);
        Ok(())
    }

    async fn get_counters(&self, participant_id: &str, role: Role) -> Result<ParticipantCounters> {
        Ok(self
            .lock()?
            .counters
            .get(&(participant_id.to_string(), role))
            .cloned()
            .unwrap_or_else(|| ParticipantCounters::empty(participant_id, role)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn sample_session() -> Session {
        let engagement = Engagement::new("proj-1", "mentor-1", "learner-1");
        let now = Utc::now();
        Session::new(
            &engagement,
            now + Duration::hours(1),
            SessionDetails::default(),
            now,
        )
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let storage = MemoryStorage::new();
        let session = sample_session();
        storage.insert_session(&session).await.unwrap();
        assert!(storage.insert_session(&session).await.is_err());
    }

    #[tokio::test]
    async fn conditional_update_checks_status_and_version() {
        let storage = MemoryStorage::new();
        let session = sample_session();
        storage.insert_session(&session).await.unwrap();

        let mut next = session.clone();
        next.version = 1;
        next.mentor_attendance.mark(Utc::now());

        let wrong_status = WriteCondition {
            status: SessionStatus::Ongoing,
            version: 0,
        };
        assert!(!storage.update_session_if(&next, wrong_status).await.unwrap());

        let wrong_version = WriteCondition {
            status: SessionStatus::Scheduled,
            version: 7,
        };
        assert!(!storage.update_session_if(&next, wrong_version).await.unwrap());

        assert!(storage
            .update_session_if(&next, WriteCondition::of(&session))
            .await
            .unwrap());
        let loaded = storage.get_session(session.id).await.unwrap();
        assert!(loaded.mentor_attendance.present);
        assert_eq!(loaded.version, 1);
    }

    #[tokio::test]
    async fn update_of_missing_session_reports_false() {
        let storage = MemoryStorage::new();
        let session = sample_session();
        assert!(!storage
            .update_session_if(&session, WriteCondition::of(&session))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn list_respects_limit_and_order() {
        let storage = MemoryStorage::new();
        let mut later = sample_session();
        later.scheduled_at += Duration::hours(3);
        let sooner = sample_session();
        storage.insert_session(&later).await.unwrap();
        storage.insert_session(&sooner).await.unwrap();

        let first = storage
            .list_sessions(&SessionQuery {
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, sooner.id);
    }

    #[tokio::test]
    async fn counters_default_to_zero() {
        let storage = MemoryStorage::new();
        storage
            .adjust_counter("l", Role::Learner, CounterKind::Booked, 1)
            .await
            .unwrap();
        let counters = storage.get_counters("l", Role::Learner).await.unwrap();
        assert_eq!(counters.sessions_booked, 1);
        assert_eq!(counters.sessions_scheduled, 0);
    }
}
