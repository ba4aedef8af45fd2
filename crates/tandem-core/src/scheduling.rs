use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{Result, TandemError};
use crate::lifecycle::LifecycleEngine;
use crate::model::{validate_details, Engagement, EngagementStatus, Session, SessionDetails};
use crate::storage::StorageBackend;

/// Validates scheduling requests and hands accepted ones to the engine.
pub struct SchedulingValidator<S: StorageBackend> {
    engine: Arc<LifecycleEngine<S>>,
    default_duration_minutes: u32,
}

impl<S: StorageBackend> SchedulingValidator<S> {
    pub fn new(engine: Arc<LifecycleEngine<S>>, default_duration_minutes: u32) -> Self {
        Self {
            engine,
            default_duration_minutes,
        }
    }

    /// The mentor's single in-progress engagement.
    pub async fn active_engagement(&self, mentor_id: &str) -> Result<Engagement> {
        let mut active = self
            .engine
            .storage()
            .engagements_for_mentor(mentor_id, Some(EngagementStatus::InProgress))
            .await?;
        match active.len() {
            0 => Err(TandemError::NoActiveEngagement(format!(
                "mentor {mentor_id} has no in-progress engagement"
            ))),
            1 => Ok(active.remove(0)),
            n => Err(TandemError::InvalidState(format!(
                "mentor {mentor_id} has {n} in-progress engagements; cannot pick one"
            ))),
        }
    }

    pub async fn schedule(
        &self,
        mentor_id: &str,
        requested_time: DateTime<Utc>,
        mut details: SessionDetails,
    ) -> Result<Session> {
        let now = self.engine.now();
        if requested_time <= now {
            return Err(TandemError::InvalidSchedule(format!(
                "requested time {requested_time} is not in the future"
            )));
        }
        validate_details(&details)?;
        details
            .duration_minutes
            .get_or_insert(self.default_duration_minutes);

        let engagement = self.active_engagement(mentor_id).await?;
        let session = Session::new(&engagement, requested_time, details, now);
        self.engine
            .create(session, &format!("mentor:{mentor_id}"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::SessionsConfig;
    use crate::history::HistoryLogger;
    use crate::model::SessionStatus;
    use crate::storage::MemoryStorage;
    use chrono::{Duration, TimeZone};

    async fn validator(
        engagements: &[Engagement],
    ) -> (SchedulingValidator<MemoryStorage>, DateTime<Utc>) {
        let storage = Arc::new(MemoryStorage::new());
        for e in engagements {
            storage.upsert_engagement(e).await.unwrap();
        }
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let engine = LifecycleEngine::new(
            storage,
            Arc::new(ManualClock::new(now)),
            Arc::new(HistoryLogger::disabled()),
            &SessionsConfig::default(),
        );
        (SchedulingValidator::new(Arc::new(engine), 45), now)
    }

    #[tokio::test]
    async fn schedules_against_the_active_engagement() {
        let (v, now) = validator(&[Engagement::new("p1", "m1", "l1")]).await;
        let session = v
            .schedule("m1", now + Duration::hours(1), SessionDetails::default())
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Scheduled);
        assert_eq!(session.learner_id, "l1");
        assert_eq!(session.project_id, "p1");
        assert_eq!(session.duration_minutes, 45);
        assert!(!session.mentor_attendance.present);
        assert!(!session.learner_attendance.present);
    }

    #[tokio::test]
    async fn explicit_duration_wins_over_default() {
        let (v, now) = validator(&[Engagement::new("p1", "m1", "l1")]).await;
        let session = v
            .schedule("m1", now + Duration::hours(1), SessionDetails::default().with_duration(90))
            .await
            .unwrap();
        assert_eq!(session.duration_minutes, 90);
    }

    #[tokio::test]
    async fn rejects_past_and_present_times() {
        let (v, now) = validator(&[Engagement::new("p1", "m1", "l1")]).await;
        for t in [now, now - Duration::minutes(5)] {
            let err = v.schedule("m1", t, SessionDetails::default()).await.unwrap_err();
            assert!(matches!(err, TandemError::InvalidSchedule(_)));
        }
    }

    #[tokio::test]
    async fn requires_an_in_progress_engagement() {
        let open = Engagement::new("p1", "m1", "l1").with_status(EngagementStatus::Open);
        let (v, now) = validator(&[open]).await;
        let err = v
            .schedule("m1", now + Duration::hours(1), SessionDetails::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TandemError::NoActiveEngagement(_)));
    }

    #[tokio::test]
    async fn multiple_active_engagements_are_ambiguous() {
        let (v, now) = validator(&[
            Engagement::new("p1", "m1", "l1"),
            Engagement::new("p2", "m1", "l2"),
        ])
        .await;
        let err = v
            .schedule("m1", now + Duration::hours(1), SessionDetails::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_state");
    }

    #[tokio::test]
    async fn invalid_details_are_rejected() {
        let (v, now) = validator(&[Engagement::new("p1", "m1", "l1")]).await;
        let err = v
            .schedule("m1", now + Duration::hours(1), SessionDetails::default().with_duration(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TandemError::InvalidInput(_)));
    }
}
