//! Denormalized session counters on participant aggregates.
//!
//! Every adjustment flows through [`CounterSynchronizer`]. The lifecycle
//! engine calls the event hooks exactly once per committed transition;
//! nothing else in the crate touches counters.

use std::sync::Arc;

use crate::error::Result;
use crate::model::{CounterKind, Role, Session};
use crate::storage::StorageBackend;

pub struct CounterSynchronizer<S: StorageBackend> {
    storage: Arc<S>,
}

impl<S: StorageBackend> CounterSynchronizer<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    pub async fn adjust_scheduled(
        &self,
        participant_id: &str,
        role: Role,
        delta: i64,
    ) -> Result<()> {
        self.write(participant_id, role, CounterKind::Scheduled, delta)
            .await
    }

    pub async fn adjust_completed(
        &self,
        participant_id: &str,
        role: Role,
        delta: i64,
    ) -> Result<()> {
        self.write(participant_id, role, CounterKind::Completed, delta)
            .await
    }

    pub async fn adjust_booked(&self, participant_id: &str, role: Role, delta: i64) -> Result<()> {
        self.write(participant_id, role, CounterKind::Booked, delta)
            .await
    }

    async fn write(
        &self,
        participant_id: &str,
        role: Role,
        kind: CounterKind,
        delta: i64,
    ) -> Result<()> {
        tracing::debug!(participant_id, %role, %kind, delta, "adjusting counter");
        self.storage
            .adjust_counter(participant_id, role, kind, delta)
            .await
    }

    // -- Event hooks, called by the engine after a committed write --

    pub(crate) async fn on_created(&self, session: &Session) {
        self.apply_both(session, &[(CounterKind::Scheduled, 1), (CounterKind::Booked, 1)])
            .await;
    }

    pub(crate) async fn on_completed(&self, session: &Session) {
        self.apply_both(
            session,
            &[(CounterKind::Scheduled, -1), (CounterKind::Completed, 1)],
        )
        .await;
    }

    /// Cancel or expire.
    pub(crate) async fn on_closed(&self, session: &Session) {
        self.apply_both(session, &[(CounterKind::Scheduled, -1)]).await;
    }

    pub(crate) async fn on_deleted(&self, session: &Session) {
        self.apply_both(session, &[(CounterKind::Booked, -1)]).await;
    }

    /// The session write has already committed, so a failed adjustment is
    /// logged for reconciliation instead of failing the transition.
    async fn apply_both(&self, session: &Session, effects: &[(CounterKind, i64)]) {
        for role in [Role::Mentor, Role::Learner] {
            let participant_id = session.participant_id(role);
            for &(kind, delta) in effects {
                let result = match kind {
                    CounterKind::Scheduled => {
                        self.adjust_scheduled(participant_id, role, delta).await
                    }
                    CounterKind::Completed => {
                        self.adjust_completed(participant_id, role, delta).await
                    }
                    CounterKind::Booked => self.adjust_booked(participant_id, role, delta).await,
                };
                if let Err(e) = result {
                    tracing::error!(
                        session_id = %session.id,
                        participant_id,
                        %role,
                        %kind,
                        delta,
                        "counter adjustment failed after commit: {e}"
                    );
                }
            }
        }
    }
}
