use crate::error::Result;
use crate::model::*;
use uuid::Uuid;

/// The state a conditional write expects to find in the store.
///
/// A write commits only if the stored record still has exactly this
/// status and version; otherwise it is rejected without side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteCondition {
    pub status: SessionStatus,
    pub version: u64,
}

impl WriteCondition {
    /// Condition matching the record as it was read.
    pub fn of(session: &Session) -> Self {
        Self {
            status: session.status,
            version: session.version,
        }
    }
}

/// Abstract storage backend. SQLite is the durable implementation; the
/// in-memory backend serves tests and ephemeral deployments.
pub trait StorageBackend: Send + Sync {
    // -- Sessions --

    fn insert_session(
        &self,
        session: &Session,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    fn get_session(&self, id: Uuid) -> impl std::future::Future<Output = Result<Session>> + Send;

    /// Filtered scan, ordered by `scheduled_at` ascending.
    fn list_sessions(
        &self,
        query: &SessionQuery,
    ) -> impl std::future::Future<Output = Result<Vec<Session>>> + Send;

    /// Compare-and-set. Replaces the stored record with `session` only if
    /// the stored status and version match `expected`. Returns `false`
    /// when the condition did not hold. `session.version` must already be
    /// `expected.version + 1`.
    fn update_session_if(
        &self,
        session: &Session,
        expected: WriteCondition,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Delete only if the stored status still equals `expected`.
    fn delete_session_if(
        &self,
        id: Uuid,
        expected: SessionStatus,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    // -- Engagements --

    fn upsert_engagement(
        &self,
        engagement: &Engagement,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    fn engagements_for_mentor(
        &self,
        mentor_id: &str,
        status: Option<EngagementStatus>,
    ) -> impl std::future::Future<Output = Result<Vec<Engagement>>> + Send;

    // -- Participant counters --

    fn adjust_counter(
        &self,
        participant_id: &str,
        role: Role,
        kind: CounterKind,
        delta: i64,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Returns zeroed counters for participants never adjusted.
    fn get_counters(
        &self,
        participant_id: &str,
        role: Role,
    ) -> impl std::future::Future<Output = Result<ParticipantCounters>> + Send;
}
