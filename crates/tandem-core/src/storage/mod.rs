mod backend;
mod memory;
mod sqlite;

pub use backend::{StorageBackend, WriteCondition};
pub use memory::MemoryStorage;
pub use sqlite::{SqliteStorage, SCHEMA_VERSION};

use crate::config::TandemConfig;
use crate::error::{Result, TandemError};
use crate::model::*;
use uuid::Uuid;

/// Enum wrapper for storage backends. Dispatches to the concrete implementation.
/// Using an enum instead of `Box<dyn StorageBackend>` because the trait uses RPITIT.
pub enum Storage {
    Sqlite(SqliteStorage),
    Memory(MemoryStorage),
}

impl StorageBackend for Storage {
    async fn insert_session(&self, session: &Session) -> Result<()> {
        match self {
            Storage::Sqlite(s) => s.insert_session(session).await,
            Storage::Memory(s) => s.insert_session(session).await,
        }
    }

    async fn get_session(&self, id: Uuid) -> Result<Session> {
        match self {
            Storage::Sqlite(s) => s.get_session(id).await,
            Storage::Memory(s) => s.get_session(id).await,
        }
    }

    async fn list_sessions(&self, query: &SessionQuery) -> Result<Vec<Session>> {
        match self {
            Storage::Sqlite(s) => s.list_sessions(query).await,
            Storage::Memory(s) => s.list_sessions(query).await,
        }
    }

    async fn update_session_if(&self, session: &Session, expected: WriteCondition) -> Result<bool> {
        match self {
            Storage::Sqlite(s) => s.update_session_if(session, expected).await,
            Storage::Memory(s) => s.update_session_if(session, expected).await,
        }
    }

    async fn delete_session_if(&self, id: Uuid, expected: SessionStatus) -> Result<bool> {
        match self {
            Storage::Sqlite(s) => s.delete_session_if(id, expected).await,
            Storage::Memory(s) => s.delete_session_if(id, expected).await,
        }
    }

    async fn upsert_engagement(&self, engagement: &Engagement) -> Result<()> {
        match self {
            Storage::Sqlite(s) => s.upsert_engagement(engagement).await,
            Storage::Memory(s) => s.upsert_engagement(engagement).await,
        }
    }

    async fn engagements_for_mentor(
        &self,
        mentor_id: &str,
        status: Option<EngagementStatus>,
    ) -> Result<Vec<Engagement>> {
        match self {
            Storage::Sqlite(s) => s.engagements_for_mentor(mentor_id, status).await,
            Storage::Memory(s) => s.engagements_for_mentor(mentor_id, status).await,
        }
    }

    async fn adjust_counter(
        &self,
        participant_id: &str,
        role: Role,
        kind: CounterKind,
        delta: i64,
    ) -> Result<()> {
        match self {
            Storage::Sqlite(s) => s.adjust_counter(participant_id, role, kind, delta).await,
            Storage::Memory(s) => s.adjust_counter(participant_id, role, kind, delta).await,
        }
    }

    async fn get_counters(&self, participant_id: &str, role: Role) -> Result<ParticipantCounters> {
        match self {
            Storage::Sqlite(s) => s.get_counters(participant_id, role).await,
            Storage::Memory(s) => s.get_counters(participant_id, role).await,
        }
    }
}

impl Storage {
    /// Short backend name for status output.
    pub fn backend_name(&self) -> &'static str {
        match self {
            Storage::Sqlite(_) => "sqlite",
            Storage::Memory(_) => "memory",
        }
    }

    /// Return the schema version for SQLite, `None` for the memory backend.
    pub fn schema_info(&self) -> Option<i32> {
        match self {
            Storage::Sqlite(s) => s.schema_version().ok(),
            Storage::Memory(_) => None,
        }
    }
}

/// Create a storage backend from the given configuration.
pub fn create_backend(config: &TandemConfig) -> Result<Storage> {
    match config.storage.backend.as_str() {
        "sqlite" => {
            let path = match &config.storage.path {
                Some(p) => std::path::PathBuf::from(p),
                None => default_sqlite_path()?,
            };
            let storage = SqliteStorage::open(&path)?;
            tracing::debug!(path = %path.display(), "opened sqlite session store");
            Ok(Storage::Sqlite(storage))
        }
        "memory" => Ok(Storage::Memory(MemoryStorage::new())),
        other => Err(TandemError::Config(format!(
            "unknown storage backend: {other}"
        ))),
    }
}

/// Default SQLite path: `~/.config/tandem/tandem.db`
fn default_sqlite_path() -> Result<std::path::PathBuf> {
    dirs::config_dir()
        .map(|p| p.join("tandem").join("tandem.db"))
        .ok_or_else(|| TandemError::Config("cannot determine config directory".to_string()))
}
