use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::backend::{StorageBackend, WriteCondition};
use crate::error::{Result, TandemError};
use crate::model::*;

/// Bumped whenever the table layout changes.
pub const SCHEMA_VERSION: i32 = 1;

const SESSION_COLUMNS: &str = "id, learner_id, mentor_id, project_id, scheduled_at, \
    duration_minutes, session_type, status, learner_present, learner_attended_at, \
    mentor_present, mentor_attended_at, learner_reason, mentor_reason, expire_reason, \
    meeting_link, recording_link, prerequisites, created_at, updated_at, version";

/// SQLite-backed session store.
///
/// Uses a single `Connection` behind `Arc<Mutex<>>` so it can be shared
/// across async tasks.  All blocking SQLite calls go through
/// [`with_conn`](Self::with_conn) which runs them on the Tokio blocking
/// thread-pool.  Conditional updates are single `UPDATE ... WHERE` statements,
/// so the connection is the only serialization point.
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteStorage {
    /// Open (or create) a file-backed SQLite database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    TandemError::Storage(format!("failed to create database directory: {e}"))
                })?;
            }
        }
        let conn = Connection::open(&path)
            .map_err(|e| TandemError::Storage(format!("failed to open SQLite database: {e}")))?;

        Self::configure_and_init(conn, path)
    }

    /// Open an in-memory SQLite database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            TandemError::Storage(format!("failed to open in-memory SQLite database: {e}"))
        })?;

        Self::configure_and_init(conn, PathBuf::from(":memory:"))
    }

    /// Return the path this database was opened with (`:memory:` for in-memory).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Schema version recorded in the database header.
    pub fn schema_version(&self) -> Result<i32> {
        let conn = self.lock()?;
        let version = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        Ok(version)
    }

    // ── helpers ────────────────────────────────────────────────────────

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| TandemError::Storage(format!("failed to acquire database lock: {e}")))
    }

    fn configure_and_init(conn: Connection, path: PathBuf) -> Result<Self> {
        // WAL so readers never block the single writer connection.
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(|e| TandemError::Storage(format!("failed to set WAL mode: {e}")))?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        };

        storage.create_tables()?;
        Ok(storage)
    }

    /// Create all tables and indexes (idempotent).
    fn create_tables(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                learner_id TEXT NOT NULL,
                mentor_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                scheduled_at TEXT NOT NULL,
                duration_minutes INTEGER NOT NULL DEFAULT 60,
                session_type TEXT NOT NULL DEFAULT 'one_on_one',
                status TEXT NOT NULL DEFAULT 'scheduled',
                learner_present INTEGER NOT NULL DEFAULT 0,
                learner_attended_at TEXT,
                mentor_present INTEGER NOT NULL DEFAULT 0,
                mentor_attended_at TEXT,
                learner_reason TEXT,
                mentor_reason TEXT,
                expire_reason TEXT,
                meeting_link TEXT,
                recording_link TEXT,
                prerequisites TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS engagements (
                project_id TEXT PRIMARY KEY,
                mentor_id TEXT NOT NULL,
                learner_id TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'in_progress',
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS participant_counters (
                participant_id TEXT NOT NULL,
                role TEXT NOT NULL,
                sessions_scheduled INTEGER NOT NULL DEFAULT 0,
                sessions_completed INTEGER NOT NULL DEFAULT 0,
                sessions_booked INTEGER NOT NULL DEFAULT 0,
                earnings_cents INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (participant_id, role)
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_status_scheduled
                ON sessions(status, scheduled_at);
            CREATE INDEX IF NOT EXISTS idx_sessions_mentor ON sessions(mentor_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_learner ON sessions(learner_id);
            CREATE INDEX IF NOT EXISTS idx_engagements_mentor ON engagements(mentor_id);
            ",
        )
        .map_err(|e| TandemError::Storage(format!("failed to create tables: {e}")))?;

        conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))
            .map_err(|e| TandemError::Storage(format!("failed to set schema version: {e}")))?;

        Ok(())
    }

    /// Run a blocking closure against the SQLite connection on the Tokio
    /// blocking thread-pool.
    pub(crate) async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|e| {
                TandemError::Storage(format!("failed to acquire database lock: {e}"))
            })?;
            f(&conn)
        })
        .await
        .map_err(|e| TandemError::Storage(format!("task join error: {e}")))?
    }
}

// ── row mapping ────────────────────────────────────────────────────────

/// Fixed-width RFC 3339 so lexical order in SQL equals time order.
fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn fmt_opt_ts(ts: &Option<DateTime<Utc>>) -> Option<String> {
    ts.as_ref().map(fmt_ts)
}

fn conversion<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion(idx, e))
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(idx, &raw)
}

fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| parse_ts(idx, &r)).transpose()
}

fn parsed_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| conversion(idx, e))
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    let id: String = row.get(0)?;
    let id = Uuid::parse_str(&id).map_err(|e| conversion(0, e))?;
    let duration: i64 = row.get(5)?;
    let version: i64 = row.get(20)?;

    Ok(Session {
        id,
        learner_id: row.get(1)?,
        mentor_id: row.get(2)?,
        project_id: row.get(3)?,
        scheduled_at: ts_col(row, 4)?,
        duration_minutes: duration as u32,
        session_type: parsed_col(row, 6)?,
        status: parsed_col(row, 7)?,
        learner_attendance: Attendance {
            present: row.get(8)?,
            attended_at: opt_ts_col(row, 9)?,
        },
        mentor_attendance: Attendance {
            present: row.get(10)?,
            attended_at: opt_ts_col(row, 11)?,
        },
        learner_reason: row.get(12)?,
        mentor_reason: row.get(13)?,
        expire_reason: row.get(14)?,
        meeting_link: row.get(15)?,
        recording_link: row.get(16)?,
        prerequisites: row.get(17)?,
        created_at: ts_col(row, 18)?,
        updated_at: ts_col(row, 19)?,
        version: version as u64,
    })
}

fn row_to_engagement(row: &Row<'_>) -> rusqlite::Result<Engagement> {
    Ok(Engagement {
        project_id: row.get(0)?,
        mentor_id: row.get(1)?,
        learner_id: row.get(2)?,
        title: row.get(3)?,
        status: parsed_col(row, 4)?,
        updated_at: ts_col(row, 5)?,
    })
}

fn counter_deltas(kind: CounterKind, delta: i64) -> (i64, i64, i64) {
    match kind {
        CounterKind::Scheduled => (delta, 0, 0),
        CounterKind::Completed => (0, delta, 0),
        CounterKind::Booked => (0, 0, delta),
    }
}

impl StorageBackend for SqliteStorage {
    async fn insert_session(&self, session: &Session) -> Result<()> {
        let s = session.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO sessions ({SESSION_COLUMNS}) VALUES \
                     (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, \
                      ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)"
                ),
                params![
                    s.id.to_string(),
                    s.learner_id,
                    s.mentor_id,
                    s.project_id,
                    fmt_ts(&s.scheduled_at),
                    s.duration_minutes as i64,
                    s.session_type.to_string(),
                    s.status.to_string(),
                    s.learner_attendance.present,
                    fmt_opt_ts(&s.learner_attendance.attended_at),
                    s.mentor_attendance.present,
                    fmt_opt_ts(&s.mentor_attendance.attended_at),
                    s.learner_reason,
                    s.mentor_reason,
                    s.expire_reason,
                    s.meeting_link,
                    s.recording_link,
                    s.prerequisites,
                    fmt_ts(&s.created_at),
                    fmt_ts(&s.updated_at),
                    s.version as i64,
                ],
            )
            .map_err(|e| TandemError::Storage(format!("failed to insert session: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn get_session(&self, id: Uuid) -> Result<Session> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![id.to_string()],
                row_to_session,
            )
            .optional()?
            .ok_or_else(|| TandemError::NotFound(format!("session {id}")))
        })
        .await
    }

    async fn list_sessions(&self, query: &SessionQuery) -> Result<Vec<Session>> {
        let query = query.clone();
        self.with_conn(move |conn| {
            let mut clauses: Vec<&str> = Vec::new();
            let mut values: Vec<String> = Vec::new();

            if let Some(m) = query.mentor_id {
                clauses.push("mentor_id = ?");
                values.push(m);
            }
            if let Some(l) = query.learner_id {
                clauses.push("learner_id = ?");
                values.push(l);
            }
            if let Some(p) = query.project_id {
                clauses.push("project_id = ?");
                values.push(p);
            }
            if let Some(status) = query.status {
                clauses.push("status = ?");
                values.push(status.to_string());
            }
            if let Some(until) = query.scheduled_until {
                clauses.push("scheduled_at <= ?");
                values.push(fmt_ts(&until));
            }

            let mut sql = format!("SELECT {SESSION_COLUMNS} FROM sessions");
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
            sql.push_str(" ORDER BY scheduled_at ASC, id ASC");
            if let Some(limit) = query.limit {
                sql.push_str(&format!(" LIMIT {limit}"));
            }

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(values.iter()), row_to_session)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn update_session_if(&self, session: &Session, expected: WriteCondition) -> Result<bool> {
        let s = session.clone();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE sessions SET
                        scheduled_at = ?2, duration_minutes = ?3, session_type = ?4, status = ?5,
                        learner_present = ?6, learner_attended_at = ?7,
                        mentor_present = ?8, mentor_attended_at = ?9,
                        learner_reason = ?10, mentor_reason = ?11, expire_reason = ?12,
                        meeting_link = ?13, recording_link = ?14, prerequisites = ?15,
                        updated_at = ?16, version = ?17
                     WHERE id = ?1 AND status = ?18 AND version = ?19",
                    params![
                        s.id.to_string(),
                        fmt_ts(&s.scheduled_at),
                        s.duration_minutes as i64,
                        s.session_type.to_string(),
                        s.status.to_string(),
                        s.learner_attendance.present,
                        fmt_opt_ts(&s.learner_attendance.attended_at),
                        s.mentor_attendance.present,
                        fmt_opt_ts(&s.mentor_attendance.attended_at),
                        s.learner_reason,
                        s.mentor_reason,
                        s.expire_reason,
                        s.meeting_link,
                        s.recording_link,
                        s.prerequisites,
                        fmt_ts(&s.updated_at),
                        s.version as i64,
                        expected.status.to_string(),
                        expected.version as i64,
                    ],
                )
                .map_err(|e| TandemError::Storage(format!("failed to update session: {e}")))?;
            Ok(changed == 1)
        })
        .await
    }

    async fn delete_session_if(&self, id: Uuid, expected: SessionStatus) -> Result<bool> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "DELETE FROM sessions WHERE id = ?1 AND status = ?2",
                params![id.to_string(), expected.to_string()],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn upsert_engagement(&self, engagement: &Engagement) -> Result<()> {
        let e = engagement.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO engagements
                    (project_id, mentor_id, learner_id, title, status, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(project_id) DO UPDATE SET
                    mentor_id = excluded.mentor_id,
                    learner_id = excluded.learner_id,
                    title = excluded.title,
                    status = excluded.status,
                    updated_at = excluded.updated_at",
                params![
                    e.project_id,
                    e.mentor_id,
                    e.learner_id,
                    e.title,
                    e.status.to_string(),
                    fmt_ts(&e.updated_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn engagements_for_mentor(
        &self,
        mentor_id: &str,
        status: Option<EngagementStatus>,
    ) -> Result<Vec<Engagement>> {
        let mentor_id = mentor_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT project_id, mentor_id, learner_id, title, status, updated_at
                 FROM engagements
                 WHERE mentor_id = ?1 AND (?2 IS NULL OR status = ?2)
                 ORDER BY project_id",
            )?;
            let rows = stmt
                .query_map(
                    params![mentor_id, status.map(|s| s.to_string())],
                    row_to_engagement,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn adjust_counter(
        &self,
        participant_id: &str,
        role: Role,
        kind: CounterKind,
        delta: i64,
    ) -> Result<()> {
        let participant_id = participant_id.to_string();
        let (scheduled, completed, booked) = counter_deltas(kind, delta);
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO participant_counters
                    (participant_id, role, sessions_scheduled, sessions_completed, sessions_booked)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(participant_id, role) DO UPDATE SET
                    sessions_scheduled = sessions_scheduled + excluded.sessions_scheduled,
                    sessions_completed = sessions_completed + excluded.sessions_completed,
                    sessions_booked = sessions_booked + excluded.sessions_booked",
                params![participant_id, role.to_string(), scheduled, completed, booked],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_counters(&self, participant_id: &str, role: Role) -> Result<ParticipantCounters> {
        let participant_id = participant_id.to_string();
        self.with_conn(move |conn| {
            let found = conn
                .query_row(
                    "SELECT sessions_scheduled, sessions_completed, sessions_booked, earnings_cents
                     FROM participant_counters WHERE participant_id = ?1 AND role = ?2",
                    params![participant_id, role.to_string()],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    },
                )
                .optional()?;

            let mut counters = ParticipantCounters::empty(participant_id, role);
            if let Some((scheduled, completed, booked, earnings)) = found {
                counters.sessions_scheduled = scheduled;
                counters.sessions_completed = completed;
                counters.sessions_booked = booked;
                counters.earnings_cents = earnings;
            }
            Ok(counters)
        })
        .await
    }
}
