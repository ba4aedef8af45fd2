//! Append-only audit trail for session lifecycle events.
//!
//! Events are stored as JSONL at `~/.config/tandem/history.jsonl` unless
//! `history.path` overrides it. Each line is a self-contained
//! [`SessionEvent`] that records who did what to which session and when.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::HistoryConfig;
use crate::model::SessionStatus;

/// Actor recorded for transitions fired by the background sweep.
pub const SWEEPER_ACTOR: &str = "system:sweeper";

/// What happened to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Created,
    Started,
    Completed,
    Expired,
    Cancelled,
    Rescheduled,
    AttendanceMarked,
    RecordingAdded,
    AbsenceReason,
    Deleted,
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Started => write!(f, "started"),
            Self::Completed => write!(f, "completed"),
            Self::Expired => write!(f, "expired"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Rescheduled => write!(f, "rescheduled"),
            Self::AttendanceMarked => write!(f, "attendance_marked"),
            Self::RecordingAdded => write!(f, "recording_added"),
            Self::AbsenceReason => write!(f, "absence_reason"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// A single audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub id: Uuid,
    pub session_id: Uuid,
    pub action: EventAction,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_status: Option<SessionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_status: Option<SessionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl SessionEvent {
    pub fn new(
        session_id: Uuid,
        action: EventAction,
        actor: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            session_id,
            action,
            actor: actor.into(),
            timestamp: at,
            from_status: None,
            to_status: None,
            detail: None,
        }
    }

    pub fn with_statuses(mut self, from: SessionStatus, to: SessionStatus) -> Self {
        self.from_status = Some(from);
        self.to_status = Some(to);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Append-only JSONL logger for session events.
pub struct HistoryLogger {
    path: PathBuf,
    enabled: bool,
}

impl HistoryLogger {
    pub fn new(enabled: bool) -> Self {
        let path = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tandem")
            .join("history.jsonl");
        Self { path, enabled }
    }

    pub fn with_path(path: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            path: path.into(),
            enabled,
        }
    }

    pub fn from_config(config: &HistoryConfig) -> Self {
        match config.path {
            Some(ref p) => Self::with_path(p, config.enabled),
            None => Self::new(config.enabled),
        }
    }

    /// A logger that records nothing.
    pub fn disabled() -> Self {
        Self::with_path(PathBuf::new(), false)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Log a single event by appending one JSON line. Failures are logged
    /// and never surface to the caller.
    pub fn log(&self, event: &SessionEvent) {
        if !self.enabled {
            return;
        }
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let line = match serde_json::to_string(event) {
            Ok(l) => l,
            Err(e) => {
                tracing::debug!("history: failed to serialize event: {e}");
                return;
            }
        };
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path);
        match file {
            Ok(mut f) => {
                if let Err(e) = writeln!(f, "{}", line) {
                    tracing::warn!("history: failed to append event: {e}");
                }
            }
            Err(e) => {
                tracing::debug!("history: failed to open log: {e}");
            }
        }
    }

    /// All events for one session, oldest first.
    pub fn history_for(&self, session_id: Uuid) -> Vec<SessionEvent> {
        let needle = session_id.to_string();
        self.lines()
            .filter(|line| line.contains(&needle))
            .filter_map(|line| serde_json::from_str::<SessionEvent>(&line).ok())
            .filter(|e| e.session_id == session_id)
            .collect()
    }

    /// The `limit` most recent events across all sessions, newest first.
    pub fn recent(&self, limit: usize) -> Vec<SessionEvent> {
        if limit == 0 {
            return Vec::new();
        }
        let mut tail: VecDeque<SessionEvent> = VecDeque::with_capacity(limit);
        for event in self
            .lines()
            .filter_map(|line| serde_json::from_str(&line).ok())
        {
            if tail.len() == limit {
                tail.pop_front();
            }
            tail.push_back(event);
        }
        tail.into_iter().rev().collect()
    }

    /// Lines of the log, read lazily. Empty when disabled or missing.
    fn lines(&self) -> impl Iterator<Item = String> {
        let file = if self.enabled {
            std::fs::File::open(&self.path).ok()
        } else {
            None
        };
        file.into_iter()
            .flat_map(|f| BufReader::new(f).lines().map_while(|line| line.ok()))
    }
}
