use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Role;

/// A mentor/learner project engagement, mirrored from the project
/// collaborator. Scheduling only needs ownership and status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Engagement {
    pub project_id: String,
    pub mentor_id: String,
    pub learner_id: String,
    #[serde(default)]
    pub title: String,
    pub status: EngagementStatus,
    pub updated_at: DateTime<Utc>,
}

impl Engagement {
    pub fn new(
        project_id: impl Into<String>,
        mentor_id: impl Into<String>,
        learner_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            mentor_id: mentor_id.into(),
            learner_id: learner_id.into(),
            title: String::new(),
            status: EngagementStatus::InProgress,
            updated_at: Utc::now(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_status(mut self, status: EngagementStatus) -> Self {
        self.status = status;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementStatus {
    Open,
    #[default]
    InProgress,
    Completed,
    Cancelled,
}

impl std::fmt::Display for EngagementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for EngagementStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "open" => Ok(Self::Open),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(format!("unknown engagement status: {s}")),
        }
    }
}

/// Which denormalized counter on a participant aggregate to adjust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    /// Sessions currently awaiting their outcome.
    Scheduled,
    /// Sessions that finished with both participants present.
    Completed,
    /// Sessions ever created that have not been deleted.
    Booked,
}

impl std::fmt::Display for CounterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Completed => write!(f, "completed"),
            Self::Booked => write!(f, "booked"),
        }
    }
}

/// Session counters on a mentor or learner aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantCounters {
    pub participant_id: String,
    pub role: Role,
    pub sessions_scheduled: i64,
    pub sessions_completed: i64,
    pub sessions_booked: i64,
    /// Realized at project level by the payments collaborator; read-only here.
    pub earnings_cents: i64,
}

impl ParticipantCounters {
    pub fn empty(participant_id: impl Into<String>, role: Role) -> Self {
        Self {
            participant_id: participant_id.into(),
            role,
            sessions_scheduled: 0,
            sessions_completed: 0,
            sessions_booked: 0,
            earnings_cents: 0,
        }
    }

    pub fn get(&self, kind: CounterKind) -> i64 {
        match kind {
            CounterKind::Scheduled => self.sessions_scheduled,
            CounterKind::Completed => self.sessions_completed,
            CounterKind::Booked => self.sessions_booked,
        }
    }

    pub fn apply(&mut self, kind: CounterKind, delta: i64) {
        match kind {
            CounterKind::Scheduled => self.sessions_scheduled += delta,
            CounterKind::Completed => self.sessions_completed += delta,
            CounterKind::Booked => self.sessions_booked += delta,
        }
    }
}
