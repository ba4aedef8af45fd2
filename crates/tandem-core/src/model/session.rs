use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TandemError};

pub const DEFAULT_DURATION_MINUTES: u32 = 60;
pub const MIN_DURATION_MINUTES: u32 = 15;
pub const MAX_DURATION_MINUTES: u32 = 480;
pub const MAX_LINK_LENGTH: usize = 2_048;
pub const MAX_TEXT_LENGTH: usize = 5_000;

/// A scheduled meeting between one mentor and one learner, tied to a
/// project engagement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub learner_id: String,
    pub mentor_id: String,
    pub project_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub session_type: SessionType,
    pub status: SessionStatus,
    pub learner_attendance: Attendance,
    pub mentor_attendance: Attendance,
    pub learner_reason: Option<String>,
    pub mentor_reason: Option<String>,
    pub expire_reason: Option<String>,
    pub meeting_link: Option<String>,
    pub recording_link: Option<String>,
    pub prerequisites: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Write counter checked by conditional updates. Bumped by the store.
    #[serde(default)]
    pub version: u64,
}

impl Session {
    pub fn new(
        engagement: &crate::model::Engagement,
        scheduled_at: DateTime<Utc>,
        details: SessionDetails,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            learner_id: engagement.learner_id.clone(),
            mentor_id: engagement.mentor_id.clone(),
            project_id: engagement.project_id.clone(),
            scheduled_at,
            duration_minutes: details.duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES),
            session_type: details.session_type,
            status: SessionStatus::Scheduled,
            learner_attendance: Attendance::default(),
            mentor_attendance: Attendance::default(),
            learner_reason: None,
            mentor_reason: None,
            expire_reason: None,
            meeting_link: details.meeting_link,
            recording_link: None,
            prerequisites: details.prerequisites,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn attendance(&self, role: Role) -> &Attendance {
        match role {
            Role::Mentor => &self.mentor_attendance,
            Role::Learner => &self.learner_attendance,
        }
    }

    pub fn attendance_mut(&mut self, role: Role) -> &mut Attendance {
        match role {
            Role::Mentor => &mut self.mentor_attendance,
            Role::Learner => &mut self.learner_attendance,
        }
    }

    pub fn both_present(&self) -> bool {
        self.mentor_attendance.present && self.learner_attendance.present
    }

    pub fn participant_id(&self, role: Role) -> &str {
        match role {
            Role::Mentor => &self.mentor_id,
            Role::Learner => &self.learner_id,
        }
    }

    /// Which role `participant_id` plays in this session, if any.
    pub fn role_of(&self, participant_id: &str) -> Option<Role> {
        if self.mentor_id == participant_id {
            Some(Role::Mentor)
        } else if self.learner_id == participant_id {
            Some(Role::Learner)
        } else {
            None
        }
    }

    /// Last instant at which presence may still be marked.
    pub fn attendance_deadline(&self, window: Duration) -> DateTime<Utc> {
        self.scheduled_at + window
    }

    pub fn reason_mut(&mut self, role: Role) -> &mut Option<String> {
        match role {
            Role::Mentor => &mut self.mentor_reason,
            Role::Learner => &mut self.learner_reason,
        }
    }

    /// Clear both presence flags and timestamps.
    pub fn reset_attendance(&mut self) {
        self.mentor_attendance = Attendance::default();
        self.learner_attendance = Attendance::default();
    }

    /// Roles whose presence flag is still false.
    pub fn absent_roles(&self) -> Vec<Role> {
        [Role::Mentor, Role::Learner]
            .into_iter()
            .filter(|r| !self.attendance(*r).present)
            .collect()
    }
}

/// Per-participant presence confirmation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendance {
    pub present: bool,
    pub attended_at: Option<DateTime<Utc>>,
}

impl Attendance {
    pub fn mark(&mut self, at: DateTime<Utc>) {
        self.present = true;
        self.attended_at = Some(at);
    }
}

/// Caller-supplied scheduling details.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionDetails {
    #[serde(default)]
    pub session_type: SessionType,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub meeting_link: Option<String>,
    #[serde(default)]
    pub prerequisites: Option<String>,
}

impl SessionDetails {
    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.duration_minutes = Some(minutes);
        self
    }

    pub fn with_type(mut self, session_type: SessionType) -> Self {
        self.session_type = session_type;
        self
    }

    pub fn with_meeting_link(mut self, link: impl Into<String>) -> Self {
        self.meeting_link = Some(link.into());
        self
    }
}

/// Validate caller-supplied scheduling details.
pub fn validate_details(details: &SessionDetails) -> Result<()> {
    if let Some(minutes) = details.duration_minutes {
        if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&minutes) {
            return Err(TandemError::InvalidInput(format!(
                "duration must be between {MIN_DURATION_MINUTES} and {MAX_DURATION_MINUTES} minutes"
            )));
        }
    }
    if let Some(ref link) = details.meeting_link {
        validate_link("meeting link", link)?;
    }
    if let Some(ref text) = details.prerequisites {
        validate_text("prerequisites", text)?;
    }
    Ok(())
}

pub fn validate_link(field: &str, link: &str) -> Result<()> {
    let trimmed = link.trim();
    if trimmed.is_empty() {
        return Err(TandemError::InvalidInput(format!("{field} cannot be empty")));
    }
    if trimmed.len() > MAX_LINK_LENGTH {
        return Err(TandemError::InvalidInput(format!(
            "{field} exceeds maximum length of {MAX_LINK_LENGTH} characters"
        )));
    }
    Ok(())
}

pub fn validate_text(field: &str, text: &str) -> Result<()> {
    if text.len() > MAX_TEXT_LENGTH {
        return Err(TandemError::InvalidInput(format!(
            "{field} exceeds maximum length of {MAX_TEXT_LENGTH} characters"
        )));
    }
    Ok(())
}

/// Reasons are mandatory for cancel/expire and for absence explanations.
pub fn validate_reason(reason: Option<&str>) -> Result<String> {
    match reason.map(str::trim) {
        Some(r) if !r.is_empty() => {
            validate_text("reason", r)?;
            Ok(r.to_string())
        }
        _ => Err(TandemError::InvalidInput("reason cannot be empty".into())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Scheduled,
    Ongoing,
    Completed,
    Cancelled,
    Rescheduled,
    Expired,
}

impl SessionStatus {
    /// Terminal states admit no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Expired)
    }

    /// Statuses during which presence may still be recorded.
    pub fn accepts_attendance(self) -> bool {
        matches!(self, Self::Scheduled | Self::Ongoing)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Ongoing => write!(f, "ongoing"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Rescheduled => write!(f, "rescheduled"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scheduled" => Ok(Self::Scheduled),
            "ongoing" => Ok(Self::Ongoing),
            "completed" => Ok(Self::Completed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            "rescheduled" => Ok(Self::Rescheduled),
            "expired" => Ok(Self::Expired),
            _ => Err(format!("unknown session status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    #[default]
    OneOnOne,
    Group,
    CodeReview,
    Workshop,
}

impl std::fmt::Display for SessionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OneOnOne => write!(f, "one_on_one"),
            Self::Group => write!(f, "group"),
            Self::CodeReview => write!(f, "code_review"),
            Self::Workshop => write!(f, "workshop"),
        }
    }
}

impl std::str::FromStr for SessionType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "one_on_one" => Ok(Self::OneOnOne),
            "group" => Ok(Self::Group),
            "code_review" => Ok(Self::CodeReview),
            "workshop" => Ok(Self::Workshop),
            _ => Err(format!("unknown session type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Mentor,
    Learner,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mentor => write!(f, "mentor"),
            Self::Learner => write!(f, "learner"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mentor" => Ok(Self::Mentor),
            "learner" => Ok(Self::Learner),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

/// The caller of an operation: who they are and which side they act for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn mentor(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Mentor,
        }
    }

    pub fn learner(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Learner,
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.role, self.id)
    }
}

/// Filtered scan over stored sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionQuery {
    pub mentor_id: Option<String>,
    pub learner_id: Option<String>,
    pub project_id: Option<String>,
    pub status: Option<SessionStatus>,
    /// Inclusive upper bound on `scheduled_at`.
    pub scheduled_until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl SessionQuery {
    pub fn for_participant(actor: &Actor) -> Self {
        match actor.role {
            Role::Mentor => Self {
                mentor_id: Some(actor.id.clone()),
                ..Default::default()
            },
            Role::Learner => Self {
                learner_id: Some(actor.id.clone()),
                ..Default::default()
            },
        }
    }

    pub fn with_status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Whether `session` passes this filter. Backends without native
    /// filtering use this directly.
    pub fn matches(&self, session: &Session) -> bool {
        if let Some(ref m) = self.mentor_id {
            if &session.mentor_id != m {
                return false;
            }
        }
        if let Some(ref l) = self.learner_id {
            if &session.learner_id != l {
                return false;
            }
        }
        if let Some(ref p) = self.project_id {
            if &session.project_id != p {
                return false;
            }
        }
        if let Some(status) = self.status {
            if session.status != status {
                return false;
            }
        }
        if let Some(until) = self.scheduled_until {
            if session.scheduled_at > until {
                return false;
            }
        }
        true
    }
}
