use thiserror::Error;

use crate::model::SessionStatus;

#[derive(Debug, Error)]
pub enum TandemError {
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("No active engagement: {0}")]
    NoActiveEngagement(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Attendance window expired: {0}")]
    WindowExpired(String),

    #[error("Illegal transition: {from} -> {to}")]
    IllegalTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Stale transition: expected {expected}, found {actual}")]
    StaleTransition {
        expected: SessionStatus,
        actual: SessionStatus,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TandemError {
    pub fn invalid_state(status: SessionStatus, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::InvalidState(format!("{message} (current status: {status})"))
    }

    /// Stable, machine-readable error kind surfaced to API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidSchedule(_) => "invalid_schedule",
            Self::NoActiveEngagement(_) => "no_active_engagement",
            Self::InvalidState(_) => "invalid_state",
            Self::WindowExpired(_) => "window_expired",
            Self::IllegalTransition { .. } => "illegal_transition",
            Self::StaleTransition { .. } => "stale_transition",
            Self::NotFound(_) => "not_found",
            Self::AccessDenied(_) => "access_denied",
            Self::InvalidInput(_) => "invalid_input",
            Self::Storage(_) => "storage",
            Self::Serialization(_) => "serialization",
            Self::Config(_) => "config",
        }
    }

    /// Returns `true` when another actor moved the record first. Callers
    /// treat the stored state as authoritative instead of retrying.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleTransition { .. })
    }
}

impl From<rusqlite::Error> for TandemError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TandemError>;
