use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use tandem_core::error::TandemError;

/// JSON API error: `{"error": <kind>, "message": <text>}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "invalid_input",
            message: msg.into(),
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            kind: "unauthenticated",
            message: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            kind: "not_found",
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "internal",
            message: msg.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.kind, "message": self.message });
        (self.status, Json(body)).into_response()
    }
}

impl From<TandemError> for ApiError {
    fn from(err: TandemError) -> Self {
        let status = match &err {
            TandemError::InvalidSchedule(_)
            | TandemError::InvalidState(_)
            | TandemError::InvalidInput(_)
            | TandemError::WindowExpired(_)
            | TandemError::IllegalTransition { .. } => StatusCode::BAD_REQUEST,
            TandemError::NotFound(_) | TandemError::NoActiveEngagement(_) => StatusCode::NOT_FOUND,
            TandemError::AccessDenied(_) => StatusCode::FORBIDDEN,
            TandemError::StaleTransition { .. } => StatusCode::CONFLICT,
            TandemError::Storage(_) | TandemError::Serialization(_) | TandemError::Config(_) => {
                tracing::error!("api error: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::model::SessionStatus;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (TandemError::InvalidSchedule("past".into()), StatusCode::BAD_REQUEST),
            (TandemError::WindowExpired("late".into()), StatusCode::BAD_REQUEST),
            (
                TandemError::IllegalTransition {
                    from: SessionStatus::Completed,
                    to: SessionStatus::Expired,
                },
                StatusCode::BAD_REQUEST,
            ),
            (TandemError::NotFound("s".into()), StatusCode::NOT_FOUND),
            (TandemError::NoActiveEngagement("m".into()), StatusCode::NOT_FOUND),
            (TandemError::AccessDenied("x".into()), StatusCode::FORBIDDEN),
            (
                TandemError::StaleTransition {
                    expected: SessionStatus::Scheduled,
                    actual: SessionStatus::Ongoing,
                },
                StatusCode::CONFLICT,
            ),
            (TandemError::Storage("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            let kind = err.kind();
            let api = ApiError::from(err);
            assert_eq!(api.status, expected, "{kind}");
            assert_eq!(api.kind, kind);
        }
    }
}
