use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::{get, post, put};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tandem_core::history::SessionEvent;
use tandem_core::model::*;
use uuid::Uuid;

use super::actor_from_headers;
use crate::error::ApiError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/sessions", post(create_session).get(list_sessions))
        .route(
            "/api/v1/sessions/{id}",
            get(get_session).delete(delete_session),
        )
        .route("/api/v1/sessions/{id}/attendance", post(mark_attendance))
        .route("/api/v1/sessions/{id}/reschedule", post(reschedule))
        .route("/api/v1/sessions/{id}/cancel", post(cancel))
        .route("/api/v1/sessions/{id}/status", put(update_status))
        .route("/api/v1/sessions/{id}/recording", put(set_recording))
        .route("/api/v1/sessions/{id}/absence-reason", post(absence_reason))
        .route("/api/v1/sessions/{id}/history", get(history))
}

// -- Request/Response types --

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateSessionRequest {
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub session_type: Option<String>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub meeting_link: Option<String>,
    #[serde(default)]
    pub prerequisites: Option<String>,
}

impl CreateSessionRequest {
    fn details(self) -> Result<SessionDetails, ApiError> {
        let session_type = match self.session_type {
            Some(t) => t.parse().map_err(ApiError::bad_request)?,
            None => SessionType::default(),
        };
        Ok(SessionDetails {
            session_type,
            duration_minutes: self.duration_minutes,
            meeting_link: self.meeting_link,
            prerequisites: self.prerequisites,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    #[serde(default = "default_list_limit")]
    pub limit: usize,
}

fn default_list_limit() -> usize {
    50
}

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReasonRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecordingRequest {
    pub recording_link: String,
}

// -- Handlers --

async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    let actor = actor_from_headers(&headers)?;
    let scheduled_at = req.scheduled_at;
    let details = req.details()?;
    let session = state.service.create(&actor, scheduled_at, details).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn list_sessions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Session>>, ApiError> {
    let actor = actor_from_headers(&headers)?;
    let status = params
        .status
        .as_deref()
        .map(str::parse::<SessionStatus>)
        .transpose()
        .map_err(ApiError::bad_request)?;
    let sessions = state
        .service
        .list_for(&actor, status, Some(params.limit))
        .await?;
    Ok(Json(sessions))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Session>, ApiError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(state.service.get(&actor, id).await?))
}

async fn delete_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let actor = actor_from_headers(&headers)?;
    state.service.delete(&actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn mark_attendance(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Session>, ApiError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(state.service.mark_attendance(&actor, id).await?))
}

async fn reschedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<RescheduleRequest>,
) -> Result<Json<Session>, ApiError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(
        state.service.reschedule(&actor, id, req.scheduled_at).await?,
    ))
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<ReasonRequest>,
) -> Result<Json<Session>, ApiError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(
        state
            .service
            .cancel(&actor, id, req.reason.as_deref())
            .await?,
    ))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusUpdateRequest>,
) -> Result<Json<Session>, ApiError> {
    let actor = actor_from_headers(&headers)?;
    let status: SessionStatus = req.status.parse().map_err(ApiError::bad_request)?;
    Ok(Json(
        state
            .service
            .set_status(&actor, id, status, req.reason.as_deref())
            .await?,
    ))
}

async fn set_recording(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<RecordingRequest>,
) -> Result<Json<Session>, ApiError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(
        state
            .service
            .set_recording(&actor, id, &req.recording_link)
            .await?,
    ))
}

async fn absence_reason(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<ReasonRequest>,
) -> Result<Json<Session>, ApiError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(
        state
            .service
            .add_absence_reason(&actor, id, req.reason.as_deref())
            .await?,
    ))
}

async fn history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<SessionEvent>>, ApiError> {
    let actor = actor_from_headers(&headers)?;
    Ok(Json(state.service.history(&actor, id).await?))
}
