use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::Json;
use axum::routing::{get, post, put};
use axum::Router;
use serde::Deserialize;
use tandem_core::model::{Engagement, EngagementStatus, ParticipantCounters, Role};
use tandem_core::sweeper::SweepReport;

use crate::error::ApiError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/participants/{id}/counters", get(counters))
        .route("/api/v1/engagements/{project_id}", put(upsert_engagement))
        .route("/api/v1/admin/sweep", post(sweep))
}

#[derive(Debug, Deserialize)]
pub struct CountersParams {
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct EngagementRequest {
    pub mentor_id: String,
    pub learner_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

async fn counters(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<CountersParams>,
) -> Result<Json<ParticipantCounters>, ApiError> {
    let role: Role = params.role.parse().map_err(ApiError::bad_request)?;
    Ok(Json(state.service.counters(&id, role).await?))
}

async fn upsert_engagement(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    Json(req): Json<EngagementRequest>,
) -> Result<Json<Engagement>, ApiError> {
    let status: EngagementStatus = match req.status {
        Some(s) => s.parse().map_err(ApiError::bad_request)?,
        None => EngagementStatus::default(),
    };
    let engagement = Engagement::new(project_id, req.mentor_id, req.learner_id)
        .with_title(req.title.unwrap_or_default())
        .with_status(status);
    Ok(Json(state.service.upsert_engagement(engagement).await?))
}

async fn sweep(State(state): State<Arc<AppState>>) -> Result<Json<SweepReport>, ApiError> {
    Ok(Json(state.service.sweep().await?))
}
