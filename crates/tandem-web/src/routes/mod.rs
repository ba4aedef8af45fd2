pub mod participants;
pub mod sessions;

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use tandem_core::model::{Actor, SessionQuery};
use tandem_core::storage::StorageBackend;

use crate::error::ApiError;
use crate::AppState;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .merge(sessions::routes())
        .merge(participants::routes())
        .fallback(not_found)
}

/// Caller identity from the `x-actor-id` / `x-actor-role` headers.
pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, ApiError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::unauthorized(format!("missing {name} header")))
    };
    let id = header(ACTOR_ID_HEADER)?;
    let role = header(ACTOR_ROLE_HEADER)?
        .parse()
        .map_err(|e: String| ApiError::unauthorized(e))?;
    Ok(Actor {
        id: id.to_string(),
        role,
    })
}

async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let storage = state.service.engine().storage();
    let db_ok = storage
        .list_sessions(&SessionQuery {
            limit: Some(1),
            ..Default::default()
        })
        .await
        .is_ok();

    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "status": if db_ok { "ok" } else { "degraded" },
            "storage": storage.backend_name(),
            "sweeper": state.config.sweeper.enabled,
        })),
    )
}

async fn not_found() -> ApiError {
    ApiError::not_found("no such route")
}
