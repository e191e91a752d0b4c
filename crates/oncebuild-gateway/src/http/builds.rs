//! Scheduled build endpoints.
//!
//! - `POST   /builds`      schedule a build, returns `{id, fire_at, formatted_time}`
//! - `GET    /builds`      every pending build, earliest first (`?target=` filters)
//! - `GET    /builds/{id}` one pending build
//! - `DELETE /builds/{id}` cancel

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use oncebuild_core::{Cause, ParameterValue};
use oncebuild_scheduler::{Entry, ScheduleRequest, SchedulerError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::{api_error, off_runtime, ApiError};
use crate::app::AppState;

#[derive(Debug, Serialize)]
pub struct BuildView {
    pub id: String,
    pub target: String,
    pub fire_at: String,
    pub formatted_time: String,
    pub parameters: Vec<ParameterValue>,
    pub parameters_tooltip: String,
    pub trigger_on_missed: bool,
    pub cause: Cause,
    /// A sweep has committed to firing it; cancelling now only skips the fire.
    pub started: bool,
}

impl From<&Entry> for BuildView {
    fn from(e: &Entry) -> Self {
        Self {
            id: e.id().to_string(),
            target: e.target_ref(),
            fire_at: e.fire_at().to_rfc3339(),
            formatted_time: e.formatted_time(),
            parameters: e.parameters().to_vec(),
            parameters_tooltip: e.parameters_tooltip(),
            trigger_on_missed: e.trigger_on_missed(),
            cause: e.cause().clone(),
            started: e.is_started(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub target: Option<String>,
}

/// POST /builds
pub async fn create_build(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ScheduleRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let now = chrono::Utc::now();
    let entry = off_runtime(&state, move |s| s.service.schedule_at(request, now))
        .await?
        .map_err(api_error)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": entry.id(),
            "fire_at": entry.fire_at().to_rfc3339(),
            "formatted_time": entry.formatted_time(),
        })),
    ))
}

/// GET /builds
pub async fn list_builds(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Json<Value> {
    let entries = match query.target.as_deref() {
        Some(target) => state.service.pending_for(target),
        None => state.service.pending(),
    };
    let builds: Vec<BuildView> = entries.iter().map(|e| BuildView::from(e.as_ref())).collect();
    Json(json!({ "builds": builds }))
}

/// GET /builds/{id}
pub async fn get_build(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BuildView>, ApiError> {
    state
        .service
        .get(&id)
        .map(|e| Json(BuildView::from(e.as_ref())))
        .ok_or_else(|| api_error(SchedulerError::EntryNotFound { id }))
}

/// DELETE /builds/{id}
pub async fn cancel_build(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let cancelled = off_runtime(&state, {
        let id = id.clone();
        move |s| s.service.cancel(&id)
    })
    .await?;
    if !cancelled {
        return Err(api_error(SchedulerError::EntryNotFound { id }));
    }
    info!(entry_id = %id, "cancel requested over HTTP");
    Ok(Json(json!({ "id": id, "cancelled": true })))
}
