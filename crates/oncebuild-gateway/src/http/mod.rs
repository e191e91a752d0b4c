pub mod builds;
pub mod defaults;
pub mod health;
pub mod targets;

use std::sync::Arc;

use axum::{http::StatusCode, Json};
use oncebuild_scheduler::SchedulerError;
use serde_json::{json, Value};

use crate::app::AppState;

/// Error half of every handler's return type.
pub type ApiError = (StatusCode, Json<Value>);

pub(crate) fn api_error(err: SchedulerError) -> ApiError {
    let status = match &err {
        SchedulerError::InvalidTarget(_) | SchedulerError::DateInPast { .. } | SchedulerError::Core(_) => {
            StatusCode::BAD_REQUEST
        }
        SchedulerError::EntryNotFound { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string(), "code": err.code() })))
}

/// Run a registry mutation on the blocking pool. Every mutation rewrites the
/// snapshot file before returning.
pub(crate) async fn off_runtime<T, F>(state: &Arc<AppState>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&AppState) -> T + Send + 'static,
    T: Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || f(&state)).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string(), "code": "INTERNAL_ERROR" })),
        )
    })
}
