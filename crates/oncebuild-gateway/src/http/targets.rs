//! Target catalogue notifications and per-target queries.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use oncebuild_scheduler::SchedulerError;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{api_error, off_runtime, ApiError};
use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct TargetDeleted {
    pub target: String,
}

#[derive(Debug, Deserialize)]
pub struct TargetRenamed {
    pub from: String,
    pub to: String,
}

fn require(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(api_error(SchedulerError::InvalidTarget(format!("'{field}' must not be empty"))));
    }
    Ok(())
}

/// GET /targets/{*target}: does the target have pending builds?
pub async fn target_pending(
    State(state): State<Arc<AppState>>,
    Path(target): Path<String>,
) -> Json<Value> {
    let count = state.service.pending_for(&target).len();
    Json(json!({ "target": target, "pending": count > 0, "count": count }))
}

/// POST /events/target-deleted
pub async fn target_deleted(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TargetDeleted>,
) -> Result<Json<Value>, ApiError> {
    require("target", &body.target)?;
    let target = body.target.clone();
    let purged = off_runtime(&state, move |s| s.lifecycle.on_target_deleted(&target)).await?;
    Ok(Json(json!({ "target": body.target, "purged": purged })))
}

/// POST /events/target-renamed
pub async fn target_renamed(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TargetRenamed>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    require("from", &body.from)?;
    require("to", &body.to)?;
    let (from, to) = (body.from.clone(), body.to.clone());
    let updated = off_runtime(&state, move |s| s.lifecycle.on_target_renamed(&from, &to)).await?;
    Ok((
        StatusCode::OK,
        Json(json!({ "from": body.from, "to": body.to, "updated": updated })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_state;
    use chrono::{TimeDelta, Utc};
    use oncebuild_scheduler::ScheduleRequest;

    fn schedule(state: &AppState, target: &str) {
        let at = (Utc::now() + TimeDelta::hours(1)).fixed_offset();
        state
            .service
            .schedule(ScheduleRequest::new(target).at(at))
            .unwrap();
    }

    #[tokio::test]
    async fn pending_reports_count_for_nested_target() {
        let state = test_state();
        schedule(&state, "folder/job");
        schedule(&state, "folder/job");

        let Json(body) = target_pending(State(state), Path("folder/job".to_string())).await;
        assert_eq!(body["pending"], true);
        assert_eq!(body["count"], 2);
    }

    #[tokio::test]
    async fn deletion_purges() {
        let state = test_state();
        schedule(&state, "doomed");
        schedule(&state, "kept");

        let Json(body) = target_deleted(
            State(state.clone()),
            Json(TargetDeleted {
                target: "doomed".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(body["purged"], 1);
        assert!(!state.service.has_pending_for("doomed"));
        assert!(state.service.has_pending_for("kept"));
    }

    #[tokio::test]
    async fn rename_moves_pending_builds() {
        let state = test_state();
        schedule(&state, "old");

        let (_, Json(body)) = target_renamed(
            State(state.clone()),
            Json(TargetRenamed {
                from: "old".to_string(),
                to: "new".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(body["updated"], 1);
        assert!(state.service.has_pending_for("new"));
    }

    #[tokio::test]
    async fn blank_rename_is_rejected() {
        let state = test_state();
        let (status, _) = target_renamed(
            State(state),
            Json(TargetRenamed {
                from: "old".to_string(),
                to: " ".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
