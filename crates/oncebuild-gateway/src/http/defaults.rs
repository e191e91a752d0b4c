use axum::{extract::State, Json};
use chrono::Utc;
use oncebuild_core::time::format_fire_time;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /defaults: what a request without `fire_at` would get right now.
pub async fn defaults_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let defaults = state.service.defaults();
    let fire_at = state.service.default_fire_at(Utc::now());
    Json(json!({
        "fire_at": fire_at.to_rfc3339(),
        "formatted_time": format_fire_time(&fire_at),
        "start_time": defaults.start_time.format("%H:%M:%S").to_string(),
        "time_zone": defaults.time_zone,
        "grace_period_secs": state.config.scheduler.grace_period_secs,
        "tick_secs": state.config.scheduler.tick_period().as_secs(),
    }))
}
