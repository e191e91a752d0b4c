use axum::{
    routing::{get, post},
    Router,
};
use oncebuild_core::config::OncebuildConfig;
use oncebuild_core::time::ScheduleDefaults;
use oncebuild_scheduler::{Registry, ScheduleService, TargetLifecycleListener};
use std::sync::Arc;

/// Central shared state, passed as `Arc<AppState>` to all Axum handlers.
pub struct AppState {
    pub config: OncebuildConfig,
    pub service: ScheduleService,
    pub lifecycle: TargetLifecycleListener,
}

impl AppState {
    pub fn new(config: OncebuildConfig, registry: Arc<Registry>, defaults: ScheduleDefaults) -> Self {
        let service = ScheduleService::new(Arc::clone(&registry), &config.scheduler, defaults);
        Self {
            config,
            service,
            lifecycle: TargetLifecycleListener::new(registry),
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    use crate::http::{builds, defaults, health, targets};

    Router::new()
        .route("/health", get(health::health_handler))
        .route("/builds", post(builds::create_build).get(builds::list_builds))
        .route("/builds/{id}", get(builds::get_build).delete(builds::cancel_build))
        .route("/targets/{*target}", get(targets::target_pending))
        .route("/events/target-deleted", post(targets::target_deleted))
        .route("/events/target-renamed", post(targets::target_renamed))
        .route("/defaults", get(defaults::defaults_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[cfg(test)]
pub(crate) fn test_state() -> Arc<AppState> {
    use oncebuild_scheduler::MemoryStore;

    let config = OncebuildConfig::default();
    let defaults = ScheduleDefaults::from_config(&config.defaults).unwrap();
    let registry = Arc::new(Registry::new(Arc::new(MemoryStore::new())));
    Arc::new(AppState::new(config, registry, defaults))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};
    use oncebuild_scheduler::ScheduleRequest;
    use serde_json::{json, Value};

    async fn serve(state: Arc<AppState>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, build_router(state)).await });
        format!("http://{addr}")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn target_named_like_an_event_is_still_queryable() {
        let state = test_state();
        let at = (Utc::now() + TimeDelta::hours(1)).fixed_offset();
        state.service.schedule(ScheduleRequest::new("deleted").at(at)).unwrap();
        state.service.schedule(ScheduleRequest::new("renamed").at(at)).unwrap();
        let base = serve(state).await;
        let client = reqwest::Client::new();

        for target in ["deleted", "renamed"] {
            let resp = client.get(format!("{base}/targets/{target}")).send().await.unwrap();
            assert_eq!(resp.status(), reqwest::StatusCode::OK);
            let body: Value = resp.json().await.unwrap();
            assert_eq!(body["target"], target);
            assert_eq!(body["count"], 1);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lifecycle_events_are_routed() {
        let state = test_state();
        let at = (Utc::now() + TimeDelta::hours(1)).fixed_offset();
        state.service.schedule(ScheduleRequest::new("old").at(at)).unwrap();
        let base = serve(state.clone()).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/events/target-renamed"))
            .json(&json!({ "from": "old", "to": "new" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert!(state.service.has_pending_for("new"));

        let resp = client
            .post(format!("{base}/events/target-deleted"))
            .json(&json!({ "target": "new" }))
            .send()
            .await
            .unwrap();
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["purged"], 1);
        assert!(state.service.pending().is_empty());
    }
}
