//! HTTP client for the downstream execution service.
//!
//! - `GET  {base}/targets/{ref...}`: 2xx means the target exists, 404 means it is gone.
//! - `POST {base}/builds` with a JSON [`TriggerRequest`] enqueues a build.

use std::time::Duration;

use async_trait::async_trait;
use oncebuild_core::config::ExecutorConfig;
use oncebuild_scheduler::{BuildTrigger, Result, SchedulerError, TriggerRequest};
use reqwest::{StatusCode, Url};
use tracing::{debug, warn};

pub struct HttpTrigger {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTrigger {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SchedulerError::Trigger(e.to_string()))?;
        let base_url = Url::parse(base_url.trim())
            .map_err(|e| SchedulerError::Trigger(format!("invalid executor url {base_url:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(SchedulerError::Trigger(format!("executor url {base_url} cannot carry a path")));
        }
        Ok(Self { client, base_url })
    }

    /// `None` when no executor is configured.
    pub fn from_config(cfg: &ExecutorConfig) -> Result<Option<Self>> {
        match cfg.base_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => Self::new(url, Duration::from_secs(cfg.timeout_secs.max(1))).map(Some),
            None => Ok(None),
        }
    }

    /// Each `/`-separated part of the target ref becomes one percent-encoded
    /// path segment, so `#`, `?` and spaces stay inside the path.
    fn target_url(&self, target: &str) -> Url {
        self.join(std::iter::once("targets").chain(target.split('/').filter(|s| !s.is_empty())))
    }

    fn builds_url(&self) -> Url {
        self.join(std::iter::once("builds"))
    }

    fn join<'a>(&self, segments: impl Iterator<Item = &'a str>) -> Url {
        let mut url = self.base_url.clone();
        // checked in new()
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

#[async_trait]
impl BuildTrigger for HttpTrigger {
    async fn resolve(&self, target: &str) -> Result<bool> {
        let resp = self
            .client
            .get(self.target_url(target))
            .send()
            .await
            .map_err(|e| SchedulerError::Trigger(e.to_string()))?;

        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(SchedulerError::Trigger(format!("target lookup returned {s}"))),
        }
    }

    async fn trigger(&self, request: TriggerRequest) -> Result<()> {
        debug!(entry_id = %request.entry_id, target = %request.target, "sending build to executor");
        let resp = self
            .client
            .post(self.builds_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| SchedulerError::Trigger(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "executor rejected build");
            return Err(SchedulerError::Trigger(format!("executor returned {status}")));
        }
        Ok(())
    }
}
