//! Hand-off from the sweep worker to the execution service.
//!
//! The worker never waits on a build: it passes each due entry to a
//! [`Dispatcher`] together with the remaining delay. The dispatcher arranges
//! for [`fire`] to run once that delay has elapsed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use oncebuild_core::{Cause, ParameterValue};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::entry::Entry;
use crate::error::Result;
use crate::registry::Registry;

/// What the execution service receives when a scheduled build fires.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerRequest {
    pub entry_id: String,
    pub target: String,
    /// Extra quiet period the execution service should apply. The scheduled
    /// delay has already elapsed by the time a request is built, so this is zero.
    pub delay_secs: u64,
    pub parameters: Vec<ParameterValue>,
    pub cause: Cause,
}

impl TriggerRequest {
    fn for_entry(entry: &Entry) -> Self {
        Self {
            entry_id: entry.id().to_string(),
            target: entry.target_ref(),
            delay_secs: 0,
            parameters: entry.parameters().to_vec(),
            cause: entry.cause().clone(),
        }
    }
}

/// The execution service that actually runs builds.
#[async_trait]
pub trait BuildTrigger: Send + Sync {
    /// Whether `target` still exists.
    async fn resolve(&self, target: &str) -> Result<bool>;

    /// Enqueue a build. Fire-and-forget from the scheduler's point of view.
    async fn trigger(&self, request: TriggerRequest) -> Result<()>;
}

/// Trigger used when no execution service is configured: every target
/// resolves and fired builds are only logged.
pub struct LogTrigger;

#[async_trait]
impl BuildTrigger for LogTrigger {
    async fn resolve(&self, _target: &str) -> Result<bool> {
        Ok(true)
    }

    async fn trigger(&self, request: TriggerRequest) -> Result<()> {
        info!(
            entry_id = %request.entry_id,
            target = %request.target,
            parameters = request.parameters.len(),
            cause = %request.cause.description,
            "scheduled build fired (no executor configured)"
        );
        Ok(())
    }
}

/// Result of a delayed fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// Handed to the execution service.
    Fired,
    /// A cancellation arrived before the delay elapsed.
    Aborted,
    /// The target no longer exists.
    TargetMissing,
    /// The execution service rejected the request.
    Failed,
}

/// Run one scheduled build now.
///
/// Last-chance veto on `aborted`, then the entry leaves the registry whatever
/// happens next: a build is never retried.
pub async fn fire(registry: &Arc<Registry>, trigger: &dyn BuildTrigger, entry: &Entry) -> FireOutcome {
    let target = entry.target_ref();
    if entry.is_aborted() {
        debug!(entry_id = %entry.id(), %target, "scheduled build aborted; not starting");
        remove_blocking(registry, entry.id()).await;
        return FireOutcome::Aborted;
    }

    remove_blocking(registry, entry.id()).await;

    match trigger.resolve(&target).await {
        Ok(true) => {}
        Ok(false) => {
            info!(entry_id = %entry.id(), %target, "target not found; cannot start scheduled build");
            return FireOutcome::TargetMissing;
        }
        Err(e) => {
            // Let the trigger call decide; a flaky lookup must not drop the build.
            warn!(entry_id = %entry.id(), %target, error = %e, "target lookup failed; triggering anyway");
        }
    }

    debug!(entry_id = %entry.id(), %target, "starting scheduled build now");
    match trigger.trigger(TriggerRequest::for_entry(entry)).await {
        Ok(()) => FireOutcome::Fired,
        Err(e) => {
            warn!(entry_id = %entry.id(), %target, error = %e, "failed to start scheduled build");
            FireOutcome::Failed
        }
    }
}

/// `Registry::remove` persists the snapshot synchronously, so run it on the
/// blocking pool rather than stalling a runtime worker.
async fn remove_blocking(registry: &Arc<Registry>, id: &str) {
    let registry = Arc::clone(registry);
    let id = id.to_string();
    if let Err(e) = tokio::task::spawn_blocking(move || registry.remove(&id)).await {
        warn!(error = %e, "registry removal task failed");
    }
}

/// Runs [`fire`] for an entry after a delay.
pub trait Dispatcher: Send + Sync {
    /// Must return promptly; the wait happens elsewhere.
    fn dispatch(&self, entry: Arc<Entry>, delay: Duration);
}

/// Dispatcher that spawns one Tokio task per fire.
pub struct TokioDispatcher {
    registry: Arc<Registry>,
    trigger: Arc<dyn BuildTrigger>,
}

impl TokioDispatcher {
    pub fn new(registry: Arc<Registry>, trigger: Arc<dyn BuildTrigger>) -> Self {
        Self { registry, trigger }
    }
}

impl Dispatcher for TokioDispatcher {
    fn dispatch(&self, entry: Arc<Entry>, delay: Duration) {
        let registry = Arc::clone(&self.registry);
        let trigger = Arc::clone(&self.trigger);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let outcome = fire(&registry, trigger.as_ref(), &entry).await;
            debug!(entry_id = %entry.id(), ?outcome, "scheduled build fire finished");
        });
    }
}
