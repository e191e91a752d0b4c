use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use oncebuild_core::config::SchedulerConfig;
use oncebuild_core::time::ScheduleDefaults;
use oncebuild_core::{Cause, OncebuildError, ParameterValue};
use serde::Deserialize;
use tracing::info;

use crate::entry::Entry;
use crate::error::{Result, SchedulerError};
use crate::registry::Registry;

const MAX_MARGIN: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

/// Inbound request to schedule one build.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleRequest {
    pub target: String,
    /// When omitted, the next occurrence of the configured default start time.
    #[serde(default)]
    pub fire_at: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub parameters: Vec<ParameterValue>,
    #[serde(default)]
    pub trigger_on_missed: bool,
    #[serde(default)]
    pub cause: Option<Cause>,
}

impl ScheduleRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            fire_at: None,
            parameters: Vec::new(),
            trigger_on_missed: false,
            cause: None,
        }
    }

    pub fn at(mut self, fire_at: DateTime<FixedOffset>) -> Self {
        self.fire_at = Some(fire_at);
        self
    }
}

/// Front door for callers that create, inspect and cancel scheduled builds.
#[derive(Clone)]
pub struct ScheduleService {
    registry: Arc<Registry>,
    submission_margin: TimeDelta,
    defaults: ScheduleDefaults,
}

impl ScheduleService {
    pub fn new(registry: Arc<Registry>, cfg: &SchedulerConfig, defaults: ScheduleDefaults) -> Self {
        Self {
            registry,
            submission_margin: TimeDelta::from_std(cfg.submission_margin().min(MAX_MARGIN)).unwrap_or_default(),
            defaults,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Schedule a build and return its id.
    pub fn schedule(&self, request: ScheduleRequest) -> Result<String> {
        self.schedule_at(request, Utc::now()).map(|e| e.id().to_string())
    }

    /// Like [`schedule`](Self::schedule) with an explicit clock.
    pub fn schedule_at(&self, request: ScheduleRequest, now: DateTime<Utc>) -> Result<Arc<Entry>> {
        let target = request.target.trim();
        if target.is_empty() {
            return Err(SchedulerError::InvalidTarget("target must not be empty".to_string()));
        }
        if let Some(p) = request.parameters.iter().find(|p| p.name.trim().is_empty()) {
            return Err(OncebuildError::Validation(format!("parameter with empty name (value {})", p.value)).into());
        }

        let fire_at = match request.fire_at {
            Some(at) => at,
            None => self.defaults.default_fire_at(now),
        };
        let earliest = now.checked_sub_signed(self.submission_margin).unwrap_or(DateTime::<Utc>::MIN_UTC);
        if fire_at.with_timezone(&Utc) < earliest {
            return Err(SchedulerError::DateInPast {
                fire_at: fire_at.to_rfc3339(),
                margin_secs: self.submission_margin.num_seconds().unsigned_abs(),
            });
        }

        let entry = Entry::new(target, fire_at)
            .with_parameters(request.parameters)
            .with_trigger_on_missed(request.trigger_on_missed)
            .with_cause(request.cause.unwrap_or_default());
        let entry = self.registry.add(entry);
        info!(
            entry_id = %entry.id(),
            target = %target,
            fire_at = %entry.formatted_time(),
            trigger_on_missed = entry.trigger_on_missed(),
            "build scheduled"
        );
        Ok(entry)
    }

    /// Cancel by id. Returns whether the id was pending.
    pub fn cancel(&self, id: &str) -> bool {
        self.registry.cancel(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Entry>> {
        self.registry.get(id)
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.registry.contains(id)
    }

    /// Every pending entry, earliest first.
    pub fn pending(&self) -> Vec<Arc<Entry>> {
        self.registry.snapshot()
    }

    pub fn pending_for(&self, target_ref: &str) -> Vec<Arc<Entry>> {
        self.registry.list_pending_for(target_ref)
    }

    pub fn has_pending_for(&self, target_ref: &str) -> bool {
        self.registry.has_pending_for(target_ref)
    }

    pub fn default_fire_at(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        self.defaults.default_fire_at(now)
    }

    pub fn defaults(&self) -> &ScheduleDefaults {
        &self.defaults
    }
}
