use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::RwLock;

use chrono::{DateTime, FixedOffset};
use oncebuild_core::time::format_fire_time;
use oncebuild_core::types::parameters_tooltip;
use oncebuild_core::{Cause, ParameterValue};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One pending scheduled build.
///
/// Entries are shared as `Arc<Entry>` between the registry, its snapshots and
/// delayed fire tasks, so the two runtime flags and the target reference use
/// interior mutability. Everything else is fixed at construction.
///
/// Equality is by `id`; ordering is by `(fire_at, id)`.
#[derive(Debug)]
pub struct Entry {
    id: String,
    /// Rewritten only when the target is renamed.
    target_ref: RwLock<String>,
    fire_at: DateTime<FixedOffset>,
    parameters: Vec<ParameterValue>,
    trigger_on_missed: bool,
    cause: Cause,
    /// Set once a sweep has committed to firing this entry. Never persisted.
    started: AtomicBool,
    /// Set by a cancellation request. Never persisted.
    aborted: AtomicBool,
}

impl Entry {
    /// New entry with a fresh UUIDv7 id (time-sortable, handy in logs).
    pub fn new(target_ref: impl Into<String>, fire_at: DateTime<FixedOffset>) -> Self {
        Self::with_id(Uuid::now_v7().to_string(), target_ref, fire_at)
    }

    pub fn with_id(
        id: impl Into<String>,
        target_ref: impl Into<String>,
        fire_at: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            id: id.into(),
            target_ref: RwLock::new(target_ref.into()),
            fire_at,
            parameters: Vec::new(),
            trigger_on_missed: false,
            cause: Cause::default(),
            started: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<ParameterValue>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_trigger_on_missed(mut self, trigger_on_missed: bool) -> Self {
        self.trigger_on_missed = trigger_on_missed;
        self
    }

    pub fn with_cause(mut self, cause: Cause) -> Self {
        self.cause = cause;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target_ref(&self) -> String {
        self.target_ref
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn targets(&self, target_ref: &str) -> bool {
        *self.target_ref.read().unwrap_or_else(|e| e.into_inner()) == target_ref
    }

    /// Only the registry renames targets, under its own lock.
    pub(crate) fn set_target_ref(&self, target_ref: &str) {
        let mut current = self.target_ref.write().unwrap_or_else(|e| e.into_inner());
        *current = target_ref.to_string();
    }

    pub fn fire_at(&self) -> DateTime<FixedOffset> {
        self.fire_at
    }

    pub fn parameters(&self) -> &[ParameterValue] {
        &self.parameters
    }

    pub fn trigger_on_missed(&self) -> bool {
        self.trigger_on_missed
    }

    pub fn cause(&self) -> &Cause {
        &self.cause
    }

    pub fn is_started(&self) -> bool {
        self.started.load(AtomicOrdering::SeqCst)
    }

    /// Claim the entry for firing. Returns `false` if another sweep already did.
    pub fn try_start(&self) -> bool {
        self.started
            .compare_exchange(false, true, AtomicOrdering::SeqCst, AtomicOrdering::SeqCst)
            .is_ok()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(AtomicOrdering::SeqCst)
    }

    pub fn abort(&self) {
        self.aborted.store(true, AtomicOrdering::SeqCst);
    }

    /// `YYYY-MM-DD HH:MM:SS +HH:MM` in the zone the caller scheduled in.
    pub fn formatted_time(&self) -> String {
        format_fire_time(&self.fire_at)
    }

    pub fn parameters_tooltip(&self) -> String {
        parameters_tooltip(&self.parameters)
    }

    /// Persistent form; the runtime flags are dropped.
    pub fn to_stored(&self) -> StoredEntry {
        StoredEntry {
            id: self.id.clone(),
            target: self.target_ref(),
            fire_at: self.fire_at,
            parameters: self.parameters.clone(),
            trigger_on_missed: self.trigger_on_missed,
            cause: self.cause.clone(),
        }
    }
}

impl From<StoredEntry> for Entry {
    /// Rebuild from a snapshot. Restored entries always start un-started and
    /// un-aborted.
    fn from(stored: StoredEntry) -> Self {
        Entry::with_id(stored.id, stored.target, stored.fire_at)
            .with_parameters(stored.parameters)
            .with_trigger_on_missed(stored.trigger_on_missed)
            .with_cause(stored.cause)
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fire_at
            .cmp(&other.fire_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Serialised form of an [`Entry`] as written to the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub id: String,
    pub target: String,
    /// RFC 3339 with the caller's offset preserved.
    pub fire_at: DateTime<FixedOffset>,
    #[serde(default)]
    pub parameters: Vec<ParameterValue>,
    #[serde(default)]
    pub trigger_on_missed: bool,
    #[serde(default)]
    pub cause: Cause,
}
