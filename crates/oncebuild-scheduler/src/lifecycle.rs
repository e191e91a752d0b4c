use std::sync::Arc;

use tracing::debug;

use crate::registry::Registry;

/// Keeps pending entries consistent with the target catalogue.
///
/// Changes apply synchronously: once a handler returns, no pending entry
/// names a deleted target, and every entry of a renamed target already
/// carries the new reference.
#[derive(Clone)]
pub struct TargetLifecycleListener {
    registry: Arc<Registry>,
}

impl TargetLifecycleListener {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// A target was deleted. Returns how many entries were purged.
    pub fn on_target_deleted(&self, target_ref: &str) -> usize {
        let purged = self.registry.purge_target(target_ref);
        if purged > 0 {
            debug!(target = %target_ref, purged, "handled target deletion");
        }
        purged
    }

    /// A target was renamed. Returns how many entries were updated.
    pub fn on_target_renamed(&self, old_ref: &str, new_ref: &str) -> usize {
        if old_ref == new_ref {
            return 0;
        }
        let renamed = self.registry.rename_target(old_ref, new_ref);
        if renamed > 0 {
            debug!(from = %old_ref, to = %new_ref, renamed, "handled target rename");
        }
        renamed
    }
}
