use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::entry::{Entry, StoredEntry};
use crate::store::SnapshotStore;

/// The single source of truth for pending scheduled builds.
///
/// One mutex guards the ordered set. It is held only for in-memory work:
/// the snapshot is cloned under the lock and written after it is released.
/// The snapshot is read once, lazily, on first access; afterwards state only
/// flows from memory to disk. Two processes must never share one snapshot.
///
/// Construct one per process and share it as `Arc<Registry>`.
pub struct Registry {
    state: Mutex<RegistryState>,
    store: Arc<dyn SnapshotStore>,
    /// Generation of the newest snapshot handed to the store.
    written: Mutex<u64>,
}

#[derive(Default)]
struct RegistryState {
    loaded: bool,
    /// Bumped on every mutation; orders concurrent snapshot writes.
    generation: u64,
    ordered: BTreeSet<Arc<Entry>>,
    by_id: HashMap<String, Arc<Entry>>,
}

impl RegistryState {
    fn insert(&mut self, entry: Arc<Entry>) -> Option<Arc<Entry>> {
        let previous = self.take(entry.id());
        self.by_id.insert(entry.id().to_string(), Arc::clone(&entry));
        self.ordered.insert(entry);
        previous
    }

    fn take(&mut self, id: &str) -> Option<Arc<Entry>> {
        let entry = self.by_id.remove(id)?;
        self.ordered.remove(&entry);
        Some(entry)
    }

    /// Record a mutation and capture the snapshot that must be persisted.
    fn commit(&mut self) -> PendingWrite {
        self.generation += 1;
        PendingWrite {
            generation: self.generation,
            entries: self.ordered.iter().map(|e| e.to_stored()).collect(),
        }
    }
}

struct PendingWrite {
    generation: u64,
    entries: Vec<StoredEntry>,
}

impl Registry {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            store,
            written: Mutex::new(0),
        }
    }

    /// Lock the state, loading the snapshot on first use.
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.loaded {
            state.loaded = true;
            self.load_into(&mut state);
        }
        state
    }

    fn load_into(&self, state: &mut RegistryState) {
        match self.store.load() {
            Ok(stored) => {
                let count = stored.len();
                for s in stored {
                    state.insert(Arc::new(Entry::from(s)));
                }
                info!(count, location = %self.store.location(), "scheduled builds loaded");
            }
            Err(e) => {
                // An unreadable snapshot means "nothing pending", never a startup failure.
                warn!(location = %self.store.location(), error = %e, "failed to load scheduled builds; starting empty");
            }
        }
    }

    /// Write a snapshot unless a newer one has already been written.
    fn persist(&self, pending: PendingWrite) {
        let mut written = self.written.lock().unwrap_or_else(|e| e.into_inner());
        if pending.generation <= *written {
            debug!(generation = pending.generation, "newer snapshot already written");
            return;
        }
        *written = pending.generation;
        if let Err(e) = self.store.save(&pending.entries) {
            warn!(location = %self.store.location(), error = %e, "failed to save scheduled builds");
        }
    }

    /// Insert `entry`, replacing any entry with the same id.
    pub fn add(&self, entry: Entry) -> Arc<Entry> {
        let entry = Arc::new(entry);
        let pending = {
            let mut state = self.lock();
            if state.insert(Arc::clone(&entry)).is_some() {
                debug!(entry_id = %entry.id(), "replaced scheduled build");
            }
            state.commit()
        };
        self.persist(pending);
        debug!(entry_id = %entry.id(), target = %entry.target_ref(), fire_at = %entry.fire_at(), "scheduled build added");
        entry
    }

    /// Remove by id. No-op (and no write) if absent.
    pub fn remove(&self, id: &str) -> Option<Arc<Entry>> {
        let (removed, pending) = {
            let mut state = self.lock();
            match state.take(id) {
                Some(e) => (Some(e), Some(state.commit())),
                None => (None, None),
            }
        };
        if let Some(pending) = pending {
            self.persist(pending);
        }
        removed
    }

    /// Ordered copy of every pending entry, ascending by `(fire_at, id)`.
    pub fn snapshot(&self) -> Vec<Arc<Entry>> {
        self.lock().ordered.iter().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Entry>> {
        self.lock().by_id.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_pending_for(&self, target_ref: &str) -> bool {
        self.lock().ordered.iter().any(|e| e.targets(target_ref))
    }

    pub fn list_pending_for(&self, target_ref: &str) -> Vec<Arc<Entry>> {
        self.lock()
            .ordered
            .iter()
            .filter(|e| e.targets(target_ref))
            .cloned()
            .collect()
    }

    /// Remove every entry aimed at `target_ref`. Returns how many were dropped.
    pub fn purge_target(&self, target_ref: &str) -> usize {
        let (count, pending) = {
            let mut state = self.lock();
            let doomed: Vec<String> = state
                .ordered
                .iter()
                .filter(|e| e.targets(target_ref))
                .map(|e| e.id().to_string())
                .collect();
            for id in &doomed {
                state.take(id);
            }
            let pending = (!doomed.is_empty()).then(|| state.commit());
            (doomed.len(), pending)
        };
        if let Some(pending) = pending {
            self.persist(pending);
            info!(target = %target_ref, count, "purged scheduled builds for deleted target");
        }
        count
    }

    /// Point every entry aimed at `old_ref` at `new_ref`, in place.
    ///
    /// The target is not part of the ordering key, so nothing is re-sorted.
    pub fn rename_target(&self, old_ref: &str, new_ref: &str) -> usize {
        let (count, pending) = {
            let mut state = self.lock();
            let mut count = 0;
            for e in state.ordered.iter().filter(|e| e.targets(old_ref)) {
                e.set_target_ref(new_ref);
                count += 1;
            }
            let pending = (count > 0).then(|| state.commit());
            (count, pending)
        };
        if let Some(pending) = pending {
            self.persist(pending);
            info!(from = %old_ref, to = %new_ref, count, "retargeted scheduled builds");
        }
        count
    }

    /// Cancel a pending entry.
    ///
    /// The entry is flagged aborted. If no sweep has claimed it yet it is
    /// removed right away; otherwise the delayed fire sees the flag, skips
    /// the build and removes it. Returns `false` if the id is not pending.
    pub fn cancel(&self, id: &str) -> bool {
        let (found, pending) = {
            let mut state = self.lock();
            let Some(entry) = state.by_id.get(id).cloned() else {
                return false;
            };
            entry.abort();
            if entry.is_started() {
                (true, None)
            } else {
                state.take(id);
                (true, Some(state.commit()))
            }
        };
        match pending {
            Some(pending) => {
                self.persist(pending);
                info!(entry_id = %id, "scheduled build cancelled");
            }
            None => info!(entry_id = %id, "scheduled build cancelled after dispatch; fire will be skipped"),
        }
        found
    }

    /// Drop everything.
    pub fn clear(&self) {
        let pending = {
            let mut state = self.lock();
            state.ordered.clear();
            state.by_id.clear();
            state.commit()
        };
        self.persist(pending);
    }
}
