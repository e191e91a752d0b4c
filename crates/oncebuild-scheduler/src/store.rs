//! Durable snapshot stores backing the [`Registry`](crate::registry::Registry).
//!
//! Every store persists the *whole* registry on each save; there is no
//! incremental update. A missing snapshot loads as empty.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::DateTime;
use oncebuild_core::config::{StorageBackend, StorageConfig};
use oncebuild_core::{Cause, ParameterValue};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::init_db;
use crate::entry::StoredEntry;
use crate::error::{Result, SchedulerError};

/// Tag written into every JSON snapshot document.
pub const SNAPSHOT_KIND: &str = "scheduled_builds";
pub const SNAPSHOT_VERSION: u32 = 1;

/// Where the registry's snapshot lives.
pub trait SnapshotStore: Send + Sync {
    /// Read the full snapshot. A missing snapshot is `Ok(vec![])`.
    fn load(&self) -> Result<Vec<StoredEntry>>;

    /// Replace the full snapshot with `entries`.
    fn save(&self, entries: &[StoredEntry]) -> Result<()>;

    /// Human-readable location for log lines.
    fn location(&self) -> String;
}

/// Open the store selected by `cfg`.
pub fn open_store(cfg: &StorageConfig) -> Result<Arc<dyn SnapshotStore>> {
    let store: Arc<dyn SnapshotStore> = match cfg.backend {
        StorageBackend::Json => Arc::new(JsonFileStore::new(&cfg.path)),
        StorageBackend::Sqlite => Arc::new(SqliteStore::open(&cfg.path)?),
    };
    info!(backend = ?cfg.backend, location = %store.location(), "snapshot store opened");
    Ok(store)
}

// ---------------------------------------------------------------------------
// JSON file
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotDocument {
    kind: String,
    version: u32,
    entries: Vec<StoredEntry>,
}

/// A single JSON document, replaced atomically (temp file + rename) on save.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotStore for JsonFileStore {
    fn load(&self) -> Result<Vec<StoredEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let doc: SnapshotDocument = serde_json::from_str(&raw)?;
        if doc.kind != SNAPSHOT_KIND {
            return Err(SchedulerError::CorruptSnapshot(format!(
                "expected kind '{SNAPSHOT_KIND}', found '{}'",
                doc.kind
            )));
        }
        if doc.version > SNAPSHOT_VERSION {
            return Err(SchedulerError::CorruptSnapshot(format!(
                "unsupported snapshot version {}",
                doc.version
            )));
        }
        Ok(doc.entries)
    }

    fn save(&self, entries: &[StoredEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let doc = SnapshotDocument {
            kind: SNAPSHOT_KIND.to_string(),
            version: SNAPSHOT_VERSION,
            entries: entries.to_vec(),
        };
        let data = serde_json::to_vec_pretty(&doc)?;

        // temp file + rename so a crash mid-write never leaves a torn snapshot
        let tmp = self.tmp_path();
        std::fs::write(&tmp, &data)?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

/// A SQLite file whose `scheduled_builds` table is rewritten in one
/// transaction per save.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    location: String,
}

impl SqliteStore {
    /// Open (or create) the snapshot database at `path`.
    ///
    /// A file that exists but is not a usable database is renamed to
    /// `<name>.corrupt` and replaced with an empty one, so a damaged
    /// snapshot never prevents startup.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        match Self::open_file(path) {
            Ok(store) => Ok(store),
            Err(e) if path.exists() => {
                let aside = corrupt_path(path);
                warn!(
                    location = %path.display(),
                    moved_to = %aside.display(),
                    error = %e,
                    "unreadable snapshot database; starting empty"
                );
                std::fs::rename(path, &aside)?;
                Self::open_file(path)
            }
            Err(e) => Err(e),
        }
    }

    fn open_file(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, path.display().to_string())
    }

    pub fn with_connection(conn: Connection, location: impl Into<String>) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            location: location.into(),
        })
    }
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".corrupt");
    path.with_file_name(name)
}

impl SnapshotStore for SqliteStore {
    fn load(&self) -> Result<Vec<StoredEntry>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT id, target, fire_at, parameters, trigger_on_missed, cause
             FROM scheduled_builds ORDER BY fire_at_utc_ms, id",
        )?;
        let entries = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?, // id
                    row.get::<_, String>(1)?, // target
                    row.get::<_, String>(2)?, // fire_at
                    row.get::<_, String>(3)?, // parameters JSON
                    row.get::<_, bool>(4)?,   // trigger_on_missed
                    row.get::<_, String>(5)?, // cause JSON
                ))
            })?
            .filter_map(|r| {
                let (id, target, fire_at, params_json, trigger_on_missed, cause_json) = match r {
                    Ok(row) => row,
                    Err(e) => {
                        warn!("unreadable scheduled build row: {e}");
                        return None;
                    }
                };
                let parsed = DateTime::parse_from_rfc3339(&fire_at)
                    .map_err(|e| e.to_string())
                    .and_then(|fire_at| {
                        let parameters: Vec<ParameterValue> =
                            serde_json::from_str(&params_json).map_err(|e| e.to_string())?;
                        let cause: Cause = serde_json::from_str(&cause_json).map_err(|e| e.to_string())?;
                        Ok((fire_at, parameters, cause))
                    });
                match parsed {
                    Ok((fire_at, parameters, cause)) => Some(StoredEntry {
                        id,
                        target,
                        fire_at,
                        parameters,
                        trigger_on_missed,
                        cause,
                    }),
                    Err(e) => {
                        warn!(entry_id = %id, "skipping malformed scheduled build row: {e}");
                        None
                    }
                }
            })
            .collect();
        Ok(entries)
    }

    fn save(&self, entries: &[StoredEntry]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM scheduled_builds", [])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO scheduled_builds
                 (id, target, fire_at, fire_at_utc_ms, parameters, trigger_on_missed, cause)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for e in entries {
                insert.execute(rusqlite::params![
                    e.id,
                    e.target,
                    e.fire_at.to_rfc3339(),
                    e.fire_at.timestamp_millis(),
                    serde_json::to_string(&e.parameters)?,
                    e.trigger_on_missed,
                    serde_json::to_string(&e.cause)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn location(&self) -> String {
        self.location.clone()
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// In-process store; nothing outlives the process. Counts saves and can be
/// told to fail them.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<Vec<StoredEntry>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed the snapshot, as if a previous process had written it.
    pub fn with_entries(entries: Vec<StoredEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
            ..Default::default()
        }
    }

    pub fn saved(&self) -> Vec<StoredEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self) -> Result<Vec<StoredEntry>> {
        Ok(self.saved())
    }

    fn save(&self, entries: &[StoredEntry]) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(SchedulerError::Io(std::io::Error::other("simulated write failure")));
        }
        *self.entries.lock().unwrap_or_else(|e| e.into_inner()) = entries.to_vec();
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
