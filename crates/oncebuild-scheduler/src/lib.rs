//! `oncebuild-scheduler`: run-once scheduled builds.
//!
//! # Overview
//!
//! Pending builds live in a [`registry::Registry`], an ordered set shared by
//! request handlers and the [`worker::SweepWorker`]. Every mutation writes a
//! full snapshot through a [`store::SnapshotStore`], so pending work survives
//! restarts.
//!
//! Once per tick the worker walks the registry in `(fire_at, id)` order and
//! hands each entry due before the next tick to a [`dispatch::Dispatcher`],
//! which fires it after the remaining delay. Entries that were missed by more
//! than the grace period are either dropped or fired immediately, depending
//! on their `trigger_on_missed` flag.
//!
//! | Component                               | Role                                       |
//! |-----------------------------------------|--------------------------------------------|
//! | [`service::ScheduleService`]            | schedule, cancel and query                  |
//! | [`worker::SweepWorker`]                 | periodic due-check                         |
//! | [`dispatch::TokioDispatcher`]           | delayed fire on a Tokio task               |
//! | [`lifecycle::TargetLifecycleListener`]  | follows target deletion and renames        |

pub mod db;
pub mod dispatch;
pub mod entry;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod schedule;
pub mod service;
pub mod store;
pub mod worker;

pub use dispatch::{BuildTrigger, Dispatcher, FireOutcome, LogTrigger, TokioDispatcher, TriggerRequest};
pub use entry::{Entry, StoredEntry};
pub use error::{Result, SchedulerError};
pub use lifecycle::TargetLifecycleListener;
pub use registry::Registry;
pub use service::{ScheduleRequest, ScheduleService};
pub use store::{open_store, JsonFileStore, MemoryStore, SnapshotStore, SqliteStore};
pub use worker::{SweepWorker, TickReport};
