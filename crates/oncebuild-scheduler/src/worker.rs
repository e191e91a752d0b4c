use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use oncebuild_core::config::SchedulerConfig;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;
use crate::entry::Entry;
use crate::error::{Result, SchedulerError};
use crate::registry::Registry;
use crate::schedule::{initial_delay, sweep_horizon};

/// What one sweep did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// `(entry id, delay)` for every entry handed to the dispatcher.
    pub dispatched: Vec<(String, Duration)>,
    /// Missed entries dropped without firing.
    pub discarded: Vec<String>,
    /// Entries skipped because an earlier sweep already claimed them.
    pub already_started: usize,
    /// Entries whose evaluation failed; the rest of the sweep carried on.
    pub errors: usize,
}

enum Step {
    /// This and every later entry is not yet due.
    Stop,
    SkipStarted,
    Discard,
    Dispatch(Duration),
}

/// Periodic sweep over the registry: decides what is due and hands it off.
///
/// Ticks are aligned to multiples of the tick period. Each tick works on an
/// ordered copy of the registry, so request threads are never blocked for
/// the length of a sweep.
#[derive(Clone)]
pub struct SweepWorker {
    registry: Arc<Registry>,
    dispatcher: Arc<dyn Dispatcher>,
    tick_period: Duration,
    grace_period: Duration,
}

impl SweepWorker {
    pub fn new(registry: Arc<Registry>, dispatcher: Arc<dyn Dispatcher>, cfg: &SchedulerConfig) -> Self {
        Self {
            registry,
            dispatcher,
            tick_period: cfg.tick_period(),
            grace_period: cfg.grace_period(),
        }
    }

    /// Main loop. Sweeps once per tick until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let first = initial_delay(Utc::now(), self.tick_period);
        info!(
            tick_secs = self.tick_period.as_secs(),
            grace_secs = self.grace_period.as_secs(),
            first_tick_in_ms = first.as_millis() as u64,
            "sweep worker started"
        );

        let mut interval = interval_at(Instant::now() + first, self.tick_period);
        // After a long pause, sweep once rather than replaying every missed tick.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // discards persist the snapshot; keep that file I/O off the runtime threads
                    let worker = self.clone();
                    let report = match tokio::task::spawn_blocking(move || worker.sweep(Utc::now())).await {
                        Ok(report) => report,
                        Err(e) => {
                            error!(error = %e, "sweep task failed");
                            continue;
                        }
                    };
                    if !report.dispatched.is_empty() || !report.discarded.is_empty() {
                        info!(
                            dispatched = report.dispatched.len(),
                            discarded = report.discarded.len(),
                            "sweep complete"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("sweep worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Evaluate every pending entry against `now`.
    pub fn sweep(&self, now: DateTime<Utc>) -> TickReport {
        let horizon = sweep_horizon(now, self.tick_period);
        let mut report = TickReport::default();

        for entry in self.registry.snapshot() {
            debug!(entry_id = %entry.id(), target = %entry.target_ref(), fire_at = %entry.formatted_time(), "evaluating scheduled build");
            match self.evaluate(&entry, now, horizon) {
                Ok(Step::Stop) => break,
                Ok(Step::SkipStarted) => report.already_started += 1,
                Ok(Step::Discard) => {
                    self.registry.remove(entry.id());
                    report.discarded.push(entry.id().to_string());
                }
                Ok(Step::Dispatch(delay)) => {
                    if entry.try_start() {
                        self.dispatcher.dispatch(Arc::clone(&entry), delay);
                        report.dispatched.push((entry.id().to_string(), delay));
                    } else {
                        report.already_started += 1;
                    }
                }
                Err(e) => {
                    error!(entry_id = %entry.id(), error = %e, "failed to evaluate scheduled build");
                    report.errors += 1;
                }
            }
        }
        report
    }

    fn evaluate(&self, entry: &Entry, now: DateTime<Utc>, horizon: DateTime<Utc>) -> Result<Step> {
        if entry.is_started() {
            return Ok(Step::SkipStarted);
        }
        let fire_at = entry.fire_at().with_timezone(&Utc);
        // The snapshot is ordered, so nothing after this is due either.
        if fire_at > horizon {
            return Ok(Step::Stop);
        }

        let delay = fire_at - now;
        if delay >= TimeDelta::zero() {
            let delay = delay
                .to_std()
                .map_err(|e| SchedulerError::DelayOutOfRange(e.to_string()))?;
            return Ok(Step::Dispatch(delay));
        }

        let overrun = -delay;
        let grace = TimeDelta::from_std(self.grace_period)
            .map_err(|e| SchedulerError::DelayOutOfRange(e.to_string()))?;
        if overrun > grace {
            if !entry.trigger_on_missed() {
                warn!(
                    entry_id = %entry.id(),
                    target = %entry.target_ref(),
                    missed_by_secs = overrun.num_seconds(),
                    "scheduled build was missed; it will be skipped"
                );
                return Ok(Step::Discard);
            }
            warn!(
                entry_id = %entry.id(),
                target = %entry.target_ref(),
                missed_by_secs = overrun.num_seconds(),
                "scheduled build was missed; starting it immediately"
            );
        }
        Ok(Step::Dispatch(Duration::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::RecordingTrigger;
    use crate::dispatch::{fire, FireOutcome};
    use crate::store::MemoryStore;
    use std::sync::Mutex;

    /// Captures dispatches instead of spawning timers.
    #[derive(Default)]
    struct CapturingDispatcher {
        dispatched: Mutex<Vec<(Arc<Entry>, Duration)>>,
    }

    impl Dispatcher for CapturingDispatcher {
        fn dispatch(&self, entry: Arc<Entry>, delay: Duration) {
            self.dispatched.lock().unwrap().push((entry, delay));
        }
    }

    struct Harness {
        registry: Arc<Registry>,
        dispatcher: Arc<CapturingDispatcher>,
        worker: SweepWorker,
    }

    fn harness() -> Harness {
        let registry = Arc::new(Registry::new(Arc::new(MemoryStore::new())));
        let dispatcher = Arc::new(CapturingDispatcher::default());
        let cfg = SchedulerConfig {
            tick_secs: 60,
            grace_period_secs: 120,
            ..Default::default()
        };
        let worker = SweepWorker::new(Arc::clone(&registry), dispatcher.clone(), &cfg);
        Harness {
            registry,
            dispatcher,
            worker,
        }
    }

    fn now() -> DateTime<Utc> {
        // 12 s past the minute, so the horizon is 48 s away.
        DateTime::parse_from_rfc3339("2026-06-01T12:00:12Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn entry_at(id: &str, offset_secs: i64) -> Entry {
        Entry::with_id(id, "job", (now() + TimeDelta::seconds(offset_secs)).fixed_offset())
    }

    #[test]
    fn missed_beyond_grace_without_flag_is_discarded() {
        let h = harness();
        h.registry.add(entry_at("late", -200));

        let report = h.worker.sweep(now());
        assert_eq!(report.discarded, vec!["late"]);
        assert!(report.dispatched.is_empty());
        assert!(h.dispatcher.dispatched.lock().unwrap().is_empty());
        assert!(h.registry.is_empty());
    }

    #[test]
    fn missed_beyond_grace_with_flag_fires_immediately() {
        let h = harness();
        h.registry.add(entry_at("late", -200).with_trigger_on_missed(true));

        let report = h.worker.sweep(now());
        assert_eq!(report.dispatched, vec![("late".to_string(), Duration::ZERO)]);
        // removal happens at fire time, not at sweep time
        assert!(h.registry.contains("late"));
        assert!(h.registry.get("late").unwrap().is_started());
    }

    #[test]
    fn missed_within_grace_fires_with_zero_delay() {
        let h = harness();
        h.registry.add(entry_at("slightly-late", -90));

        let report = h.worker.sweep(now());
        assert_eq!(report.dispatched, vec![("slightly-late".to_string(), Duration::ZERO)]);
        assert!(report.discarded.is_empty());
    }

    #[test]
    fn due_within_tick_fires_with_remaining_delay() {
        let h = harness();
        h.registry.add(entry_at("soon", 30));

        let report = h.worker.sweep(now());
        assert_eq!(report.dispatched, vec![("soon".to_string(), Duration::from_secs(30))]);
        assert!(h.registry.contains("soon"));
    }

    #[test]
    fn future_entries_are_left_alone() {
        let h = harness();
        h.registry.add(entry_at("later", 5 * 60));

        let report = h.worker.sweep(now());
        assert_eq!(report, TickReport::default());
        assert!(h.registry.contains("later"));
        assert!(!h.registry.get("later").unwrap().is_started());
    }

    #[test]
    fn entry_on_next_boundary_waits_for_next_tick() {
        let h = harness();
        // exactly 12:01:00, the next tick
        h.registry.add(entry_at("boundary", 48));
        h.registry.add(entry_at("just-before", 47));

        let report = h.worker.sweep(now());
        let ids: Vec<_> = report.dispatched.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["just-before"]);
    }

    #[test]
    fn processes_in_order_and_stops_at_first_future_entry() {
        let h = harness();
        h.registry.add(entry_at("b", 10));
        h.registry.add(entry_at("a", 10));
        h.registry.add(entry_at("first", -5));
        h.registry.add(entry_at("far", 3600));

        let report = h.worker.sweep(now());
        let ids: Vec<_> = report.dispatched.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["first", "a", "b"]);
    }

    #[test]
    fn second_sweep_does_not_redispatch() {
        let h = harness();
        h.registry.add(entry_at("soon", 20));

        assert_eq!(h.worker.sweep(now()).dispatched.len(), 1);
        let again = h.worker.sweep(now() + TimeDelta::seconds(5));
        assert!(again.dispatched.is_empty());
        assert_eq!(again.already_started, 1);
        assert_eq!(h.dispatcher.dispatched.lock().unwrap().len(), 1);
    }

    #[test]
    fn far_past_and_far_future_do_not_break_the_sweep() {
        let h = harness();
        h.registry.add(Entry::with_id(
            "ancient",
            "job",
            DateTime::parse_from_rfc3339("1900-01-01T00:00:00Z").unwrap(),
        ));
        h.registry.add(Entry::with_id(
            "distant",
            "job",
            DateTime::parse_from_rfc3339("9999-12-31T23:59:59Z").unwrap(),
        ));

        let report = h.worker.sweep(now());
        assert_eq!(report.discarded, vec!["ancient"]);
        assert!(h.registry.contains("distant"));
    }

    #[test]
    fn cancel_before_sweep_prevents_dispatch() {
        let h = harness();
        h.registry.add(entry_at("soon", 10));
        assert!(h.registry.cancel("soon"));

        assert!(h.worker.sweep(now()).dispatched.is_empty());
    }

    #[tokio::test]
    async fn cancel_after_dispatch_skips_fire_and_removes() {
        let h = harness();
        h.registry.add(entry_at("soon", 10));
        h.worker.sweep(now());

        assert!(h.registry.cancel("soon"));
        assert!(h.registry.contains("soon"));

        let trigger = RecordingTrigger::default();
        let (entry, _) = h.dispatcher.dispatched.lock().unwrap().remove(0);
        assert_eq!(fire(&h.registry, &trigger, &entry).await, FireOutcome::Aborted);
        assert!(trigger.calls.lock().unwrap().is_empty());
        assert!(h.registry.is_empty());
    }

    #[test]
    fn add_then_remove_races_with_sweeps() {
        let h = harness();
        h.registry.add(entry_at("far", 3600));
        let done = std::sync::atomic::AtomicBool::new(false);

        std::thread::scope(|s| {
            s.spawn(|| {
                while !done.load(std::sync::atomic::Ordering::Relaxed) {
                    h.worker.sweep(now());
                }
            });
            let writers: Vec<_> = (0..4)
                .map(|t| {
                    let registry = &h.registry;
                    s.spawn(move || {
                        for i in 0..200 {
                            let id = format!("t{t}-{i}");
                            registry.add(entry_at(&id, 10));
                            assert!(registry.remove(&id).is_some());
                        }
                    })
                })
                .collect();
            for w in writers {
                w.join().unwrap();
            }
            done.store(true, std::sync::atomic::Ordering::Relaxed);
        });

        let ids: Vec<_> = h.registry.snapshot().iter().map(|e| e.id().to_string()).collect();
        assert_eq!(ids, vec!["far"]);
        assert!(!h.registry.get("far").unwrap().is_started());
        // anything a sweep caught was already gone from the registry afterwards
        for (entry, _) in h.dispatcher.dispatched.lock().unwrap().iter() {
            assert!(entry.is_started());
            assert!(!h.registry.contains(entry.id()));
        }
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let h = harness();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(h.worker.run(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("worker did not stop")
            .unwrap();
    }
}
