// ABOUTME: Restart-aware stats ledger: run markers in memory, counters in a StatsStore.
// ABOUTME: Start, stop, and restart legs used by every lifecycle trigger path.

use crate::stats::{Counter, StatsDocument, StatsStore};
use crate::worker::WorkerKind;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct RunMarker {
    started: Instant,
    started_at: DateTime<Utc>,
}

/// Accounting for worker runs.
///
/// Markers live only in memory: after the control process restarts every
/// worker is markerless, and the next stop adds zero elapsed time.
pub struct StatsLedger {
    store: Arc<dyn StatsStore>,
    markers: Mutex<HashMap<WorkerKind, RunMarker>>,
    // Serialises read-modify-write of the store.
    write: Mutex<()>,
}

impl StatsLedger {
    pub fn new(store: Arc<dyn StatsStore>) -> Self {
        Self {
            store,
            markers: Mutex::new(HashMap::new()),
            write: Mutex::new(()),
        }
    }

    /// Plain start leg: fresh marker, `start_count += 1`.
    pub fn record_start(&self, kind: WorkerKind) -> StatsDocument {
        self.set_marker(kind);
        self.persist(|store| store.increment(kind, Counter::Start, 1))
    }

    /// Restart start leg: fresh marker, `restart_count += 1`.
    pub fn record_restart(&self, kind: WorkerKind) -> StatsDocument {
        self.set_marker(kind);
        self.persist(|store| store.increment(kind, Counter::Restart, 1))
    }

    /// Stop leg shared by plain stops and restarts: `stop_count += 1` and
    /// the marker's elapsed whole seconds added to `run_seconds`. With no
    /// marker the elapsed time is zero. Returns the seconds added.
    pub fn record_stop(&self, kind: WorkerKind) -> u64 {
        let elapsed = self
            .take_marker(kind)
            .map(|marker| marker.started.elapsed().as_secs())
            .unwrap_or(0);
        self.persist(|store| {
            store.update_worker(kind, &mut |stats| {
                stats.stop_count += 1;
                stats.run_seconds += elapsed;
            })
        });
        tracing::debug!(kind = %kind, elapsed_secs = elapsed, "Recorded stop");
        elapsed
    }

    pub fn record_definition_reload(&self) -> StatsDocument {
        self.persist(|store| store.increment_reloads())
    }

    pub fn has_marker(&self, kind: WorkerKind) -> bool {
        self.markers
            .lock()
            .map(|m| m.contains_key(&kind))
            .unwrap_or(false)
    }

    /// Seconds since the current run started, rounded. `None` when no run
    /// is being tracked.
    pub fn uptime_seconds(&self, kind: WorkerKind) -> Option<u64> {
        self.marker(kind)
            .map(|m| m.started.elapsed().as_secs_f64().round() as u64)
    }

    pub fn started_at(&self, kind: WorkerKind) -> Option<DateTime<Utc>> {
        self.marker(kind).map(|m| m.started_at)
    }

    pub fn snapshot(&self) -> StatsDocument {
        self.store.load()
    }

    fn marker(&self, kind: WorkerKind) -> Option<RunMarker> {
        self.markers.lock().ok().and_then(|m| m.get(&kind).copied())
    }

    fn set_marker(&self, kind: WorkerKind) {
        if let Ok(mut markers) = self.markers.lock() {
            markers.insert(
                kind,
                RunMarker {
                    started: Instant::now(),
                    started_at: Utc::now(),
                },
            );
        }
    }

    fn take_marker(&self, kind: WorkerKind) -> Option<RunMarker> {
        self.markers.lock().ok().and_then(|mut m| m.remove(&kind))
    }

    /// Run one store update. Persist failures are logged; the in-memory view
    /// still reflects the last readable state.
    fn persist<F>(&self, update: F) -> StatsDocument
    where
        F: FnOnce(&dyn StatsStore) -> Result<StatsDocument, crate::error::StoreError>,
    {
        let _guard = self.write.lock();
        match update(self.store.as_ref()) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to persist stats");
                self.store.load()
            }
        }
    }
}
