// ABOUTME: Persisted usage counters keyed by worker kind.
// ABOUTME: JSON file store with increment and bulk-update; corrupt or missing reads as zero.

use crate::error::StoreError;
use crate::worker::WorkerKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;

/// Counters for one worker kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerStats {
    pub start_count: u64,
    pub stop_count: u64,
    pub restart_count: u64,
    /// Cumulative whole seconds the worker has been observed running
    pub run_seconds: u64,
}

/// Counters for the protocol-definition set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefinitionStats {
    pub reload_count: u64,
}

/// Everything persisted in the stats file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsDocument {
    pub simulator: WorkerStats,
    pub traps: WorkerStats,
    pub mibs: DefinitionStats,
}

impl StatsDocument {
    pub fn worker(&self, kind: WorkerKind) -> &WorkerStats {
        match kind {
            WorkerKind::Simulator => &self.simulator,
            WorkerKind::Traps => &self.traps,
        }
    }

    pub fn worker_mut(&mut self, kind: WorkerKind) -> &mut WorkerStats {
        match kind {
            WorkerKind::Simulator => &mut self.simulator,
            WorkerKind::Traps => &mut self.traps,
        }
    }
}

/// Individually incrementable worker counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Start,
    Stop,
    Restart,
    RunSeconds,
}

impl WorkerStats {
    fn counter_mut(&mut self, counter: Counter) -> &mut u64 {
        match counter {
            Counter::Start => &mut self.start_count,
            Counter::Stop => &mut self.stop_count,
            Counter::Restart => &mut self.restart_count,
            Counter::RunSeconds => &mut self.run_seconds,
        }
    }
}

/// Load-on-demand, write-through key-value store for [`StatsDocument`].
///
/// The provided read-modify-write helpers are not locked; callers that can
/// overlap must serialise around them.
pub trait StatsStore: Send + Sync {
    /// Current contents. Never fails: unreadable state is all-zero.
    fn load(&self) -> StatsDocument;

    fn save(&self, doc: &StatsDocument) -> Result<(), StoreError>;

    /// Apply several changes to one worker's counters in a single write.
    fn update_worker(
        &self,
        kind: WorkerKind,
        apply: &mut dyn FnMut(&mut WorkerStats),
    ) -> Result<StatsDocument, StoreError> {
        let mut doc = self.load();
        apply(doc.worker_mut(kind));
        self.save(&doc)?;
        Ok(doc)
    }

    fn increment(
        &self,
        kind: WorkerKind,
        counter: Counter,
        by: u64,
    ) -> Result<StatsDocument, StoreError> {
        self.update_worker(kind, &mut |stats| *stats.counter_mut(counter) += by)
    }

    fn increment_reloads(&self) -> Result<StatsDocument, StoreError> {
        let mut doc = self.load();
        doc.mibs.reload_count += 1;
        self.save(&doc)?;
        Ok(doc)
    }
}

/// Stats persisted as pretty JSON on disk.
pub struct JsonStatsFile {
    path: PathBuf,
}

impl JsonStatsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl StatsStore for JsonStatsFile {
    fn load(&self) -> StatsDocument {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return StatsDocument::default(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Unreadable stats file, using zeros");
                return StatsDocument::default();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(path = %self.path.display(), error = %e, "Corrupt stats file, using zeros");
            StatsDocument::default()
        })
    }

    fn save(&self, doc: &StatsDocument) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let content = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(|e| self.io_error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;
        Ok(())
    }
}

/// Stats held only in memory.
#[derive(Default)]
pub struct MemoryStats {
    doc: Mutex<StatsDocument>,
}

impl StatsStore for MemoryStats {
    fn load(&self) -> StatsDocument {
        self.doc.lock().map(|d| d.clone()).unwrap_or_default()
    }

    fn save(&self, doc: &StatsDocument) -> Result<(), StoreError> {
        if let Ok(mut guard) = self.doc.lock() {
            *guard = doc.clone();
        }
        Ok(())
    }
}
