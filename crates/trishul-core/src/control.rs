// ABOUTME: Control plane: the composition root owning both lifecycle managers and the ledger.
// ABOUTME: Every start, stop, and restart trigger goes through here so stats stay consistent.

use crate::broadcast::BroadcastQueue;
use crate::config::Config;
use crate::definitions::{DefinitionSet, DefinitionSummary};
use crate::error::ControlError;
use crate::launcher::Launcher;
use crate::ledger::StatsLedger;
use crate::lifecycle::LifecycleManager;
use crate::message::{PushMessage, WorkerStatus};
use crate::stats::{StatsDocument, StatsStore};
use crate::worker::{ConfigOverrides, StartOutcome, StopOutcome, WorkerKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveStatus {
    Saved,
}

/// Result of saving the simulator's data file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataUpdate {
    pub status: SaveStatus,
    pub restarted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<StartOutcome>,
    pub message: String,
}

/// Result of reloading the definition set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReloadOutcome {
    #[serde(flatten)]
    pub summary: DefinitionSummary,
    /// Workers that were running before the reload, and how their restart went.
    pub restarted: BTreeMap<WorkerKind, StartOutcome>,
}

/// Owns the per-kind lifecycle managers, the stats ledger, the definition
/// set, and the producer side of the broadcast queue.
///
/// Each kind's manager sits behind its own lock. Accounting for a call is
/// done while that lock is held; broadcasts are queued after it is released.
pub struct ControlPlane {
    simulator: Mutex<LifecycleManager>,
    traps: Mutex<LifecycleManager>,
    ledger: StatsLedger,
    definitions: Arc<dyn DefinitionSet>,
    queue: BroadcastQueue,
    data_file: PathBuf,
    auto_start: Vec<WorkerKind>,
}

impl ControlPlane {
    pub fn new(
        config: &Config,
        launcher: Arc<dyn Launcher>,
        store: Arc<dyn StatsStore>,
        definitions: Arc<dyn DefinitionSet>,
        queue: BroadcastQueue,
    ) -> Self {
        let manager = |kind: WorkerKind| {
            Mutex::new(LifecycleManager::new(
                kind,
                config.worker(kind).initial_config(kind),
                launcher.clone(),
                &config.lifecycle,
            ))
        };
        Self {
            simulator: manager(WorkerKind::Simulator),
            traps: manager(WorkerKind::Traps),
            ledger: StatsLedger::new(store),
            definitions,
            queue,
            data_file: config.custom_data_file(),
            auto_start: WorkerKind::ALL
                .into_iter()
                .filter(|kind| config.worker(*kind).auto_start)
                .collect(),
        }
    }

    fn manager(&self, kind: WorkerKind) -> &Mutex<LifecycleManager> {
        match kind {
            WorkerKind::Simulator => &self.simulator,
            WorkerKind::Traps => &self.traps,
        }
    }

    /// Explicit start: start leg only.
    pub async fn start(&self, kind: WorkerKind, overrides: Option<&ConfigOverrides>) -> StartOutcome {
        let outcome = {
            let mut manager = self.manager(kind).lock().await;
            let outcome = manager.start(overrides).await;
            if outcome.is_started() {
                self.ledger.record_start(kind);
            }
            outcome
        };
        if outcome.is_started() {
            self.publish_changes().await;
        }
        outcome
    }

    /// Explicit stop: stop leg only, counted when a worker was held.
    pub async fn stop(&self, kind: WorkerKind) -> StopOutcome {
        let outcome = {
            let mut manager = self.manager(kind).lock().await;
            let outcome = manager.stop().await;
            if outcome == StopOutcome::Stopped {
                self.ledger.record_stop(kind);
            }
            outcome
        };
        if outcome == StopOutcome::Stopped {
            self.publish_changes().await;
        }
        outcome
    }

    /// Explicit restart.
    pub async fn restart(&self, kind: WorkerKind, overrides: Option<&ConfigOverrides>) -> StartOutcome {
        let outcome = {
            let mut manager = self.manager(kind).lock().await;
            self.accounted_restart(&mut manager, overrides).await
        };
        self.publish_changes().await;
        outcome
    }

    /// The one restart routine every trigger shares. The caller holds the
    /// manager's lock for the whole sequence.
    async fn accounted_restart(
        &self,
        manager: &mut LifecycleManager,
        overrides: Option<&ConfigOverrides>,
    ) -> StartOutcome {
        let kind = manager.kind();
        self.ledger.record_stop(kind);
        let outcome = manager.restart(overrides).await;
        if outcome.is_started() {
            self.ledger.record_restart(kind);
        }
        outcome
    }

    /// Write the simulator's data file, restarting the simulator if it is
    /// running so it picks the data up.
    pub async fn update_simulator_data(
        &self,
        data: &serde_json::Value,
    ) -> Result<DataUpdate, ControlError> {
        let content = serde_json::to_string_pretty(data)?;
        let data_error = |source: std::io::Error| ControlError::DataFile {
            path: self.data_file.clone(),
            source,
        };

        let restart = {
            let mut manager = self.simulator.lock().await;
            if let Some(parent) = self.data_file.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(data_error)?;
            }
            tokio::fs::write(&self.data_file, content)
                .await
                .map_err(data_error)?;

            if manager.status().running {
                Some(self.accounted_restart(&mut manager, None).await)
            } else {
                None
            }
        };

        let message = match &restart {
            None => "Data saved".to_string(),
            Some(outcome) if outcome.is_started() => "Data saved, simulator restarted".to_string(),
            Some(StartOutcome::Error { message }) => {
                format!("Data saved, simulator restart failed: {message}")
            }
            Some(_) => "Data saved".to_string(),
        };
        if restart.is_some() {
            self.publish_changes().await;
        }

        Ok(DataUpdate {
            status: SaveStatus::Saved,
            restarted: restart.as_ref().is_some_and(StartOutcome::is_started),
            restart,
            message,
        })
    }

    /// Current simulator data. A missing or corrupt file reads as `{}`.
    pub async fn simulator_data(&self) -> Result<serde_json::Value, ControlError> {
        let empty = || serde_json::Value::Object(Default::default());
        let content = match tokio::fs::read_to_string(&self.data_file).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(empty()),
            Err(source) => {
                return Err(ControlError::DataFile {
                    path: self.data_file.clone(),
                    source,
                })
            }
        };
        Ok(serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(path = %self.data_file.display(), error = %e, "Corrupt simulator data file");
            empty()
        }))
    }

    /// Reload the definition set and restart whichever workers were running
    /// when the reload began.
    pub async fn reload_definitions(&self) -> Result<ReloadOutcome, ControlError> {
        let (summary, restarted) = {
            let mut simulator = self.simulator.lock().await;
            let mut traps = self.traps.lock().await;
            let was_running = [simulator.status().running, traps.status().running];

            let summary = self.definitions.reload().await?;
            self.ledger.record_definition_reload();

            let mut restarted = BTreeMap::new();
            for (manager, running) in [&mut *simulator, &mut *traps].into_iter().zip(was_running) {
                if running {
                    let outcome = self.accounted_restart(manager, None).await;
                    restarted.insert(manager.kind(), outcome);
                }
            }
            (summary, restarted)
        };

        tracing::info!(loaded = summary.loaded, restarted = restarted.len(), "Definitions reloaded");
        self.queue.push(PushMessage::Mibs { mibs: summary }.encode());
        self.publish_changes().await;
        Ok(ReloadOutcome { summary, restarted })
    }

    pub async fn status(&self, kind: WorkerKind) -> WorkerStatus {
        let status = self.manager(kind).lock().await.status();
        let (uptime_seconds, started_at) = if status.running {
            (self.ledger.uptime_seconds(kind), self.ledger.started_at(kind))
        } else {
            (None, None)
        };
        WorkerStatus {
            kind,
            running: status.running,
            pid: status.pid,
            config: status.config,
            uptime_seconds,
            started_at,
        }
    }

    pub fn stats(&self) -> StatsDocument {
        self.ledger.snapshot()
    }

    pub fn definitions(&self) -> DefinitionSummary {
        self.definitions.summary()
    }

    /// Snapshot sent to a client right after it connects.
    pub async fn full_state(&self) -> PushMessage {
        PushMessage::FullState {
            simulator: self.status(WorkerKind::Simulator).await,
            traps: self.status(WorkerKind::Traps).await,
            stats: self.stats(),
            mibs: self.definitions(),
        }
    }

    /// Start every worker configured to come up with the server.
    pub async fn auto_start(&self) {
        for kind in self.auto_start.clone() {
            match self.start(kind, None).await {
                StartOutcome::Error { message } => {
                    tracing::warn!(kind = %kind, error = %message, "Auto-start failed")
                }
                _ => tracing::info!(kind = %kind, "Auto-started worker"),
            }
        }
    }

    /// Stop both workers, accumulating their run time.
    pub async fn shutdown(&self) {
        for kind in WorkerKind::ALL {
            self.stop(kind).await;
        }
    }

    /// Queue `status` and `stats` for every client.
    async fn publish_changes(&self) {
        let status = PushMessage::Status {
            simulator: self.status(WorkerKind::Simulator).await,
            traps: self.status(WorkerKind::Traps).await,
        };
        self.queue.push(status.encode());
        self.queue.push(PushMessage::Stats { data: self.stats() }.encode());
    }
}
