// ABOUTME: Worker handle data model: kind, live process reference, last-used config.
// ABOUTME: Also the lifecycle result types shared by the manager and the HTTP layer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two supervised worker kinds. Fixed for the lifetime of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerKind {
    /// Protocol-agent simulator
    Simulator,
    /// Protocol-event (trap) receiver
    Traps,
}

impl WorkerKind {
    pub const ALL: [WorkerKind; 2] = [WorkerKind::Simulator, WorkerKind::Traps];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::Simulator => "simulator",
            WorkerKind::Traps => "traps",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            WorkerKind::Simulator => 1061,
            WorkerKind::Traps => 1162,
        }
    }

    pub fn default_script(&self) -> &'static str {
        match self {
            WorkerKind::Simulator => "workers/snmp_simulator.py",
            WorkerKind::Traps => "workers/trap_receiver.py",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Start parameters of a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub port: u16,
    pub community: String,
    pub resolve_mibs: bool,
}

/// Caller-supplied start parameters; unset fields keep the last-used value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub community: Option<String>,
    pub resolve_mibs: Option<bool>,
}

impl ConfigOverrides {
    pub fn merged_over(&self, base: &WorkerConfig) -> WorkerConfig {
        WorkerConfig {
            port: self.port.unwrap_or(base.port),
            community: self
                .community
                .clone()
                .unwrap_or_else(|| base.community.clone()),
            resolve_mibs: self.resolve_mibs.unwrap_or(base.resolve_mibs),
        }
    }
}

/// A running OS process as seen by the lifecycle manager.
#[async_trait]
pub trait WorkerProcess: Send {
    /// OS process id, if the platform still reports one.
    fn pid(&self) -> Option<u32>;

    /// Non-blocking liveness poll. Returns true once the process is gone.
    fn has_exited(&mut self) -> bool;

    /// Ask the process to terminate (SIGTERM on unix).
    fn request_shutdown(&mut self) -> std::io::Result<()>;

    /// Wait until the process has exited.
    async fn wait(&mut self) -> std::io::Result<()>;

    /// Forcefully kill the process and reap it.
    async fn kill(&mut self) -> std::io::Result<()>;
}

/// One supervised worker: its kind, its live process (if any), and the
/// configuration it was last started with.
pub struct WorkerHandle {
    kind: WorkerKind,
    process: Option<Box<dyn WorkerProcess>>,
    exited: bool,
    last_config: WorkerConfig,
}

impl WorkerHandle {
    /// A stopped handle seeded with the kind's initial configuration.
    pub fn new(kind: WorkerKind, initial: WorkerConfig) -> Self {
        Self {
            kind,
            process: None,
            exited: false,
            last_config: initial,
        }
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    pub fn last_config(&self) -> &WorkerConfig {
        &self.last_config
    }

    /// Pid of the live process; `None` once it has been seen to exit.
    pub fn pid(&self) -> Option<u32> {
        if self.exited {
            return None;
        }
        self.process.as_ref().and_then(|p| p.pid())
    }

    /// Whether a process is held, live or not.
    pub fn is_held(&self) -> bool {
        self.process.is_some()
    }

    /// Poll the process. This is the only way a crash is noticed. An exited
    /// process stays held until the next stop or start collects it.
    pub fn is_running(&mut self) -> bool {
        if self.exited {
            return false;
        }
        let Some(process) = self.process.as_mut() else {
            return false;
        };
        if process.has_exited() {
            tracing::info!(kind = %self.kind, pid = ?process.pid(), "Worker exited on its own");
            self.exited = true;
        }
        !self.exited
    }

    pub(crate) fn attach(&mut self, process: Box<dyn WorkerProcess>, config: WorkerConfig) {
        self.process = Some(process);
        self.exited = false;
        self.last_config = config;
    }

    pub(crate) fn detach(&mut self) -> Option<Box<dyn WorkerProcess>> {
        self.exited = false;
        self.process.take()
    }
}

/// Result of a start (or restart) request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StartOutcome {
    Started { pid: Option<u32>, config: WorkerConfig },
    AlreadyRunning { pid: Option<u32>, config: WorkerConfig },
    Error { message: String },
}

impl StartOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, StartOutcome::Started { .. })
    }
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

/// Liveness snapshot of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub config: WorkerConfig,
}
