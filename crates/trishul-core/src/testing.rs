// ABOUTME: In-process stand-ins for worker processes, push connections, and relay transport.
// ABOUTME: Lets lifecycle, ledger, and relay tests run without real children or sockets.

use crate::broadcast::PushSink;
use crate::error::{LaunchError, SinkError};
use crate::launcher::Launcher;
use crate::relay::EventChannel;
use crate::worker::{WorkerConfig, WorkerKind, WorkerProcess};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Shared view of one fake process.
#[derive(Default)]
pub struct FakeState {
    pub alive: AtomicBool,
    pub ignore_term: AtomicBool,
    pub term_requested: AtomicBool,
    pub killed: AtomicBool,
}

pub struct FakeProcess {
    pid: u32,
    state: Arc<FakeState>,
}

#[async_trait]
impl WorkerProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn has_exited(&mut self) -> bool {
        !self.state.alive.load(Ordering::SeqCst)
    }

    fn request_shutdown(&mut self) -> std::io::Result<()> {
        self.state.term_requested.store(true, Ordering::SeqCst);
        if !self.state.ignore_term.load(Ordering::SeqCst) {
            self.state.alive.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn wait(&mut self) -> std::io::Result<()> {
        while self.state.alive.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        self.state.killed.store(true, Ordering::SeqCst);
        self.state.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Records every launch and hands out controllable fake processes.
#[derive(Default)]
pub struct FakeLauncher {
    next_pid: AtomicU32,
    pub fail: AtomicBool,
    pub ignore_term: AtomicBool,
    pub launches: Mutex<Vec<(WorkerKind, WorkerConfig)>>,
    pub processes: Mutex<Vec<Arc<FakeState>>>,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_pid: AtomicU32::new(1000),
            ..Default::default()
        })
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }

    pub fn last_launch(&self) -> Option<(WorkerKind, WorkerConfig)> {
        self.launches.lock().unwrap().last().cloned()
    }

    pub fn last_process(&self) -> Arc<FakeState> {
        self.processes.lock().unwrap().last().cloned().unwrap()
    }

    /// Simulate the most recent process dying on its own.
    pub fn crash_last(&self) {
        self.last_process().alive.store(false, Ordering::SeqCst);
    }

    pub fn alive_count(&self) -> usize {
        self.processes
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.alive.load(Ordering::SeqCst))
            .count()
    }
}

impl Launcher for FakeLauncher {
    fn launch(
        &self,
        kind: WorkerKind,
        config: &WorkerConfig,
    ) -> Result<Box<dyn WorkerProcess>, LaunchError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(LaunchError::Spawn {
                program: "fake-worker".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "port in use"),
            });
        }
        let state = Arc::new(FakeState::default());
        state.alive.store(true, Ordering::SeqCst);
        state
            .ignore_term
            .store(self.ignore_term.load(Ordering::SeqCst), Ordering::SeqCst);

        self.launches.lock().unwrap().push((kind, config.clone()));
        self.processes.lock().unwrap().push(state.clone());

        Ok(Box::new(FakeProcess {
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            state,
        }))
    }
}

/// A push connection that records what it was sent, or fails on demand.
#[derive(Default)]
pub struct RecordingSink {
    pub received: Mutex<Vec<String>>,
    pub broken: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn broken() -> Arc<Self> {
        let sink = Self::default();
        sink.broken.store(true, Ordering::SeqCst);
        Arc::new(sink)
    }

    pub fn messages(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    /// Message types received, in order.
    pub fn types(&self) -> Vec<String> {
        self.messages()
            .iter()
            .filter_map(|m| serde_json::from_str::<serde_json::Value>(m).ok())
            .filter_map(|v| v["type"].as_str().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl PushSink for RecordingSink {
    async fn send(&self, payload: &str) -> Result<(), SinkError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(SinkError);
        }
        self.received.lock().unwrap().push(payload.to_string());
        Ok(())
    }
}

/// In-memory event transport.
pub struct MemoryChannel {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MemoryChannel {
    pub fn pair() -> (mpsc::UnboundedSender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl EventChannel for MemoryChannel {
    async fn recv(&mut self) -> std::io::Result<Vec<u8>> {
        match self.rx.recv().await {
            Some(bytes) => Ok(bytes),
            // Park forever once every sender is gone, like an idle socket.
            None => std::future::pending().await,
        }
    }
}
