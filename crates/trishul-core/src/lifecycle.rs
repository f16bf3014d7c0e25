// ABOUTME: Subprocess lifecycle manager: start, stop, restart, status for one worker kind.
// ABOUTME: Enforces a single live process per kind and remembers the last-used config.

use crate::config::LifecycleConfig;
use crate::error::LaunchError;
use crate::launcher::Launcher;
use crate::worker::{
    ConfigOverrides, LifecycleStatus, StartOutcome, StopOutcome, WorkerConfig, WorkerHandle,
    WorkerKind, WorkerProcess,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Owns one [`WorkerHandle`]. Liveness is polled, never pushed: a worker that
/// dies between calls is noticed at the next `start`, `stop`, or `status`.
pub struct LifecycleManager {
    handle: WorkerHandle,
    launcher: Arc<dyn Launcher>,
    stop_timeout: Duration,
    settle_delay: Duration,
    launch_probe: Duration,
}

impl LifecycleManager {
    pub fn new(
        kind: WorkerKind,
        initial: WorkerConfig,
        launcher: Arc<dyn Launcher>,
        timings: &LifecycleConfig,
    ) -> Self {
        Self {
            handle: WorkerHandle::new(kind, initial),
            launcher,
            stop_timeout: timings.stop_timeout(),
            settle_delay: timings.settle_delay(),
            launch_probe: timings.launch_probe(),
        }
    }

    pub fn kind(&self) -> WorkerKind {
        self.handle.kind()
    }

    pub fn last_config(&self) -> &WorkerConfig {
        self.handle.last_config()
    }

    /// Launch the worker unless one is already live. `overrides` are merged
    /// over the last-used configuration.
    pub async fn start(&mut self, overrides: Option<&ConfigOverrides>) -> StartOutcome {
        let kind = self.kind();
        if self.handle.is_running() {
            debug!(kind = %kind, "Start requested while already running");
            return StartOutcome::AlreadyRunning {
                pid: self.handle.pid(),
                config: self.handle.last_config().clone(),
            };
        }

        let config = match overrides {
            Some(overrides) => overrides.merged_over(self.handle.last_config()),
            None => self.handle.last_config().clone(),
        };

        let mut process = match self.launcher.launch(kind, &config) {
            Ok(process) => process,
            Err(e) => return launch_failed(kind, e),
        };

        if !self.launch_probe.is_zero() {
            tokio::time::sleep(self.launch_probe).await;
            if process.has_exited() {
                let _ = process.wait().await;
                return launch_failed(
                    kind,
                    LaunchError::ExitedEarly {
                        probe_ms: self.launch_probe.as_millis() as u64,
                    },
                );
            }
        }

        let pid = process.pid();
        self.handle.attach(process, config.clone());
        info!(kind = %kind, pid = ?pid, port = config.port, "Worker started");
        StartOutcome::Started { pid, config }
    }

    /// Terminate the held worker: graceful request, bounded wait, then kill.
    /// A worker that already exited on its own is collected and reported as
    /// stopped all the same.
    pub async fn stop(&mut self) -> StopOutcome {
        let running = self.handle.is_running();
        let Some(mut process) = self.handle.detach() else {
            return StopOutcome::NotRunning;
        };
        if running {
            terminate(self.kind(), process.as_mut(), self.stop_timeout).await;
        } else {
            debug!(kind = %self.kind(), "Collected worker that had already exited");
            let _ = process.wait().await;
        }
        StopOutcome::Stopped
    }

    /// Stop (if running), pause so the OS releases the worker's port, then
    /// start again with the last-used configuration plus any overrides.
    pub async fn restart(&mut self, overrides: Option<&ConfigOverrides>) -> StartOutcome {
        self.stop().await;
        tokio::time::sleep(self.settle_delay).await;
        self.start(overrides).await
    }

    pub fn status(&mut self) -> LifecycleStatus {
        let running = self.handle.is_running();
        LifecycleStatus {
            running,
            pid: self.handle.pid(),
            config: self.handle.last_config().clone(),
        }
    }
}

fn launch_failed(kind: WorkerKind, error: LaunchError) -> StartOutcome {
    warn!(kind = %kind, error = %error, "Worker launch failed");
    StartOutcome::Error {
        message: error.to_string(),
    }
}

async fn terminate(kind: WorkerKind, process: &mut dyn WorkerProcess, timeout: Duration) {
    let pid = process.pid();
    if let Err(e) = process.request_shutdown() {
        // Usually means the worker is already gone.
        debug!(kind = %kind, pid = ?pid, error = %e, "Termination request failed");
    }

    match tokio::time::timeout(timeout, process.wait()).await {
        Ok(_) => info!(kind = %kind, pid = ?pid, "Worker stopped"),
        Err(_) => {
            warn!(kind = %kind, pid = ?pid, timeout_ms = timeout.as_millis() as u64, "Worker ignored termination, killing");
            if let Err(e) = process.kill().await {
                warn!(kind = %kind, pid = ?pid, error = %e, "Failed to kill worker");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeLauncher;
    use std::sync::atomic::Ordering;

    fn timings() -> LifecycleConfig {
        LifecycleConfig {
            stop_timeout_ms: 200,
            settle_delay_ms: 50,
            launch_probe_ms: 0,
        }
    }

    fn initial() -> WorkerConfig {
        WorkerConfig {
            port: 1061,
            community: "public".to_string(),
            resolve_mibs: true,
        }
    }

    fn manager(launcher: Arc<FakeLauncher>) -> LifecycleManager {
        LifecycleManager::new(WorkerKind::Simulator, initial(), launcher, &timings())
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let launcher = FakeLauncher::new();
        let mut mgr = manager(launcher.clone());

        let first = mgr.start(None).await;
        assert!(first.is_started());

        let overrides = ConfigOverrides {
            port: Some(9999),
            ..Default::default()
        };
        let second = mgr.start(Some(&overrides)).await;
        assert!(matches!(
            second,
            StartOutcome::AlreadyRunning { ref config, .. } if config.port == 1061
        ));
        assert_eq!(launcher.launch_count(), 1);
        assert_eq!(mgr.last_config().port, 1061);
    }

    #[tokio::test]
    async fn test_stop_when_not_running() {
        let mut mgr = manager(FakeLauncher::new());
        assert_eq!(mgr.stop().await, StopOutcome::NotRunning);
    }

    #[tokio::test]
    async fn test_stop_then_stop_again() {
        let launcher = FakeLauncher::new();
        let mut mgr = manager(launcher.clone());
        mgr.start(None).await;

        assert_eq!(mgr.stop().await, StopOutcome::Stopped);
        assert!(launcher.last_process().term_requested.load(Ordering::SeqCst));
        assert!(!launcher.last_process().killed.load(Ordering::SeqCst));
        assert_eq!(mgr.stop().await, StopOutcome::NotRunning);
        assert!(!mgr.status().running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_escalates_to_kill() {
        let launcher = FakeLauncher::new();
        launcher.ignore_term.store(true, Ordering::SeqCst);
        let mut mgr = manager(launcher.clone());
        mgr.start(None).await;

        assert_eq!(mgr.stop().await, StopOutcome::Stopped);
        assert!(launcher.last_process().killed.load(Ordering::SeqCst));
        assert_eq!(launcher.alive_count(), 0);
    }

    #[tokio::test]
    async fn test_crash_detected_lazily() {
        let launcher = FakeLauncher::new();
        let mut mgr = manager(launcher.clone());
        mgr.start(None).await;
        launcher.crash_last();

        let status = mgr.status();
        assert!(!status.running);
        assert_eq!(status.pid, None);

        assert_eq!(mgr.stop().await, StopOutcome::Stopped);
        assert!(!launcher.last_process().term_requested.load(Ordering::SeqCst));
        assert_eq!(mgr.stop().await, StopOutcome::NotRunning);
        assert!(mgr.start(None).await.is_started());
        assert_eq!(launcher.launch_count(), 2);
    }

    #[tokio::test]
    async fn test_start_replaces_exited_worker() {
        let launcher = FakeLauncher::new();
        let mut mgr = manager(launcher.clone());
        mgr.start(None).await;
        launcher.crash_last();

        assert!(mgr.start(None).await.is_started());
        assert!(mgr.status().running);
        assert_eq!(launcher.alive_count(), 1);
        assert_eq!(mgr.stop().await, StopOutcome::Stopped);
        assert_eq!(mgr.stop().await, StopOutcome::NotRunning);
    }

    #[tokio::test]
    async fn test_launch_failure_leaves_stopped() {
        let launcher = FakeLauncher::new();
        launcher.fail.store(true, Ordering::SeqCst);
        let mut mgr = manager(launcher.clone());

        let outcome = mgr.start(None).await;
        assert!(matches!(outcome, StartOutcome::Error { ref message } if message.contains("port in use")));
        let status = mgr.status();
        assert!(!status.running);
        assert_eq!(status.pid, None);
    }

    #[tokio::test]
    async fn test_restart_reuses_last_config() {
        let launcher = FakeLauncher::new();
        let mut mgr = manager(launcher.clone());
        let overrides = ConfigOverrides {
            port: Some(2061),
            community: Some("secret".to_string()),
            resolve_mibs: None,
        };
        mgr.start(Some(&overrides)).await;

        let outcome = mgr.restart(None).await;
        assert!(outcome.is_started());
        let (_, config) = launcher.last_launch().unwrap();
        assert_eq!(config.port, 2061);
        assert_eq!(config.community, "secret");
        assert_eq!(launcher.launch_count(), 2);
        assert_eq!(launcher.alive_count(), 1);
    }

    #[tokio::test]
    async fn test_restart_from_stopped_starts() {
        let launcher = FakeLauncher::new();
        let mut mgr = manager(launcher.clone());
        assert!(mgr.restart(None).await.is_started());
        assert_eq!(launcher.launch_count(), 1);
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::config::Config;
        use crate::launcher::{CommandLauncher, WorkerCommand};

        fn sh_launcher(script: &str) -> Arc<CommandLauncher> {
            let dir = tempfile::tempdir().unwrap();
            let mut config = Config::default();
            config.paths.data_dir = Some(dir.path().to_path_buf());
            Arc::new(CommandLauncher::from_config(&config).with_command(
                WorkerKind::Simulator,
                WorkerCommand {
                    program: "sh".to_string(),
                    // Trailing worker flags land in $0/$1.. and are ignored.
                    args: vec!["-c".to_string(), script.to_string(), "worker".to_string()],
                    working_dir: None,
                },
            ))
        }

        fn process_exists(pid: u32) -> bool {
            use nix::sys::signal::kill;
            use nix::unistd::Pid;
            kill(Pid::from_raw(pid as i32), Option::<nix::sys::signal::Signal>::None).is_ok()
        }

        #[tokio::test]
        async fn test_real_process_lifecycle() {
            let mut mgr = LifecycleManager::new(
                WorkerKind::Simulator,
                initial(),
                sh_launcher("exec sleep 30"),
                &timings(),
            );

            let pid = match mgr.start(None).await {
                StartOutcome::Started { pid, .. } => pid.unwrap(),
                other => panic!("unexpected outcome: {other:?}"),
            };
            assert!(mgr.status().running);
            assert!(matches!(
                mgr.start(None).await,
                StartOutcome::AlreadyRunning { pid: Some(p), .. } if p == pid
            ));

            assert_eq!(mgr.stop().await, StopOutcome::Stopped);
            assert!(!mgr.status().running);
            assert!(!process_exists(pid));
        }

        #[tokio::test]
        async fn test_real_process_ignoring_term_is_killed() {
            let mut mgr = LifecycleManager::new(
                WorkerKind::Simulator,
                initial(),
                sh_launcher("trap '' TERM; while :; do sleep 0.05; done"),
                &timings(),
            );
            let pid = match mgr.start(None).await {
                StartOutcome::Started { pid, .. } => pid.unwrap(),
                other => panic!("unexpected outcome: {other:?}"),
            };
            // Give the shell time to install its trap.
            tokio::time::sleep(Duration::from_millis(100)).await;

            assert_eq!(mgr.stop().await, StopOutcome::Stopped);
            assert!(!process_exists(pid));
        }

        #[tokio::test]
        async fn test_early_exit_is_launch_error() {
            let mut timings = timings();
            timings.launch_probe_ms = 300;
            let mut mgr = LifecycleManager::new(
                WorkerKind::Simulator,
                initial(),
                sh_launcher("exit 3"),
                &timings,
            );

            let outcome = mgr.start(None).await;
            assert!(matches!(outcome, StartOutcome::Error { .. }));
            assert!(!mgr.status().running);
        }
    }
}
