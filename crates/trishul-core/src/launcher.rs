// ABOUTME: Spawns worker executables as child processes.
// ABOUTME: Builds the start arguments and forwards worker output into tracing.

use crate::config::Config;
use crate::error::LaunchError;
use crate::worker::{WorkerConfig, WorkerKind, WorkerProcess};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

/// Turns a kind plus start parameters into a live process.
pub trait Launcher: Send + Sync {
    fn launch(
        &self,
        kind: WorkerKind,
        config: &WorkerConfig,
    ) -> Result<Box<dyn WorkerProcess>, LaunchError>;
}

/// Executable and leading arguments for one kind.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

/// Launches workers as OS processes.
pub struct CommandLauncher {
    commands: HashMap<WorkerKind, WorkerCommand>,
    relay_port: u16,
    mib_dir: PathBuf,
    traps_file: PathBuf,
    data_file: PathBuf,
}

impl CommandLauncher {
    pub fn from_config(config: &Config) -> Self {
        let commands = WorkerKind::ALL
            .into_iter()
            .map(|kind| {
                let settings = config.worker(kind);
                (
                    kind,
                    WorkerCommand {
                        program: settings.program.clone(),
                        args: settings.launch_args(kind),
                        working_dir: settings.working_dir.clone(),
                    },
                )
            })
            .collect();

        Self {
            commands,
            relay_port: config.relay.port,
            mib_dir: config.mib_dir(),
            traps_file: config.traps_file(),
            data_file: config.custom_data_file(),
        }
    }

    /// Replace the command used for `kind`.
    pub fn with_command(mut self, kind: WorkerKind, command: WorkerCommand) -> Self {
        self.commands.insert(kind, command);
        self
    }

    /// Full argument list (after the program) for a launch.
    pub fn command_args(&self, kind: WorkerKind, config: &WorkerConfig) -> Vec<String> {
        let mut args = self
            .commands
            .get(&kind)
            .map(|c| c.args.clone())
            .unwrap_or_default();

        args.extend([
            "--port".to_string(),
            config.port.to_string(),
            "--community".to_string(),
            config.community.clone(),
            "--relay-port".to_string(),
            self.relay_port.to_string(),
            "--mib-path".to_string(),
            self.mib_dir.display().to_string(),
        ]);

        match kind {
            WorkerKind::Traps => args.extend([
                "--output".to_string(),
                self.traps_file.display().to_string(),
                "--resolve-mibs".to_string(),
                config.resolve_mibs.to_string(),
            ]),
            WorkerKind::Simulator => args.extend([
                "--data".to_string(),
                self.data_file.display().to_string(),
            ]),
        }
        args
    }
}

impl Launcher for CommandLauncher {
    fn launch(
        &self,
        kind: WorkerKind,
        config: &WorkerConfig,
    ) -> Result<Box<dyn WorkerProcess>, LaunchError> {
        let program = self
            .commands
            .get(&kind)
            .map(|c| c.program.clone())
            .unwrap_or_default();

        let mut cmd = Command::new(&program);
        cmd.args(self.command_args(kind, config))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = self.commands.get(&kind).and_then(|c| c.working_dir.as_ref()) {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|source| LaunchError::Spawn { program, source })?;

        tracing::info!(kind = %kind, pid = ?child.id(), port = config.port, "Spawned worker");

        if let Some(stdout) = child.stdout.take() {
            forward_output(kind, stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(kind, stderr);
        }

        Ok(Box::new(ChildProcess { child }))
    }
}

fn forward_output<R>(kind: WorkerKind, stream: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::info!(target: "trishul::worker", kind = %kind, "{}", line);
        }
    });
}

/// A worker backed by a tokio child process.
pub struct ChildProcess {
    child: Child,
}

#[async_trait]
impl WorkerProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    #[cfg(unix)]
    fn request_shutdown(&mut self) -> std::io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        match self.child.id() {
            Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(Into::into),
            None => Ok(()),
        }
    }

    #[cfg(not(unix))]
    fn request_shutdown(&mut self) -> std::io::Result<()> {
        self.child.start_kill()
    }

    async fn wait(&mut self) -> std::io::Result<()> {
        self.child.wait().await.map(|_| ())
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }
}
