// ABOUTME: Configuration loading and management for trishul
// ABOUTME: TOML config file with per-section defaults plus environment overrides

use crate::error::ConfigError;
use crate::worker::{WorkerConfig, WorkerKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP / websocket listener
    pub server: ServerConfig,
    /// Loopback datagram channel the workers report events on
    pub relay: RelayConfig,
    /// Process termination and restart timings
    pub lifecycle: LifecycleConfig,
    /// Data directory layout
    pub paths: PathsConfig,
    /// Protocol-agent simulator worker
    pub simulator: WorkerSettings,
    /// Protocol-event receiver worker
    pub traps: WorkerSettings,
    /// Push channel / API session tokens
    pub auth: AuthConfig,
    /// Logging
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (default: 0.0.0.0:8000)
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Loopback UDP port shared with the workers
    pub port: u16,
    /// Pending broadcasts held before new ones are dropped
    pub queue_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 19876,
            queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Wait after a graceful termination request before killing
    pub stop_timeout_ms: u64,
    /// Pause between the stop and start halves of a restart
    pub settle_delay_ms: u64,
    /// How long a freshly spawned worker must survive to count as started (0 = skip)
    pub launch_probe_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: 2000,
            settle_delay_ms: 500,
            launch_probe_ms: 300,
        }
    }
}

impl LifecycleConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn launch_probe(&self) -> Duration {
        Duration::from_millis(self.launch_probe_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of all persisted state (default: ~/.local/share/trishul)
    pub data_dir: Option<PathBuf>,
}

/// How to launch one worker kind and what it starts with by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Interpreter or executable
    pub program: String,
    /// Leading arguments; empty means the kind's bundled worker script
    pub args: Vec<String>,
    /// Working directory for the child
    pub working_dir: Option<PathBuf>,
    /// Protocol port; unset means the kind's default
    pub port: Option<u16>,
    /// Shared-secret community string
    pub community: String,
    /// Resolve symbolic names in received events (receiver only)
    pub resolve_mibs: bool,
    /// Start on control-process boot
    pub auto_start: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: Vec::new(),
            working_dir: None,
            port: None,
            community: "public".to_string(),
            resolve_mibs: true,
            auto_start: true,
        }
    }
}

impl WorkerSettings {
    /// Leading arguments for `kind`, falling back to its bundled script.
    pub fn launch_args(&self, kind: WorkerKind) -> Vec<String> {
        if self.args.is_empty() {
            vec![kind.default_script().to_string()]
        } else {
            self.args.clone()
        }
    }

    /// The start parameters a fresh control process uses for `kind`.
    pub fn initial_config(&self, kind: WorkerKind) -> WorkerConfig {
        WorkerConfig {
            port: self.port.unwrap_or(kind.default_port()),
            community: self.community.clone(),
            resolve_mibs: self.resolve_mibs,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Session tokens accepted on the API and push channel
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log to `<data_dir>/logs/app.log` instead of stderr
    pub file: bool,
    /// Default level when RUST_LOG is unset
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: false,
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Get the XDG config directory for trishul (~/.config/trishul)
    pub fn config_dir() -> PathBuf {
        std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|p| p.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("."))
            })
            .join("trishul")
    }

    /// Get the default data directory (~/.local/share/trishul)
    pub fn default_data_dir() -> PathBuf {
        std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|p| p.join(".local").join("share"))
                    .unwrap_or_else(|| PathBuf::from("."))
            })
            .join("trishul")
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load config from the XDG config directory, or defaults if absent
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply the well-known override variables using `lookup`
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(port) = parse_var(&lookup, "SNMP_PORT")? {
            self.simulator.port = Some(port);
        }
        if let Some(community) = lookup("SNMP_COMMUNITY") {
            self.simulator.community = community;
        }
        if let Some(port) = parse_var(&lookup, "TRAP_PORT")? {
            self.traps.port = Some(port);
        }
        if let Some(port) = parse_var(&lookup, "WS_INTERNAL_PORT")? {
            self.relay.port = port;
        }
        if let Some(flag) = lookup("AUTO_START_SIMULATOR") {
            self.simulator.auto_start = flag.eq_ignore_ascii_case("true");
        }
        if let Some(flag) = lookup("AUTO_START_TRAP_RECEIVER") {
            self.traps.auto_start = flag.eq_ignore_ascii_case("true");
        }
        if let Some(dir) = lookup("TRISHUL_DATA_DIR") {
            self.paths.data_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Settings for one worker kind
    pub fn worker(&self, kind: WorkerKind) -> &WorkerSettings {
        match kind {
            WorkerKind::Simulator => &self.simulator,
            WorkerKind::Traps => &self.traps,
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.paths
            .data_dir
            .clone()
            .unwrap_or_else(Self::default_data_dir)
    }

    pub fn mib_dir(&self) -> PathBuf {
        self.data_dir().join("mibs")
    }

    pub fn stats_file(&self) -> PathBuf {
        self.data_dir().join("configs").join("stats.json")
    }

    pub fn custom_data_file(&self) -> PathBuf {
        self.data_dir().join("configs").join("custom_data.json")
    }

    pub fn traps_file(&self) -> PathBuf {
        self.data_dir().join("traps.jsonl")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }

    /// Generate a default config file content
    pub fn default_toml() -> String {
        r#"# trishul configuration
# Location: ~/.config/trishul/config.toml

[server]
bind = "0.0.0.0:8000"

[relay]
port = 19876
queue_capacity = 1024

[lifecycle]
stop_timeout_ms = 2000
settle_delay_ms = 500
launch_probe_ms = 300

[paths]
# data_dir = "~/.local/share/trishul"

[simulator]
program = "python3"
# args = ["workers/snmp_simulator.py"]
# port = 1061
community = "public"
auto_start = true

[traps]
program = "python3"
# args = ["workers/trap_receiver.py"]
# port = 1162
community = "public"
resolve_mibs = true
auto_start = true

[auth]
# tokens = ["change-me"]

[log]
file = false
level = "info"
"#
        .to_string()
    }
}

fn parse_var(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<u16>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidOverride { name, value }),
    }
}
