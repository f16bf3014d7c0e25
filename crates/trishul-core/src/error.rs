// ABOUTME: Error types for the trishul-core crate.
// ABOUTME: Launch, decode, persistence, push-delivery, and control-plane failures.

use std::path::PathBuf;
use thiserror::Error;

/// A worker executable could not be brought up.
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The OS refused to spawn the program.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The worker started but exited before the launch probe elapsed
    /// (typically a bind-port conflict).
    #[error("worker exited within {probe_ms}ms of launch")]
    ExitedEarly { probe_ms: u64 },
}

/// An inbound relay datagram could not be turned into an event.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("datagram is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("datagram is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("event must be a JSON object")]
    NotAnObject,

    #[error("event has no string `type` field")]
    MissingType,
}

/// Persisted stats could not be written.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("stats file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize stats: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A push connection can no longer accept messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("push connection closed")]
pub struct SinkError;

/// Failures surfaced by control-plane operations other than lifecycle calls.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("failed to write {path}: {source}")]
    DataFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode worker data: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("definition reload failed: {0}")]
    Definitions(String),
}

/// Configuration could not be loaded.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {name}: {value}")]
    InvalidOverride { name: &'static str, value: String },
}
