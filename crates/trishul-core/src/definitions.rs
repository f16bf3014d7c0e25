// ABOUTME: Boundary to the protocol-definition (MIB) set used by both workers.
// ABOUTME: MibDirectory scans the MIB folder and summarises what it finds.

use crate::error::ControlError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const MIB_EXTENSIONS: [&str; 3] = ["mib", "txt", "my"];

/// Counts describing the loaded definition set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionSummary {
    pub loaded: usize,
    pub failed: usize,
    pub total: usize,
    pub traps_available: usize,
}

/// The external protocol-definition service.
#[async_trait]
pub trait DefinitionSet: Send + Sync {
    /// Re-read every definition from its source.
    async fn reload(&self) -> Result<DefinitionSummary, ControlError>;

    /// Summary of the most recent load.
    fn summary(&self) -> DefinitionSummary;
}

/// Definitions read from a directory of MIB modules.
///
/// A file counts as loaded when it reads as text and declares a module
/// (`DEFINITIONS ::= BEGIN`); anything else with a MIB extension is failed.
pub struct MibDirectory {
    dir: PathBuf,
    current: Mutex<DefinitionSummary>,
}

impl MibDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: Mutex::new(DefinitionSummary::default()),
        }
    }

    /// Build and perform the initial scan.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let this = Self::new(dir);
        let summary = scan(&this.dir);
        if let Ok(mut current) = this.current.lock() {
            *current = summary;
        }
        this
    }
}

#[async_trait]
impl DefinitionSet for MibDirectory {
    async fn reload(&self) -> Result<DefinitionSummary, ControlError> {
        let dir = self.dir.clone();
        let summary = tokio::task::spawn_blocking(move || scan(&dir))
            .await
            .map_err(|e| ControlError::Definitions(e.to_string()))?;
        if let Ok(mut current) = self.current.lock() {
            *current = summary;
        }
        tracing::info!(
            dir = %self.dir.display(),
            loaded = summary.loaded,
            failed = summary.failed,
            traps = summary.traps_available,
            "Reloaded MIB definitions"
        );
        Ok(summary)
    }

    fn summary(&self) -> DefinitionSummary {
        self.current.lock().map(|s| *s).unwrap_or_default()
    }
}

fn scan(dir: &Path) -> DefinitionSummary {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "MIB directory not readable");
            return DefinitionSummary::default();
        }
    };

    let mut summary = DefinitionSummary::default();
    for path in entries.flatten().map(|e| e.path()) {
        let is_mib = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| MIB_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if !is_mib || !path.is_file() {
            continue;
        }
        match std::fs::read_to_string(&path) {
            Ok(text) if declares_module(&text) => {
                summary.loaded += 1;
                summary.traps_available += count_notifications(&text);
            }
            _ => {
                tracing::debug!(path = %path.display(), "Skipping unparsable MIB");
                summary.failed += 1;
            }
        }
    }
    summary.total = summary.loaded + summary.failed;
    summary
}

fn declares_module(text: &str) -> bool {
    text.lines().any(|line| {
        let line = line.trim();
        line.contains("DEFINITIONS") && line.contains("::=") && line.contains("BEGIN")
    })
}

/// Count `name NOTIFICATION-TYPE` / `name TRAP-TYPE` declarations. Import
/// lists name the macro first and are not counted.
fn count_notifications(text: &str) -> usize {
    text.lines()
        .filter(|line| {
            let mut words = line.split_whitespace();
            matches!(
                (words.next(), words.next()),
                (Some(name), Some("NOTIFICATION-TYPE" | "TRAP-TYPE")) if !name.starts_with("--")
            )
        })
        .count()
}
