// ABOUTME: Core library for trishul - worker supervision, stats ledger, event relay
// ABOUTME: Shared by the trishul server and its tests

pub mod broadcast;
pub mod config;
pub mod control;
pub mod definitions;
pub mod error;
pub mod launcher;
pub mod ledger;
pub mod lifecycle;
pub mod message;
pub mod relay;
pub mod stats;
pub mod worker;

#[cfg(test)]
mod testing;

pub use broadcast::{work_queue, BroadcastQueue, BroadcastRegistry, ConnectionId, PushSink};
pub use config::Config;
pub use control::{ControlPlane, DataUpdate, ReloadOutcome};
pub use definitions::{DefinitionSet, DefinitionSummary, MibDirectory};
pub use launcher::{CommandLauncher, Launcher};
pub use message::{PushMessage, WorkerEvent, WorkerStatus};
pub use relay::{EventRelay, UdpChannel, UdpEventSender};
pub use stats::{JsonStatsFile, StatsDocument, StatsStore};
pub use worker::{ConfigOverrides, StartOutcome, StopOutcome, WorkerKind};
