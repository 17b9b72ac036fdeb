//! # Change Watcher
//!
//! Watches a directory tree, records changes whose paths pass an
//! include/exclude filter, and runs a configured command sequence for each
//! of them.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Change Watcher                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  NotifyRegistry ──► Agent::run_events ──► PatternSet            │
//! │       ▲                    │                  │                 │
//! │       │                    ▼                  ▼                 │
//! │  WatchSetMaintainer   CommandRunner ──►  Recorder ──► Store     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod maintainer;
pub mod recorder;
pub mod registry;
pub mod runner;
pub mod store;

pub use agent::{Agent, EventOutcome, shutdown_signal, spawn_signal_listener};
pub use config::{
    AgentConfig, ConfigProvider, ConfigSource, DatabaseConfig, FileConfigSource, RefreshPolicy,
    StaticConfigSource,
};
pub use error::{CommandError, Result, StorageError, WatcherError};
pub use event::{EventKind, WatchEvent};
pub use filter::{PatternSet, should_act};
pub use maintainer::{RescanReport, WatchSetMaintainer};
pub use recorder::Recorder;
pub use registry::{MemoryRegistry, NotifyRegistry, RawEvent, WatchRegistry};
pub use runner::CommandRunner;
pub use store::{ChangeRecord, ChangeStore, MemoryStore, PostgresStore, Table};
