//! Error types for the change watcher.

use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

use crate::store::Table;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors that can occur in the change watcher.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("invalid configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Command sequence aborted.
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Storage-specific errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to open a connection.
    #[error("failed to connect to storage: {0}")]
    Connect(#[source] sqlx::Error),

    /// A statement failed.
    #[error("query on {table} failed: {source}")]
    Query {
        table: Table,
        #[source]
        source: sqlx::Error,
    },

    /// Insert into a table that was never created.
    #[error("table does not exist: {0}")]
    MissingTable(Table),
}

/// Errors from running a configured command.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The shell could not be started.
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The command exited unsuccessfully.
    #[error("`{command}` exited with {status}")]
    Failed { command: String, status: ExitStatus },

    /// The command outlived its timeout and was killed.
    #[error("`{command}` timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },

    /// Shutdown was requested while the command was running.
    #[error("`{command}` cancelled by shutdown")]
    Cancelled { command: String },
}

impl CommandError {
    /// The command text that failed.
    pub fn command(&self) -> &str {
        match self {
            Self::Spawn { command, .. }
            | Self::Failed { command, .. }
            | Self::TimedOut { command, .. }
            | Self::Cancelled { command } => command,
        }
    }
}
