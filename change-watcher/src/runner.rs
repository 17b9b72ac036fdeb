//! Sequential, fail-fast execution of configured shell commands.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CommandError;
use crate::recorder::{COMMAND_SUBJECT, Recorder};
use crate::store::Table;

/// Runs command sequences through `sh -c`.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    recorder: Recorder,
    shutdown: CancellationToken,
}

enum Wait {
    Exited(std::io::Result<ExitStatus>),
    TimedOut(Duration),
    Cancelled,
}

impl CommandRunner {
    /// Create a runner. Commands in flight are killed when `shutdown` fires.
    pub fn new(recorder: Recorder, shutdown: CancellationToken) -> Self {
        Self { recorder, shutdown }
    }

    /// Run `commands` in order, stopping at the first failure.
    ///
    /// Each successful command is logged and recorded in the command table.
    /// A recording failure is logged and does not stop the sequence.
    pub async fn run_all(
        &self,
        commands: &[String],
        timeout: Option<Duration>,
    ) -> Result<(), CommandError> {
        for command in commands {
            self.run_one(command, timeout).await?;

            info!("{command}");

            // Already logged by the recorder.
            let _ = self
                .recorder
                .record(Table::Commands, COMMAND_SUBJECT, command)
                .await;
        }

        Ok(())
    }

    async fn run_one(&self, command: &str, timeout: Option<Duration>) -> Result<(), CommandError> {
        if self.shutdown.is_cancelled() {
            return Err(CommandError::Cancelled {
                command: command.to_string(),
            });
        }

        debug!("Running command: {command}");
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let outcome = tokio::select! {
            status = child.wait() => Wait::Exited(status),
            limit = deadline(timeout) => Wait::TimedOut(limit),
            () = self.shutdown.cancelled() => Wait::Cancelled,
        };

        let err = match outcome {
            Wait::Exited(Ok(status)) if status.success() => return Ok(()),
            Wait::Exited(Ok(status)) => CommandError::Failed {
                command: command.to_string(),
                status,
            },
            Wait::Exited(Err(source)) => CommandError::Spawn {
                command: command.to_string(),
                source,
            },
            Wait::TimedOut(timeout) => CommandError::TimedOut {
                command: command.to_string(),
                timeout,
            },
            Wait::Cancelled => CommandError::Cancelled {
                command: command.to_string(),
            },
        };

        if matches!(
            err,
            CommandError::TimedOut { .. } | CommandError::Cancelled { .. }
        ) {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill `{command}`: {e}");
            }
        }

        Err(err)
    }
}

/// Resolves after `timeout`, or never when there is none.
async fn deadline(timeout: Option<Duration>) -> Duration {
    match timeout {
        Some(limit) => {
            tokio::time::sleep(limit).await;
            limit
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn runner(store: &Arc<MemoryStore>) -> CommandRunner {
        CommandRunner::new(Recorder::new(store.clone()), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_stops_at_first_failure() {
        let temp_dir = TempDir::new().unwrap();
        let first = temp_dir.path().join("c1");
        let third = temp_dir.path().join("c3");
        let store = Arc::new(MemoryStore::new());

        let commands = vec![
            format!("touch {}", first.display()),
            "exit 3".to_string(),
            format!("touch {}", third.display()),
        ];

        let err = runner(&store).run_all(&commands, None).await.unwrap_err();

        assert!(matches!(err, CommandError::Failed { .. }));
        assert_eq!(err.command(), "exit 3");
        assert!(first.exists());
        assert!(!third.exists());

        let rows = store.rows(Table::Commands);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "command");
        assert_eq!(rows[0].event, commands[0]);
    }

    #[tokio::test]
    async fn test_all_succeed_in_order() {
        let store = Arc::new(MemoryStore::new());
        let commands = vec!["true".to_string(), "echo hi".to_string()];

        runner(&store).run_all(&commands, None).await.unwrap();

        let events: Vec<_> = store
            .rows(Table::Commands)
            .into_iter()
            .map(|row| row.event)
            .collect();
        assert_eq!(events, commands);
    }

    #[tokio::test]
    async fn test_empty_list_is_ok() {
        let store = Arc::new(MemoryStore::new());
        runner(&store).run_all(&[], None).await.unwrap();
        assert!(!store.has_table(Table::Commands));
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let store = Arc::new(MemoryStore::new());
        let commands = vec!["sleep 5".to_string(), "true".to_string()];

        let err = runner(&store)
            .run_all(&commands, Some(Duration::from_millis(100)))
            .await
            .unwrap_err();

        assert!(matches!(err, CommandError::TimedOut { .. }));
        assert!(store.rows(Table::Commands).is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_sequence() {
        let store = Arc::new(MemoryStore::new());
        let token = CancellationToken::new();
        let runner = CommandRunner::new(Recorder::new(store.clone()), token.clone());
        token.cancel();

        let err = runner
            .run_all(&["true".to_string()], None)
            .await
            .unwrap_err();

        assert!(matches!(err, CommandError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_kills_running_command() {
        let temp_dir = TempDir::new().unwrap();
        let marker = temp_dir.path().join("marker");
        let store = Arc::new(MemoryStore::new());
        let token = CancellationToken::new();
        let runner = CommandRunner::new(Recorder::new(store.clone()), token.clone());

        let commands = vec![
            "sleep 5".to_string(),
            format!("touch {}", marker.display()),
        ];
        let started = std::time::Instant::now();
        let handle = tokio::spawn(async move { runner.run_all(&commands, None).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();

        let err = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();

        assert!(matches!(err, CommandError::Cancelled { .. }));
        assert_eq!(err.command(), "sleep 5");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!marker.exists());
        assert!(store.rows(Table::Commands).is_empty());
    }

    #[tokio::test]
    async fn test_recording_failure_does_not_stop_sequence() {
        struct Broken;

        #[async_trait::async_trait]
        impl crate::store::ChangeStore for Broken {
            async fn ensure_table(&self, table: Table) -> Result<(), crate::error::StorageError> {
                Err(crate::error::StorageError::MissingTable(table))
            }

            async fn insert(
                &self,
                table: Table,
                _name: &str,
                _event: &str,
            ) -> Result<(), crate::error::StorageError> {
                Err(crate::error::StorageError::MissingTable(table))
            }
        }

        let temp_dir = TempDir::new().unwrap();
        let marker = temp_dir.path().join("ran");
        let runner = CommandRunner::new(Recorder::new(Arc::new(Broken)), CancellationToken::new());

        runner
            .run_all(
                &["true".to_string(), format!("touch {}", marker.display())],
                None,
            )
            .await
            .unwrap();

        assert!(marker.exists());
    }
}
