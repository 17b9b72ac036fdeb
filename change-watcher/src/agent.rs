//! The event-watch-and-react loop.
//!
//! Two regions run concurrently:
//!
//! - event consumption ([`Agent::run_events`]) handles one notification at a
//!   time, in delivery order, until the notification channel closes;
//! - maintenance ([`Agent::run_maintenance`]) rescans the tree on a timer
//!   until the shutdown token fires.
//!
//! They share nothing but the watch registry and the configuration provider.
//! Errors never cross regions; they end up as log lines.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ConfigProvider;
use crate::event::WatchEvent;
use crate::filter::PatternSet;
use crate::maintainer::WatchSetMaintainer;
use crate::recorder::Recorder;
use crate::registry::RawEvent;
use crate::runner::CommandRunner;
use crate::store::Table;

/// What happened in response to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// The filter rejected the path.
    Ignored,

    /// The path matched and a reaction ran.
    Triggered {
        /// The change row was written.
        recorded: bool,

        /// Every command exited successfully.
        commands: bool,
    },
}

/// Wires the filter, recorder, runner and maintainer together.
pub struct Agent {
    config: Arc<ConfigProvider>,
    recorder: Recorder,
    runner: CommandRunner,
    maintainer: WatchSetMaintainer,
    shutdown: CancellationToken,
}

impl Agent {
    pub fn new(
        config: Arc<ConfigProvider>,
        recorder: Recorder,
        maintainer: WatchSetMaintainer,
        shutdown: CancellationToken,
    ) -> Self {
        let runner = CommandRunner::new(recorder.clone(), shutdown.clone());
        Self {
            config,
            recorder,
            runner,
            maintainer,
            shutdown,
        }
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Classify, filter, record and react to a single event.
    pub async fn handle_event(&self, event: &WatchEvent) -> EventOutcome {
        info!("{}: {}", event.kind, event.path.display());

        let config = self.config.current().await;
        let patterns =
            PatternSet::new(config.include_regexp.clone(), config.exclude_regexp.clone());

        let path = event.path_str();
        if !patterns.accepts(&path) {
            debug!("Ignoring {path}");
            return EventOutcome::Ignored;
        }

        let recorded = self
            .recorder
            .record(Table::Changes, &path, event.kind.as_str())
            .await
            .is_ok();

        let commands = match self
            .runner
            .run_all(&config.commands, config.command_timeout())
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!("Error executing commands: {e}");
                false
            }
        };

        EventOutcome::Triggered { recorded, commands }
    }

    /// Handle a raw notification or watch error.
    pub async fn handle_raw(&self, raw: RawEvent) {
        match raw {
            Ok(event) => {
                for event in WatchEvent::from_notify(event) {
                    self.handle_event(&event).await;
                }
            }
            Err(e) => error!("Watch error: {e}"),
        }
    }

    /// Region A: consume notifications until the channel closes.
    pub async fn run_events(&self, mut events: mpsc::Receiver<RawEvent>) {
        while let Some(raw) = events.recv().await {
            self.handle_raw(raw).await;
        }
        debug!("Event channel closed");
    }

    /// Region B: rescan every `interval` until shutdown.
    ///
    /// The first rescan happens one interval after start.
    pub async fn run_maintenance(&self, interval: Duration) {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.maintainer.rescan().await;
                }
            }
        }
        info!("Maintenance stopped");
    }

    /// Run both regions until shutdown.
    ///
    /// Returns once maintenance has stopped. Event consumption is not
    /// drained: it keeps running until the watcher goes away with the
    /// process, and events still queued at that point are lost.
    pub async fn run(self: Arc<Self>, events: mpsc::Receiver<RawEvent>, interval: Duration) {
        let consumer = self.clone();
        tokio::spawn(async move { consumer.run_events(events).await });

        let maintenance = self.clone();
        let handle = tokio::spawn(async move { maintenance.run_maintenance(interval).await });
        if let Err(e) = handle.await {
            warn!("Maintenance task ended abnormally: {e}");
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("maintainer", &self.maintainer)
            .finish_non_exhaustive()
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl-C"),
        () = terminate => info!("Received SIGTERM"),
    }
}

/// Cancel `token` once a shutdown signal arrives.
pub fn spawn_signal_listener(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    })
}
