//! The watch primitive: the set of paths registered for notifications.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::Result;

/// Raw notifications as delivered by the watch primitive.
pub type RawEvent = notify::Result<notify::Event>;

/// Capacity of the notification channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Something paths can be registered with. Registration is non-recursive
/// and registering a path twice is not an error.
pub trait WatchRegistry: Send + Sync {
    fn register(&self, path: &Path) -> Result<()>;
}

/// A `notify` watcher shared between the startup code and the maintainer.
pub struct NotifyRegistry {
    watcher: Mutex<RecommendedWatcher>,
}

impl NotifyRegistry {
    /// Create the watcher and the receiving end of its notification channel.
    ///
    /// The channel closes when the registry is dropped.
    pub fn new() -> Result<(Self, mpsc::Receiver<RawEvent>)> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let watcher = notify::recommended_watcher(move |res: RawEvent| {
            if let Err(e) = event_tx.blocking_send(res) {
                error!("Failed to forward watch notification: {e}");
            }
        })?;

        Ok((
            Self {
                watcher: Mutex::new(watcher),
            },
            event_rx,
        ))
    }
}

impl WatchRegistry for NotifyRegistry {
    fn register(&self, path: &Path) -> Result<()> {
        let mut watcher = match self.watcher.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        watcher.watch(path, RecursiveMode::NonRecursive)?;
        debug!("Watching {}", path.display());
        Ok(())
    }
}

impl std::fmt::Debug for NotifyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyRegistry").finish_non_exhaustive()
    }
}

/// Records registrations without watching anything.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    paths: Mutex<BTreeSet<PathBuf>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<PathBuf>> {
        match self.paths.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Registered paths, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.lock().iter().cloned().collect()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }
}

impl WatchRegistry for MemoryRegistry {
    fn register(&self, path: &Path) -> Result<()> {
        self.lock().insert(path.to_path_buf());
        Ok(())
    }
}
