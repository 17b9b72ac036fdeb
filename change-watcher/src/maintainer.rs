//! Periodic re-registration of the watched tree.
//!
//! Registrations are non-recursive, so files created below the root after
//! startup are invisible until something registers them. The maintainer walks
//! the whole tree and (re-)registers every regular file it finds.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::registry::WatchRegistry;

/// Outcome of one rescan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RescanReport {
    /// Files registered (including ones that already were).
    pub registered: usize,

    /// Files whose registration failed.
    pub failed: usize,

    /// Entries the walk could not read.
    pub walk_errors: usize,

    /// The walk stopped early because the root was unreadable.
    pub aborted: bool,
}

/// Keeps the registry in step with the tree under `root`.
#[derive(Clone)]
pub struct WatchSetMaintainer {
    root: PathBuf,
    registry: Arc<dyn WatchRegistry>,
}

impl WatchSetMaintainer {
    pub fn new(root: impl Into<PathBuf>, registry: Arc<dyn WatchRegistry>) -> Self {
        Self {
            root: root.into(),
            registry,
        }
    }

    /// Walk the tree on the blocking pool and register every regular file.
    pub async fn rescan(&self) -> RescanReport {
        let this = self.clone();
        match tokio::task::spawn_blocking(move || this.rescan_blocking()).await {
            Ok(report) => report,
            Err(e) => {
                error!("Rescan task failed: {e}");
                RescanReport {
                    aborted: true,
                    ..RescanReport::default()
                }
            }
        }
    }

    /// Synchronous body of [`Self::rescan`].
    pub fn rescan_blocking(&self) -> RescanReport {
        let mut report = RescanReport::default();

        for entry in WalkDir::new(&self.root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    error!("Error walking {}: {e}", self.root.display());
                    report.walk_errors += 1;
                    report.aborted = true;
                    break;
                }
                Err(e) => {
                    warn!("Error walking path: {e}");
                    report.walk_errors += 1;
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            match self.registry.register(entry.path()) {
                Ok(()) => report.registered += 1,
                Err(e) => {
                    warn!("Error adding {} to watch: {e}", entry.path().display());
                    report.failed += 1;
                }
            }
        }

        if report.aborted {
            info!("Rescan of {} ended early", self.root.display());
        } else {
            debug!(
                "Rescanned {}: {} registered, {} failed, {} walk errors",
                self.root.display(),
                report.registered,
                report.failed,
                report.walk_errors
            );
        }

        report
    }
}

impl std::fmt::Debug for WatchSetMaintainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSetMaintainer")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, WatcherError};
    use crate::registry::MemoryRegistry;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_registers_nested_regular_files_only() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(temp_dir.path().join("top.log"), "x").unwrap();
        fs::write(nested.join("deep.log"), "x").unwrap();

        let registry = Arc::new(MemoryRegistry::new());
        let maintainer = WatchSetMaintainer::new(temp_dir.path(), registry.clone());

        let report = maintainer.rescan().await;

        assert_eq!(report.registered, 2);
        assert!(!report.aborted);
        assert_eq!(
            registry.paths(),
            vec![nested.join("deep.log"), temp_dir.path().join("top.log")]
        );
    }

    #[tokio::test]
    async fn test_rescan_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.log"), "x").unwrap();

        let registry = Arc::new(MemoryRegistry::new());
        let maintainer = WatchSetMaintainer::new(temp_dir.path(), registry.clone());

        maintainer.rescan().await;
        let second = maintainer.rescan().await;

        assert_eq!(second.registered, 1);
        assert_eq!(registry.paths().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_root_aborts_cycle() {
        let registry = Arc::new(MemoryRegistry::new());
        let maintainer = WatchSetMaintainer::new("/nonexistent/path/12345", registry.clone());

        let report = maintainer.rescan().await;

        assert!(report.aborted);
        assert_eq!(report.registered, 0);
        assert!(registry.paths().is_empty());
    }

    #[tokio::test]
    async fn test_registration_failure_does_not_stop_walk() {
        struct RejectFoo(MemoryRegistry);

        impl WatchRegistry for RejectFoo {
            fn register(&self, path: &Path) -> Result<()> {
                if path.ends_with("foo.log") {
                    return Err(WatcherError::Config("rejected".to_string()));
                }
                self.0.register(path)
            }
        }

        let temp_dir = TempDir::new().unwrap();
        for name in ["bar.log", "foo.log", "qux.log"] {
            fs::write(temp_dir.path().join(name), "x").unwrap();
        }

        let registry = Arc::new(RejectFoo(MemoryRegistry::new()));
        let maintainer = WatchSetMaintainer::new(temp_dir.path(), registry.clone());
        let report = maintainer.rescan().await;

        assert_eq!(report.registered, 2);
        assert_eq!(report.failed, 1);
        assert!(registry.0.contains(&temp_dir.path().join("qux.log")));
    }
}
