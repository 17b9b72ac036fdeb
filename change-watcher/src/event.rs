//! Classified file system events.

use std::fmt;
use std::path::PathBuf;

use notify::event::ModifyKind;

/// A single-path change delivered by the watch primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Path to the affected file or directory.
    pub path: PathBuf,

    /// The kind of event.
    pub kind: EventKind,
}

impl WatchEvent {
    /// Create a new watch event.
    pub fn new(kind: EventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    /// Split a raw notification into one event per path.
    ///
    /// Access notifications are dropped and yield nothing.
    pub fn from_notify(event: notify::Event) -> Vec<Self> {
        let Some(kind) = EventKind::classify(&event.kind) else {
            return Vec::new();
        };

        event
            .paths
            .into_iter()
            .map(|path| Self::new(kind, path))
            .collect()
    }

    /// The path as matched against include/exclude patterns.
    pub fn path_str(&self) -> std::borrow::Cow<'_, str> {
        self.path.to_string_lossy()
    }
}

/// Kind of file event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// File was created.
    Create,

    /// File was deleted.
    Remove,

    /// File was renamed (either side).
    Rename,

    /// File contents changed.
    Modify,

    /// Anything else (metadata changes, backend-specific kinds).
    Unknown,
}

impl EventKind {
    /// Classify a raw notify kind. Returns `None` for access notifications.
    pub fn classify(kind: &notify::EventKind) -> Option<Self> {
        let kind = match kind {
            notify::EventKind::Access(_) => return None,
            notify::EventKind::Create(_) => Self::Create,
            notify::EventKind::Remove(_) => Self::Remove,
            notify::EventKind::Modify(ModifyKind::Name(_)) => Self::Rename,
            notify::EventKind::Modify(ModifyKind::Metadata(_)) => Self::Unknown,
            notify::EventKind::Modify(_) => Self::Modify,
            notify::EventKind::Any | notify::EventKind::Other => Self::Unknown,
        };
        Some(kind)
    }

    /// Text stored in the change table.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Remove => "REMOVE",
            Self::Rename => "RENAME",
            Self::Modify => "MODIFY",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
