//! Watch event types for change notification.
//!
//! Events are delivered through a [`WatchEventReceiver`] returned by
//! [`FileWatcher::watch`](crate::FileWatcher::watch).

use std::path::PathBuf;

use tokio::sync::mpsc;

/// Kind of filesystem change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// File or directory was created.
    Created,
    /// File or directory was modified.
    Modified,
    /// File or directory was removed.
    Removed,
}

impl ChangeKind {
    /// Convert a `notify::EventKind`.
    ///
    /// Returns `None` for event kinds that are not relevant (e.g., Access).
    pub(crate) fn from_notify(kind: notify::EventKind) -> Option<Self> {
        match kind {
            notify::EventKind::Create(_) => Some(Self::Created),
            notify::EventKind::Modify(_) => Some(Self::Modified),
            notify::EventKind::Remove(_) => Some(Self::Removed),
            _ => None,
        }
    }
}

/// A single filesystem change inside the watched folder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Absolute path of the affected entry.
    pub path: PathBuf,
    /// Kind of change.
    pub kind: ChangeKind,
}

/// Event emitted by a running watcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchEvent {
    /// Something changed inside the folder.
    Changed(ChangeEvent),
    /// The watcher can no longer observe the folder.
    Failed(String),
}

/// Receiver for watch events.
///
/// Yields `None` once the watcher is closed and all buffered events are consumed.
pub struct WatchEventReceiver {
    rx: mpsc::Receiver<WatchEvent>,
}

impl WatchEventReceiver {
    pub(crate) fn new(rx: mpsc::Receiver<WatchEvent>) -> Self {
        Self { rx }
    }

    /// Wait for the next event.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        self.rx.recv().await
    }

    /// Try to receive an event without waiting.
    pub fn try_recv(&mut self) -> Option<WatchEvent> {
        self.rx.try_recv().ok()
    }
}
