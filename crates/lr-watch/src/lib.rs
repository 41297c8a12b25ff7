//! Recursive filesystem watcher for the lr live reload server.
//!
//! [`FileWatcher`] observes a folder and every directory below it, including
//! directories created after watching started, and forwards raw change events
//! through a [`WatchEventReceiver`]. Events are not debounced here; consumers
//! decide how to batch them.
//!
//! # Example
//!
//! ```ignore
//! use lr_watch::{FileWatcher, WatchEvent};
//!
//! let (mut watcher, mut events) = FileWatcher::watch(Path::new("public"), &[])?;
//! while let Some(WatchEvent::Changed(change)) = events.recv().await {
//!     println!("{} {:?}", change.path.display(), change.kind);
//! }
//! watcher.close();
//! ```

mod event;

use std::path::{Path, PathBuf};

use glob::Pattern;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

pub use event::{ChangeEvent, ChangeKind, WatchEvent, WatchEventReceiver};

/// Capacity of the event channel between the notify thread and the consumer.
const EVENT_BUFFER: usize = 256;

/// Watch error.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Folder does not exist.
    #[error("Folder not found: {}", .0.display())]
    NotFound(PathBuf),
    /// Path exists but is not a directory.
    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    /// Folder could not be read.
    #[error("Cannot read {}: {source}", path.display())]
    Io {
        /// Folder that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Exclusion pattern is not a valid glob.
    #[error("Invalid exclusion pattern '{pattern}': {message}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Parser message.
        message: String,
    },
    /// Backend watcher error.
    #[error("Watcher error: {0}")]
    Notify(#[from] notify::Error),
}

/// Recursive watcher over a single folder.
///
/// Dropping the watcher stops observation. [`close`](Self::close) does the same
/// explicitly and may be called any number of times.
pub struct FileWatcher {
    root: PathBuf,
    watcher: Option<RecommendedWatcher>,
}

impl FileWatcher {
    /// Start watching `folder` recursively.
    ///
    /// `exclusions` are glob patterns matched against paths relative to the
    /// folder; matching events are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder is missing, unreadable, not a directory,
    /// a pattern is invalid, or the OS watch cannot be registered.
    pub fn watch(
        folder: &Path,
        exclusions: &[String],
    ) -> Result<(Self, WatchEventReceiver), WatchError> {
        let root = check_folder(folder)?;
        let patterns = compile_patterns(exclusions)?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let filter_root = root.clone();

        let mut watcher = notify::recommended_watcher(move |res| {
            for event in translate(res, &filter_root, &patterns) {
                // Use blocking_send since callback is sync
                if tx.blocking_send(event).is_err() {
                    return;
                }
            }
        })?;

        watcher.watch(&root, RecursiveMode::Recursive)?;
        tracing::debug!(folder = %root.display(), "Watching folder");

        Ok((
            Self {
                root,
                watcher: Some(watcher),
            },
            WatchEventReceiver::new(rx),
        ))
    }

    /// Canonical path of the watched folder.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the watcher has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.watcher.is_none()
    }

    /// Stop watching and release OS watch handles.
    pub fn close(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            if let Err(e) = watcher.unwatch(&self.root) {
                // The folder may already be gone; dropping the watcher still
                // releases the handles.
                tracing::debug!(folder = %self.root.display(), error = %e, "Unwatch failed");
            }
            tracing::debug!(folder = %self.root.display(), "Stopped watching folder");
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

/// Ensure the folder exists, is a readable directory, and canonicalize it.
fn check_folder(folder: &Path) -> Result<PathBuf, WatchError> {
    let metadata = std::fs::metadata(folder).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => WatchError::NotFound(folder.to_path_buf()),
        _ => WatchError::Io {
            path: folder.to_path_buf(),
            source: e,
        },
    })?;
    if !metadata.is_dir() {
        return Err(WatchError::NotADirectory(folder.to_path_buf()));
    }

    std::fs::read_dir(folder).map_err(|e| WatchError::Io {
        path: folder.to_path_buf(),
        source: e,
    })?;

    folder.canonicalize().map_err(|e| WatchError::Io {
        path: folder.to_path_buf(),
        source: e,
    })
}

fn compile_patterns(exclusions: &[String]) -> Result<Vec<Pattern>, WatchError> {
    exclusions
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| WatchError::InvalidPattern {
                pattern: p.clone(),
                message: e.msg.to_owned(),
            })
        })
        .collect()
}

/// Check if a path falls under any exclusion pattern.
fn is_excluded(path: &Path, root: &Path, patterns: &[Pattern]) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    patterns.iter().any(|p| p.matches_path(relative))
}

/// Translate a notify callback result into watch events.
fn translate(
    res: Result<notify::Event, notify::Error>,
    root: &Path,
    patterns: &[Pattern],
) -> Vec<WatchEvent> {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(folder = %root.display(), error = %e, "Watcher reported an error");
            return vec![WatchEvent::Failed(e.to_string())];
        }
    };
    let Some(kind) = ChangeKind::from_notify(event.kind) else {
        return Vec::new();
    };

    let mut events: Vec<WatchEvent> = event
        .paths
        .into_iter()
        .filter(|path| !is_excluded(path, root, patterns))
        .map(|path| {
            tracing::debug!(path = %path.display(), ?kind, "Recorded filesystem event");
            WatchEvent::Changed(ChangeEvent { path, kind })
        })
        .collect();

    if kind == ChangeKind::Removed && !root.exists() {
        events.push(WatchEvent::Failed(format!(
            "Watched folder was removed: {}",
            root.display()
        )));
    }

    events
}
