//! Event batching for live reload.
//!
//! Collects filesystem events into a batch that is released `delay` after the
//! first event of the batch, coalescing multiple events for the same path.
//! This turns the burst of events an editor emits per save into one reload.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use lr_watch::{ChangeEvent, ChangeKind};
use tokio::time::Instant;

/// Batches raw filesystem events.
///
/// Owned by the notifier task, so it needs no locking.
pub(crate) struct EventDebouncer {
    pending: HashMap<PathBuf, ChangeKind>,
    deadline: Option<Instant>,
    delay: Duration,
}

impl EventDebouncer {
    /// Create a new debouncer with the specified batch window.
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            deadline: None,
            delay,
        }
    }

    /// Record an event.
    ///
    /// The first event of a batch starts the window; later events join the
    /// batch without extending it.
    pub(crate) fn record(&mut self, path: PathBuf, kind: ChangeKind) {
        use std::collections::hash_map::Entry;

        let delay = self.delay;
        self.deadline.get_or_insert_with(|| Instant::now() + delay);

        match self.pending.entry(path) {
            Entry::Vacant(entry) => {
                entry.insert(kind);
            }
            Entry::Occupied(mut entry) => {
                if let Some(coalesced) = Self::coalesce(*entry.get(), kind) {
                    *entry.get_mut() = coalesced;
                } else {
                    // Discard both (Created + Removed = file never existed for us)
                    entry.remove();
                }
            }
        }
    }

    /// Coalesce two event kinds.
    ///
    /// Returns `None` if both events should be discarded (Created + Removed).
    #[allow(clippy::match_same_arms)]
    fn coalesce(existing: ChangeKind, new: ChangeKind) -> Option<ChangeKind> {
        use ChangeKind::{Created, Modified, Removed};

        match (existing, new) {
            // Created + anything
            (Created, Created) => Some(Created),  // Duplicate
            (Created, Modified) => Some(Created), // Content included in create
            (Created, Removed) => None,           // File never existed for us

            // Modified + anything
            (Modified, Created) => Some(Created), // File was recreated
            (Modified, Modified) => Some(Modified), // Normal debounce
            (Modified, Removed) => Some(Removed), // File is gone

            // Removed + anything
            (Removed, Created) => Some(Modified), // File was replaced
            (Removed, Modified) => Some(Removed), // Invalid state, ignore new
            (Removed, Removed) => Some(Removed),  // Duplicate
        }
    }

    /// Release the batch if its window has passed.
    ///
    /// Returns an empty list while the window is still open.
    pub(crate) fn drain_ready(&mut self) -> Vec<ChangeEvent> {
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => {
                self.deadline = None;
                let mut events: Vec<ChangeEvent> = self
                    .pending
                    .drain()
                    .map(|(path, kind)| ChangeEvent { path, kind })
                    .collect();
                events.sort_by(|a, b| a.path.cmp(&b.path));
                events
            }
            _ => Vec::new(),
        }
    }

    /// When the current batch closes, for timer scheduling.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }
}
