//! Live reload manager.
//!
//! Coordinates file watching and WebSocket broadcasting for live reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lr_watch::{FileWatcher, WatchError, WatchEvent, WatchEventReceiver};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::debouncer::EventDebouncer;
use super::protocol::{ReloadCommand, ServerMessage};
use super::registry::ClientRegistry;

/// Manages file watching and broadcasting reload events.
pub(crate) struct LiveReloadManager {
    watcher: Option<FileWatcher>,
    notifier: Option<JoinHandle<()>>,
}

impl LiveReloadManager {
    /// Start watching `folder` and pushing reload commands to `registry`.
    ///
    /// Spawns the notifier task, which batches events for `delay` before each
    /// broadcast. A runtime watcher failure is reported once through
    /// `on_failure`, after which the notifier stops.
    ///
    /// # Errors
    ///
    /// Returns an error if the file watcher cannot be created.
    pub(crate) fn start(
        folder: &Path,
        exclusions: &[String],
        delay: Duration,
        registry: Arc<ClientRegistry>,
        on_failure: oneshot::Sender<String>,
    ) -> Result<Self, WatchError> {
        let (watcher, events) = FileWatcher::watch(folder, exclusions)?;
        let root = watcher.root().to_path_buf();

        let notifier = tokio::spawn(run_notifier(events, root, delay, registry, on_failure));

        Ok(Self {
            watcher: Some(watcher),
            notifier: Some(notifier),
        })
    }

    /// Stop watching and cancel any pending notification.
    ///
    /// Safe to call more than once.
    pub(crate) async fn stop(&mut self) {
        // The notifier owns the event receiver. Dropping it first unblocks a
        // notify thread stuck on a full channel, which `close` waits on.
        if let Some(notifier) = self.notifier.take() {
            notifier.abort();
            // Cancelled is the expected outcome; the pending timer dies with the task
            let _ = notifier.await;
        }
        if let Some(mut watcher) = self.watcher.take() {
            watcher.close();
        }
    }
}

impl Drop for LiveReloadManager {
    fn drop(&mut self) {
        if let Some(notifier) = self.notifier.take() {
            notifier.abort();
        }
        // The aborted notifier may still hold the receiver; close off the runtime thread
        if let Some(watcher) = self.watcher.take()
            && let Ok(runtime) = tokio::runtime::Handle::try_current()
        {
            runtime.spawn_blocking(move || drop(watcher));
        }
    }
}

/// Receive watch events, batch them, and broadcast one reload per batch.
async fn run_notifier(
    mut events: WatchEventReceiver,
    root: PathBuf,
    delay: Duration,
    registry: Arc<ClientRegistry>,
    on_failure: oneshot::Sender<String>,
) {
    let mut debouncer = EventDebouncer::new(delay);

    loop {
        let deadline = debouncer.next_deadline();
        let timer = tokio::time::sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now));

        tokio::select! {
            event = events.recv() => match event {
                Some(WatchEvent::Changed(change)) => debouncer.record(change.path, change.kind),
                Some(WatchEvent::Failed(message)) => {
                    tracing::error!(folder = %root.display(), error = %message, "File watcher failed");
                    let _ = on_failure.send(message);
                    return;
                }
                None => return,
            },
            () = timer, if deadline.is_some() => {
                broadcast_batch(&mut debouncer, &root, &registry);
            }
        }
    }
}

/// Broadcast the released batch, if any.
fn broadcast_batch(debouncer: &mut EventDebouncer, root: &Path, registry: &ClientRegistry) {
    let start = Instant::now();
    let changes = debouncer.drain_ready();

    let Some(command) = ReloadCommand::for_changes(&changes, root) else {
        return;
    };

    let path = command.path.clone();
    let clients = registry.broadcast(&ServerMessage::Reload(command));

    tracing::info!(
        path = %path,
        changes = changes.len(),
        clients,
        elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Live reload event processed"
    );
}
