//! Registry of connected browser clients.
//!
//! Each WebSocket connection registers itself and receives pushed messages
//! through its own channel. The registry never owns the sockets: closing a
//! client means dropping its sender, after which the connection task sends a
//! close frame and ends.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

use super::protocol::ServerMessage;

#[derive(Default)]
struct Inner {
    clients: HashMap<Uuid, mpsc::UnboundedSender<ServerMessage>>,
    /// Connection tasks still alive, registered or not.
    live_tasks: usize,
    /// Set once shutdown begins; new registrations are refused.
    closed: bool,
}

/// Thread-safe set of active client connections.
#[derive(Default)]
pub(crate) struct ClientRegistry {
    inner: Mutex<Inner>,
    drained: Notify,
}

impl ClientRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new client.
    ///
    /// Returns `None` once the registry is closed.
    pub(crate) fn register(self: &Arc<Self>) -> Option<Registration> {
        let mut inner = self.lock();
        if inner.closed {
            return None;
        }
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        inner.clients.insert(id, tx);
        inner.live_tasks += 1;
        Some(Registration {
            id,
            rx,
            registry: Arc::clone(self),
        })
    }

    /// Push `message` to every registered client.
    ///
    /// Clients whose connection already ended are removed. Returns the number
    /// of clients the message was queued for.
    pub(crate) fn broadcast(&self, message: &ServerMessage) -> usize {
        let mut inner = self.lock();
        inner.clients.retain(|id, tx| {
            let delivered = tx.send(message.clone()).is_ok();
            if !delivered {
                tracing::debug!(client = %id, "Dropping disconnected client");
            }
            delivered
        });
        inner.clients.len()
    }

    /// Number of registered clients.
    pub(crate) fn len(&self) -> usize {
        self.lock().clients.len()
    }

    /// Refuse new clients and disconnect every registered one.
    pub(crate) fn close_all(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        let count = inner.clients.len();
        inner.clients.clear();
        if count > 0 {
            tracing::debug!(count, "Closing client connections");
        }
    }

    /// Wait until every connection task has finished.
    pub(crate) async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            if self.lock().live_tasks == 0 {
                return;
            }
            notified.await;
        }
    }

    fn release(&self, id: Uuid) {
        let mut inner = self.lock();
        inner.clients.remove(&id);
        inner.live_tasks = inner.live_tasks.saturating_sub(1);
        if inner.live_tasks == 0 {
            self.drained.notify_waiters();
        }
    }
}

/// A registered client; unregisters itself on drop.
pub(crate) struct Registration {
    id: Uuid,
    rx: mpsc::UnboundedReceiver<ServerMessage>,
    registry: Arc<ClientRegistry>,
}

impl Registration {
    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    /// Next message to push, or `None` once the client was closed.
    pub(crate) async fn recv(&mut self) -> Option<ServerMessage> {
        self.rx.recv().await
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}
