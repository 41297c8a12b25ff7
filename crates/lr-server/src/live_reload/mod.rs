//! Live reload: client script, WebSocket endpoint, and change broadcasting.

mod client;
mod debouncer;
mod manager;
mod protocol;
mod registry;
mod websocket;

pub(crate) use client::{ENDPOINT, SCRIPT_PATH, SNIPPET, script_handler};
pub(crate) use manager::LiveReloadManager;
pub use protocol::{ReloadCommand, ServerMessage};
pub(crate) use registry::ClientRegistry;
pub(crate) use websocket::ws_handler;
