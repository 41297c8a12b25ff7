//! Application state.
//!
//! Shared state for all request handlers.

use std::path::PathBuf;
use std::sync::Arc;

use crate::live_reload::ClientRegistry;

/// Application state shared across all handlers.
pub(crate) struct AppState {
    /// Canonical path of the served folder.
    pub(crate) root: PathBuf,
    /// Include dotfiles in directory listings.
    pub(crate) show_hidden: bool,
    /// Connected live reload clients.
    pub(crate) registry: Arc<ClientRegistry>,
}
