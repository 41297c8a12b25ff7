//! Live reload HTTP server for lr.
//!
//! This crate serves a folder over HTTP using axum and reloads connected
//! browsers when files in it change:
//! - Static files, `index.html` documents and directory listings
//! - The reload client at `/livereload.js`, injected into every HTML page
//! - WebSocket endpoint at `/livereload` pushing reload commands
//!
//! # Quick Start
//!
//! ```ignore
//! use std::path::PathBuf;
//! use lr_server::{ServerConfig, start};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig {
//!         folder: PathBuf::from("public"),
//!         ..ServerConfig::default()
//!     };
//!
//!     let server = start(config).await.unwrap();
//!     tokio::signal::ctrl_c().await.unwrap();
//!     server.stop().await.unwrap();
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Browser ──HTTP──► axum router (lr-server)
//!                        │
//!                        ├─► /livereload.js (bundled client)
//!                        │
//!                        ├─► /livereload WebSocket ◄── ClientRegistry
//!                        │                                 ▲
//!                        │          LiveReloadManager ─────┘
//!                        │                 ▲
//!                        │                 └── FileWatcher (lr-watch)
//!                        │
//!                        └─► Static files / listings ──► HTML injection
//! ```

mod app;
mod error;
mod inject;
mod lifecycle;
mod listing;
mod live_reload;
mod middleware;
mod port;
mod state;
mod static_files;

use std::path::PathBuf;
use std::time::Duration;

pub use error::{ServerError, ServerErrorKind};
pub use lifecycle::{ServerHandle, ServerInfo, ServerStatus};
pub use live_reload::{ReloadCommand, ServerMessage};
pub use port::allocate_port;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Folder to serve and watch.
    pub folder: PathBuf,
    /// Preferred port; the next free one is used when it is taken, `0` lets
    /// the OS choose.
    pub port: u16,
    /// Time to collect changes before notifying browsers.
    pub delay: Duration,
    /// Hostname to bind and to build browser URLs with.
    pub hostname: String,
    /// Glob patterns, relative to `folder`, whose changes are ignored.
    pub exclusions: Vec<String>,
    /// Include dotfiles in directory listings.
    pub show_hidden: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("."),
            port: 5500,
            delay: Duration::from_millis(100),
            hostname: "localhost".to_owned(),
            exclusions: lr_config::DEFAULT_EXCLUSIONS
                .iter()
                .map(|&s| s.to_owned())
                .collect(),
            show_hidden: false,
        }
    }
}

/// Start a server on a new handle.
///
/// # Arguments
///
/// * `config` - Server configuration
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn start(config: ServerConfig) -> Result<ServerHandle, ServerError> {
    let handle = ServerHandle::new();
    handle.start(config).await?;
    Ok(handle)
}

/// Create server configuration from lr config.
///
/// # Arguments
///
/// * `config` - lr configuration
#[must_use]
pub fn server_config_from_lr_config(config: &lr_config::Config) -> ServerConfig {
    ServerConfig {
        folder: config.watch_resolved.folder.clone(),
        port: config.server.port,
        delay: config.server.delay(),
        hostname: config.server.hostname.clone(),
        exclusions: config.watch_resolved.exclusions.clone(),
        show_hidden: config.listing.show_hidden,
    }
}
