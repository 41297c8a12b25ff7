//! Error types for the live reload server.

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use lr_watch::WatchError;

/// Failure category, for hosts that present errors by kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ServerErrorKind {
    /// Folder missing, unreadable, or not a directory.
    Folder,
    /// Port or address unusable for a reason other than "in use".
    Bind,
    /// Filesystem watcher could not start or failed while running.
    Watch,
    /// Teardown did not complete cleanly.
    Shutdown,
}

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Served folder is missing or unreadable.
    #[error("Cannot serve {}: {source}", path.display())]
    Folder {
        /// Configured folder.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Served path is not a directory.
    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// Hostname did not resolve to a bindable address.
    #[error("Cannot resolve hostname '{hostname}': {source}")]
    Resolve {
        /// Configured hostname.
        hostname: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Binding failed for a reason other than "address in use".
    #[error("Cannot bind {addr}: {source}")]
    Bind {
        /// Address that failed.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Every port from the preferred one up to 65535 is taken.
    #[error("No free port at or above {preferred}")]
    PortsExhausted {
        /// First port probed.
        preferred: u16,
    },

    /// Watcher failed to start.
    #[error("{0}")]
    Watch(#[from] WatchError),

    /// Teardown finished with problems; the server is stopped regardless.
    #[error("Shutdown incomplete: {0}")]
    Shutdown(String),
}

impl ServerError {
    /// Failure category of this error.
    #[must_use]
    pub fn kind(&self) -> ServerErrorKind {
        match self {
            Self::Folder { .. } | Self::NotADirectory(_) => ServerErrorKind::Folder,
            Self::Resolve { .. } | Self::Bind { .. } | Self::PortsExhausted { .. } => {
                ServerErrorKind::Bind
            }
            Self::Watch(_) => ServerErrorKind::Watch,
            Self::Shutdown(_) => ServerErrorKind::Shutdown,
        }
    }
}

/// Per-request failure of the static handler.
#[derive(Debug, thiserror::Error)]
pub(crate) enum RequestError {
    /// Path escapes the served folder or contains forbidden characters.
    #[error("Forbidden")]
    Forbidden,

    /// Nothing servable at the path.
    #[error("Not Found")]
    NotFound,

    /// Path is not valid percent-encoded UTF-8.
    #[error("Bad Request")]
    BadRequest,

    /// Only GET and HEAD are served.
    #[error("Method Not Allowed")]
    MethodNotAllowed,

    /// I/O error while reading a file or directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Io(e) => {
                tracing::warn!(error = %e, "Failed to read from served folder");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let mut response = (status, status.canonical_reason().unwrap_or_default()).into_response();
        if matches!(self, Self::MethodNotAllowed) {
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD"));
        }
        response
    }
}
