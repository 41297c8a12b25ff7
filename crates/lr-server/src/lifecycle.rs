//! Server lifecycle.
//!
//! A [`ServerHandle`] owns at most one running server instance. Starting a
//! handle that is already running switches it to the new configuration;
//! stopping is idempotent. Lifecycle operations on one handle are serialized,
//! and independent handles never interact.

use std::net::{IpAddr, SocketAddr};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;

use crate::ServerConfig;
use crate::app::create_router;
use crate::error::ServerError;
use crate::live_reload::{ClientRegistry, LiveReloadManager};
use crate::port;
use crate::state::AppState;

/// How long stop waits for live reload connections to close.
const CLIENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How long stop waits for in-flight HTTP requests before aborting.
const SERVE_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Characters escaped in URL path segments built by [`ServerInfo::url_for`].
const URL_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Where a running server can be reached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerInfo {
    /// Port the server listens on.
    pub port: u16,
    /// Hostname used in browser URLs.
    pub hostname: String,
    /// Address the listener is bound to.
    pub addr: SocketAddr,
    /// Canonical path of the served folder.
    pub folder: PathBuf,
}

impl ServerInfo {
    /// Root URL of the server, e.g. `http://localhost:5500/`.
    #[must_use]
    pub fn url(&self) -> String {
        let host = if self.hostname.parse::<std::net::Ipv6Addr>().is_ok() {
            format!("[{}]", self.hostname)
        } else {
            self.hostname.clone()
        };
        format!("http://{host}:{}/", self.port)
    }

    /// URL of a file or directory in the served folder.
    ///
    /// `path` is either relative to the folder or an absolute path inside it.
    /// Returns `None` for paths outside the folder.
    #[must_use]
    pub fn url_for(&self, path: &Path) -> Option<String> {
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.folder).ok()?
        } else {
            path
        };

        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(s) => {
                    segments.push(utf8_percent_encode(&s.to_string_lossy(), URL_SEGMENT).to_string());
                }
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(format!("{}{}", self.url(), segments.join("/")))
    }
}

/// Observable state of a [`ServerHandle`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerStatus {
    /// Not serving.
    Stopped,
    /// Serving on `port`.
    Running {
        /// Listening port.
        port: u16,
        /// Root URL.
        url: String,
    },
    /// Start failed, or the server stopped itself after a runtime failure.
    Failed {
        /// What went wrong.
        message: String,
    },
}

impl ServerStatus {
    /// Whether a server is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    /// Listening port, if running.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        match self {
            Self::Running { port, .. } => Some(*port),
            _ => None,
        }
    }
}

struct Inner {
    running: Mutex<Option<RunningServer>>,
    status: watch::Sender<ServerStatus>,
    /// Bumped on every start and stop so stale failure reports are ignored.
    generation: AtomicU64,
}

/// Handle to one logical server session.
///
/// Cheap to clone; clones control the same session.
#[derive(Clone)]
pub struct ServerHandle {
    inner: Arc<Inner>,
}

impl Default for ServerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerHandle {
    /// Create a stopped handle.
    #[must_use]
    pub fn new() -> Self {
        let (status, _) = watch::channel(ServerStatus::Stopped);
        Self {
            inner: Arc::new(Inner {
                running: Mutex::new(None),
                status,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Start serving `config`.
    ///
    /// A running instance is stopped first. On failure every resource acquired
    /// so far is released before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder is unusable, no port can be bound, or the
    /// watcher cannot start.
    pub async fn start(&self, config: ServerConfig) -> Result<ServerInfo, ServerError> {
        let mut running = self.inner.running.lock().await;

        if let Some(current) = running.take() {
            tracing::info!(folder = %current.info.folder.display(), "Switching folders");
            if let Err(e) = current.shutdown().await {
                tracing::warn!(error = %e, "Previous server did not stop cleanly");
            }
            self.inner.status.send_replace(ServerStatus::Stopped);
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        match RunningServer::launch(&config).await {
            Ok((server, failures)) => {
                let info = server.info.clone();
                *running = Some(server);
                self.inner.status.send_replace(ServerStatus::Running {
                    port: info.port,
                    url: info.url(),
                });
                spawn_supervisor(Arc::downgrade(&self.inner), generation, failures);
                tracing::info!(url = %info.url(), folder = %info.folder.display(), "Server started");
                Ok(info)
            }
            Err(e) => {
                tracing::error!(folder = %config.folder.display(), error = %e, "Server failed to start");
                self.inner.status.send_replace(ServerStatus::Failed {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Stop the running instance.
    ///
    /// Resolves once the port is released. Stopping a handle that is not
    /// running succeeds without doing anything.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Shutdown`] if teardown hit problems. The handle is
    /// stopped regardless.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let mut running = self.inner.running.lock().await;
        let Some(server) = running.take() else {
            return Ok(());
        };
        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        let result = server.shutdown().await;
        self.inner.status.send_replace(ServerStatus::Stopped);
        match &result {
            Ok(()) => tracing::info!("Server stopped"),
            Err(e) => tracing::warn!(error = %e, "Server stopped with errors"),
        }
        result
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ServerStatus {
        self.inner.status.borrow().clone()
    }

    /// Receive status changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ServerStatus> {
        self.inner.status.subscribe()
    }
}

/// Stop the instance of `generation` when its watcher fails.
fn spawn_supervisor(inner: Weak<Inner>, generation: u64, failures: oneshot::Receiver<String>) {
    tokio::spawn(async move {
        // Sender dropped: the instance was stopped normally
        let Ok(message) = failures.await else {
            return;
        };
        let Some(inner) = inner.upgrade() else {
            return;
        };

        let mut running = inner.running.lock().await;
        if inner.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        inner.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(server) = running.take()
            && let Err(e) = server.shutdown().await
        {
            tracing::warn!(error = %e, "Failed server did not stop cleanly");
        }
        tracing::error!(error = %message, "Server stopped after watcher failure");
        inner.status.send_replace(ServerStatus::Failed { message });
    });
}

/// Resources of one running instance.
struct RunningServer {
    info: ServerInfo,
    registry: Arc<ClientRegistry>,
    live_reload: LiveReloadManager,
    shutdown_tx: Option<oneshot::Sender<()>>,
    serve_task: Option<JoinHandle<std::io::Result<()>>>,
}

impl RunningServer {
    /// Acquire every resource in dependency order.
    ///
    /// Resources are owned by locals until the end, so an early return drops
    /// (and releases) whatever was acquired.
    async fn launch(
        config: &ServerConfig,
    ) -> Result<(Self, oneshot::Receiver<String>), ServerError> {
        let folder = check_folder(&config.folder)?;
        let ip: IpAddr = port::resolve_host(&config.hostname).await?;

        let listener = port::bind_available(ip, config.port).await?;
        let addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind {
                addr: SocketAddr::new(ip, config.port),
                source,
            })?;

        let registry = Arc::new(ClientRegistry::new());
        let (failure_tx, failure_rx) = oneshot::channel();
        let live_reload = LiveReloadManager::start(
            &folder,
            &config.exclusions,
            config.delay,
            Arc::clone(&registry),
            failure_tx,
        )?;

        let router = create_router(Arc::new(AppState {
            root: folder.clone(),
            show_hidden: config.show_hidden,
            registry: Arc::clone(&registry),
        }));

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let serve_task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        let info = ServerInfo {
            port: addr.port(),
            hostname: config.hostname.clone(),
            addr,
            folder,
        };

        Ok((
            Self {
                info,
                registry,
                live_reload,
                shutdown_tx: Some(shutdown_tx),
                serve_task: Some(serve_task),
            },
            failure_rx,
        ))
    }

    /// Tear down in reverse dependency order and confirm the port is free.
    async fn shutdown(mut self) -> Result<(), ServerError> {
        let mut problems = Vec::new();

        // Stop accepting connections
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // No more change events or pending notifications
        self.live_reload.stop().await;

        self.registry.close_all();
        if tokio::time::timeout(CLIENT_DRAIN_TIMEOUT, self.registry.wait_drained())
            .await
            .is_err()
        {
            problems.push("live reload clients did not disconnect in time".to_owned());
        }

        if let Some(task) = self.serve_task.take() {
            let abort = task.abort_handle();
            match tokio::time::timeout(SERVE_SHUTDOWN_TIMEOUT, task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => problems.push(format!("HTTP server error: {e}")),
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => problems.push(format!("HTTP server task failed: {e}")),
                Err(_) => {
                    abort.abort();
                    problems.push("HTTP server did not stop in time".to_owned());
                }
            }
        }

        if !port::wait_released(self.info.addr).await {
            problems.push(format!("port {} is still in use", self.info.port));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ServerError::Shutdown(problems.join("; ")))
        }
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        // Dropped without shutdown (e.g. the last handle went away)
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            self.registry.close_all();
        }
    }
}

/// Ensure the folder exists, is a readable directory, and canonicalize it.
fn check_folder(folder: &Path) -> Result<PathBuf, ServerError> {
    let folder_error = |source| ServerError::Folder {
        path: folder.to_path_buf(),
        source,
    };

    let canonical = folder.canonicalize().map_err(folder_error)?;
    let metadata = std::fs::metadata(&canonical).map_err(folder_error)?;
    if !metadata.is_dir() {
        return Err(ServerError::NotADirectory(folder.to_path_buf()));
    }
    std::fs::read_dir(&canonical).map_err(folder_error)?;
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerErrorKind;
    use pretty_assertions::assert_eq;

    fn info(hostname: &str) -> ServerInfo {
        ServerInfo {
            port: 5500,
            hostname: hostname.to_owned(),
            addr: "127.0.0.1:5500".parse().unwrap(),
            folder: PathBuf::from("/site"),
        }
    }

    fn config(folder: &Path) -> ServerConfig {
        ServerConfig {
            folder: folder.to_path_buf(),
            port: 0,
            hostname: "127.0.0.1".to_owned(),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_url() {
        assert_eq!(info("localhost").url(), "http://localhost:5500/");
        assert_eq!(info("::1").url(), "http://[::1]:5500/");
    }

    #[test]
    fn test_url_for() {
        let info = info("localhost");
        assert_eq!(
            info.url_for(Path::new("/site/blog/my post.html")).as_deref(),
            Some("http://localhost:5500/blog/my%20post.html")
        );
        assert_eq!(
            info.url_for(Path::new("docs/index.html")).as_deref(),
            Some("http://localhost:5500/docs/index.html")
        );
        assert_eq!(info.url_for(Path::new("/elsewhere/x.html")), None);
        assert_eq!(info.url_for(Path::new("../x.html")), None);
    }

    #[test]
    fn test_status_helpers() {
        let running = ServerStatus::Running {
            port: 5500,
            url: "http://localhost:5500/".to_owned(),
        };
        assert!(running.is_running());
        assert_eq!(running.port(), Some(5500));
        assert!(!ServerStatus::Stopped.is_running());
        assert_eq!(ServerStatus::Stopped.port(), None);
    }

    #[test]
    fn test_check_folder() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("index.html");
        std::fs::write(&file, "").unwrap();

        assert!(check_folder(dir.path()).unwrap().is_absolute());
        assert_eq!(
            check_folder(&dir.path().join("missing")).unwrap_err().kind(),
            ServerErrorKind::Folder
        );
        assert!(matches!(
            check_folder(&file).unwrap_err(),
            ServerError::NotADirectory(_)
        ));
    }

    #[tokio::test]
    async fn test_start_publishes_running_status() {
        let dir = tempfile::tempdir().unwrap();
        let handle = ServerHandle::new();
        let mut status = handle.subscribe();

        let info = handle.start(config(dir.path())).await.unwrap();
        assert_eq!(
            handle.status(),
            ServerStatus::Running {
                port: info.port,
                url: info.url()
            }
        );
        assert!(status.has_changed().unwrap());
        assert!(status.borrow_and_update().is_running());

        handle.stop().await.unwrap();
        assert_eq!(handle.status(), ServerStatus::Stopped);
    }

    #[tokio::test]
    async fn test_failed_start_publishes_failed_status() {
        let dir = tempfile::tempdir().unwrap();
        let handle = ServerHandle::new();

        let err = handle
            .start(config(&dir.path().join("missing")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ServerErrorKind::Folder);
        assert!(matches!(handle.status(), ServerStatus::Failed { .. }));

        // Nothing is running, so stop is a no-op
        handle.stop().await.unwrap();
    }
}
