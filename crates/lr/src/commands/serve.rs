//! `lr serve` command implementation.

use std::path::PathBuf;

use clap::Args;
use lr_config::{CliSettings, Config};
use lr_server::{ServerHandle, ServerStatus, server_config_from_lr_config};

use crate::error::CliError;
use crate::output::Output;

/// Arguments for the serve command.
#[derive(Args)]
pub(crate) struct ServeArgs {
    /// Folder to serve (overrides config; default: config directory or cwd).
    folder: Option<PathBuf>,

    /// Path to configuration file (default: auto-discover lr.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Preferred port; the next free one is used when taken (overrides config).
    #[arg(short, long)]
    port: Option<u16>,

    /// Milliseconds to collect changes before reloading (overrides config).
    #[arg(long, value_name = "MS")]
    delay: Option<u64>,

    /// Hostname to bind and open in the browser (overrides config).
    #[arg(long)]
    hostname: Option<String>,

    /// Open the browser once the server is running (default: enabled).
    #[arg(long)]
    open: Option<bool>,

    /// Do not open the browser.
    #[arg(long, conflicts_with = "open")]
    no_open: bool,

    /// Enable verbose output (request and reload logs).
    #[arg(short, long)]
    pub verbose: bool,
}

impl ServeArgs {
    /// Execute the serve command.
    ///
    /// Runs until Ctrl-C, or until the server stops itself after a failure.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails or the server fails to start.
    pub(crate) async fn execute(self) -> Result<(), CliError> {
        let output = Output::new();

        // Resolve flags before moving into CliSettings
        let open_browser = self.resolve_open_browser();

        // Build CLI settings from args
        let cli_settings = CliSettings {
            hostname: self.hostname,
            port: self.port,
            delay_ms: self.delay,
            folder: self.folder,
            open_browser,
        };

        // Load config
        let config = Config::load(self.config.as_deref(), Some(&cli_settings))?;

        let server = ServerHandle::new();
        let info = server.start(server_config_from_lr_config(&config)).await?;
        let url = info.url();

        if info.port != config.server.port && config.server.port != 0 {
            output.warning(format_args!(
                "Port {} is in use, using {} instead",
                config.server.port, info.port
            ));
        }
        output.status(
            "Batching",
            format_args!("changes for {} ms", config.server.delay_ms),
        );
        output.banner(&info.folder, &url);

        if config.browser.open {
            open_in_browser(&output, &url);
        }

        let mut status = server.subscribe();
        let failure = tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                None
            }
            failed = status.wait_for(|s| matches!(s, ServerStatus::Failed { .. })) => {
                failed.ok().and_then(|s| match &*s {
                    ServerStatus::Failed { message } => Some(message.clone()),
                    _ => None,
                })
            }
        };

        output.status("Stopping", format_args!("port {}", info.port));
        server.stop().await?;

        if let Some(message) = failure {
            return Err(CliError::Failed(message));
        }
        output.status("Stopped", url);
        Ok(())
    }

    /// Resolve `open_browser` from --open/--no-open flags.
    fn resolve_open_browser(&self) -> Option<bool> {
        self.no_open.then_some(false).or(self.open)
    }
}

/// Open `url` in the default browser, printing it when that fails.
fn open_in_browser(output: &Output, url: &str) {
    if let Err(e) = open::that_detached(url) {
        tracing::warn!(error = %e, "Failed to open browser");
        output.warning(format_args!("Could not open a browser, visit {url}"));
    }
}
