//! Configuration management for lr.
//!
//! Parses `lr.toml` configuration files with serde and provides
//! auto-discovery of config files in parent directories.
//!
//! CLI settings can be applied during load via [`CliSettings`].
//!
//! ## Environment Variable Expansion
//!
//! `server.hostname` supports environment variable expansion:
//!
//! - `${VAR}` - expands to the value of VAR, errors if unset
//! - `${VAR:-default}` - expands to VAR if set, otherwise uses default
//!
//! ## Example
//!
//! ```toml
//! [server]
//! hostname = "localhost"
//! port = 5500
//! delay_ms = 100
//!
//! [watch]
//! folder = "public"
//! exclusions = ["**/.git/**", "**/*.tmp"]
//!
//! [listing]
//! show_hidden = false
//!
//! [browser]
//! open = true
//! ```

mod expand;

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI settings that override configuration file values.
///
/// All fields are optional. Only non-None values override the loaded config.
#[derive(Debug, Default)]
pub struct CliSettings {
    /// Override browser hostname.
    pub hostname: Option<String>,
    /// Override preferred port.
    pub port: Option<u16>,
    /// Override reload delay in milliseconds.
    pub delay_ms: Option<u64>,
    /// Override served folder.
    pub folder: Option<PathBuf>,
    /// Override whether the browser is opened on start.
    pub open_browser: Option<bool>,
}

/// Configuration filename to search for.
const CONFIG_FILENAME: &str = "lr.toml";

/// Upper bound for `server.delay_ms`.
const MAX_DELAY_MS: u64 = 60_000;

/// Directories ignored by the watcher unless overridden.
pub const DEFAULT_EXCLUSIONS: &[&str] = &[
    "**/.git/**",
    "**/.svn/**",
    "**/.hg/**",
    "**/node_modules/**",
];

/// Application configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Watch configuration (folder is a relative string from TOML).
    watch: WatchConfigRaw,
    /// Directory listing configuration.
    pub listing: ListingConfig,
    /// Browser configuration.
    pub browser: BrowserConfig,

    /// Resolved watch configuration (set after loading).
    #[serde(skip)]
    pub watch_resolved: WatchConfig,
    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::default_with_base(Path::new("."))
    }
}

/// Server configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Hostname used to bind and to build browser URLs.
    pub hostname: String,
    /// Preferred port. The next free port is used when it is taken.
    pub port: u16,
    /// Milliseconds to wait after a change before notifying browsers.
    pub delay_ms: u64,
}

impl ServerConfig {
    /// Reload delay as a [`Duration`].
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_owned(),
            port: 5500,
            delay_ms: 100,
        }
    }
}

/// Raw watch configuration as parsed from TOML (paths as strings).
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct WatchConfigRaw {
    folder: Option<String>,
    exclusions: Option<Vec<String>>,
}

/// Resolved watch configuration with an absolute folder.
#[derive(Debug, Default)]
pub struct WatchConfig {
    /// Folder to serve and watch.
    pub folder: PathBuf,
    /// Glob patterns (relative to `folder`) ignored by the watcher.
    pub exclusions: Vec<String>,
}

/// Directory listing configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    /// Show dotfiles in directory listings.
    pub show_hidden: bool,
}

/// Browser configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Open the default browser once the server is running.
    pub open: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self { open: true }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
    /// Environment variable error during expansion.
    #[error("Environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path (e.g., "`server.hostname`").
        field: String,
        /// Error message (e.g., "${`LR_HOST`} not set").
        message: String,
    },
}

/// Require a string field to be non-empty.
fn require_non_empty(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

fn default_exclusions() -> Vec<String> {
    DEFAULT_EXCLUSIONS.iter().map(|&s| s.to_owned()).collect()
}

impl Config {
    /// Load configuration from file with optional CLI settings.
    ///
    /// If `config_path` is provided, loads from that file.
    /// Otherwise, searches for `lr.toml` in current directory and parents.
    ///
    /// CLI settings are applied after loading and path resolution, allowing CLI
    /// arguments to take precedence over config file values.
    ///
    /// # Errors
    ///
    /// Returns error if explicit `config_path` doesn't exist, parsing fails,
    /// or the merged configuration is invalid.
    pub fn load(
        config_path: Option<&Path>,
        cli_settings: Option<&CliSettings>,
    ) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Self::load_from_file(path)?
        } else if let Some(discovered) = Self::discover_config() {
            Self::load_from_file(&discovered)?
        } else {
            Self::default_with_cwd()
        };

        if let Some(settings) = cli_settings {
            config.apply_cli_settings(settings);
            config.validate()?;
        }

        Ok(config)
    }

    /// Apply CLI settings to the configuration.
    fn apply_cli_settings(&mut self, settings: &CliSettings) {
        if let Some(hostname) = &settings.hostname {
            self.server.hostname.clone_from(hostname);
        }
        if let Some(port) = settings.port {
            self.server.port = port;
        }
        if let Some(delay_ms) = settings.delay_ms {
            self.server.delay_ms = delay_ms;
        }
        if let Some(folder) = &settings.folder {
            self.watch_resolved.folder.clone_from(folder);
        }
        if let Some(open) = settings.open_browser {
            self.browser.open = open;
        }
    }

    /// Search for config file in current directory and parents.
    fn discover_config() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;
        loop {
            let candidate = current.join(CONFIG_FILENAME);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// Create default config with paths relative to current working directory.
    fn default_with_cwd() -> Self {
        let cwd = std::env::current_dir().unwrap_or_default();
        Self::default_with_base(&cwd)
    }

    /// Create default config with paths relative to given base directory.
    fn default_with_base(base: &Path) -> Self {
        Self {
            server: ServerConfig::default(),
            watch: WatchConfigRaw::default(),
            listing: ListingConfig::default(),
            browser: BrowserConfig::default(),
            watch_resolved: WatchConfig {
                folder: base.to_path_buf(),
                exclusions: default_exclusions(),
            },
            config_path: None,
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        // Expand environment variables before path resolution
        config.expand_env_vars()?;

        let config_dir = path.parent().unwrap_or(Path::new("."));
        config.resolve_paths(config_dir);
        config.config_path = Some(path.to_path_buf());

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// Called automatically after loading from file and after CLI overrides.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if any validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_watch()?;
        Ok(())
    }

    /// Validate server configuration.
    fn validate_server(&self) -> Result<(), ConfigError> {
        require_non_empty(&self.server.hostname, "server.hostname")?;

        if self.server.delay_ms > MAX_DELAY_MS {
            return Err(ConfigError::Validation(format!(
                "server.delay_ms cannot exceed {MAX_DELAY_MS}"
            )));
        }

        Ok(())
    }

    /// Validate watch configuration.
    fn validate_watch(&self) -> Result<(), ConfigError> {
        for pattern in &self.watch_resolved.exclusions {
            glob::Pattern::new(pattern).map_err(|e| {
                ConfigError::Validation(format!(
                    "watch.exclusions contains invalid pattern '{pattern}': {e}"
                ))
            })?;
        }
        Ok(())
    }

    /// Expand environment variable references in configuration strings.
    fn expand_env_vars(&mut self) -> Result<(), ConfigError> {
        self.server.hostname = expand::expand_env(&self.server.hostname, "server.hostname")?;
        Ok(())
    }

    /// Resolve the relative folder to an absolute path based on config directory.
    fn resolve_paths(&mut self, config_dir: &Path) {
        self.watch_resolved = WatchConfig {
            folder: self
                .watch
                .folder
                .as_deref()
                .map_or_else(|| config_dir.to_path_buf(), |f| config_dir.join(f)),
            exclusions: self
                .watch
                .exclusions
                .clone()
                .unwrap_or_else(default_exclusions),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = Config::default_with_base(Path::new("/test"));
        assert_eq!(config.server.hostname, "localhost");
        assert_eq!(config.server.port, 5500);
        assert_eq!(config.server.delay(), Duration::from_millis(100));
        assert_eq!(config.watch_resolved.folder, PathBuf::from("/test"));
        assert_eq!(config.watch_resolved.exclusions, default_exclusions());
        assert!(!config.listing.show_hidden);
        assert!(config.browser.open);
    }

    #[test]
    fn test_parse_minimal_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.hostname, "localhost");
        assert_eq!(config.server.port, 5500);
        assert_eq!(config.server.delay_ms, 100);
    }

    #[test]
    fn test_parse_server_config() {
        let toml = r#"
[server]
hostname = "127.0.0.1"
port = 8080
delay_ms = 250
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.hostname, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.delay_ms, 250);
    }

    #[test]
    fn test_parse_listing_and_browser() {
        let toml = r"
[listing]
show_hidden = true

[browser]
open = false
";
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.listing.show_hidden);
        assert!(!config.browser.open);
    }

    #[test]
    fn test_resolve_paths() {
        let toml = r#"
[watch]
folder = "public"
exclusions = ["**/*.tmp"]
"#;
        let mut config: Config = toml::from_str(toml).unwrap();
        config.resolve_paths(Path::new("/project"));

        assert_eq!(config.watch_resolved.folder, PathBuf::from("/project/public"));
        assert_eq!(config.watch_resolved.exclusions, vec!["**/*.tmp".to_owned()]);
    }

    #[test]
    fn test_resolve_paths_defaults_to_config_dir() {
        let mut config: Config = toml::from_str("").unwrap();
        config.resolve_paths(Path::new("/project"));

        assert_eq!(config.watch_resolved.folder, PathBuf::from("/project"));
        assert_eq!(config.watch_resolved.exclusions, default_exclusions());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(
            &path,
            "[server]\nport = 9000\n\n[watch]\nfolder = \"site\"\n",
        )
        .unwrap();

        let config = Config::load(Some(&path), None).unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.watch_resolved.folder, dir.path().join("site"));
        assert_eq!(config.config_path, Some(path));
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let err = Config::load(Some(Path::new("/nonexistent/lr.toml")), None).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "[server\nport = ").unwrap();

        let err = Config::load(Some(&path), None).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_apply_cli_settings_port() {
        let mut config = Config::default_with_base(Path::new("/test"));
        let overrides = CliSettings {
            port: Some(9000),
            ..Default::default()
        };

        config.apply_cli_settings(&overrides);

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.hostname, "localhost"); // Unchanged
    }

    #[test]
    fn test_apply_cli_settings_folder() {
        let mut config = Config::default_with_base(Path::new("/test"));
        let overrides = CliSettings {
            folder: Some(PathBuf::from("/custom/site")),
            ..Default::default()
        };

        config.apply_cli_settings(&overrides);

        assert_eq!(config.watch_resolved.folder, PathBuf::from("/custom/site"));
    }

    #[test]
    fn test_apply_cli_settings_multiple() {
        let mut config = Config::default_with_base(Path::new("/test"));

        let overrides = CliSettings {
            hostname: Some("127.0.0.1".to_owned()),
            port: Some(0),
            delay_ms: Some(0),
            open_browser: Some(false),
            ..Default::default()
        };

        config.apply_cli_settings(&overrides);

        assert_eq!(config.server.hostname, "127.0.0.1");
        assert_eq!(config.server.port, 0);
        assert_eq!(config.server.delay_ms, 0);
        assert!(!config.browser.open);
    }

    #[test]
    fn test_apply_cli_settings_empty() {
        let config_before = Config::default_with_base(Path::new("/test"));
        let mut config = Config::default_with_base(Path::new("/test"));

        config.apply_cli_settings(&CliSettings::default());

        assert_eq!(config.server.hostname, config_before.server.hostname);
        assert_eq!(config.server.port, config_before.server.port);
        assert_eq!(
            config.watch_resolved.folder,
            config_before.watch_resolved.folder
        );
    }

    #[test]
    fn test_expand_env_vars_hostname() {
        // SAFETY: test runs single-threaded per test function
        unsafe {
            std::env::set_var("LR_TEST_HOSTNAME", "0.0.0.0");
        }

        let toml = r#"
[server]
hostname = "${LR_TEST_HOSTNAME}"
"#;
        let mut config: Config = toml::from_str(toml).unwrap();
        config.expand_env_vars().unwrap();

        assert_eq!(config.server.hostname, "0.0.0.0");

        unsafe {
            std::env::remove_var("LR_TEST_HOSTNAME");
        }
    }

    /// Assert that validation fails with expected substrings in the error message.
    fn assert_validation_error(config: &Config, expected_substrings: &[&str]) {
        let result = config.validate();
        assert!(result.is_err(), "Expected validation to fail");
        let err = result.unwrap_err();
        assert!(
            matches!(err, ConfigError::Validation(_)),
            "Expected ConfigError::Validation, got {err:?}"
        );
        let msg = err.to_string();
        for s in expected_substrings {
            assert!(
                msg.contains(s),
                "Expected error to contain '{s}', got: {msg}"
            );
        }
    }

    #[test]
    fn test_validate_default_config_passes() {
        let config = Config::default_with_base(Path::new("/test"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_port_zero_is_allowed() {
        let mut config = Config::default_with_base(Path::new("/test"));
        config.server.port = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_hostname_empty() {
        let mut config = Config::default_with_base(Path::new("/test"));
        config.server.hostname = "  ".to_owned();
        assert_validation_error(&config, &["server.hostname", "empty"]);
    }

    #[test]
    fn test_validate_delay_too_high() {
        let mut config = Config::default_with_base(Path::new("/test"));
        config.server.delay_ms = MAX_DELAY_MS + 1;
        assert_validation_error(&config, &["delay_ms", "60000"]);
    }

    #[test]
    fn test_validate_invalid_exclusion_pattern() {
        let mut config = Config::default_with_base(Path::new("/test"));
        config.watch_resolved.exclusions = vec!["[".to_owned()];
        assert_validation_error(&config, &["watch.exclusions", "["]);
    }
}
