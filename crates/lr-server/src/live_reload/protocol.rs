//! LiveReload wire messages.
//!
//! Messages are JSON objects tagged by a `command` field, compatible with the
//! LiveReload protocol 7 subset that browsers need: `hello` for the handshake
//! and `reload` for change pushes.

use std::path::Path;

use lr_watch::ChangeEvent;
use serde::{Deserialize, Serialize};

/// Protocol identifier announced in the handshake.
pub(crate) const PROTOCOL_7: &str = "http://livereload.com/protocols/official-7";

/// Server name announced in the handshake.
const SERVER_NAME: &str = "lr";

/// Broadcast path meaning "reload everything".
pub(crate) const RELOAD_ALL: &str = "*";

/// Reload instruction pushed to every connected browser.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReloadCommand {
    /// URL path of the changed resource, or `*` for a full reload.
    pub path: String,
    /// Whether the browser may swap stylesheets instead of reloading.
    #[serde(rename = "liveCSS")]
    pub live_css: bool,
}

impl ReloadCommand {
    /// Reload every page.
    #[must_use]
    pub fn all() -> Self {
        Self {
            path: RELOAD_ALL.to_owned(),
            live_css: false,
        }
    }

    /// Build one command for a batch of changes under `root`.
    ///
    /// A single distinct path is sent as its URL path; anything else becomes
    /// a full reload. Returns `None` for an empty batch.
    pub(crate) fn for_changes(changes: &[ChangeEvent], root: &Path) -> Option<Self> {
        let mut paths: Vec<String> = changes
            .iter()
            .map(|c| url_path(&c.path, root).unwrap_or_else(|| RELOAD_ALL.to_owned()))
            .collect();
        paths.sort();
        paths.dedup();

        match paths.as_slice() {
            [] => None,
            [single] if single != RELOAD_ALL => Some(Self {
                live_css: single.ends_with(".css"),
                path: single.clone(),
            }),
            _ => Some(Self::all()),
        }
    }
}

/// Message sent from the server to a browser.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Handshake sent as soon as a connection opens.
    Hello {
        /// Supported protocol identifiers.
        protocols: Vec<String>,
        /// Server identification.
        #[serde(rename = "serverName")]
        server_name: String,
    },
    /// Reload instruction.
    Reload(ReloadCommand),
}

impl ServerMessage {
    /// Handshake message.
    pub(crate) fn hello() -> Self {
        Self::Hello {
            protocols: vec![PROTOCOL_7.to_owned()],
            server_name: SERVER_NAME.to_owned(),
        }
    }

    /// Serialize to the JSON text frame payload.
    pub(crate) fn to_json(&self) -> String {
        // Serializing plain strings and bools cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Message sent from a browser to the server.
#[derive(Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub(crate) enum ClientMessage {
    /// Client handshake.
    Hello {
        #[serde(default)]
        protocols: Vec<String>,
    },
    /// Page information.
    Info {
        #[serde(default)]
        url: Option<String>,
    },
    /// Anything else is ignored.
    #[serde(other)]
    Unknown,
}

/// Convert an absolute path under `root` to a URL path (`/css/site.css`).
fn url_path(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let segments: Vec<_> = relative
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Some(format!("/{}", segments.join("/")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lr_watch::ChangeKind;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn change(path: &str) -> ChangeEvent {
        ChangeEvent {
            path: PathBuf::from(path),
            kind: ChangeKind::Modified,
        }
    }

    #[test]
    fn test_reload_serialization() {
        let json = serde_json::to_value(ServerMessage::Reload(ReloadCommand::all())).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"command": "reload", "path": "*", "liveCSS": false})
        );
    }

    #[test]
    fn test_hello_serialization() {
        let json = serde_json::to_value(ServerMessage::hello()).unwrap();
        assert_eq!(json["command"], "hello");
        assert_eq!(json["protocols"][0], PROTOCOL_7);
        assert_eq!(json["serverName"], "lr");
    }

    #[test]
    fn test_client_hello_parses() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"command":"hello","protocols":["http://livereload.com/protocols/official-7"]}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Hello {
                protocols: vec![PROTOCOL_7.to_owned()]
            }
        );
    }

    #[test]
    fn test_unknown_client_command_is_tolerated() {
        let msg: ClientMessage = serde_json::from_str(r#"{"command":"ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Unknown);
    }

    #[test]
    fn test_single_change_uses_url_path() {
        let command =
            ReloadCommand::for_changes(&[change("/site/blog/index.html")], Path::new("/site"))
                .unwrap();
        assert_eq!(command.path, "/blog/index.html");
        assert!(!command.live_css);
    }

    #[test]
    fn test_single_stylesheet_enables_live_css() {
        let command =
            ReloadCommand::for_changes(&[change("/site/css/app.css")], Path::new("/site")).unwrap();
        assert_eq!(command.path, "/css/app.css");
        assert!(command.live_css);
    }

    #[test]
    fn test_duplicate_paths_collapse() {
        let changes = [change("/site/index.html"), change("/site/index.html")];
        let command = ReloadCommand::for_changes(&changes, Path::new("/site")).unwrap();
        assert_eq!(command.path, "/index.html");
    }

    #[test]
    fn test_multiple_paths_reload_all() {
        let changes = [change("/site/index.html"), change("/site/app.js")];
        let command = ReloadCommand::for_changes(&changes, Path::new("/site")).unwrap();
        assert_eq!(command, ReloadCommand::all());
    }

    #[test]
    fn test_path_outside_root_reloads_all() {
        let command =
            ReloadCommand::for_changes(&[change("/elsewhere/x.css")], Path::new("/site")).unwrap();
        assert_eq!(command, ReloadCommand::all());
    }

    #[test]
    fn test_empty_batch_is_none() {
        assert!(ReloadCommand::for_changes(&[], Path::new("/site")).is_none());
    }
}
