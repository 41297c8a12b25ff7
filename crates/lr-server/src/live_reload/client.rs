//! Browser-side reload client.

use axum::http::{HeaderValue, header};
use axum::response::IntoResponse;

/// Path the reload client script is served from.
pub(crate) const SCRIPT_PATH: &str = "/livereload.js";

/// WebSocket endpoint the client connects to.
pub(crate) const ENDPOINT: &str = "/livereload";

/// Tag injected into HTML pages.
pub(crate) const SNIPPET: &str = r#"<script src="/livereload.js?snipver=1" async></script>"#;

const SCRIPT: &str = include_str!("../../assets/livereload.js");

/// Serve the bundled reload client.
pub(crate) async fn script_handler() -> impl IntoResponse {
    (
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/javascript; charset=utf-8"),
            ),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        ],
        SCRIPT,
    )
}
