//! Response headers for a development server.
//!
//! Adds to all responses:
//! - Cache-Control (unless the handler set one)
//! - X-Content-Type-Options

use axum::http::HeaderValue;
use axum::http::header::{CACHE_CONTROL, HeaderName};
use tower_http::set_header::SetResponseHeaderLayer;

/// Cache-Control value; browsers revalidate so a reload always sees fresh files.
const NO_CACHE: &str = "no-cache";

/// Create layer that adds Cache-Control when the handler did not.
pub(crate) fn no_cache_layer() -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::if_not_present(CACHE_CONTROL, HeaderValue::from_static(NO_CACHE))
}

/// Create layer that adds X-Content-Type-Options header.
pub(crate) fn content_type_options_layer() -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::overriding(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    )
}
