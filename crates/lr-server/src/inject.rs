//! Reload client injection into HTML responses.
//!
//! Every `text/html` response passing through [`inject_reload_client`] gets the
//! reload client tag, so any served page connects back to the server on load.

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::live_reload::{SCRIPT_PATH, SNIPPET};

/// Larger HTML documents are passed through untouched.
const MAX_INJECT_SIZE: usize = 16 * 1024 * 1024;

/// Middleware that injects the reload client tag into HTML responses.
pub(crate) async fn inject_reload_client(request: Request, next: Next) -> Response {
    let is_head = request.method() == Method::HEAD;
    let mut response = next.run(request).await;

    if !is_injectable(&response) {
        return response;
    }
    if is_head {
        // GET length depends on whether the page already loads the client
        response.headers_mut().remove(header::CONTENT_LENGTH);
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_INJECT_SIZE).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to buffer HTML response");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let Some(injected) = inject_snippet(&bytes) else {
        return Response::from_parts(parts, Body::from(bytes));
    };

    parts
        .headers
        .insert(header::CONTENT_LENGTH, HeaderValue::from(injected.len()));
    Response::from_parts(parts, Body::from(injected))
}

/// Uncompressed HTML of known, bounded size.
fn is_injectable(response: &Response) -> bool {
    let headers = response.headers();
    let is_html = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("text/html"));
    if !is_html || headers.contains_key(header::CONTENT_ENCODING) {
        return false;
    }

    let length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    length.is_none_or(|len| len <= MAX_INJECT_SIZE)
}

/// Insert the reload tag before the last `</body>`, else before the last
/// `</html>`, else at the end.
///
/// Returns `None` if the document already loads the client script.
pub(crate) fn inject_snippet(content: &[u8]) -> Option<Vec<u8>> {
    if loads_client(content) {
        return None;
    }

    let snippet = SNIPPET.as_bytes();
    let pos = rfind_ignore_case(content, b"</body>")
        .or_else(|| rfind_ignore_case(content, b"</html>"))
        .unwrap_or(content.len());

    let mut result = Vec::with_capacity(content.len() + snippet.len());
    result.extend_from_slice(&content[..pos]);
    result.extend_from_slice(snippet);
    result.extend_from_slice(&content[pos..]);
    Some(result)
}

/// Whether a `src` attribute points at the client script.
///
/// Mentions of the path in text or code samples don't count.
fn loads_client(content: &[u8]) -> bool {
    let needle = SCRIPT_PATH.as_bytes();
    content
        .windows(needle.len())
        .enumerate()
        .any(|(pos, w)| w.eq_ignore_ascii_case(needle) && ends_with_src(&content[..pos]))
}

fn ends_with_src(before: &[u8]) -> bool {
    let before = before
        .strip_suffix(b"\"")
        .or_else(|| before.strip_suffix(b"'"))
        .unwrap_or(before);
    before.len() >= 4 && before[before.len() - 4..].eq_ignore_ascii_case(b"src=")
}

fn rfind_ignore_case(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .rposition(|w| w.eq_ignore_ascii_case(needle))
}
