//! Static file serving.
//!
//! Serves files from the watched folder, `index.html` for directories that
//! have one, and a generated listing for those that don't.

use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;

use crate::error::RequestError;
use crate::listing::{self, Format};
use crate::state::AppState;

/// Index document served for directories.
const INDEX_FILE: &str = "index.html";

/// Serve a file, index document, or directory listing.
pub(crate) async fn serve(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, RequestError> {
    if method != Method::GET && method != Method::HEAD {
        return Err(RequestError::MethodNotAllowed);
    }
    let is_head = method == Method::HEAD;

    let relative = resolve_relative(uri.path())?;
    let path = contained(&state.root, &state.root.join(&relative)).await?;
    let metadata = tokio::fs::metadata(&path).await.map_err(not_found_or_io)?;

    if metadata.is_file() {
        return serve_file(&path, &metadata, is_head).await;
    }
    if !metadata.is_dir() {
        return Err(RequestError::NotFound);
    }

    if !uri.path().ends_with('/') {
        let location = match uri.query() {
            Some(query) => format!("{}/?{query}", uri.path()),
            None => format!("{}/", uri.path()),
        };
        return Ok((StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response());
    }

    let index = path.join(INDEX_FILE);
    if let Ok(index) = contained(&state.root, &index).await
        && let Ok(index_metadata) = tokio::fs::metadata(&index).await
        && index_metadata.is_file()
    {
        return serve_file(&index, &index_metadata, is_head).await;
    }

    let entries = listing::read_entries(&path, state.show_hidden)
        .await
        .map_err(not_found_or_io)?;
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok());
    let mut response = listing::render(
        &url_directory(&relative),
        &entries,
        Format::negotiate(accept),
    );
    if is_head {
        *response.body_mut() = Body::empty();
    }
    Ok(response)
}

/// Turn a request path into a relative path under the served folder.
///
/// Segments are percent-decoded before `.` and `..` are applied, so encoded
/// traversal is caught too. Climbing above the root is forbidden.
fn resolve_relative(request_path: &str) -> Result<PathBuf, RequestError> {
    let mut segments: Vec<String> = Vec::new();

    for raw in request_path.split('/') {
        let segment = percent_decode_str(raw)
            .decode_utf8()
            .map_err(|_| RequestError::BadRequest)?;
        match segment.as_ref() {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(RequestError::Forbidden);
                }
            }
            s if s.contains(['/', '\\', '\0']) => return Err(RequestError::Forbidden),
            s => segments.push(s.to_owned()),
        }
    }

    Ok(segments.iter().collect())
}

/// Canonicalize `path` and require it to stay inside `root`.
///
/// Symlinks pointing out of the folder are reported as missing.
async fn contained(root: &Path, path: &Path) -> Result<PathBuf, RequestError> {
    let canonical = tokio::fs::canonicalize(path)
        .await
        .map_err(not_found_or_io)?;
    if canonical.starts_with(root) {
        Ok(canonical)
    } else {
        tracing::debug!(path = %path.display(), "Refusing path outside served folder");
        Err(RequestError::NotFound)
    }
}

fn not_found_or_io(e: std::io::Error) -> RequestError {
    match e.kind() {
        ErrorKind::NotFound | ErrorKind::NotADirectory => RequestError::NotFound,
        ErrorKind::PermissionDenied => RequestError::Forbidden,
        _ => RequestError::Io(e),
    }
}

/// Display path of a directory for listings (`/`, `/css/`).
fn url_directory(relative: &Path) -> String {
    let mut url = String::from("/");
    for component in relative.components() {
        url.push_str(&component.as_os_str().to_string_lossy());
        url.push('/');
    }
    url
}

async fn serve_file(path: &Path, metadata: &Metadata, is_head: bool) -> Result<Response, RequestError> {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, content_type(path));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    if let Some(modified) = metadata.modified().ok().map(http_date)
        && let Ok(value) = HeaderValue::from_str(&modified)
    {
        headers.insert(header::LAST_MODIFIED, value);
    }

    let body = if is_head {
        Body::empty()
    } else {
        Body::from(tokio::fs::read(path).await.map_err(not_found_or_io)?)
    };

    Ok((StatusCode::OK, headers, body).into_response())
}

/// Content type from the file extension; text types get a UTF-8 charset.
fn content_type(path: &Path) -> HeaderValue {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let essence = mime.essence_str();
    let needs_charset = mime.type_().as_str() == "text"
        || matches!(essence, "application/javascript" | "application/json");

    let value = if needs_charset && mime.get_param("charset").is_none() {
        format!("{essence}; charset=utf-8")
    } else {
        mime.to_string()
    };
    HeaderValue::from_str(&value)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))
}

/// Format a timestamp as an HTTP date (`Sun, 06 Nov 1994 08:49:37 GMT`).
fn http_date(time: std::time::SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_resolve_plain_path() {
        assert_eq!(
            resolve_relative("/css/site.css").unwrap(),
            PathBuf::from("css/site.css")
        );
        assert_eq!(resolve_relative("/").unwrap(), PathBuf::new());
    }

    #[test]
    fn test_resolve_decodes_segments() {
        assert_eq!(
            resolve_relative("/my%20page.html").unwrap(),
            PathBuf::from("my page.html")
        );
    }

    #[test]
    fn test_resolve_dot_segments_inside_root() {
        assert_eq!(
            resolve_relative("/a/./b/../c.html").unwrap(),
            PathBuf::from("a/c.html")
        );
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        for path in [
            "/../etc/passwd",
            "/../../etc/passwd",
            "/a/../../etc/passwd",
            "/%2e%2e/etc/passwd",
            "/%2E%2E/%2E%2E/etc/passwd",
            "/a/%2e%2e/%2e%2e/secret",
        ] {
            assert!(
                matches!(resolve_relative(path), Err(RequestError::Forbidden)),
                "{path} must be forbidden"
            );
        }
    }

    #[test]
    fn test_resolve_rejects_encoded_separators() {
        for path in ["/..%2fetc%2fpasswd", "/..%5cwindows", "/a%00.html"] {
            assert!(
                matches!(resolve_relative(path), Err(RequestError::Forbidden)),
                "{path} must be forbidden"
            );
        }
    }

    #[test]
    fn test_resolve_rejects_invalid_utf8() {
        assert!(matches!(
            resolve_relative("/%ff.html"),
            Err(RequestError::BadRequest)
        ));
    }

    #[test]
    fn test_content_type() {
        assert_eq!(
            content_type(Path::new("index.html")),
            "text/html; charset=utf-8"
        );
        let js = content_type(Path::new("app.js"));
        assert!(js.to_str().unwrap().ends_with("javascript; charset=utf-8"));
        assert_eq!(content_type(Path::new("data.json")), "application/json; charset=utf-8");
        assert_eq!(content_type(Path::new("logo.png")), "image/png");
        assert_eq!(
            content_type(Path::new("blob.unknownext")),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_http_date() {
        let time = std::time::UNIX_EPOCH + std::time::Duration::from_secs(784_111_777);
        assert_eq!(http_date(time), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn test_url_directory() {
        assert_eq!(url_directory(Path::new("")), "/");
        assert_eq!(url_directory(Path::new("css/img")), "/css/img/");
    }

    #[tokio::test]
    async fn test_symlink_outside_root_is_not_found() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "secret").unwrap();
        let site = tempfile::tempdir().unwrap();
        let root = site.path().canonicalize().unwrap();

        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();
            let err = contained(&root, &root.join("link/secret.txt"))
                .await
                .unwrap_err();
            assert!(matches!(err, RequestError::NotFound));
        }
    }
}
