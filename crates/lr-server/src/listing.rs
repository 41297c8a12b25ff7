//! Directory listings.
//!
//! Rendered as HTML by default, or as JSON / plain text when the `Accept`
//! header prefers them.

use std::fmt::Write as _;
use std::path::Path;

use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;

/// Characters escaped in listing links.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Kind of a listed entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum EntryKind {
    Directory,
    File,
}

/// One entry of a directory listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub(crate) struct Entry {
    pub(crate) name: String,
    #[serde(rename = "type")]
    pub(crate) kind: EntryKind,
    /// Size in bytes, files only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) modified: Option<DateTime<Utc>>,
}

/// Listing representation chosen from the `Accept` header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Format {
    Html,
    Json,
    Text,
}

impl Format {
    /// Pick the representation with the highest quality in `accept`.
    ///
    /// Ties go to HTML, then JSON, then plain text. A missing header or one
    /// naming none of them yields HTML.
    pub(crate) fn negotiate(accept: Option<&str>) -> Self {
        let Some(accept) = accept else {
            return Self::Html;
        };

        let candidates = [
            (Self::Html, "text/html"),
            (Self::Json, "application/json"),
            (Self::Text, "text/plain"),
        ];

        let mut best = (Self::Html, 0.0_f32);
        for (format, media) in candidates {
            let q = quality(accept, media);
            if q > best.1 {
                best = (format, q);
            }
        }
        best.0
    }
}

/// Quality `accept` assigns to `media`, using the most specific matching range.
fn quality(accept: &str, media: &str) -> f32 {
    let (kind, _) = media.split_once('/').unwrap_or((media, ""));
    let mut matched: Option<(u8, f32)> = None;

    for range in accept.split(',') {
        let mut params = range.split(';');
        let name = params.next().unwrap_or_default().trim().to_ascii_lowercase();
        let specificity = if name == media {
            2
        } else if name == format!("{kind}/*") {
            1
        } else if name == "*/*" {
            0
        } else {
            continue;
        };
        let q = params
            .filter_map(|p| p.trim().strip_prefix("q="))
            .find_map(|v| v.parse::<f32>().ok())
            .unwrap_or(1.0);

        if matched.is_none_or(|(s, _)| specificity > s) {
            matched = Some((specificity, q));
        }
    }

    matched.map_or(0.0, |(_, q)| q)
}

/// Read the immediate entries of `dir`, directories first, then by name.
///
/// Entries whose metadata cannot be read (e.g., dangling symlinks) are skipped.
pub(crate) async fn read_entries(dir: &Path, show_hidden: bool) -> std::io::Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut reader = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = reader.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !show_hidden && name.starts_with('.') {
            continue;
        }
        let Ok(metadata) = tokio::fs::metadata(entry.path()).await else {
            tracing::debug!(path = %entry.path().display(), "Skipping unreadable entry");
            continue;
        };
        let kind = if metadata.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        entries.push(Entry {
            name,
            kind,
            size: (kind == EntryKind::File).then_some(metadata.len()),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }

    entries.sort_by(|a, b| {
        (a.kind != EntryKind::Directory)
            .cmp(&(b.kind != EntryKind::Directory))
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(entries)
}

/// Render a listing of `entries` for the directory at URL path `url_path`.
///
/// `url_path` is the decoded path and ends with `/`.
pub(crate) fn render(url_path: &str, entries: &[Entry], format: Format) -> Response {
    match format {
        Format::Html => respond("text/html; charset=utf-8", render_html(url_path, entries)),
        Format::Json => respond(
            "application/json; charset=utf-8",
            serde_json::to_string(entries).unwrap_or_else(|_| "[]".to_owned()),
        ),
        Format::Text => respond("text/plain; charset=utf-8", render_text(entries)),
    }
}

fn respond(content_type: &'static str, body: String) -> Response {
    (
        [(header::CONTENT_TYPE, HeaderValue::from_static(content_type))],
        body,
    )
        .into_response()
}

fn render_text(entries: &[Entry]) -> String {
    entries
        .iter()
        .map(|e| match e.kind {
            EntryKind::Directory => format!("{}/\n", e.name),
            EntryKind::File => format!("{}\n", e.name),
        })
        .collect()
}

fn render_html(url_path: &str, entries: &[Entry]) -> String {
    let title = escape_html(url_path);
    let mut html = String::with_capacity(1024 + entries.len() * 160);

    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Index of {title}</title>\n</head>\n<body>\n\
         <h1>Index of {title}</h1>\n<table>\n\
         <thead><tr><th>Name</th><th>Type</th><th>Size</th><th>Modified</th></tr></thead>\n\
         <tbody>\n"
    );

    if url_path != "/" {
        html.push_str("<tr><td><a href=\"../\">../</a></td><td>directory</td><td></td><td></td></tr>\n");
    }

    for entry in entries {
        let href = utf8_percent_encode(&entry.name, PATH_SEGMENT).to_string();
        let name = escape_html(&entry.name);
        let (slash, kind) = match entry.kind {
            EntryKind::Directory => ("/", "directory"),
            EntryKind::File => ("", "file"),
        };
        let size = entry.size.map(format_size).unwrap_or_default();
        let modified = entry
            .modified
            .map(|m| m.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();

        let _ = writeln!(
            html,
            "<tr><td><a href=\"{href}{slash}\">{name}{slash}</a></td>\
             <td>{kind}</td><td>{size}</td><td>{modified}</td></tr>"
        );
    }

    html.push_str("</tbody>\n</table>\n</body>\n</html>\n");
    html
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[allow(clippy::cast_precision_loss)]
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn file(name: &str, size: u64) -> Entry {
        Entry {
            name: name.to_owned(),
            kind: EntryKind::File,
            size: Some(size),
            modified: None,
        }
    }

    fn directory(name: &str) -> Entry {
        Entry {
            name: name.to_owned(),
            kind: EntryKind::Directory,
            size: None,
            modified: None,
        }
    }

    #[test]
    fn test_negotiate_defaults_to_html() {
        assert_eq!(Format::negotiate(None), Format::Html);
        assert_eq!(Format::negotiate(Some("*/*")), Format::Html);
        assert_eq!(Format::negotiate(Some("image/png")), Format::Html);
        assert_eq!(
            Format::negotiate(Some("text/html,application/xhtml+xml,*/*;q=0.8")),
            Format::Html
        );
    }

    #[test]
    fn test_negotiate_json_and_text() {
        assert_eq!(Format::negotiate(Some("application/json")), Format::Json);
        assert_eq!(Format::negotiate(Some("text/plain")), Format::Text);
        assert_eq!(
            Format::negotiate(Some("text/html;q=0.5, application/json")),
            Format::Json
        );
    }

    #[test]
    fn test_specific_range_beats_wildcard() {
        assert_eq!(
            Format::negotiate(Some("text/*;q=0.2, text/plain;q=0.9")),
            Format::Text
        );
    }

    #[tokio::test]
    async fn test_read_entries_sorts_and_hides_dotfiles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "bb").unwrap();
        std::fs::write(dir.path().join("A.txt"), "a").unwrap();
        std::fs::write(dir.path().join(".hidden"), "").unwrap();
        std::fs::create_dir(dir.path().join("zdir")).unwrap();

        let entries = read_entries(dir.path(), false).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["zdir", "A.txt", "b.txt"]);
        assert_eq!(entries[0].size, None);
        assert_eq!(entries[2].size, Some(2));

        let all = read_entries(dir.path(), true).await.unwrap();
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn test_html_escapes_and_links() {
        let entries = [directory("sub dir"), file("<x>.html", 10)];
        let html = render_html("/docs/", &entries);

        assert!(html.contains("<title>Index of /docs/</title>"));
        assert!(html.contains(r#"<a href="../">../</a>"#));
        assert!(html.contains(r#"<a href="sub%20dir/">sub dir/</a>"#));
        assert!(html.contains(r#"<a href="%3Cx%3E.html">&lt;x&gt;.html</a>"#));
        assert!(html.contains("10 B"));
    }

    #[test]
    fn test_root_has_no_parent_link() {
        let html = render_html("/", &[]);
        assert!(!html.contains("../"));
    }

    #[test]
    fn test_json_listing() {
        let json = serde_json::to_value([directory("css"), file("a.js", 3)]).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"name": "css", "type": "directory"},
                {"name": "a.js", "type": "file", "size": 3}
            ])
        );
    }

    #[test]
    fn test_text_listing() {
        assert_eq!(
            render_text(&[directory("css"), file("a.js", 3)]),
            "css/\na.js\n"
        );
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }
}
