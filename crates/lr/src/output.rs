//! Terminal output for the `lr` command.
//!
//! Every line goes to stderr behind a right-aligned label, so the served URL
//! lines up with the folder and status lines above it:
//!
//! ```text
//!    Serving /home/me/site
//!  Listening http://localhost:5500/
//! ```

use std::fmt::Display;
use std::path::Path;

use console::{Style, Term};

/// Width the labels are right-aligned to.
const LABEL_WIDTH: usize = 10;

/// Labelled status lines on stderr.
pub(crate) struct Output {
    term: Term,
    status: Style,
    warning: Style,
    error: Style,
    url: Style,
}

impl Output {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            term: Term::stderr(),
            status: Style::new().green().bold(),
            warning: Style::new().yellow().bold(),
            error: Style::new().red().bold(),
            url: Style::new().cyan().bold().underlined(),
        }
    }

    /// Print `msg` behind a green `label`.
    pub(crate) fn status(&self, label: &str, msg: impl Display) {
        self.write(&self.status, label, msg);
    }

    pub(crate) fn warning(&self, msg: impl Display) {
        self.write(&self.warning, "Warning", msg);
    }

    pub(crate) fn error(&self, msg: impl Display) {
        self.write(&self.error, "Error", msg);
    }

    /// Announce a running server: the folder, its URL, and how to stop it.
    pub(crate) fn banner(&self, folder: &Path, url: &str) {
        self.status("Serving", folder.display());
        self.status("Listening", self.url.apply_to(url));
        self.write(&Style::new(), "", "Press Ctrl-C to stop");
    }

    fn write(&self, style: &Style, label: &str, msg: impl Display) {
        let _ = self.term.write_line(&line(style, label, msg));
    }
}

fn line(style: &Style, label: &str, msg: impl Display) -> String {
    format!("{} {msg}", style.apply_to(format!("{label:>LABEL_WIDTH$}")))
}
