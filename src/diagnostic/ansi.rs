use super::{Diagnostic, Severity};
use crate::listing::SourceMap;

pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    fn bold(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[1m{s}\x1b[0m") } else { s.to_string() }
    }

    fn bold_red(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[1;31m{s}\x1b[0m") } else { s.to_string() }
    }

    fn yellow(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[1;33m{s}\x1b[0m") } else { s.to_string() }
    }

    fn cyan(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[36m{s}\x1b[0m") } else { s.to_string() }
    }

    fn dim(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[2m{s}\x1b[0m") } else { s.to_string() }
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let mut out = String::new();

        // "error[ZOE-R003]: message"
        let severity = match (&d.severity, d.code) {
            (Severity::Error, Some(code)) => self.bold_red(&format!("error[{code}]")),
            (Severity::Error, None) => self.bold_red("error"),
            (Severity::Warning, Some(code)) => self.yellow(&format!("warning[{code}]")),
            (Severity::Warning, None) => self.yellow("warning"),
        };
        out.push_str(&format!("{}: {}\n", severity, self.bold(&d.message)));

        let primary = d.labels.iter().find(|l| l.is_primary);
        if let (Some(label), Some(source)) = (primary, &d.source) {
            let map = SourceMap::new(source);
            let (line, col) = map.lookup(label.span.start);
            let line_text = map.line_text(source, line);

            out.push_str(&format!("  {} {}:{}\n", self.cyan("-->"), line, col));

            let gutter = line.to_string().len();
            let pipe = self.cyan("|");
            let pad = " ".repeat(gutter);

            out.push_str(&format!("{pad} {pipe}\n"));
            let line_num = self.cyan(&format!("{line:>gutter$}"));
            out.push_str(&format!("{line_num} {pipe} {line_text}\n"));

            let indent = " ".repeat(col.saturating_sub(1));
            let carets = self.bold_red(&"^".repeat(label.span.width()));
            if label.message.is_empty() {
                out.push_str(&format!("{pad} {pipe} {indent}{carets}\n"));
            } else {
                let message = self.bold_red(&label.message);
                out.push_str(&format!("{pad} {pipe} {indent}{carets} {message}\n"));
            }
            out.push_str(&format!("{pad} {pipe}\n"));
        }

        for label in d.labels.iter().filter(|l| !l.is_primary) {
            if label.message.is_empty() {
                continue;
            }
            match &d.source {
                Some(source) => {
                    let (line, col) = SourceMap::new(source).lookup(label.span.start);
                    let eq = self.dim("=");
                    out.push_str(&format!("  {eq} {} at {line}:{col}\n", label.message));
                }
                None => out.push_str(&format!("  {} {}\n", self.dim("="), label.message)),
            }
        }

        for note in &d.notes {
            out.push_str(&format!("  {} note: {}\n", self.dim("="), note));
        }

        if let Some(suggestion) = &d.suggestion {
            out.push_str(&format!("  {} suggestion: {}\n", self.dim("="), suggestion));
        }

        if d.is_internal() {
            let eq = self.dim("=");
            out.push_str(&format!("  {eq} note: the program or its producer is corrupt\n"));
        }

        out
    }
}
