use std::ops::Range;

/// Byte range of a token or line in a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    /// Width in bytes; an empty span still counts as one for caret display.
    pub fn width(&self) -> usize {
        self.end.saturating_sub(self.start).max(1)
    }
}

impl From<Range<usize>> for Span {
    fn from(r: Range<usize>) -> Self {
        Span { start: r.start, end: r.end }
    }
}

/// Line index over a listing. Lines are split on `\n`; a trailing `\r` is
/// not part of the line text.
pub struct SourceMap {
    line_starts: Vec<usize>,
    len: usize,
}

impl SourceMap {
    pub fn new(source: &str) -> Self {
        let line_starts =
            std::iter::once(0).chain(source.match_indices('\n').map(|(i, _)| i + 1)).collect();
        SourceMap { line_starts, len: source.len() }
    }

    /// 1-based `(line, col)` of a byte offset. Offsets past the end land on
    /// the last line.
    pub fn lookup(&self, offset: usize) -> (usize, usize) {
        let line = self.line_starts.partition_point(|&start| start <= offset).max(1);
        (line, offset - self.line_starts[line - 1] + 1)
    }

    fn line_range(&self, line: usize) -> Option<Range<usize>> {
        let start = *self.line_starts.get(line.checked_sub(1)?)?;
        let end = self.line_starts.get(line).map_or(self.len, |&next| next - 1);
        Some(start..end)
    }

    /// Text of a 1-based line, or `""` if there is no such line.
    pub fn line_text<'a>(&self, source: &'a str, line: usize) -> &'a str {
        self.line_range(line)
            .and_then(|r| source.get(r))
            .map_or("", |text| text.strip_suffix('\r').unwrap_or(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_on_one_line() {
        let sm = SourceMap::new("PNUM 2.5");
        assert_eq!(sm.lookup(0), (1, 1));
        assert_eq!(sm.lookup(5), (1, 6));
        assert_eq!(sm.lookup(8), (1, 9));
    }

    #[test]
    fn newline_belongs_to_its_line() {
        let src = "PTRUE\nPFALSE\nPARR 2";
        let sm = SourceMap::new(src);
        assert_eq!(sm.lookup(5), (1, 6));
        assert_eq!(sm.lookup(6), (2, 1));
        assert_eq!(sm.lookup(13), (3, 1));
        assert_eq!(sm.line_text(src, 2), "PFALSE");
        assert_eq!(sm.line_text(src, 3), "PARR 2");
    }

    #[test]
    fn missing_lines_are_empty() {
        let src = "POP";
        let sm = SourceMap::new(src);
        assert_eq!(sm.line_text(src, 0), "");
        assert_eq!(sm.line_text(src, 99), "");
    }

    #[test]
    fn carriage_returns_are_stripped() {
        let src = "POP\r\nPNIL\n";
        let sm = SourceMap::new(src);
        assert_eq!(sm.line_text(src, 1), "POP");
        assert_eq!(sm.line_text(src, 2), "PNIL");
        assert_eq!(sm.line_text(src, 3), "");
    }

    #[test]
    fn empty_spans_are_one_wide() {
        assert_eq!(Span::from(4..4).width(), 1);
        assert_eq!(Span::from(4..9).width(), 5);
    }
}
