//! Byte ranges and line/column to byte-offset mapping
//!
//! Every range stored in the function tree is a half-open byte interval into the
//! original script text, so the same offsets can be used later to splice bytes
//! into an intercepted network response. Parser spans are mapped through the
//! source file's local byte offsets; the parser drops a leading BOM, which is
//! added back here.

use serde::{Deserialize, Serialize};
use swc_common::{BytePos, SourceMap, Span};

const BOM: char = '\u{feff}';

/// Half-open byte interval `[start, end)` in a script's source text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: usize,
    pub end: usize,
}

impl ByteRange {
    pub fn new(start: usize, end: usize) -> Self {
        ByteRange { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `other` lies entirely inside this range
    pub fn contains(&self, other: &ByteRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn contains_offset(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }

    pub fn overlaps(&self, other: &ByteRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Line-start offset table for one source text
///
/// Lines are split on `\n` only, which matches how the parser's source map
/// numbers lines. A `\r` before the newline stays part of the previous line.
#[derive(Debug, Clone)]
pub struct LineIndex<'a> {
    source: &'a str,
    line_starts: Vec<usize>,
    /// Bytes of a leading BOM, which the parser does not see
    bom_len: usize,
}

impl<'a> LineIndex<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            source
                .bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        let bom_len = if source.starts_with(BOM) {
            BOM.len_utf8()
        } else {
            0
        };
        LineIndex {
            source,
            line_starts,
            bom_len,
        }
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Byte offset of a 1-based line and a 0-based column counted in chars
    ///
    /// Returns `None` when the line does not exist. Columns past the end of the
    /// line clamp to the line end.
    pub fn offset(&self, line: usize, col_chars: usize) -> Option<usize> {
        let start = *self.line_starts.get(line.checked_sub(1)?)?;
        let line_end = self
            .line_starts
            .get(line)
            .copied()
            .unwrap_or(self.source.len());
        let line_text = &self.source[start..line_end];
        let col_bytes = line_text
            .char_indices()
            .nth(col_chars)
            .map(|(i, _)| i)
            .unwrap_or(line_text.len());
        Some(start + col_bytes)
    }

    /// Convert a parser span into a byte range of the source text
    ///
    /// Dummy spans map to an empty range at the start of the source.
    pub fn range_of(&self, span: Span, source_map: &SourceMap) -> ByteRange {
        if span.is_dummy() {
            return ByteRange::default();
        }
        let start = self.byte_offset(span.lo, source_map).unwrap_or(0);
        let end = self
            .byte_offset(span.hi, source_map)
            .unwrap_or(self.source.len());
        ByteRange::new(start, end.max(start))
    }

    fn byte_offset(&self, pos: BytePos, source_map: &SourceMap) -> Option<usize> {
        let local = source_map.try_lookup_byte_offset(pos).ok()?;
        Some((local.pos.0 as usize + self.bom_len).min(self.source.len()))
    }

    /// Source text covered by a byte range, or an empty string if out of bounds
    pub fn slice(&self, range: ByteRange) -> &'a str {
        self.source.get(range.start..range.end).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_len_and_empty() {
        let range = ByteRange::new(10, 20);
        assert_eq!(range.len(), 10);
        assert!(!range.is_empty());
        assert!(ByteRange::new(5, 5).is_empty());
    }

    #[test]
    fn test_range_contains() {
        let outer = ByteRange::new(0, 100);
        assert!(outer.contains(&ByteRange::new(10, 20)));
        assert!(outer.contains(&ByteRange::new(0, 100)));
        assert!(!outer.contains(&ByteRange::new(90, 101)));
        assert!(outer.contains_offset(99));
        assert!(!outer.contains_offset(100));
    }

    #[test]
    fn test_range_overlaps() {
        let a = ByteRange::new(0, 10);
        assert!(a.overlaps(&ByteRange::new(5, 15)));
        assert!(!a.overlaps(&ByteRange::new(10, 20)));
    }

    #[test]
    fn test_line_index_offsets() {
        let src = "ab\ncde\n\nf";
        let index = LineIndex::new(src);
        assert_eq!(index.line_count(), 4);
        assert_eq!(index.offset(1, 0), Some(0));
        assert_eq!(index.offset(2, 1), Some(4));
        assert_eq!(index.offset(3, 0), Some(7));
        assert_eq!(index.offset(4, 0), Some(8));
        assert_eq!(index.offset(5, 0), None);
        assert_eq!(index.offset(0, 0), None);
    }

    #[test]
    fn test_line_index_counts_chars_not_bytes() {
        let src = "var s = \"é\"; f();";
        let index = LineIndex::new(src);
        // 'f' is the 14th char but sits at byte 14 because 'é' takes two bytes
        let offset = index.offset(1, 13).unwrap();
        assert_eq!(&src[offset..offset + 1], "f");
    }

    fn function_range(src: &str) -> ByteRange {
        use swc_common::sync::Lrc;
        use swc_ecma_ast::{Decl, Stmt};

        let cm: Lrc<SourceMap> = Default::default();
        let (script, _) = crate::parser::parse_script(src, &cm, "app.js").unwrap();
        let span = script
            .body
            .iter()
            .find_map(|stmt| match stmt {
                Stmt::Decl(Decl::Fn(decl)) => Some(decl.function.span),
                _ => None,
            })
            .unwrap();
        LineIndex::new(src).range_of(span, &cm)
    }

    #[test]
    fn test_range_after_bom() {
        let src = "\u{feff}function f(a){return a;}";
        let range = function_range(src);
        assert_eq!(range, ByteRange::new(3, src.len()));
        assert_eq!(LineIndex::new(src).slice(range), "function f(a){return a;}");
    }

    #[test]
    fn test_range_after_astral_characters() {
        let src = "var s = \"é😀\"; function f(a){return a;}";
        let range = function_range(src);
        assert_eq!(range, ByteRange::new(18, src.len()));
        assert_eq!(LineIndex::new(src).slice(range), "function f(a){return a;}");
    }

    #[test]
    fn test_column_clamps_to_line_end() {
        let index = LineIndex::new("ab\ncd");
        assert_eq!(index.offset(1, 40), Some(3));
    }
}
