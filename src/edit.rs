use crate::locate::{hint_index, locate_fragment, MatchMode};
use crate::text::{LineEnding, TextInfo};
use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

/// The lines of a source text that a replacement consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSpan {
    /// 0-based index of the first consumed line.
    pub start: usize,
    /// Number of consumed lines; zero for a pure insertion.
    pub len: usize,
}

impl LineSpan {
    pub fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// How rewritten files reach the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Truncate and rewrite in place. A crash mid-write can leave a partial file.
    #[default]
    Direct,
    /// Write a tempfile in the same directory, fsync, then rename over the target.
    Atomic,
}

#[derive(Error, Debug)]
pub enum TextEditError {
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Rebuild `source` with the lines in `span` replaced by `replacement`.
///
/// Lines outside the span keep their original endings. Inner replacement
/// lines keep their own endings; the last replacement line takes the ending
/// of the last consumed source line, unless the replacement sits at the very
/// end of a file that had no trailing newline.
pub fn rebuild(source: &TextInfo<'_>, replacement: &TextInfo<'_>, span: LineSpan) -> String {
    let start = span.start.min(source.len());
    let end = span.end().min(source.len());
    let mut out = String::new();

    for idx in 0..start {
        out.push_str(source.lines[idx]);
        out.push_str(source.line_endings[idx].as_str());
    }

    let last_new = replacement.len().saturating_sub(1);
    for (idx, line) in replacement.lines.iter().enumerate() {
        out.push_str(line);
        if idx < last_new {
            out.push_str(replacement.line_endings[idx].as_str());
        } else if end < source.len() || source.ends_with_newline {
            out.push_str(trailing_ending(source, start, end).as_str());
        }
    }

    for idx in end..source.len() {
        out.push_str(source.lines[idx]);
        if idx + 1 < source.len() || source.ends_with_newline {
            out.push_str(source.line_endings[idx].as_str());
        }
    }

    out
}

/// Ending for the last inserted line: the last consumed line's ending, else
/// the source's first newline, else `\n`.
fn trailing_ending(source: &TextInfo<'_>, start: usize, end: usize) -> LineEnding {
    if end > start {
        let consumed = source.line_endings[end - 1];
        if !consumed.is_none() {
            return consumed;
        }
    }
    source.first_newline().unwrap_or(LineEnding::Lf)
}

/// Replace the fragment `old` with `new`, searching outward from the 1-based
/// `line_number` hint.
///
/// Returns `None` if `old` is empty, the source is empty, or the fragment
/// cannot be found at any distance from the hint.
pub fn replace_at_hint(
    source: &str,
    old: &str,
    new: &str,
    line_number: i64,
    mode: MatchMode,
) -> Option<String> {
    if source.is_empty() || old.is_empty() {
        return None;
    }

    let source_info = TextInfo::split(source);
    let old_info = TextInfo::split(old);
    let new_info = TextInfo::split(new);

    let hint = hint_index(line_number, source_info.len());
    let start = locate_fragment(&source_info.lines, &old_info.lines, hint, mode)?;

    Some(rebuild(
        &source_info,
        &new_info,
        LineSpan::new(start, old_info.len()),
    ))
}

/// Insert `new` ahead of the first line of `source`.
pub fn insert_at_start(source: &str, new: &str) -> String {
    if source.is_empty() {
        return new.to_string();
    }

    let source_info = TextInfo::split(source);
    let new_info = TextInfo::split(new);
    rebuild(&source_info, &new_info, LineSpan::new(0, 0))
}

/// Write `content` to `path` using the requested strategy.
pub fn write_file(path: &Path, content: &str, mode: WriteMode) -> Result<(), TextEditError> {
    match mode {
        WriteMode::Direct => fs::write(path, content)?,
        WriteMode::Atomic => atomic_write(path, content.as_bytes())?,
    }
    Ok(())
}

/// Atomic file write: tempfile + fsync + rename.
fn atomic_write(path: &Path, content: &[u8]) -> Result<(), TextEditError> {
    // Tempfile must live on the same filesystem as the target for rename to be atomic
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn replace(source: &str, old: &str, new: &str, line: i64) -> Option<String> {
        replace_at_hint(source, old, new, line, MatchMode::Trimmed)
    }

    #[test]
    fn test_replace_middle_line() {
        let out = replace("line1\nline2\nline3\n", "line2", "LINE2", 2).unwrap();
        assert_eq!(out, "line1\nLINE2\nline3\n");
    }

    #[test]
    fn test_replace_preserves_crlf() {
        let out = replace("a\r\nb\r\nc\r\n", "b", "B", 2).unwrap();
        assert_eq!(out, "a\r\nB\r\nc\r\n");
    }

    #[test]
    fn test_replace_keeps_mixed_endings_outside_span() {
        let out = replace("a\rb\nc\r\nd", "c", "C", 3).unwrap();
        assert_eq!(out, "a\rb\nC\r\nd");
    }

    #[test]
    fn test_replace_last_line_without_trailing_newline() {
        let out = replace("a\nb", "b", "B", 2).unwrap();
        assert_eq!(out, "a\nB");
    }

    #[test]
    fn test_replace_last_line_with_trailing_newline() {
        let out = replace("a\nb\n", "b", "B", 2).unwrap();
        assert_eq!(out, "a\nB\n");
    }

    #[test]
    fn test_replace_multi_line_with_more_lines() {
        let out = replace("a\nb\nc\nd\n", "b\nc", "x\ny\nz", 2).unwrap();
        assert_eq!(out, "a\nx\ny\nz\nd\n");
    }

    #[test]
    fn test_replacement_trailing_newline_is_not_doubled() {
        // "B\n" splits into a single line, so the consumed line's ending is reused.
        let out = replace("a\nb\nc\n", "b\n", "B\n", 2).unwrap();
        assert_eq!(out, "a\nB\nc\n");
    }

    #[test]
    fn test_delete_span() {
        let out = replace("a\nb\nc\n", "b", "", 2).unwrap();
        assert_eq!(out, "a\nc\n");
    }

    #[test]
    fn test_replace_absent_returns_none() {
        assert_eq!(replace("a\nb\n", "zzz", "y", 1), None);
        assert_eq!(replace("a\nb\n", "", "y", 1), None);
        assert_eq!(replace("", "a", "y", 1), None);
    }

    #[test]
    fn test_replace_with_drifted_hint() {
        let source = "x\ntarget\nx\nx\nx\nx\ntarget\nx\n";
        let out = replace(source, "target", "HIT", 6).unwrap();
        assert_eq!(out, "x\ntarget\nx\nx\nx\nx\nHIT\nx\n");
    }

    #[test]
    fn test_insert_at_start() {
        assert_eq!(insert_at_start("a\nb\n", "top\n"), "top\na\nb\n");
        assert_eq!(insert_at_start("a\r\nb", "top"), "top\r\na\r\nb");
        assert_eq!(insert_at_start("", "top\n"), "top\n");
    }

    #[test]
    fn test_insert_into_single_unterminated_line_uses_lf() {
        assert_eq!(insert_at_start("only", "top"), "top\nonly");
    }

    #[test]
    fn test_rebuild_identity_with_own_lines() {
        let source = TextInfo::split("a\r\nb\nc");
        let replacement = TextInfo::split("b");
        let out = rebuild(&source, &replacement, LineSpan::new(1, 1));
        assert_eq!(out, "a\r\nb\nc");
    }

    #[test]
    fn test_write_file_direct_and_atomic() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("test.txt");

        write_file(&file_path, "direct", WriteMode::Direct).unwrap();
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "direct");

        write_file(&file_path, "atomic", WriteMode::Atomic).unwrap();
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "atomic");
    }

    proptest! {
        #[test]
        fn prop_replace_line_with_itself_is_identity(
            text in "[ab]{1,4}((\\r\\n|\\n|\\r)[ab]{1,4}){0,8}(\\r\\n|\\n|\\r)?",
            pick in 0usize..16,
        ) {
            let info = TextInfo::split(&text);
            let idx = pick % info.len();
            let line = info.lines[idx].to_string();
            let out = replace_at_hint(&text, &line, &line, idx as i64 + 1, MatchMode::Exact).unwrap();
            prop_assert_eq!(out, text);
        }
    }
}
