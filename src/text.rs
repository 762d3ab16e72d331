//! Line splitting that remembers every line's original terminator.
//!
//! [`TextInfo`] is the representation the locator and the reconstructor work
//! on. Joining it back together reproduces the input byte-for-byte, whatever
//! mix of `\r\n`, `\n` and `\r` the input used.

use std::fmt;

/// The terminator that followed a line in the original text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineEnding {
    CrLf,
    Lf,
    Cr,
    /// Final line of a text that does not end with a newline.
    None,
}

impl LineEnding {
    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::CrLf => "\r\n",
            LineEnding::Lf => "\n",
            LineEnding::Cr => "\r",
            LineEnding::None => "",
        }
    }

    pub fn is_none(self) -> bool {
        self == LineEnding::None
    }
}

impl fmt::Display for LineEnding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A text blob decomposed into parallel line / line-ending sequences.
///
/// Invariant: `lines.len() == line_endings.len()`, and only the last entry of
/// `line_endings` may be [`LineEnding::None`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextInfo<'a> {
    pub lines: Vec<&'a str>,
    pub line_endings: Vec<LineEnding>,
    pub ends_with_newline: bool,
}

impl<'a> TextInfo<'a> {
    /// Split `text` into lines, keeping each line's terminator.
    ///
    /// A trailing newline does not produce a phantom empty final line; it is
    /// recorded in `ends_with_newline` instead. Empty input yields no lines.
    pub fn split(text: &'a str) -> Self {
        let mut info = TextInfo::default();
        let mut rest = text;

        while !rest.is_empty() {
            match rest.find(|c| c == '\r' || c == '\n') {
                Some(idx) => {
                    let (line, tail) = rest.split_at(idx);
                    let (ending, len) = if tail.starts_with("\r\n") {
                        (LineEnding::CrLf, 2)
                    } else if tail.starts_with('\r') {
                        (LineEnding::Cr, 1)
                    } else {
                        (LineEnding::Lf, 1)
                    };
                    info.lines.push(line);
                    info.line_endings.push(ending);
                    rest = &tail[len..];
                }
                None => {
                    info.lines.push(rest);
                    info.line_endings.push(LineEnding::None);
                    rest = "";
                }
            }
        }

        info.ends_with_newline = info
            .line_endings
            .last()
            .is_some_and(|ending| !ending.is_none());
        info
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Concatenate every line with its original ending.
    pub fn join(&self) -> String {
        let capacity = self.lines.iter().map(|line| line.len() + 2).sum();
        let mut out = String::with_capacity(capacity);
        for (line, ending) in self.lines.iter().zip(&self.line_endings) {
            out.push_str(line);
            out.push_str(ending.as_str());
        }
        out
    }

    /// First terminator in the text that is an actual newline, if any.
    pub fn first_newline(&self) -> Option<LineEnding> {
        self.line_endings
            .iter()
            .copied()
            .find(|ending| !ending.is_none())
    }
}

const BYTE_ORDER_MARK: char = '\u{feff}';

/// Split a leading byte order mark off `text`, returning `(mark, body)`.
///
/// The mark is not part of the first line's content; callers edit `body` and
/// write the mark back in front of the result.
pub fn split_bom(text: &str) -> (&str, &str) {
    match text.strip_prefix(BYTE_ORDER_MARK) {
        Some(body) => text.split_at(text.len() - body.len()),
        None => ("", text),
    }
}
