//! Fragment location around an approximate line hint.
//!
//! Callers supply a line number that is usually close to, but not exactly at,
//! the fragment they want to edit: earlier edits shift content and generated
//! line numbers drift. The search expands outward from the hint one line at a
//! time and returns the nearest match, checking the line below the hint before
//! the line above it at every radius.

/// How a fragment line is compared against a source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// Compare after trimming surrounding whitespace from both sides.
    #[default]
    Trimmed,
    /// Compare lines byte-for-byte.
    Exact,
}

impl MatchMode {
    pub fn lines_equal(self, source: &str, fragment: &str) -> bool {
        match self {
            MatchMode::Trimmed => source.trim() == fragment.trim(),
            MatchMode::Exact => source == fragment,
        }
    }
}

/// Convert a 1-based line number into a 0-based hint inside `[0, line_count - 1]`.
///
/// Zero, negative and absent line numbers all mean "start of file".
pub fn hint_index(line_number: i64, line_count: usize) -> usize {
    let zero_based = usize::try_from(line_number.saturating_sub(1)).unwrap_or(0);
    zero_based.min(line_count.saturating_sub(1))
}

/// Find the 0-based line where `fragment` starts in `source`, nearest to `hint`.
///
/// Returns `None` when the source is empty, the fragment is empty, or no
/// position matches at any radius.
pub fn locate_fragment(
    source: &[&str],
    fragment: &[&str],
    hint: usize,
    mode: MatchMode,
) -> Option<usize> {
    if source.is_empty() || fragment.is_empty() {
        return None;
    }

    let hint = hint.min(source.len() - 1);

    // A lone empty line anchors wherever the caller pointed.
    if fragment.len() == 1 && fragment[0].is_empty() {
        return Some(hint.min(source.len()));
    }

    let max_offset = source.len().max(hint);
    for offset in 0..=max_offset {
        let upper = hint + offset;
        if upper < source.len() && matches_at(source, fragment, upper, mode) {
            return Some(upper);
        }

        let lower = hint.checked_sub(offset);
        if offset > 0 {
            if let Some(lower) = lower {
                if matches_at(source, fragment, lower, mode) {
                    return Some(lower);
                }
            }
        }

        if upper >= source.len() && lower.is_none() {
            break;
        }
    }

    None
}

fn matches_at(source: &[&str], fragment: &[&str], start: usize, mode: MatchMode) -> bool {
    if start + fragment.len() > source.len() {
        return false;
    }

    source[start..start + fragment.len()]
        .iter()
        .zip(fragment)
        .all(|(src, frag)| mode.lines_equal(src, frag))
}

/// A source line that resembles a fragment line that could not be located.
#[derive(Debug, Clone, PartialEq)]
pub struct NearMiss {
    /// 0-based index into the source lines.
    pub line: usize,
    /// Normalized Levenshtein similarity in `[0.0, 1.0]`.
    pub similarity: f64,
}

/// Source lines scoring below this are not worth reporting.
const NEAR_MISS_THRESHOLD: f64 = 0.6;

/// Find the source line most similar to the first non-blank fragment line.
///
/// Used only to enrich "anchor not found" diagnostics.
pub fn closest_line(source: &[&str], fragment: &[&str]) -> Option<NearMiss> {
    let needle = fragment
        .iter()
        .map(|line| line.trim())
        .find(|line| !line.is_empty())?;

    source
        .iter()
        .enumerate()
        .map(|(line, text)| NearMiss {
            line,
            similarity: strsim::normalized_levenshtein(text.trim(), needle),
        })
        .filter(|miss| miss.similarity >= NEAR_MISS_THRESHOLD)
        .fold(None, |best: Option<NearMiss>, miss| match best {
            Some(best) if best.similarity >= miss.similarity => Some(best),
            _ => Some(miss),
        })
}
