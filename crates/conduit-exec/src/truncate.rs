//! Tail truncation of command output.
//!
//! Keeps the last `max_lines` lines and prepends a notice naming how much
//! was hidden and, when one exists, where the full output was saved.

use std::path::Path;

use conduit_core::text::count_lines;

/// Result of [`truncate_tail`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TailTruncation {
    /// Text to show, notice included.
    pub text: String,
    /// Whether anything was hidden.
    pub truncated: bool,
    /// Lines shown after the notice.
    pub shown_lines: usize,
}

/// Truncate `text` to its last `max_lines` lines.
///
/// `total_lines` is the line count of the complete output and `complete`
/// says whether `text` still holds all of it; the caller may have dropped a
/// prefix already. Text that is complete and within the limit is returned
/// unchanged.
pub fn truncate_tail(
    text: &str,
    total_lines: usize,
    complete: bool,
    max_lines: usize,
    full_output_path: Option<&Path>,
) -> TailTruncation {
    let lines_in_text = count_lines(text);
    if complete && lines_in_text <= max_lines {
        return TailTruncation {
            text: text.to_string(),
            truncated: false,
            shown_lines: lines_in_text,
        };
    }

    let start = tail_start(text.as_bytes(), max_lines);
    let tail = &text[start..];
    let shown_lines = count_lines(tail);
    let total_lines = total_lines.max(shown_lines);
    let notice = notice(shown_lines, total_lines, full_output_path);

    TailTruncation {
        text: format!("{notice}\n{tail}"),
        truncated: true,
        shown_lines,
    }
}

/// The line placed above a truncated tail.
pub fn notice(shown_lines: usize, total_lines: usize, full_output_path: Option<&Path>) -> String {
    match full_output_path {
        Some(path) => format!(
            "[Output truncated. Showing last {shown_lines} of {total_lines} lines. Full output: {}]",
            path.display()
        ),
        None => format!("[Output truncated. Showing last {shown_lines} of {total_lines} lines.]"),
    }
}

/// Shortest text [`truncate_tail`] can return once more than `max_lines`
/// lines were seen and the text still holds the last `max_lines` of them:
/// the notice for one hidden line plus `max_lines` empty lines.
pub fn min_truncated_len(max_lines: usize) -> usize {
    notice(max_lines, max_lines + 1, None).len() + 1 + max_lines
}

/// Byte offset where the last `max_lines` lines of `bytes` begin. Always a
/// line start.
pub(crate) fn tail_start(bytes: &[u8], max_lines: usize) -> usize {
    if max_lines == 0 {
        return bytes.len();
    }
    let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    let mut seen = 0;
    for (idx, &byte) in body.iter().enumerate().rev() {
        if byte == b'\n' {
            seen += 1;
            if seen == max_lines {
                return idx + 1;
            }
        }
    }
    0
}
