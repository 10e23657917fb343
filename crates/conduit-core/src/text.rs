//! Text helpers for terminal output.

use std::sync::LazyLock;

use regex::Regex;

/// CSI, OSC (BEL or ST terminated) and two-byte escape sequences. An OSC
/// body never spans a newline, so stripping cannot merge lines.
static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b\n]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]").unwrap()
});

/// Remove ANSI escape sequences.
pub fn strip_ansi(s: &str) -> String {
    ANSI_ESCAPE.replace_all(s, "").into_owned()
}

/// Longest suffix of `s` that fits in `max_bytes` without splitting a
/// character.
pub fn tail_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut start = s.len() - max_bytes;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

/// Number of lines, counting a trailing unterminated line. `""` has zero.
pub fn count_lines(s: &str) -> usize {
    if s.is_empty() {
        return 0;
    }
    let newlines = s.bytes().filter(|&b| b == b'\n').count();
    if s.ends_with('\n') { newlines } else { newlines + 1 }
}
