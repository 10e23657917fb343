//! Output accumulation for a running command.
//!
//! Bytes from the merged stdout/stderr pipe are normalised (CR and CRLF
//! become LF, even across chunk boundaries), counted, and kept in memory.
//! Output within the line limit is kept whole. Once it goes past the limit
//! only the last lines are kept, the complete stream is written to a side
//! file so nothing is lost, and an open line longer than the per-line cap
//! keeps its tail.

use std::path::{Path, PathBuf};

use conduit_core::text::{strip_ansi, tail_str};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::truncate::{min_truncated_len, tail_start, truncate_tail};

/// Limits applied while accumulating.
#[derive(Clone, Debug)]
pub struct OutputLimits {
    /// Tail lines kept when rendering.
    pub max_lines: usize,
    /// Longest line kept in memory once output is past `max_lines`.
    pub max_line_bytes: usize,
    /// Where to put the side file. `None` disables spilling.
    pub spill_dir: Option<PathBuf>,
}

/// Rendered view of the output.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderedOutput {
    /// Display text, ANSI stripped and tail truncated.
    pub text: String,
    /// Whether lines were hidden.
    pub truncated: bool,
    /// Total lines seen so far.
    pub total_lines: usize,
    /// Side file holding the complete output.
    pub full_output_path: Option<PathBuf>,
}

enum Spill {
    Idle,
    Active { file: tokio::fs::File, path: PathBuf },
    Failed,
}

/// Accumulates the output of one execution.
pub struct OutputAccumulator {
    limits: OutputLimits,
    label: String,
    window: Vec<u8>,
    /// Newlines currently in `window`.
    window_lines: usize,
    /// Start of the unterminated last line in `window`.
    line_start: usize,
    pending_cr: bool,
    newlines: usize,
    last_byte: Option<u8>,
    dropped_bytes: u64,
    spill: Spill,
}

impl OutputAccumulator {
    /// `label` becomes part of the side-file name.
    pub fn new(label: &str, limits: OutputLimits) -> Self {
        Self {
            limits,
            label: sanitize_label(label),
            window: Vec::new(),
            window_lines: 0,
            line_start: 0,
            pending_cr: false,
            newlines: 0,
            last_byte: None,
            dropped_bytes: 0,
            spill: Spill::Idle,
        }
    }

    /// Append a raw chunk.
    pub async fn push(&mut self, chunk: &[u8]) {
        let normalized = self.normalize(chunk);
        self.append(normalized).await;
    }

    /// Flush a trailing CR and close the side file.
    pub async fn finish(&mut self) {
        if self.pending_cr {
            self.pending_cr = false;
            self.append(vec![b'\n']).await;
        }
        if let Spill::Active { file, path } = &mut self.spill {
            if let Err(e) = file.flush().await {
                warn!(path = %path.display(), error = %e, "failed to flush spill file");
            }
        }
    }

    /// Total lines so far. A pending CR counts as a line end.
    pub fn total_lines(&self) -> usize {
        let unterminated = match self.last_byte {
            Some(b'\n') | None => 0,
            Some(_) if self.pending_cr => 0,
            Some(_) => 1,
        };
        self.newlines + usize::from(self.pending_cr) + unterminated
    }

    /// Side file, if one was created.
    pub fn full_output_path(&self) -> Option<&Path> {
        match &self.spill {
            Spill::Active { path, .. } => Some(path),
            Spill::Idle | Spill::Failed => None,
        }
    }

    /// Final view: everything received, ANSI stripped and tail truncated.
    pub fn render(&self) -> RenderedOutput {
        let text = clean(&self.window, true);
        self.view(&text)
    }

    /// Live view for streaming updates.
    ///
    /// Holds back an incomplete UTF-8 sequence and an unterminated escape
    /// sequence at the end, both of which may still be completed by the next
    /// chunk. The text is capped at [`min_truncated_len`], which no final
    /// render of more than `max_lines` lines can undercut; past the cap it
    /// shows the most recent output. Only the end of the window is decoded.
    pub fn preview(&self) -> RenderedOutput {
        let budget = min_truncated_len(self.limits.max_lines);
        let len = self.window.len();
        let mut from = len.saturating_sub(budget.saturating_mul(2));
        while from < len && is_continuation(self.window[from]) {
            from += 1;
        }
        let text = clean(&self.window[from..], false);
        let mut view = if from == 0 {
            self.view(&text)
        } else {
            RenderedOutput {
                text,
                truncated: self.total_lines() > self.limits.max_lines,
                total_lines: self.total_lines(),
                full_output_path: self.full_output_path().map(Path::to_path_buf),
            }
        };
        if view.text.len() > budget {
            view.text = tail_str(&view.text, budget).to_string();
        }
        view
    }

    fn view(&self, text: &str) -> RenderedOutput {
        let path = self.full_output_path().map(Path::to_path_buf);
        let truncation = truncate_tail(
            text,
            self.total_lines(),
            self.dropped_bytes == 0,
            self.limits.max_lines,
            path.as_deref(),
        );
        RenderedOutput {
            text: truncation.text,
            truncated: truncation.truncated,
            total_lines: self.total_lines(),
            full_output_path: path,
        }
    }

    fn normalize(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(chunk.len());
        for &b in chunk {
            if self.pending_cr {
                self.pending_cr = false;
                out.push(b'\n');
                if b == b'\n' {
                    continue;
                }
            }
            if b == b'\r' {
                self.pending_cr = true;
            } else {
                out.push(b);
            }
        }
        out
    }

    async fn append(&mut self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        let added = bytes.iter().filter(|&&b| b == b'\n').count();
        self.newlines += added;
        self.window_lines += added;
        self.last_byte = bytes.last().copied();
        if let Some(pos) = bytes.iter().rposition(|&b| b == b'\n') {
            self.line_start = self.window.len() + pos + 1;
        }

        if let Spill::Active { file, path } = &mut self.spill {
            if let Err(e) = file.write_all(&bytes).await {
                warn!(path = %path.display(), error = %e, "failed to write spill file");
            }
        }
        self.window.extend_from_slice(&bytes);

        if self.total_lines() > self.limits.max_lines {
            if matches!(self.spill, Spill::Idle) {
                self.start_spill().await;
            }
            self.trim_window();
        }
    }

    async fn start_spill(&mut self) {
        let Some(dir) = self.limits.spill_dir.clone() else {
            return;
        };
        let path = dir.join(format!("conduit-{}-{}.log", self.label, Uuid::now_v7()));
        match open_spill(&dir, &path, &self.window).await {
            Ok(file) => {
                debug!(path = %path.display(), "spilling full output to file");
                self.spill = Spill::Active { file, path };
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to create spill file");
                let _ = tokio::fs::remove_file(&path).await;
                self.spill = Spill::Failed;
            }
        }
    }

    /// Drop lines older than the last `max_lines` once twice that many have
    /// piled up, and cut an open line that has grown past twice the per-line
    /// cap back to the cap. The window always keeps the last `max_lines`
    /// lines.
    fn trim_window(&mut self) {
        let max_lines = self.limits.max_lines;
        if self.window_lines >= max_lines.saturating_mul(2) {
            let cut = tail_start(&self.window, max_lines);
            self.drop_range(0, cut);
            self.window_lines = self.window.iter().filter(|&&b| b == b'\n').count();
        }

        let cap = self.limits.max_line_bytes;
        let len = self.window.len();
        if len - self.line_start > cap.saturating_mul(2) {
            let mut cut = len - cap;
            while cut < len && is_continuation(self.window[cut]) {
                cut += 1;
            }
            self.drop_range(self.line_start, cut);
        }
    }

    fn drop_range(&mut self, from: usize, to: usize) {
        if to <= from {
            return;
        }
        let _ = self.window.drain(from..to);
        self.dropped_bytes += (to - from) as u64;
        if self.line_start >= to {
            self.line_start -= to - from;
        } else if self.line_start > from {
            self.line_start = from;
        }
    }
}

/// Longest pending escape held back from a preview.
const MAX_PENDING_ESCAPE: usize = 64;

/// Decode and strip escapes. A non-final pass holds back what the next
/// chunk may still complete.
fn clean(bytes: &[u8], is_final: bool) -> String {
    let bytes = if is_final {
        bytes
    } else {
        &bytes[..complete_utf8_prefix(bytes)]
    };
    let decoded = String::from_utf8_lossy(bytes);
    let mut text = strip_ansi(&decoded);
    if !is_final {
        if let Some(pos) = text.rfind('\x1b') {
            if text.len() - pos <= MAX_PENDING_ESCAPE {
                text.truncate(pos);
            }
        }
    }
    text.retain(|c| c != '\x1b');
    text
}

async fn open_spill(dir: &Path, path: &Path, initial: &[u8]) -> std::io::Result<tokio::fs::File> {
    tokio::fs::create_dir_all(dir).await?;
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(initial).await?;
    Ok(file)
}

fn is_continuation(b: u8) -> bool {
    b & 0xC0 == 0x80
}

/// Length of `bytes` without a trailing, not yet complete UTF-8 sequence.
fn complete_utf8_prefix(bytes: &[u8]) -> usize {
    let len = bytes.len();
    let mut start = len;
    while start > 0 && len - start < 4 && is_continuation(bytes[start - 1]) {
        start -= 1;
    }
    if start == 0 {
        return len;
    }
    let lead = bytes[start - 1];
    let width = match lead {
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        _ => return len,
    };
    let have = len - (start - 1);
    if have < width { start - 1 } else { len }
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect();
    if cleaned.is_empty() { "call".to_string() } else { cleaned }
}
