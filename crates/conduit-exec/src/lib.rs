//! # conduit-exec
//!
//! Streaming, cancellable shell command execution. Unix only: teardown
//! relies on process groups and `killpg`.
//!
//! - [`runner`]: spawn, merged output pipe, timeout/abort/exit race, teardown
//! - [`process_group`]: process-group guard that kills descendants
//! - [`output`]: newline normalisation, tail window, previews, full-output side file
//! - [`truncate`]: tail truncation with notice
//! - [`bash`]: the `bash` tool built on the runner

#![deny(unsafe_code)]

#[cfg(not(unix))]
compile_error!("conduit-exec requires a unix platform");

pub mod bash;
pub mod output;
pub mod process_group;
pub mod runner;
pub mod truncate;

pub use bash::BashTool;
pub use output::{OutputAccumulator, OutputLimits, RenderedOutput};
pub use runner::{ExecOutcome, ExecRequest, ProcessRunner, Termination};
