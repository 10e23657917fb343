//! # conduit-core
//!
//! Foundation types shared by every Conduit crate.
//!
//! - **Identifiers**: branded newtypes for sessions, calls, agents, tasks and runs
//! - **Cancellation**: [`AbortSignal`], the per-call cooperative abort flag
//! - **Tool contract**: [`Tool`], [`ToolResult`], [`ToolContext`] and the
//!   partial-result update channel
//! - **Errors**: [`ToolError`], the only error type that crosses the tool boundary
//! - **Helpers**: parameter extraction and terminal-text utilities

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod params;
pub mod signal;
pub mod text;
pub mod tools;

pub use errors::{ABORTED_MESSAGE, ToolError};
pub use ids::{AgentId, RunId, SessionId, TaskId, ToolCallId};
pub use signal::AbortSignal;
pub use tools::{
    ContentBlock, Tool, ToolCall, ToolContext, ToolDefinition, ToolResult, Trust, UpdateReceiver,
    UpdateSender, update_channel,
};
