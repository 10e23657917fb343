//! The tool contract shared by every tool.
//!
//! A tool receives JSON parameters and a [`ToolContext`], may push zero or
//! more partial [`ToolResult`]s through the context's update channel, and
//! finally returns exactly one authoritative result or a [`ToolError`].

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::errors::ToolError;
use crate::ids::{AgentId, SessionId, ToolCallId};
use crate::signal::AbortSignal;

// ─────────────────────────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────────────────────────

/// One block of tool output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// Base64 image.
    Image {
        /// Base64-encoded bytes.
        data: String,
        /// MIME type, e.g. `image/png`.
        mime_type: String,
    },
}

impl ContentBlock {
    /// Build a text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Whether the content came from the engine itself or from an outside source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trust {
    /// Produced by the engine or the local machine.
    #[default]
    Trusted,
    /// Produced by a remote agent or other third party.
    Untrusted,
}

/// Output of a tool call, partial or final.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Ordered content blocks.
    pub content: Vec<ContentBlock>,
    /// Tool-specific structured details.
    #[serde(default)]
    pub details: Map<String, Value>,
    /// Provenance of the content.
    #[serde(default)]
    pub trust: Trust,
}

impl ToolResult {
    /// A single-text-block result.
    pub fn text(text: impl Into<String>, trust: Trust) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            details: Map::new(),
            trust,
        }
    }

    /// Builder-style detail insertion.
    #[must_use]
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        let _ = self.details.insert(key.to_string(), value.into());
        self
    }

    /// Look up a detail.
    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }

    /// Concatenated text of all text blocks.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Length of the text content in bytes. Used to keep streaming monotone.
    pub fn text_len(&self) -> usize {
        self.content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => text.len(),
                ContentBlock::Image { .. } => 0,
            })
            .sum()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Calls and context
// ─────────────────────────────────────────────────────────────────────────────

/// An immutable request to run one tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call id assigned by the model.
    pub id: ToolCallId,
    /// Registered tool name.
    pub name: String,
    /// JSON arguments.
    pub arguments: Value,
}

/// Sender half of a call's partial-result stream.
pub type UpdateSender = mpsc::UnboundedSender<ToolResult>;

/// Receiver half of a call's partial-result stream.
pub type UpdateReceiver = mpsc::UnboundedReceiver<ToolResult>;

/// Create a partial-result stream for one call.
pub fn update_channel() -> (UpdateSender, UpdateReceiver) {
    mpsc::unbounded_channel()
}

/// Execution context passed to every tool invocation.
#[derive(Clone, Debug)]
pub struct ToolContext {
    /// Id of this tool call.
    pub call_id: ToolCallId,
    /// Session that issued the call.
    pub session_id: SessionId,
    /// Agent that issued the call.
    pub agent_id: AgentId,
    /// Working directory for spawned processes.
    pub working_directory: PathBuf,
    /// Cancellation for this call.
    pub signal: AbortSignal,
    /// Optional partial-result stream.
    pub updates: Option<UpdateSender>,
    /// Free-form options forwarded by the caller.
    pub options: Map<String, Value>,
}

impl ToolContext {
    /// Context with a fresh signal and no update stream.
    pub fn new(
        call_id: ToolCallId,
        session_id: SessionId,
        agent_id: AgentId,
        working_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            call_id,
            session_id,
            agent_id,
            working_directory: working_directory.into(),
            signal: AbortSignal::new(),
            updates: None,
            options: Map::new(),
        }
    }

    /// Replace the abort signal.
    #[must_use]
    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = signal;
        self
    }

    /// Attach a partial-result stream.
    #[must_use]
    pub fn with_updates(mut self, updates: UpdateSender) -> Self {
        self.updates = Some(updates);
        self
    }

    /// Push a partial result. A dropped receiver is not an error.
    pub fn send_update(&self, result: ToolResult) {
        if let Some(tx) = &self.updates {
            let _ = tx.send(result);
        }
    }

    /// `Err(Aborted)` if the signal is set.
    pub fn check_aborted(&self) -> Result<(), ToolError> {
        if self.signal.is_set() {
            Err(ToolError::Aborted)
        } else {
            Ok(())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool trait
// ─────────────────────────────────────────────────────────────────────────────

/// Schema entry describing a tool to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Short human-readable label.
    pub label: String,
    /// What the tool does.
    pub description: String,
    /// JSON Schema for the parameters.
    pub parameters: Value,
}

/// The trait every tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name, the exact string sent to and from the model.
    fn name(&self) -> &str;

    /// Short display label.
    fn label(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema for the parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute with JSON arguments.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError>;

    /// Build the [`ToolDefinition`] for the model.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            label: self.label().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}
