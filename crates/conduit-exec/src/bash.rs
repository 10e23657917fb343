//! `bash` tool: shell command execution with streaming, timeout and abort.
//!
//! Non-zero exits, syntax errors and a missing shell are all reported as
//! ordinary results so the model can read the shell's own error text. Only
//! a missing `command` parameter or an abort is an error.

use std::time::Duration;

use async_trait::async_trait;
use conduit_core::params::{optional_u64, validate_required_string};
use conduit_core::{Tool, ToolContext, ToolError, ToolResult, Trust};
use serde_json::{Value, json};

use crate::output::RenderedOutput;
use crate::runner::{ExecOutcome, ExecRequest, ProcessRunner, Termination};

/// The `bash` tool.
pub struct BashTool {
    runner: ProcessRunner,
}

impl BashTool {
    /// Create the tool around a runner.
    pub fn new(runner: ProcessRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn label(&self) -> &str {
        "Bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the working directory. stdout and stderr are merged. \
         Output is truncated to the last lines when long; the full output is then saved \
         to a file whose path is included."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "The shell command to execute"},
                "timeout": {"type": "integer", "minimum": 0, "description": "Timeout in seconds (0 disables)"}
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        ctx.check_aborted()?;
        let command = validate_required_string(&params, "command")?;
        let timeout = self.runner.resolve_timeout(optional_u64(&params, "timeout")?);

        let request = ExecRequest {
            call_id: &ctx.call_id,
            command: &command,
            cwd: &ctx.working_directory,
            timeout,
            stream: ctx.updates.is_some(),
        };
        let outcome = self
            .runner
            .run(request, &ctx.signal, |output| ctx.send_update(partial_result(output)))
            .await?;

        let result = final_result(&command, &self.runner.settings().shell, &outcome);
        ctx.send_update(result.clone());
        Ok(result)
    }
}

fn partial_result(output: &RenderedOutput) -> ToolResult {
    ToolResult::text(output.text.clone(), Trust::Trusted)
        .with_detail("truncated", output.truncated)
        .with_detail("total_lines", output.total_lines)
}

/// Build the authoritative result for a finished execution.
pub fn final_result(command: &str, shell: &str, outcome: &ExecOutcome) -> ToolResult {
    let output = &outcome.output;
    let notice = match &outcome.termination {
        Termination::Exited(0) => None,
        Termination::Exited(code) => Some(format!("`{command}` exited with code {code}")),
        Termination::TimedOut(after) => Some(timeout_notice(*after)),
        Termination::Aborted => Some("Command cancelled".to_string()),
        Termination::SpawnFailed(reason) => Some(format!("Failed to start `{shell}`: {reason}")),
    };

    let text = match notice {
        None if output.text.is_empty() => "(no output)".to_string(),
        None => output.text.clone(),
        Some(notice) if output.text.is_empty() => notice,
        // The output is kept as is so the result never undercuts a preview.
        Some(notice) if output.text.ends_with('\n') => format!("{}\n{notice}", output.text),
        Some(notice) => format!("{}\n\n{notice}", output.text),
    };

    let duration_ms = u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX);
    let mut result = ToolResult::text(text, Trust::Trusted)
        .with_detail("command", command)
        .with_detail("truncated", output.truncated)
        .with_detail("total_lines", output.total_lines)
        .with_detail("duration_ms", duration_ms)
        .with_detail("timed_out", matches!(outcome.termination, Termination::TimedOut(_)))
        .with_detail("cancelled", outcome.termination == Termination::Aborted);
    if let Termination::Exited(code) = outcome.termination {
        result = result.with_detail("exit_code", code);
    }
    if let Termination::SpawnFailed(reason) = &outcome.termination {
        result = result.with_detail("spawn_error", reason.as_str());
    }
    if let Some(path) = &output.full_output_path {
        result = result.with_detail("full_output_path", path.display().to_string());
    }
    result
}

fn timeout_notice(after: Duration) -> String {
    let secs = after.as_secs();
    let unit = if secs == 1 { "second" } else { "seconds" };
    format!("Command timed out after {secs} {unit}")
}
