//! Tool executor: look up a call's tool and run it.
//!
//! A panicking tool is turned into [`ToolError::Internal`] so nothing
//! unwinds past the tool boundary.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use conduit_core::{ToolCall, ToolContext, ToolError, ToolResult};
use futures::FutureExt;
use metrics::{counter, histogram};
use tracing::{debug, error, instrument, warn};

use crate::registry::ToolRegistry;

/// Execute one tool call.
#[instrument(skip_all, fields(tool_name = %call.name, call_id = %call.id, session_id = %ctx.session_id))]
pub async fn execute_tool(
    registry: &ToolRegistry,
    call: &ToolCall,
    ctx: &ToolContext,
) -> Result<ToolResult, ToolError> {
    let start = Instant::now();

    let Some(tool) = registry.get(&call.name) else {
        error!("tool not found");
        counter!("tool_executions_total", "tool" => call.name.clone(), "outcome" => "not_found")
            .increment(1);
        return Err(ToolError::ToolNotFound {
            name: call.name.clone(),
        });
    };

    let result = match AssertUnwindSafe(tool.execute(call.arguments.clone(), ctx))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(panic = %message, "tool panicked");
            Err(ToolError::Internal {
                message: format!("Tool {} panicked: {message}", call.name),
            })
        }
    };

    let elapsed = start.elapsed();
    let outcome = match &result {
        Ok(_) => "ok",
        Err(ToolError::Aborted) => "aborted",
        Err(e) if e.is_input_error() => "invalid",
        Err(_) => "error",
    };
    counter!("tool_executions_total", "tool" => call.name.clone(), "outcome" => outcome)
        .increment(1);
    histogram!("tool_duration_ms", "tool" => call.name.clone())
        .record(elapsed.as_secs_f64() * 1000.0);

    match &result {
        Ok(_) => debug!(duration_ms = elapsed.as_millis(), "tool call finished"),
        Err(e) => warn!(error = %e, outcome, "tool call failed"),
    }
    result
}
