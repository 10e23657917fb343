//! `delegate` tool: hand work to another agent and collect the answer.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::params::validate_required_string;
use conduit_core::{AgentId, TaskId, Tool, ToolContext, ToolError, ToolResult, Trust};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::orchestrator::{Delegator, Origin, RunHandle, RunOptions, RunResponse};
use crate::types::{Task, TaskStatus};

/// Tool parameters, one variant per action.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum DelegateParams {
    Run {
        #[serde(default)]
        agent_id: String,
        #[serde(default)]
        prompt: String,
        #[serde(default, rename = "async")]
        run_async: bool,
        #[serde(default)]
        continue_session: bool,
        #[serde(default)]
        auto_followup: bool,
    },
    Poll {
        #[serde(default)]
        task_id: String,
    },
}

/// The `delegate` tool.
pub struct DelegateTool {
    delegator: Arc<Delegator>,
}

impl DelegateTool {
    /// Create the tool around a shared orchestrator.
    pub fn new(delegator: Arc<Delegator>) -> Self {
        Self { delegator }
    }

    fn parse(params: Value) -> Result<DelegateParams, ToolError> {
        let _ = validate_required_string(&params, "action")?;
        let parsed: DelegateParams = serde_json::from_value(params)
            .map_err(|e| ToolError::invalid(format!("Invalid parameters: {e}")))?;
        match &parsed {
            DelegateParams::Run {
                agent_id, prompt, ..
            } => {
                require(agent_id, "agent_id")?;
                require(prompt, "prompt")?;
            }
            DelegateParams::Poll { task_id } => require(task_id, "task_id")?,
        }
        Ok(parsed)
    }
}

fn require(value: &str, param: &str) -> Result<(), ToolError> {
    if value.trim().is_empty() {
        return Err(ToolError::invalid(format!(
            "Missing required parameter: {param}"
        )));
    }
    Ok(())
}

#[async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        "delegate"
    }

    fn label(&self) -> &str {
        "Delegate"
    }

    fn description(&self) -> &str {
        "Delegate a prompt to another agent. action=run submits the work and, unless \
         async is true, waits for the answer. With async=true it returns a task_id \
         immediately; use action=poll with that task_id to check on it later."
    }

    fn parameters_schema(&self) -> Value {
        let agents: Vec<&str> = self.delegator.agents().iter().map(AgentId::as_str).collect();
        json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": ["run", "poll"], "description": "run submits work, poll checks a task"},
                "agent_id": {"type": "string", "enum": agents, "description": "Agent to delegate to (run)"},
                "prompt": {"type": "string", "description": "What the agent should do (run)"},
                "async": {"type": "boolean", "description": "Return immediately with a task_id instead of waiting (run)"},
                "continue_session": {"type": "boolean", "description": "Continue the previous conversation with this agent (run)"},
                "auto_followup": {"type": "boolean", "description": "Deliver the answer back into this conversation when done (async run)"},
                "task_id": {"type": "string", "description": "Task to check (poll)"}
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        ctx.check_aborted()?;
        match Self::parse(params)? {
            DelegateParams::Run {
                agent_id,
                prompt,
                run_async,
                continue_session,
                auto_followup,
            } => {
                let origin = Origin {
                    session_id: ctx.session_id.clone(),
                    agent_id: ctx.agent_id.clone(),
                };
                let options = RunOptions {
                    agent_id: AgentId::from_raw(agent_id),
                    prompt,
                    wait: !run_async,
                    continue_session,
                    auto_followup,
                };
                let response = self.delegator.run(&origin, options, &ctx.signal).await?;
                Ok(run_result(response))
            }
            DelegateParams::Poll { task_id } => {
                let task = self.delegator.poll(&TaskId::from_raw(task_id))?;
                Ok(snapshot_result(&task))
            }
        }
    }
}

fn with_handle(result: ToolResult, status: TaskStatus, handle: &RunHandle) -> ToolResult {
    result
        .with_detail("status", status.as_str())
        .with_detail("task_id", handle.task_id.as_str())
        .with_detail("run_id", handle.run_id.as_str())
        .with_detail("session_key", handle.session_key.as_str())
}

fn run_result(response: RunResponse) -> ToolResult {
    match response {
        RunResponse::Queued(handle) => {
            let text = format!(
                "Task {} queued (run {}). Use action=poll with this task_id to get the result.",
                handle.task_id, handle.run_id
            );
            with_handle(ToolResult::text(text, Trust::Trusted), TaskStatus::Queued, &handle)
        }
        RunResponse::Completed { handle, answer } => {
            with_handle(ToolResult::text(answer, Trust::Untrusted), TaskStatus::Completed, &handle)
        }
        RunResponse::Failed { handle, error } => {
            let text = format!("Delegated run failed: {error}");
            with_handle(ToolResult::text(text, Trust::Untrusted), TaskStatus::Failed, &handle)
                .with_detail("error", error)
        }
        RunResponse::Pending(task) => snapshot_result(&task),
    }
}

/// Result describing the current state of a task.
fn snapshot_result(task: &Task) -> ToolResult {
    let (text, trust) = match (task.status, &task.result, &task.error) {
        (TaskStatus::Completed, Some(answer), _) => (answer.clone(), Trust::Untrusted),
        (TaskStatus::Failed, _, Some(error)) => (
            format!("Task {} failed: {error}", task.task_id),
            Trust::Untrusted,
        ),
        (status, _, _) => (
            format!(
                "Task {} is {}. Poll again later for the result.",
                task.task_id,
                status.as_str()
            ),
            Trust::Trusted,
        ),
    };

    let mut result = ToolResult::text(text, trust)
        .with_detail("status", task.status.as_str())
        .with_detail("task_id", task.task_id.as_str())
        .with_detail("run_id", task.run_id.as_str())
        .with_detail("agent_id", task.agent_id.as_str())
        .with_detail("session_key", task.session_key.as_str());
    if let Some(answer) = &task.result {
        result = result.with_detail("result", answer.as_str());
    }
    if let Some(error) = &task.error {
        result = result.with_detail("error", error.as_str());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::collaborators::{RunSubmitter, SubmitError};
    use crate::orchestrator::DelegatorConfig;
    use crate::store::TaskStore;
    use crate::types::{RunEvent, RunRequest};
    use assert_matches::assert_matches;
    use conduit_core::{RunId, SessionId, ToolCallId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingSubmitter(AtomicUsize);

    #[async_trait]
    impl RunSubmitter for CountingSubmitter {
        async fn submit(&self, _request: RunRequest) -> Result<RunId, SubmitError> {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(RunId::from_raw(format!("run_{n}")))
        }
    }

    fn tool() -> DelegateTool {
        let delegator = Delegator::new(
            DelegatorConfig {
                agents: vec![AgentId::from_raw("oracle")],
                sync_timeout: Duration::from_secs(5),
                watch_timeout: Duration::from_secs(60),
            },
            Arc::new(TaskStore::default()),
            Arc::new(EventBus::new()),
            Arc::new(CountingSubmitter(AtomicUsize::new(0))),
        );
        DelegateTool::new(Arc::new(delegator))
    }

    fn ctx() -> ToolContext {
        ToolContext::new(
            ToolCallId::new(),
            SessionId::from_raw("sess_main"),
            AgentId::from_raw("main"),
            "/tmp",
        )
    }

    fn detail_str<'a>(result: &'a ToolResult, key: &str) -> &'a str {
        result.detail(key).and_then(Value::as_str).unwrap()
    }

    #[tokio::test]
    async fn async_run_then_poll_completed() {
        let tool = tool();
        let queued = tool
            .execute(
                json!({"action": "run", "agent_id": "oracle", "prompt": "6*7?", "async": true}),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(detail_str(&queued, "status"), "queued");
        assert_eq!(queued.trust, Trust::Trusted);
        let task_id = detail_str(&queued, "task_id").to_string();
        let run_id = detail_str(&queued, "run_id").to_string();
        assert!(detail_str(&queued, "session_key").starts_with("sess_main:delegate:oracle:"));

        let _ = tool
            .delegator
            .bus()
            .publish_run_event(RunEvent::completed(RunId::from_raw(run_id), "42"));

        let mut polled = None;
        for _ in 0..200 {
            let result = tool
                .execute(json!({"action": "poll", "task_id": task_id}), &ctx())
                .await
                .unwrap();
            if detail_str(&result, "status") == "completed" {
                polled = Some(result);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let polled = polled.unwrap();
        assert_eq!(polled.text_content(), "42");
        assert_eq!(detail_str(&polled, "result"), "42");
        assert_eq!(polled.trust, Trust::Untrusted);
    }

    #[tokio::test]
    async fn unknown_agent_is_error() {
        let err = tool()
            .execute(
                json!({"action": "run", "agent_id": "missing-agent", "prompt": "hi"}),
                &ctx(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unknown agent_id: missing-agent");
    }

    #[tokio::test]
    async fn poll_unknown_task_is_error() {
        let err = tool()
            .execute(json!({"action": "poll", "task_id": "task_x"}), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unknown task_id: task_x");
    }

    #[tokio::test]
    async fn poll_pending_task_is_trusted_status() {
        let tool = tool();
        let queued = tool
            .execute(
                json!({"action": "run", "agent_id": "oracle", "prompt": "p", "async": true}),
                &ctx(),
            )
            .await
            .unwrap();
        let task_id = detail_str(&queued, "task_id");
        let polled = tool
            .execute(json!({"action": "poll", "task_id": task_id}), &ctx())
            .await
            .unwrap();
        assert_eq!(detail_str(&polled, "status"), "queued");
        assert!(polled.text_content().contains("is queued"));
        assert_eq!(polled.trust, Trust::Trusted);
        assert!(polled.detail("result").is_none());
    }

    #[tokio::test]
    async fn sync_run_returns_untrusted_answer() {
        let tool = tool();
        let bus = Arc::clone(tool.delegator.bus());
        let _ = tokio::spawn(async move {
            while bus.subscriber_count("run:run_1") < 2 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            let _ = bus.publish_run_event(RunEvent::completed(RunId::from_raw("run_1"), "forty-two"));
        });
        let result = tool
            .execute(json!({"action": "run", "agent_id": "oracle", "prompt": "p"}), &ctx())
            .await
            .unwrap();
        assert_eq!(result.text_content(), "forty-two");
        assert_eq!(detail_str(&result, "status"), "completed");
        assert_eq!(result.trust, Trust::Untrusted);
    }

    #[tokio::test]
    async fn abort_checked_before_validation() {
        let ctx = ctx();
        ctx.signal.abort();
        let err = tool().execute(json!({}), &ctx).await.unwrap_err();
        assert_matches!(err, ToolError::Aborted);
    }

    #[tokio::test]
    async fn missing_fields_are_input_errors() {
        let tool = tool();
        let err = tool.execute(json!({}), &ctx()).await.unwrap_err();
        assert_eq!(err.to_string(), "Missing required parameter: action");

        let err = tool
            .execute(json!({"action": "run", "agent_id": "oracle"}), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing required parameter: prompt");

        let err = tool.execute(json!({"action": "poll"}), &ctx()).await.unwrap_err();
        assert_eq!(err.to_string(), "Missing required parameter: task_id");
        assert!(err.is_input_error());
    }

    #[tokio::test]
    async fn unknown_action_is_input_error() {
        let err = tool()
            .execute(json!({"action": "cancel", "task_id": "t"}), &ctx())
            .await
            .unwrap_err();
        assert!(err.is_input_error());
        assert!(err.to_string().starts_with("Invalid parameters:"));
    }

    #[test]
    fn schema_lists_configured_agents() {
        let schema = tool().parameters_schema();
        assert_eq!(schema["properties"]["agent_id"]["enum"], json!(["oracle"]));
        assert_eq!(schema["required"], json!(["action"]));
    }
}
