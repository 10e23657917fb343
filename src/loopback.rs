//! In-process run submitter that answers every run with its own prompt.
//!
//! Stands in for a real run-submission service in the command-line front end
//! so the `delegate` tool can be exercised without one. Runs settle before
//! `submit` returns; the orchestrator reads the outcome back from the bus.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::RunId;
use conduit_delegate::{EventBus, RunEvent, RunRequest, RunSubmitter, SubmitError};
use tracing::debug;

/// Publishes `Started` then `Completed { answer: prompt }` for every run.
pub struct LoopbackSubmitter {
    bus: Arc<EventBus>,
}

impl LoopbackSubmitter {
    /// Loopback over `bus`.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl RunSubmitter for LoopbackSubmitter {
    async fn submit(&self, request: RunRequest) -> Result<RunId, SubmitError> {
        let run_id = RunId::new();
        debug!(run_id = %run_id, agent_id = %request.agent_id, session_key = %request.session_key, "loopback run accepted");

        let _ = self.bus.publish_run_event(RunEvent::started(run_id.clone()));
        let _ = self
            .bus
            .publish_run_event(RunEvent::completed(run_id.clone(), request.prompt));
        Ok(run_id)
    }
}
