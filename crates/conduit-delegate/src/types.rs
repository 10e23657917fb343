//! Data types shared by the delegation components.

use chrono::{DateTime, Utc};
use conduit_core::{AgentId, RunId, TaskId};
use serde::{Deserialize, Serialize};

use crate::session_key::SessionKey;

/// How the run-submission service should queue a request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueMode {
    /// A new turn.
    #[default]
    Normal,
    /// Appended to the session as a follow-up once it is idle.
    Followup,
}

/// One unit of delegated work.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Target agent.
    pub agent_id: AgentId,
    /// Prompt for the agent.
    pub prompt: String,
    /// Conversation the run belongs to.
    pub session_key: SessionKey,
    /// Queueing behaviour.
    pub queue_mode: QueueMode,
    /// Whether the session key is the stable one.
    pub continue_session: bool,
}

/// Lifecycle of a delegated task. Ordered: a task never moves backwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Submitted, not yet started.
    Queued,
    /// The agent picked it up.
    Running,
    /// Finished with an answer.
    Completed,
    /// Finished with an error.
    Failed,
}

impl TaskStatus {
    /// Completed or failed.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// A tracked delegated run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Store key.
    pub task_id: TaskId,
    /// Id returned by the submitter.
    pub run_id: RunId,
    /// Agent doing the work.
    pub agent_id: AgentId,
    /// Conversation of the run.
    pub session_key: SessionKey,
    /// Current status.
    pub status: TaskStatus,
    /// Answer, once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Error, once failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A freshly queued task.
    pub fn queued(run_id: RunId, agent_id: AgentId, session_key: SessionKey) -> Self {
        let now = Utc::now();
        Self {
            task_id: TaskId::new(),
            run_id,
            agent_id,
            session_key,
            status: TaskStatus::Queued,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Progress of a run, published on the bus.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEventKind {
    /// The agent started working.
    Started,
    /// The run produced an answer.
    Completed {
        /// Final answer text.
        answer: String,
    },
    /// The run failed.
    Failed {
        /// Failure description.
        error: String,
    },
}

/// Event published on the `run:<run_id>` topic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Run the event belongs to.
    pub run_id: RunId,
    /// What happened.
    #[serde(flatten)]
    pub kind: RunEventKind,
}

impl RunEvent {
    /// Completion event.
    pub fn completed(run_id: RunId, answer: impl Into<String>) -> Self {
        Self {
            run_id,
            kind: RunEventKind::Completed {
                answer: answer.into(),
            },
        }
    }

    /// Failure event.
    pub fn failed(run_id: RunId, error: impl Into<String>) -> Self {
        Self {
            run_id,
            kind: RunEventKind::Failed {
                error: error.into(),
            },
        }
    }

    /// Start event.
    pub fn started(run_id: RunId) -> Self {
        Self {
            run_id,
            kind: RunEventKind::Started,
        }
    }

    /// Whether this event ends the run.
    pub fn is_terminal(&self) -> bool {
        !matches!(self.kind, RunEventKind::Started)
    }
}
