//! Interfaces to the services delegation depends on.
//!
//! The run-submission service queues work for an agent and hands back a run
//! id; the session service injects text into a live conversation. Both live
//! outside this crate and are injected into the orchestrator.

use async_trait::async_trait;
use conduit_core::{RunId, SessionId};
use thiserror::Error;

use crate::types::RunRequest;

/// Failure reported by a [`RunSubmitter`].
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The service refused the request.
    #[error("{0}")]
    Rejected(String),
    /// The service could not be reached.
    #[error("run submission unavailable: {0}")]
    Unavailable(String),
}

/// Failure reported by a [`SessionDelivery`].
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The session no longer exists.
    #[error("session {0} is gone")]
    SessionGone(String),
    /// Any other delivery failure.
    #[error("delivery failed: {0}")]
    Failed(String),
}

/// Queues delegated runs.
#[async_trait]
pub trait RunSubmitter: Send + Sync {
    /// Submit a request, returning the id its events will be published under.
    async fn submit(&self, request: RunRequest) -> Result<RunId, SubmitError>;
}

/// Injects text into a live conversation.
#[async_trait]
pub trait SessionDelivery: Send + Sync {
    /// Deliver `text` as a follow-up message in `session_id`.
    async fn follow_up(&self, session_id: &SessionId, text: &str) -> Result<(), DeliveryError>;
}
