//! Session keys for delegated conversations.
//!
//! A key is derived from the owning session and the target agent. With
//! `continue_session` the key is stable, so repeated delegations land in the
//! same conversation; otherwise a nonce makes every run start fresh.

use std::fmt;

use conduit_core::{AgentId, SessionId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque conversation key understood by the run-submission service.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    /// Key for a delegated run.
    pub fn derive(owner: &SessionId, agent: &AgentId, continue_session: bool) -> Self {
        if continue_session {
            Self::stable(owner, agent)
        } else {
            Self::with_nonce(owner, agent, &Uuid::now_v7().simple().to_string())
        }
    }

    /// `<owner>:delegate:<agent>`.
    pub fn stable(owner: &SessionId, agent: &AgentId) -> Self {
        Self(format!("{owner}:delegate:{agent}"))
    }

    /// `<owner>:delegate:<agent>:<nonce>`.
    pub fn with_nonce(owner: &SessionId, agent: &AgentId, nonce: &str) -> Self {
        Self(format!("{owner}:delegate:{agent}:{nonce}"))
    }

    /// Key of the owning conversation itself, used to address follow-ups.
    pub fn origin(owner: &SessionId) -> Self {
        Self(owner.to_string())
    }

    /// Wrap an existing key.
    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Borrow the key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
