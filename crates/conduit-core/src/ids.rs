//! Branded string identifiers.
//!
//! Every id is a newtype over `String` so a `TaskId` can never be passed
//! where a `RunId` is expected. Generated ids are `<prefix>_<uuid v7>`, which
//! keeps them unique and roughly time-ordered.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh id with this type's prefix.
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            /// Wrap an existing string without validation.
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Borrow the underlying string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(
    /// Conversation session that owns a tool call.
    SessionId,
    "sess"
);
branded_id!(
    /// Identifier the model assigned to one tool invocation.
    ToolCallId,
    "toolu"
);
branded_id!(
    /// Named agent in the delegation directory.
    AgentId,
    "agent"
);
branded_id!(
    /// Delegated task tracked by the task store.
    TaskId,
    "task"
);
branded_id!(
    /// Run accepted by the run-submission service.
    RunId,
    "run"
);
