//! # conduit-delegate
//!
//! Delegation of work to other agents.
//!
//! - [`orchestrator`]: submit, wait, poll and auto-follow-up
//! - [`store`]: concurrency-safe task table with bounded retention
//! - [`bus`]: topic-keyed broadcast of run events
//! - [`session_key`]: conversation keys for delegated runs
//! - [`collaborators`]: run-submission and session-delivery interfaces
//! - [`tool`]: the `delegate` tool

#![deny(unsafe_code)]

pub mod bus;
pub mod collaborators;
pub mod orchestrator;
pub mod session_key;
pub mod store;
pub mod tool;
pub mod types;

pub use bus::{EventBus, run_topic};
pub use collaborators::{DeliveryError, RunSubmitter, SessionDelivery, SubmitError};
pub use orchestrator::{Delegator, DelegatorConfig, Origin, RunHandle, RunOptions, RunResponse};
pub use session_key::SessionKey;
pub use store::{RetentionPolicy, TaskStore};
pub use tool::DelegateTool;
pub use types::{QueueMode, RunEvent, RunEventKind, RunRequest, Task, TaskStatus};
