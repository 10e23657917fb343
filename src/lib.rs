//! # conduit
//!
//! Tool registry and executor for the Conduit engine, plus the default wiring
//! used by the `conduit` command-line front end.
//!
//! - [`registry`]: name → tool index
//! - [`executor`]: [`execute_tool`] dispatch with metrics and panic isolation
//! - [`bootstrap`]: default registry with the `bash` and `delegate` tools
//! - [`loopback`]: in-process run submitter for delegation without a backend

#![deny(unsafe_code)]

pub mod bootstrap;
pub mod executor;
pub mod loopback;
pub mod registry;

pub use executor::execute_tool;
pub use registry::ToolRegistry;
