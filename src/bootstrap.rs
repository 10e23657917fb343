//! Default registry wiring.

use std::sync::Arc;

use conduit_delegate::{
    DelegateTool, Delegator, DelegatorConfig, EventBus, RetentionPolicy, RunSubmitter, TaskStore,
};
use conduit_exec::{BashTool, ProcessRunner};
use conduit_settings::ConduitSettings;
use tracing::info;

use crate::loopback::LoopbackSubmitter;
use crate::registry::ToolRegistry;

/// Registry with the `bash` and `delegate` tools over `delegator`.
pub fn build_registry(settings: &ConduitSettings, delegator: Arc<Delegator>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(BashTool::new(ProcessRunner::new(
        settings.exec.clone(),
    ))));
    registry.register(Arc::new(DelegateTool::new(delegator)));
    info!(tools = ?registry.names(), "tool registry ready");
    registry
}

/// Orchestrator whose runs are submitted through `submitter` and reported on `bus`.
pub fn build_delegator(
    settings: &ConduitSettings,
    bus: Arc<EventBus>,
    submitter: Arc<dyn RunSubmitter>,
) -> Arc<Delegator> {
    Arc::new(Delegator::new(
        DelegatorConfig::from_settings(&settings.delegate),
        Arc::new(TaskStore::new(RetentionPolicy::from(&settings.delegate))),
        bus,
        submitter,
    ))
}

/// Registry wired to the in-process loopback submitter.
pub fn default_registry(settings: &ConduitSettings) -> ToolRegistry {
    let bus = Arc::new(EventBus::with_capacity(settings.delegate.bus_capacity));
    let submitter = Arc::new(LoopbackSubmitter::new(Arc::clone(&bus)));
    build_registry(settings, build_delegator(settings, bus, submitter))
}
