//! Delegation orchestrator.
//!
//! Submits runs to the run-submission service, tracks them in the
//! [`TaskStore`] and follows their progress on the [`EventBus`]. Each run
//! gets a detached watcher task that records the outcome and, when asked,
//! delivers it back into the conversation that started the run. A run that
//! settles before its topic is subscribed is picked up from the bus's
//! remembered outcomes.

use std::sync::Arc;
use std::time::Duration;

use conduit_core::{AbortSignal, AgentId, RunId, SessionId, TaskId, ToolError};
use conduit_settings::DelegateSettings;
use metrics::counter;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, run_topic};
use crate::collaborators::{RunSubmitter, SessionDelivery};
use crate::session_key::SessionKey;
use crate::store::{RetentionPolicy, TaskStore};
use crate::types::{QueueMode, RunEvent, RunEventKind, RunRequest, Task};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Orchestrator settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DelegatorConfig {
    /// Agents runs may be delegated to.
    pub agents: Vec<AgentId>,
    /// How long a synchronous run waits before handing back a snapshot.
    pub sync_timeout: Duration,
    /// How long a watcher follows a run before giving up.
    pub watch_timeout: Duration,
}

impl DelegatorConfig {
    /// Build from the `delegate` settings section.
    pub fn from_settings(settings: &DelegateSettings) -> Self {
        Self {
            agents: settings.agents.iter().map(|a| AgentId::from_raw(a.as_str())).collect(),
            sync_timeout: Duration::from_secs(settings.sync_timeout_secs),
            watch_timeout: Duration::from_secs(settings.task_ttl_secs),
        }
    }

    fn knows(&self, agent_id: &AgentId) -> bool {
        self.agents.contains(agent_id)
    }
}

impl Default for DelegatorConfig {
    fn default() -> Self {
        Self::from_settings(&DelegateSettings::default())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Requests and responses
// ─────────────────────────────────────────────────────────────────────────────

/// The conversation a delegation was started from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Origin {
    /// Calling session.
    pub session_id: SessionId,
    /// Calling agent.
    pub agent_id: AgentId,
}

/// Parameters of one `run`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOptions {
    /// Target agent.
    pub agent_id: AgentId,
    /// Prompt for the agent.
    pub prompt: String,
    /// Wait for the outcome instead of returning once queued.
    pub wait: bool,
    /// Reuse the stable conversation with this agent.
    pub continue_session: bool,
    /// Deliver the outcome back into the calling conversation (async only).
    pub auto_followup: bool,
}

/// Identifiers of a submitted run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunHandle {
    /// Store key.
    pub task_id: TaskId,
    /// Id assigned by the submitter.
    pub run_id: RunId,
    /// Conversation the run belongs to.
    pub session_key: SessionKey,
}

/// What `run` hands back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunResponse {
    /// Submitted; poll later.
    Queued(RunHandle),
    /// Waited and the run answered.
    Completed {
        /// Run identifiers.
        handle: RunHandle,
        /// The delegated answer.
        answer: String,
    },
    /// Waited and the run failed.
    Failed {
        /// Run identifiers.
        handle: RunHandle,
        /// Failure reported by the run.
        error: String,
    },
    /// Waited but no outcome arrived in time; current snapshot.
    Pending(Task),
}

// ─────────────────────────────────────────────────────────────────────────────
// Delegator
// ─────────────────────────────────────────────────────────────────────────────

/// Submits, tracks and polls delegated runs.
pub struct Delegator {
    config: DelegatorConfig,
    store: Arc<TaskStore>,
    bus: Arc<EventBus>,
    submitter: Arc<dyn RunSubmitter>,
    delivery: Option<Arc<dyn SessionDelivery>>,
}

impl Delegator {
    /// Create an orchestrator over shared store and bus.
    pub fn new(
        config: DelegatorConfig,
        store: Arc<TaskStore>,
        bus: Arc<EventBus>,
        submitter: Arc<dyn RunSubmitter>,
    ) -> Self {
        Self {
            config,
            store,
            bus,
            submitter,
            delivery: None,
        }
    }

    /// Build store, bus and config from settings.
    pub fn from_settings(settings: &DelegateSettings, submitter: Arc<dyn RunSubmitter>) -> Self {
        Self::new(
            DelegatorConfig::from_settings(settings),
            Arc::new(TaskStore::new(RetentionPolicy::from(settings))),
            Arc::new(EventBus::with_capacity(settings.bus_capacity)),
            submitter,
        )
    }

    /// Attach the live-session delivery used for follow-ups.
    #[must_use]
    pub fn with_delivery(mut self, delivery: Arc<dyn SessionDelivery>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    /// Shared task store.
    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// Shared event bus.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Configured agents.
    pub fn agents(&self) -> &[AgentId] {
        &self.config.agents
    }

    /// Submit a run and either return once queued or wait for its outcome.
    pub async fn run(
        &self,
        origin: &Origin,
        options: RunOptions,
        signal: &AbortSignal,
    ) -> Result<RunResponse, ToolError> {
        if signal.is_set() {
            return Err(ToolError::Aborted);
        }
        if !self.config.knows(&options.agent_id) {
            return Err(ToolError::UnknownAgent {
                agent_id: options.agent_id.to_string(),
            });
        }

        let session_key =
            SessionKey::derive(&origin.session_id, &options.agent_id, options.continue_session);
        let request = RunRequest {
            agent_id: options.agent_id.clone(),
            prompt: options.prompt,
            session_key: session_key.clone(),
            queue_mode: QueueMode::Normal,
            continue_session: options.continue_session,
        };
        let run_id = self.submitter.submit(request).await.map_err(|e| {
            counter!("delegate_runs_total", "outcome" => "submit_failed").increment(1);
            ToolError::SubmitFailed {
                reason: e.to_string(),
            }
        })?;

        let task = Task::queued(run_id.clone(), options.agent_id.clone(), session_key.clone());
        let handle = RunHandle {
            task_id: task.task_id.clone(),
            run_id: run_id.clone(),
            session_key,
        };
        let topic = run_topic(&run_id);
        let watcher_rx = self.bus.subscribe(&topic);
        let waiter_rx = options.wait.then(|| self.bus.subscribe(&topic));
        let early = self.bus.outcome(&topic);
        self.store.insert(task.clone());

        info!(
            task_id = %handle.task_id,
            run_id = %run_id,
            agent_id = %options.agent_id,
            session_key = %handle.session_key,
            wait = options.wait,
            settled = early.is_some(),
            "delegated run submitted"
        );
        counter!("delegate_runs_total", "outcome" => "submitted").increment(1);

        let watcher = Watcher {
            store: Arc::clone(&self.store),
            bus: Arc::clone(&self.bus),
            submitter: Arc::clone(&self.submitter),
            delivery: self.delivery.clone(),
            task_id: handle.task_id.clone(),
            agent_id: options.agent_id,
            topic,
            follow_up: (options.auto_followup && !options.wait).then(|| origin.clone()),
            deadline: Instant::now() + self.config.watch_timeout,
        };
        let _ = tokio::spawn(watcher.run(watcher_rx, early.clone()));

        let Some(rx) = waiter_rx else {
            return Ok(RunResponse::Queued(handle));
        };
        match early.and_then(|event| settled(&handle, event)) {
            Some(response) => Ok(response),
            None => self.wait(handle, task, rx, signal).await,
        }
    }

    /// Current snapshot of a task. Never waits on the run.
    pub fn poll(&self, task_id: &TaskId) -> Result<Task, ToolError> {
        self.store.get(task_id).ok_or_else(|| ToolError::UnknownTask {
            task_id: task_id.to_string(),
        })
    }

    async fn wait(
        &self,
        handle: RunHandle,
        submitted: Task,
        mut rx: broadcast::Receiver<RunEvent>,
        signal: &AbortSignal,
    ) -> Result<RunResponse, ToolError> {
        let deadline = tokio::time::sleep(self.config.sync_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                () = signal.aborted() => {
                    debug!(task_id = %handle.task_id, "stopped waiting for delegated run");
                    return Err(ToolError::Aborted);
                }
                () = &mut deadline => {
                    debug!(task_id = %handle.task_id, "delegated run still pending after sync timeout");
                    let snapshot = self.store.get(&handle.task_id).unwrap_or(submitted);
                    return Ok(RunResponse::Pending(snapshot));
                }
                event = rx.recv() => match event {
                    Ok(event) => {
                        if let Some(response) = settled(&handle, event) {
                            return Ok(response);
                        }
                    }
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => {
                        let snapshot = self.store.get(&handle.task_id).unwrap_or(submitted);
                        return Ok(RunResponse::Pending(snapshot));
                    }
                },
            }
        }
    }
}

/// Response for a terminal event.
fn settled(handle: &RunHandle, event: RunEvent) -> Option<RunResponse> {
    let handle = handle.clone();
    match event.kind {
        RunEventKind::Completed { answer } => Some(RunResponse::Completed { handle, answer }),
        RunEventKind::Failed { error } => Some(RunResponse::Failed { handle, error }),
        RunEventKind::Started => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Watcher
// ─────────────────────────────────────────────────────────────────────────────

struct Watcher {
    store: Arc<TaskStore>,
    bus: Arc<EventBus>,
    submitter: Arc<dyn RunSubmitter>,
    delivery: Option<Arc<dyn SessionDelivery>>,
    task_id: TaskId,
    agent_id: AgentId,
    topic: String,
    follow_up: Option<Origin>,
    deadline: Instant,
}

impl Watcher {
    async fn run(self, mut rx: broadcast::Receiver<RunEvent>, mut early: Option<RunEvent>) {
        loop {
            if let Some(event) = early.take() {
                if self.apply(event).await {
                    break;
                }
                continue;
            }
            let event = match tokio::time::timeout_at(self.deadline, rx.recv()).await {
                Ok(Ok(event)) => event,
                Ok(Err(RecvError::Lagged(skipped))) => {
                    warn!(task_id = %self.task_id, skipped, "run watcher lagged");
                    continue;
                }
                Ok(Err(RecvError::Closed)) => break,
                Err(_) => {
                    warn!(task_id = %self.task_id, "no outcome for delegated run, watcher giving up");
                    break;
                }
            };

            if self.apply(event).await {
                break;
            }
        }

        drop(rx);
        self.bus.release(&self.topic);
        self.bus.forget_outcome(&self.topic);
    }

    /// Record one event. Returns true once the run has settled.
    async fn apply(&self, event: RunEvent) -> bool {
        match event.kind {
            RunEventKind::Started => {
                let _ = self.store.mark_running(&self.task_id);
                false
            }
            RunEventKind::Completed { answer } => {
                if self.store.complete(&self.task_id, answer.clone()) {
                    counter!("delegate_runs_total", "outcome" => "completed").increment(1);
                    self.follow_up(format!(
                        "Delegated task {} for agent {} completed:\n\n{answer}",
                        self.task_id, self.agent_id
                    ))
                    .await;
                }
                true
            }
            RunEventKind::Failed { error } => {
                if self.store.fail(&self.task_id, error.clone()) {
                    counter!("delegate_runs_total", "outcome" => "failed").increment(1);
                    self.follow_up(format!(
                        "Delegated task {} for agent {} failed: {error}",
                        self.task_id, self.agent_id
                    ))
                    .await;
                }
                true
            }
        }
    }

    /// Deliver into the live session, falling back to a queued follow-up run.
    async fn follow_up(&self, text: String) {
        let Some(origin) = &self.follow_up else {
            return;
        };

        if let Some(delivery) = &self.delivery {
            match delivery.follow_up(&origin.session_id, &text).await {
                Ok(()) => {
                    debug!(task_id = %self.task_id, session_id = %origin.session_id, "follow-up delivered to session");
                    return;
                }
                Err(e) => {
                    warn!(task_id = %self.task_id, session_id = %origin.session_id, error = %e, "session delivery failed, queueing follow-up run");
                }
            }
        }

        let request = RunRequest {
            agent_id: origin.agent_id.clone(),
            prompt: text,
            session_key: SessionKey::origin(&origin.session_id),
            queue_mode: QueueMode::Followup,
            continue_session: true,
        };
        match self.submitter.submit(request).await {
            Ok(run_id) => {
                debug!(task_id = %self.task_id, run_id = %run_id, "follow-up run queued");
            }
            Err(e) => {
                warn!(task_id = %self.task_id, error = %e, "follow-up run submission failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{DeliveryError, SubmitError};
    use crate::types::TaskStatus;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records every request and hands out sequential run ids.
    #[derive(Default)]
    struct RecordingSubmitter {
        requests: Mutex<Vec<RunRequest>>,
        reject: bool,
    }

    impl RecordingSubmitter {
        fn requests(&self) -> Vec<RunRequest> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl RunSubmitter for RecordingSubmitter {
        async fn submit(&self, request: RunRequest) -> Result<RunId, SubmitError> {
            if self.reject {
                return Err(SubmitError::Rejected("queue full".into()));
            }
            let mut requests = self.requests.lock();
            requests.push(request);
            Ok(RunId::from_raw(format!("run_{}", requests.len())))
        }
    }

    /// Runs that settle inside `submit`, before the caller can subscribe.
    struct InstantSubmitter {
        bus: Arc<EventBus>,
        fail: bool,
    }

    #[async_trait]
    impl RunSubmitter for InstantSubmitter {
        async fn submit(&self, _request: RunRequest) -> Result<RunId, SubmitError> {
            let run_id = RunId::from_raw("run_fast");
            let _ = self.bus.publish_run_event(RunEvent::started(run_id.clone()));
            let event = if self.fail {
                RunEvent::failed(run_id.clone(), "crashed early")
            } else {
                RunEvent::completed(run_id.clone(), "42")
            };
            let _ = self.bus.publish_run_event(event);
            Ok(run_id)
        }
    }

    fn instant_delegator(fail: bool) -> Delegator {
        let bus = Arc::new(EventBus::new());
        let submitter = Arc::new(InstantSubmitter {
            bus: Arc::clone(&bus),
            fail,
        });
        Delegator::new(config(), Arc::new(TaskStore::default()), bus, submitter)
    }

    struct DeadSession;

    #[async_trait]
    impl SessionDelivery for DeadSession {
        async fn follow_up(&self, session_id: &SessionId, _text: &str) -> Result<(), DeliveryError> {
            Err(DeliveryError::SessionGone(session_id.to_string()))
        }
    }

    #[derive(Default)]
    struct LiveSession {
        delivered: Mutex<Vec<(SessionId, String)>>,
    }

    #[async_trait]
    impl SessionDelivery for LiveSession {
        async fn follow_up(&self, session_id: &SessionId, text: &str) -> Result<(), DeliveryError> {
            self.delivered.lock().push((session_id.clone(), text.to_string()));
            Ok(())
        }
    }

    fn config() -> DelegatorConfig {
        DelegatorConfig {
            agents: vec![AgentId::from_raw("oracle")],
            sync_timeout: Duration::from_secs(5),
            watch_timeout: Duration::from_secs(60),
        }
    }

    fn delegator(submitter: Arc<RecordingSubmitter>) -> Delegator {
        Delegator::new(
            config(),
            Arc::new(TaskStore::default()),
            Arc::new(EventBus::new()),
            submitter,
        )
    }

    fn origin() -> Origin {
        Origin {
            session_id: SessionId::from_raw("sess_main"),
            agent_id: AgentId::from_raw("main"),
        }
    }

    fn options(wait: bool) -> RunOptions {
        RunOptions {
            agent_id: AgentId::from_raw("oracle"),
            prompt: "What is 6 * 7?".into(),
            wait,
            continue_session: false,
            auto_followup: false,
        }
    }

    async fn wait_for_status(store: &TaskStore, task_id: &TaskId, status: TaskStatus) -> Task {
        for _ in 0..200 {
            if let Some(task) = store.get(task_id) {
                if task.status == status {
                    return task;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task never reached {status:?}");
    }

    #[tokio::test]
    async fn async_run_then_completion_then_poll() {
        let submitter = Arc::new(RecordingSubmitter::default());
        let d = delegator(Arc::clone(&submitter));

        let response = d.run(&origin(), options(false), &AbortSignal::new()).await.unwrap();
        let handle = assert_matches!(response, RunResponse::Queued(h) => h);
        assert_eq!(d.poll(&handle.task_id).unwrap().status, TaskStatus::Queued);

        let _ = d.bus().publish_run_event(RunEvent::started(handle.run_id.clone()));
        let _ = wait_for_status(d.store(), &handle.task_id, TaskStatus::Running).await;
        let _ = d.bus().publish_run_event(RunEvent::completed(handle.run_id.clone(), "42"));
        let task = wait_for_status(d.store(), &handle.task_id, TaskStatus::Completed).await;
        assert_eq!(task.result.as_deref(), Some("42"));
        assert_eq!(submitter.requests().len(), 1);
        assert_eq!(submitter.requests()[0].queue_mode, QueueMode::Normal);
    }

    #[tokio::test]
    async fn unknown_agent_creates_no_task() {
        let submitter = Arc::new(RecordingSubmitter::default());
        let d = delegator(Arc::clone(&submitter));
        let mut opts = options(false);
        opts.agent_id = AgentId::from_raw("missing-agent");

        let err = d.run(&origin(), opts, &AbortSignal::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Unknown agent_id: missing-agent");
        assert!(d.store().is_empty());
        assert!(submitter.requests().is_empty());
    }

    #[tokio::test]
    async fn submit_failure_creates_no_task() {
        let submitter = Arc::new(RecordingSubmitter {
            reject: true,
            ..RecordingSubmitter::default()
        });
        let d = delegator(submitter);
        let err = d.run(&origin(), options(false), &AbortSignal::new()).await.unwrap_err();
        assert_matches!(err, ToolError::SubmitFailed { ref reason } if reason == "queue full");
        assert!(d.store().is_empty());
    }

    #[tokio::test]
    async fn preset_abort_submits_nothing() {
        let submitter = Arc::new(RecordingSubmitter::default());
        let d = delegator(Arc::clone(&submitter));
        let signal = AbortSignal::new();
        signal.abort();
        let err = d.run(&origin(), options(false), &signal).await.unwrap_err();
        assert_matches!(err, ToolError::Aborted);
        assert!(submitter.requests().is_empty());
    }

    #[tokio::test]
    async fn poll_unknown_task() {
        let d = delegator(Arc::new(RecordingSubmitter::default()));
        let err = d.poll(&TaskId::from_raw("task_nope")).unwrap_err();
        assert_eq!(err.to_string(), "Unknown task_id: task_nope");
    }

    #[tokio::test]
    async fn continue_session_reuses_key() {
        let submitter = Arc::new(RecordingSubmitter::default());
        let d = delegator(Arc::clone(&submitter));
        let mut opts = options(false);
        opts.continue_session = true;

        let a = d.run(&origin(), opts.clone(), &AbortSignal::new()).await.unwrap();
        let b = d.run(&origin(), opts, &AbortSignal::new()).await.unwrap();
        let (a, b) = match (a, b) {
            (RunResponse::Queued(a), RunResponse::Queued(b)) => (a, b),
            other => panic!("unexpected responses: {other:?}"),
        };
        assert_eq!(a.session_key, b.session_key);
        assert_eq!(a.session_key.as_str(), "sess_main:delegate:oracle");
        assert_ne!(a.task_id, b.task_id);
        assert!(submitter.requests().iter().all(|r| r.continue_session));
    }

    #[tokio::test]
    async fn sync_run_returns_answer() {
        let d = Arc::new(delegator(Arc::new(RecordingSubmitter::default())));
        let bus = Arc::clone(d.bus());
        let _ = tokio::spawn(async move {
            // the first run is always run_1
            while bus.subscriber_count("run:run_1") < 2 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            let _ = bus.publish_run_event(RunEvent::completed(RunId::from_raw("run_1"), "42"));
        });

        let response = d.run(&origin(), options(true), &AbortSignal::new()).await.unwrap();
        let (handle, answer) =
            assert_matches!(response, RunResponse::Completed { handle, answer } => (handle, answer));
        assert_eq!(answer, "42");
        let task = wait_for_status(d.store(), &handle.task_id, TaskStatus::Completed).await;
        assert_eq!(task.result.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn sync_run_reports_failure() {
        let d = Arc::new(delegator(Arc::new(RecordingSubmitter::default())));
        let bus = Arc::clone(d.bus());
        let _ = tokio::spawn(async move {
            while bus.subscriber_count("run:run_1") < 2 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            let _ = bus.publish_run_event(RunEvent::failed(RunId::from_raw("run_1"), "agent crashed"));
        });

        let response = d.run(&origin(), options(true), &AbortSignal::new()).await.unwrap();
        assert_matches!(response, RunResponse::Failed { ref error, .. } if error == "agent crashed");
    }

    #[tokio::test(start_paused = true)]
    async fn sync_timeout_returns_snapshot() {
        let mut cfg = config();
        cfg.sync_timeout = Duration::from_secs(2);
        let d = Delegator::new(
            cfg,
            Arc::new(TaskStore::default()),
            Arc::new(EventBus::new()),
            Arc::new(RecordingSubmitter::default()),
        );
        let response = d.run(&origin(), options(true), &AbortSignal::new()).await.unwrap();
        let task = assert_matches!(response, RunResponse::Pending(task) => task);
        assert_eq!(task.status, TaskStatus::Queued);
        assert!(d.poll(&task.task_id).is_ok());
    }

    #[tokio::test]
    async fn async_run_settled_during_submit_is_recorded() {
        let d = instant_delegator(false);
        let handle = assert_matches!(
            d.run(&origin(), options(false), &AbortSignal::new()).await.unwrap(),
            RunResponse::Queued(h) => h
        );
        let task = wait_for_status(d.store(), &handle.task_id, TaskStatus::Completed).await;
        assert_eq!(task.result.as_deref(), Some("42"));
        for _ in 0..200 {
            if d.bus().outcome_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(d.bus().outcome_count(), 0);
        assert_eq!(d.bus().topic_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sync_run_settled_during_submit_returns_at_once() {
        let d = instant_delegator(false);
        let started = Instant::now();
        let response = d.run(&origin(), options(true), &AbortSignal::new()).await.unwrap();
        assert_matches!(response, RunResponse::Completed { ref answer, .. } if answer == "42");
        assert!(started.elapsed() < config().sync_timeout);

        let d = instant_delegator(true);
        let response = d.run(&origin(), options(true), &AbortSignal::new()).await.unwrap();
        assert_matches!(response, RunResponse::Failed { ref error, .. } if error == "crashed early");
    }

    #[tokio::test]
    async fn abort_while_waiting_keeps_task_pollable() {
        let d = delegator(Arc::new(RecordingSubmitter::default()));
        let signal = AbortSignal::new();
        let trigger = signal.clone();
        let _ = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.abort();
        });

        let err = d.run(&origin(), options(true), &signal).await.unwrap_err();
        assert_matches!(err, ToolError::Aborted);
        assert_eq!(d.store().len(), 1);

        let task = d.store().find_by_run(&RunId::from_raw("run_1")).unwrap();
        let _ = d.bus().publish_run_event(RunEvent::completed(RunId::from_raw("run_1"), "late"));
        let task = wait_for_status(d.store(), &task.task_id, TaskStatus::Completed).await;
        assert_eq!(task.result.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn followup_prefers_live_session() {
        let submitter = Arc::new(RecordingSubmitter::default());
        let live = Arc::new(LiveSession::default());
        let d = delegator(Arc::clone(&submitter)).with_delivery(Arc::clone(&live) as Arc<dyn SessionDelivery>);
        let mut opts = options(false);
        opts.auto_followup = true;

        let handle = assert_matches!(
            d.run(&origin(), opts, &AbortSignal::new()).await.unwrap(),
            RunResponse::Queued(h) => h
        );
        let _ = d.bus().publish_run_event(RunEvent::completed(handle.run_id, "42"));
        let _ = wait_for_status(d.store(), &handle.task_id, TaskStatus::Completed).await;

        for _ in 0..200 {
            if !live.delivered.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let delivered = live.delivered.lock().clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, SessionId::from_raw("sess_main"));
        assert!(delivered[0].1.contains("42"));
        assert_eq!(submitter.requests().len(), 1, "no fallback run when delivery succeeds");
    }

    #[tokio::test]
    async fn followup_falls_back_when_session_is_gone() {
        let submitter = Arc::new(RecordingSubmitter::default());
        let d = delegator(Arc::clone(&submitter)).with_delivery(Arc::new(DeadSession));
        let mut opts = options(false);
        opts.auto_followup = true;

        let handle = assert_matches!(
            d.run(&origin(), opts, &AbortSignal::new()).await.unwrap(),
            RunResponse::Queued(h) => h
        );
        let _ = d.bus().publish_run_event(RunEvent::completed(handle.run_id, "42"));
        let task = wait_for_status(d.store(), &handle.task_id, TaskStatus::Completed).await;
        assert_eq!(task.result.as_deref(), Some("42"));

        for _ in 0..200 {
            if submitter.requests().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let requests = submitter.requests();
        assert_eq!(requests.len(), 2);
        let followup = &requests[1];
        assert_eq!(followup.queue_mode, QueueMode::Followup);
        assert_eq!(followup.agent_id, AgentId::from_raw("main"));
        assert_eq!(followup.session_key.as_str(), "sess_main");
        assert!(followup.prompt.contains("42"));
    }

    #[tokio::test]
    async fn no_followup_without_flag() {
        let submitter = Arc::new(RecordingSubmitter::default());
        let d = delegator(Arc::clone(&submitter));
        let handle = assert_matches!(
            d.run(&origin(), options(false), &AbortSignal::new()).await.unwrap(),
            RunResponse::Queued(h) => h
        );
        let _ = d.bus().publish_run_event(RunEvent::failed(handle.run_id, "boom"));
        let task = wait_for_status(d.store(), &handle.task_id, TaskStatus::Failed).await;
        assert_eq!(task.error.as_deref(), Some("boom"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(submitter.requests().len(), 1);
    }

    #[tokio::test]
    async fn watcher_releases_topic() {
        let d = delegator(Arc::new(RecordingSubmitter::default()));
        let handle = assert_matches!(
            d.run(&origin(), options(false), &AbortSignal::new()).await.unwrap(),
            RunResponse::Queued(h) => h
        );
        assert_eq!(d.bus().topic_count(), 1);
        let _ = d.bus().publish_run_event(RunEvent::completed(handle.run_id, "done"));
        let _ = wait_for_status(d.store(), &handle.task_id, TaskStatus::Completed).await;
        for _ in 0..200 {
            if d.bus().topic_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(d.bus().topic_count(), 0);
    }
}
