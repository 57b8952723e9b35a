//! Per-conversation runtime: event log ownership, the cooperative step loop,
//! pause/resume/confirmation semantics, and subscriber fan-out.
//!
//! One [`EventService`] exclusively owns one conversation's [`EventLog`] and
//! [`PubSub`] topic. All mutations funnel through [`EventService::append_event`],
//! which assigns the event id, persists the event, and dispatches it to
//! subscribers while holding the log lock, so subscribers observe events in
//! exact append order and exactly once.
//!
//! The step loop is a single task driven by a mailbox of [`StepSignal`]s.
//! HTTP handlers post signals; the loop drains them and advances the agent
//! one step at a time. LLM calls and tool executions happen outside every
//! lock, which is what keeps `pause()` and `send_message()` responsive while
//! a step is in flight. The loop re-checks the pause flag, the confirmation
//! flag, and the terminal state between steps and yields cooperatively.

use crate::agenthub::agent::{Agent, ParsedResponse};
use crate::agenthub::error::ApiError;
use crate::agenthub::event::{
    ActionEvent, AgentErrorEvent, ContentBlock, ConversationStateUpdateEvent, Event, EventMeta,
    MessageEvent, MessageRole, ObservationEvent, PauseEvent, SourceType, SystemPromptEvent,
    UserRejectObservation,
};
use crate::agenthub::event_log::{EventLog, EventLogError};
use crate::agenthub::hooks::HookProcessor;
use crate::agenthub::models::{ConversationInfo, EventPage, EventSortOrder, StoredConversation};
use crate::agenthub::persist::{self, ConversationPaths};
use crate::agenthub::pub_sub::{PubSub, Subscriber, SubscriberId};
use crate::agenthub::state::{derive_status, ExecutionStatus, SecurityRisk, Terminal};
use crate::agenthub::tool::{Action, Observation, ToolError, FINISH_TOOL};
use crate::agenthub::view::View;
use crate::agenthub::workspace::Workspace;
use chrono::Utc;
use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// How long `close()` waits for an in-flight step before aborting the loop.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Mailbox messages for the step loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepSignal {
    /// Work may be available; run steps until blocked.
    Run,
    /// Stop the loop after the current signal.
    Shutdown,
}

/// The mutable run-control facts [`ExecutionStatus`] derives from.
#[derive(Debug, Default)]
struct RunState {
    paused: bool,
    waiting_for_confirmation: bool,
    terminal: Option<Terminal>,
    in_step: bool,
    cancel: bool,
    /// Steps taken in the current run; bounded by `max_iterations`.
    run_iterations: u64,
}

/// Owner of one conversation's log, topic, and step loop.
pub struct EventService {
    stored: Mutex<StoredConversation>,
    state: Mutex<RunState>,
    log: Mutex<EventLog>,
    hooks: Mutex<HookProcessor>,
    pub_sub: PubSub<Event>,
    agent: Agent,
    workspace: Workspace,
    paths: ConversationPaths,
    signal_tx: UnboundedSender<StepSignal>,
    signal_rx: Mutex<Option<UnboundedReceiver<StepSignal>>>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventService {
    /// Construct a service for a new or previously stored conversation. The
    /// step loop is not spawned until [`EventService::start`].
    pub fn new(
        stored: StoredConversation,
        paths: ConversationPaths,
        workspace: Workspace,
        agent: Agent,
    ) -> io::Result<Arc<Self>> {
        paths.create_dirs()?;
        workspace.ensure_exists()?;
        let log = EventLog::open(paths.events_dir())?;
        let hooks = if paths.base_state_file().exists() {
            HookProcessor::with_state(persist::read_json(&paths.base_state_file())?)
        } else {
            HookProcessor::new()
        };
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        Ok(Arc::new(Self {
            stored: Mutex::new(stored),
            state: Mutex::new(RunState::default()),
            log: Mutex::new(log),
            hooks: Mutex::new(hooks),
            pub_sub: PubSub::new(),
            agent,
            workspace,
            paths,
            signal_tx,
            signal_rx: Mutex::new(Some(signal_rx)),
            loop_handle: Mutex::new(None),
        }))
    }

    /// Mutable access to the hook registry, for wiring at composition time.
    pub async fn with_hooks<F>(&self, configure: F)
    where
        F: FnOnce(&mut HookProcessor),
    {
        let mut hooks = self.hooks.lock().await;
        configure(&mut hooks);
    }

    // Reads

    pub async fn get_status(&self) -> ExecutionStatus {
        let state = self.state.lock().await;
        derive_status(
            state.terminal,
            state.waiting_for_confirmation,
            state.paused,
            state.in_step,
        )
    }

    pub async fn stored(&self) -> StoredConversation {
        self.stored.lock().await.clone()
    }

    pub async fn info(&self) -> ConversationInfo {
        ConversationInfo {
            stored: self.stored().await,
            status: self.get_status().await,
        }
    }

    pub async fn search_events(
        &self,
        page_id: Option<&str>,
        limit: usize,
        kind: Option<&str>,
        sort_order: EventSortOrder,
    ) -> Result<EventPage, ApiError> {
        let log = self.log.lock().await;
        log.search(page_id, limit, kind, sort_order)
            .map_err(|err| match err {
                EventLogError::InvalidCursor(_) => ApiError::Validation(err.to_string()),
                other => ApiError::Internal(other.to_string()),
            })
    }

    pub async fn count_events(&self, kind: Option<&str>) -> usize {
        self.log.lock().await.count(kind)
    }

    pub async fn get_event(&self, event_id: &str) -> Option<Event> {
        self.log.lock().await.get_by_id(event_id).ok().cloned()
    }

    pub async fn batch_get_events(&self, event_ids: &[String]) -> Vec<Option<Event>> {
        self.log.lock().await.batch_get(event_ids)
    }

    // Subscriptions

    pub async fn subscribe_to_events(
        &self,
        subscriber: Arc<dyn Subscriber<Event>>,
    ) -> SubscriberId {
        self.pub_sub.subscribe(subscriber).await
    }

    pub async fn unsubscribe_from_events(&self, subscriber_id: &str) -> bool {
        self.pub_sub.unsubscribe(subscriber_id).await
    }

    // Mutations

    /// Start (or resume) the conversation: spawn the step loop if this is
    /// the first start, emit the system prompt on a fresh log, and clear an
    /// advisory pause.
    pub async fn start(self: &Arc<Self>) -> Result<(), ApiError> {
        {
            let mut handle = self.loop_handle.lock().await;
            if handle.is_none() {
                if let Some(rx) = self.signal_rx.lock().await.take() {
                    let service = self.clone();
                    *handle = Some(tokio::spawn(async move { service.step_loop(rx).await }));
                }
            }
        }

        if self.log.lock().await.is_empty() {
            let system_prompt = self.agent.system_prompt().to_string();
            let tools = self.agent.tool_definitions();
            self.append_event(SourceType::Agent, move |meta| {
                Event::SystemPrompt(SystemPromptEvent {
                    meta,
                    system_prompt,
                    tools,
                })
            })
            .await?;
        }

        let resumed = {
            let mut state = self.state.lock().await;
            if state.paused {
                state.paused = false;
                state.run_iterations = 0;
                true
            } else {
                false
            }
        };
        if resumed {
            self.dispatch_state_update().await;
            let _ = self.signal_tx.send(StepSignal::Run);
        }
        Ok(())
    }

    /// Append a user message; when `run` is set and the message survived the
    /// submit hooks, wake the step loop.
    pub async fn send_message(
        &self,
        role: MessageRole,
        content: Vec<ContentBlock>,
        run: bool,
    ) -> Result<(), ApiError> {
        if self.state.lock().await.terminal == Some(Terminal::Error) {
            return Err(ApiError::Persistence(
                "conversation is in an error state".to_string(),
            ));
        }

        let event = self
            .append_event(SourceType::User, move |meta| {
                Event::Message(MessageEvent {
                    meta,
                    role,
                    content,
                    activated_microagents: vec![],
                    extended_content: vec![],
                    sender: None,
                })
            })
            .await?;
        let Event::Message(message) = &event else {
            return Err(ApiError::Internal("appended event changed shape".to_string()));
        };

        let blocked = {
            let mut hooks = self.hooks.lock().await;
            let blocked = hooks.evaluate_message(message).await;
            if blocked.is_some() {
                self.persist_blocked_state(&hooks);
            }
            blocked
        };
        if blocked.is_some() {
            return Ok(());
        }

        if run {
            let mut state = self.state.lock().await;
            if state.terminal == Some(Terminal::Finished) {
                state.terminal = None;
            }
            state.run_iterations = 0;
            drop(state);
            let _ = self.signal_tx.send(StepSignal::Run);
        }
        Ok(())
    }

    /// Pause the conversation. While a confirmation is pending the status is
    /// left untouched; only the pause event is recorded.
    pub async fn pause(&self) -> Result<(), ApiError> {
        {
            let mut state = self.state.lock().await;
            if state.terminal.is_some() {
                return Err(ApiError::Conflict(
                    "conversation is not pauseable in its current state".to_string(),
                ));
            }
            if !state.waiting_for_confirmation {
                state.paused = true;
            }
        }
        self.append_event(SourceType::User, |meta| Event::Pause(PauseEvent { meta }))
            .await?;
        self.dispatch_state_update().await;
        Ok(())
    }

    /// Accept or reject the pending action batch.
    pub async fn respond_to_confirmation(
        &self,
        accept: bool,
        reason: String,
    ) -> Result<(), ApiError> {
        if !self.state.lock().await.waiting_for_confirmation {
            return Err(ApiError::Conflict(
                "no action is waiting for confirmation".to_string(),
            ));
        }

        if accept {
            self.state.lock().await.waiting_for_confirmation = false;
        } else {
            for action in self.pending_actions().await {
                let reason = reason.clone();
                self.append_event(SourceType::User, move |meta| {
                    Event::UserReject(UserRejectObservation {
                        meta,
                        rejection_reason: reason,
                        action_id: action.meta.id,
                        tool_name: action.tool_name,
                        tool_call_id: action.tool_call_id,
                    })
                })
                .await?;
            }
            self.state.lock().await.waiting_for_confirmation = false;
        }
        self.dispatch_state_update().await;
        let _ = self.signal_tx.send(StepSignal::Run);
        Ok(())
    }

    /// Stop the step loop cooperatively, flush subscribers, persist
    /// metadata.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock().await;
            state.cancel = true;
        }
        let _ = self.signal_tx.send(StepSignal::Shutdown);
        let handle = self.loop_handle.lock().await.take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err() {
                log::warn!("step loop did not stop within {:?}; aborting", CLOSE_GRACE);
                handle.abort();
            }
        }
        self.pub_sub.close().await;
        self.touch().await;
        let hooks = self.hooks.lock().await;
        self.persist_blocked_state(&hooks);
    }

    /// Refresh `updated_at` and persist the metadata file.
    pub async fn touch(&self) {
        let mut stored = self.stored.lock().await;
        stored.updated_at = Utc::now();
        if let Err(err) = persist::write_json_atomic(&self.paths.meta_file(), &*stored) {
            log::error!("failed to persist conversation metadata: {}", err);
        }
    }

    // Internals

    /// Assign an id, persist, and dispatch one event while holding the log
    /// lock, so every subscriber observes the log order exactly.
    async fn append_event<F>(&self, source: SourceType, build: F) -> Result<Event, ApiError>
    where
        F: FnOnce(EventMeta) -> Event,
    {
        let mut log = self.log.lock().await;
        let meta = EventMeta::new(log.next_seq(), source);
        let event = build(meta);
        if let Err(err) = log.append(event.clone()) {
            self.state.lock().await.terminal = Some(Terminal::Error);
            log::error!("event append failed; conversation moves to ERROR: {}", err);
            return Err(ApiError::Persistence(err.to_string()));
        }
        self.pub_sub.dispatch(&event).await;
        drop(log);
        Ok(event)
    }

    fn persist_blocked_state(&self, hooks: &HookProcessor) {
        if let Err(err) = persist::write_json_atomic(&self.paths.base_state_file(), hooks.state()) {
            log::error!("failed to persist blocked-state file: {}", err);
        }
    }

    async fn dispatch_state_update(&self) {
        let status = self.get_status().await;
        let (confirmation_policy, stats) = {
            let stored = self.stored.lock().await;
            (stored.confirmation_policy, stored.stats)
        };
        let event = Event::ConversationStateUpdate(ConversationStateUpdateEvent {
            meta: EventMeta::new(0, SourceType::Environment),
            status,
            confirmation_policy,
            stats,
        });
        self.pub_sub.dispatch(&event).await;
    }

    /// Actions with no observation or rejection answering their tool call.
    async fn pending_actions(&self) -> Vec<ActionEvent> {
        let log = self.log.lock().await;
        let mut answered: HashSet<String> = HashSet::new();
        for event in log.events() {
            match event {
                Event::Observation(o) => {
                    answered.insert(o.tool_call_id.clone());
                }
                Event::UserReject(r) => {
                    answered.insert(r.tool_call_id.clone());
                }
                Event::AgentError(e) => {
                    if let Some(tool_call_id) = &e.tool_call_id {
                        answered.insert(tool_call_id.clone());
                    }
                }
                _ => {}
            }
        }
        log.events()
            .iter()
            .filter_map(|event| match event {
                Event::Action(action) if !answered.contains(&action.tool_call_id) => {
                    Some(action.clone())
                }
                _ => None,
            })
            .collect()
    }

    async fn step_loop(self: Arc<Self>, mut signal_rx: UnboundedReceiver<StepSignal>) {
        let conversation_id = { self.stored.lock().await.id };
        log::debug!("step loop for conversation {} started", conversation_id);
        while let Some(signal) = signal_rx.recv().await {
            match signal {
                StepSignal::Shutdown => break,
                StepSignal::Run => self.run_until_blocked().await,
            }
        }
        log::debug!("step loop for conversation {} exited", conversation_id);
    }

    /// Issue steps until the run finishes, pauses, waits for confirmation,
    /// errors, or exhausts its iteration budget.
    async fn run_until_blocked(&self) {
        loop {
            let max_iterations = { self.stored.lock().await.max_iterations };
            {
                let mut state = self.state.lock().await;
                if state.cancel
                    || state.paused
                    || state.waiting_for_confirmation
                    || state.terminal.is_some()
                {
                    break;
                }
                if state.run_iterations >= max_iterations {
                    drop(state);
                    log::warn!("run reached max_iterations ({})", max_iterations);
                    let _ = self
                        .append_event(SourceType::Agent, move |meta| {
                            Event::AgentError(AgentErrorEvent {
                                meta,
                                error: format!(
                                    "Agent reached the maximum of {} iterations for this run.",
                                    max_iterations
                                ),
                                tool_name: None,
                                tool_call_id: None,
                            })
                        })
                        .await;
                    let mut state = self.state.lock().await;
                    if state.terminal.is_none() {
                        state.terminal = Some(Terminal::Finished);
                    }
                    break;
                }
                state.in_step = true;
            }
            self.dispatch_state_update().await;

            let step_result = self.run_one_step().await;

            {
                let mut state = self.state.lock().await;
                state.in_step = false;
                state.run_iterations += 1;
            }
            {
                let mut stored = self.stored.lock().await;
                stored.stats.iterations += 1;
            }
            if let Err(err) = step_result {
                log::error!("step failed: {}", err);
                break;
            }
        }
        self.dispatch_state_update().await;
    }

    /// One iteration of the agent loop.
    async fn run_one_step(&self) -> Result<(), ApiError> {
        // Actions accepted in confirmation mode (or left unexecuted by a
        // crash) run before anything else; no LLM call is needed for them.
        let pending = self.pending_actions().await;
        if !pending.is_empty() {
            return self.execute_actions(pending).await;
        }

        let events: Vec<Event> = {
            let log = self.log.lock().await;
            let hooks = self.hooks.lock().await;
            log.events()
                .iter()
                .filter(|event| match event {
                    Event::Message(message) => !hooks.is_message_blocked(&message.meta.id),
                    _ => true,
                })
                .cloned()
                .collect()
        };
        let view = View::from_events(&events);

        if view.unhandled_condensation_request {
            if let Some(condenser) = self.agent.condenser() {
                match condenser.condense(&view).await {
                    Ok(Some(outcome)) => {
                        self.append_event(SourceType::Agent, move |meta| {
                            Event::Condensation(outcome.into_condensation(meta))
                        })
                        .await?;
                        return Ok(());
                    }
                    Ok(None) => {}
                    Err(err) => {
                        let error = format!("Condenser failed: {}", err);
                        self.append_event(SourceType::Agent, move |meta| {
                            Event::AgentError(AgentErrorEvent {
                                meta,
                                error,
                                tool_name: None,
                                tool_call_id: None,
                            })
                        })
                        .await?;
                        return Ok(());
                    }
                }
            }
        }

        let response = match self.agent.complete(&view).await {
            Ok(response) => response,
            Err(err) => {
                // Retries are exhausted at this point; record the failure
                // and end the run.
                let error = format!("LLM request failed: {}", err);
                self.append_event(SourceType::Agent, move |meta| {
                    Event::AgentError(AgentErrorEvent {
                        meta,
                        error,
                        tool_name: None,
                        tool_call_id: None,
                    })
                })
                .await?;
                let mut state = self.state.lock().await;
                if state.terminal.is_none() {
                    state.terminal = Some(Terminal::Finished);
                }
                return Ok(());
            }
        };

        if let Some(usage) = &response.usage {
            let mut stored = self.stored.lock().await;
            stored.stats.usage.add(usage);
        }

        match self.agent.parse_response(&response) {
            ParsedResponse::Message { content } => {
                self.append_event(SourceType::Agent, move |meta| {
                    Event::Message(MessageEvent {
                        meta,
                        role: MessageRole::Assistant,
                        content,
                        activated_microagents: vec![],
                        extended_content: vec![],
                        sender: None,
                    })
                })
                .await?;
                let mut state = self.state.lock().await;
                if state.terminal.is_none() {
                    state.terminal = Some(Terminal::Finished);
                }
            }
            ParsedResponse::Actions(protos) => {
                let mut actions: Vec<ActionEvent> = Vec::with_capacity(protos.len());
                for proto in protos {
                    let event = self
                        .append_event(SourceType::Agent, move |meta| {
                            Event::Action(ActionEvent {
                                meta,
                                thought: proto.thought,
                                reasoning_content: proto.reasoning_content,
                                thinking_blocks: proto.thinking_blocks,
                                action: proto.action,
                                tool_name: proto.tool_name,
                                tool_call_id: proto.tool_call_id,
                                llm_response_id: proto.llm_response_id,
                                security_risk: proto.security_risk,
                            })
                        })
                        .await?;
                    let Event::Action(action) = event else {
                        return Err(ApiError::Internal(
                            "appended event changed shape".to_string(),
                        ));
                    };
                    {
                        let mut hooks = self.hooks.lock().await;
                        if hooks.evaluate_action(&action).await.is_some() {
                            self.persist_blocked_state(&hooks);
                        }
                    }
                    actions.push(action);
                }

                let risks: Vec<SecurityRisk> =
                    actions.iter().map(|action| action.security_risk).collect();
                let single_finish = actions.len() == 1 && actions[0].tool_name == FINISH_TOOL;
                let policy = { self.stored.lock().await.confirmation_policy };
                if policy.requires_confirmation(&risks) && !single_finish {
                    self.state.lock().await.waiting_for_confirmation = true;
                    return Ok(());
                }
                self.execute_actions(actions).await?;
            }
        }
        Ok(())
    }

    /// Execute a batch of actions in order, translating each result into an
    /// observation. Blocked actions are rejected instead of executed.
    async fn execute_actions(&self, actions: Vec<ActionEvent>) -> Result<(), ApiError> {
        for action in actions {
            let blocked_reason = {
                let hooks = self.hooks.lock().await;
                hooks.blocked_action_reason(&action.meta.id).cloned()
            };
            if let Some(reason) = blocked_reason {
                let action_id = action.meta.id.clone();
                let tool_name = action.tool_name.clone();
                let tool_call_id = action.tool_call_id.clone();
                self.append_event(SourceType::User, move |meta| {
                    Event::UserReject(UserRejectObservation {
                        meta,
                        rejection_reason: reason,
                        action_id,
                        tool_name,
                        tool_call_id,
                    })
                })
                .await?;
                continue;
            }

            let finishes = matches!(action.action, Action::Finish { .. });
            let result = self
                .agent
                .execute_action(&action.tool_name, &action.action, &self.workspace)
                .await;
            match result {
                Ok(observation) => {
                    let action_id = action.meta.id.clone();
                    let tool_name = action.tool_name.clone();
                    let tool_call_id = action.tool_call_id.clone();
                    self.append_event(SourceType::Environment, move |meta| {
                        Event::Observation(ObservationEvent {
                            meta,
                            observation,
                            action_id,
                            tool_name,
                            tool_call_id,
                        })
                    })
                    .await?;
                    if finishes {
                        let mut state = self.state.lock().await;
                        if state.terminal.is_none() {
                            state.terminal = Some(Terminal::Finished);
                        }
                    }
                }
                Err(err) => {
                    // Scaffold failures answer the tool call as an agent
                    // error; executor failures answer it as an error
                    // observation the LLM can react to.
                    let scaffold = matches!(
                        err,
                        ToolError::NotFound(_) | ToolError::InvalidParameters(_)
                    );
                    let message = err.to_string();
                    let action_id = action.meta.id.clone();
                    let tool_name = action.tool_name.clone();
                    let tool_call_id = action.tool_call_id.clone();
                    if scaffold {
                        self.append_event(SourceType::Agent, move |meta| {
                            Event::AgentError(AgentErrorEvent {
                                meta,
                                error: message,
                                tool_name: Some(tool_name),
                                tool_call_id: Some(tool_call_id),
                            })
                        })
                        .await?;
                    } else {
                        let observation = Observation::Custom {
                            tool: action.tool_name.clone(),
                            output: serde_json::json!({ "error": message }),
                            is_error: true,
                        };
                        self.append_event(SourceType::Environment, move |meta| {
                            Event::Observation(ObservationEvent {
                                meta,
                                observation,
                                action_id,
                                tool_name,
                                tool_call_id,
                            })
                        })
                        .await?;
                    }
                }
            }
        }
        Ok(())
    }
}
