//! Conversation execution engine.
//!
//! `ConversationEngine` drives one resume step per event:
//! 1. Takes the lease on the conversation key (retrying while it is busy).
//! 2. Loads the conversation and decides what the event means for it.
//! 3. Walks the flow from the resume point, dispatching each node via
//!    `ExecutableNode`, until a node suspends or the run terminates.
//! 4. Persists the conversation exactly once and releases the lease.
//!
//! The lease is renewed every third of its TTL while the step runs, so a step
//! stuck in slow provider calls keeps exclusive access. If a renewal finds the
//! lease taken over, the step is abandoned without saving.
//!
//! Retryable node errors are retried with exponential back-off; fatal ones,
//! exhausted retries and the step guard fail the conversation, not the call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use nodes::traits::{Collaborators, ExecutionContext};
use nodes::{
    AiProvider, ExecutableNode, ExecutionResult, MessagingProvider, NodeError, SuspendReason,
    TerminalStatus,
};

use crate::models::ChatbotFlow;
use crate::state::{
    ConversationKey, ConversationState, EngineEvent, ExecutionStatus, Phase,
};
use crate::store::{ConversationStore, FlowSource, LeaseToken, StoreError};
use crate::validate::validate;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum nodes executed in one resume step before the run is failed
    /// with `CycleDetected`.
    pub max_steps_per_resume: usize,
    /// Maximum number of times a retryable node failure will be retried.
    pub max_retries: u32,
    /// Base delay for exponential back-off between retries.
    pub retry_base_delay: Duration,
    /// Timeout applied to every messaging/AI call.
    pub call_timeout: Duration,
    /// How long a lease stays valid without a renewal. Running steps renew
    /// every third of this.
    pub lease_ttl: Duration,
    /// How many times a busy lease is retried before `LeaseConflict`.
    pub lease_retry_attempts: u32,
    /// Wait before retrying a busy lease; grows linearly with each attempt.
    pub lease_retry_delay: Duration,
    /// Transcript lines kept on the conversation.
    pub transcript_limit: usize,
}

impl EngineConfig {
    fn lease_renew_interval(&self) -> Duration {
        (self.lease_ttl / 3).max(Duration::from_millis(1))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps_per_resume: 100,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            call_timeout: Duration::from_secs(15),
            lease_ttl: Duration::from_secs(30),
            lease_retry_attempts: 5,
            lease_retry_delay: Duration::from_millis(50),
            transcript_limit: 50,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome of a resume step
// ---------------------------------------------------------------------------

/// What the engine did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// A run was started, continued or finished.
    Advanced,
    /// The message was recorded but the run did not move (a delay is pending).
    Recorded,
    /// The event id was already processed.
    Duplicate,
    /// A wake-up arrived before anything was due.
    NotDue,
    /// Dropped without writing anything.
    Ignored(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub key: ConversationKey,
    pub disposition: Disposition,
    pub phase: Phase,
    pub execution_id: Option<Uuid>,
    pub current_node_id: Option<String>,
    pub nodes_executed: usize,
    pub messages_sent: usize,
    /// Why the run failed, when this step failed it.
    pub failure: Option<String>,
}

impl StepOutcome {
    fn new(state: &ConversationState, disposition: Disposition, stats: StepStats) -> Self {
        Self {
            key: state.key.clone(),
            disposition,
            phase: state.phase(),
            execution_id: state.execution_id,
            current_node_id: state.current_node_id.clone(),
            nodes_executed: stats.nodes_executed,
            messages_sent: stats.messages_sent,
            failure: stats.failure,
        }
    }
}

#[derive(Debug, Default)]
struct StepStats {
    nodes_executed: usize,
    messages_sent: usize,
    failure: Option<String>,
}

/// What an event means for the conversation it targets.
#[derive(Debug)]
enum Plan {
    /// Start a fresh run of the flow at its start node.
    Begin { flow_id: String },
    /// Move past the node the run is suspended on.
    Continue,
    /// Keep the message in the transcript without advancing.
    Record,
    /// The reply wait timed out; the run completes.
    Expire,
    Skip(Disposition),
}

// ---------------------------------------------------------------------------
// ConversationEngine
// ---------------------------------------------------------------------------

/// Drives conversations through their flows, one resume step per event.
///
/// Cheap to share: wrap it in an `Arc` and call [`ConversationEngine::handle`]
/// from as many tasks as needed. Steps on different conversations run in
/// parallel; steps on the same conversation are serialized by the lease.
pub struct ConversationEngine {
    store: Arc<dyn ConversationStore>,
    flows: Arc<dyn FlowSource>,
    collaborators: Collaborators,
    config: EngineConfig,
}

impl std::fmt::Debug for ConversationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ConversationEngine {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        flows: Arc<dyn FlowSource>,
        messaging: Arc<dyn MessagingProvider>,
        ai: Arc<dyn AiProvider>,
        config: EngineConfig,
    ) -> Self {
        let collaborators = Collaborators {
            messaging,
            ai,
            call_timeout: config.call_timeout,
        };
        Self { store, flows, collaborators, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one resume step for `event`.
    ///
    /// # Errors
    /// Returns `EngineError` when nothing could be written: the lease stayed
    /// busy, the flow to start is missing or invalid, the device has no flow,
    /// or the store failed. Node failures are recorded on the conversation
    /// and reported through [`StepOutcome::failure`] instead.
    #[instrument(skip(self, event), fields(conversation = %event.key(), event_kind = event.kind()))]
    pub async fn handle(&self, event: EngineEvent) -> Result<StepOutcome, EngineError> {
        let key = event.key();
        let lease = self.acquire_lease(&key).await?;
        let result = self
            .while_leased(&key, lease, self.resume_step(&key, &event, lease))
            .await;
        self.release_lease(&key, lease).await;
        result
    }

    /// Force a conversation back to idle, discarding any suspended run.
    /// Waits for the lease like any other writer.
    ///
    /// # Errors
    /// `LeaseConflict` if the lease stays busy, or a store error.
    #[instrument(skip(self, key), fields(conversation = %key))]
    pub async fn reset(&self, key: &ConversationKey) -> Result<ConversationState, EngineError> {
        let lease = self.acquire_lease(key).await?;
        let result = self.while_leased(key, lease, self.reset_locked(key, lease)).await;
        self.release_lease(key, lease).await;
        result
    }

    /// Read-only view of a conversation for reporting.
    pub async fn get_conversation_state(
        &self,
        key: &ConversationKey,
    ) -> Result<Option<ConversationState>, EngineError> {
        Ok(self.store.load(key).await?)
    }

    /// Conversations with a delay or reply timeout due at `now`.
    pub async fn due_wakeups(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ConversationKey>, EngineError> {
        Ok(self.store.due_wakeups(now, limit).await?)
    }

    // -----------------------------------------------------------------------
    // Internal: lease handling.
    // -----------------------------------------------------------------------

    async fn acquire_lease(&self, key: &ConversationKey) -> Result<LeaseToken, EngineError> {
        let mut attempts = 0u32;

        loop {
            match self.store.acquire_lease(key, self.config.lease_ttl).await {
                Ok(lease) => return Ok(lease),

                Err(StoreError::LeaseConflict(key)) => {
                    attempts += 1;
                    if attempts > self.config.lease_retry_attempts {
                        warn!(attempts, "lease still busy, giving up");
                        return Err(EngineError::LeaseConflict(key));
                    }

                    let delay = self.config.lease_retry_delay.saturating_mul(attempts);
                    debug!(attempts, ?delay, "lease busy, retrying");
                    tokio::time::sleep(delay).await;
                }

                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Run `step` while renewing the lease; give up on the step if the lease
    /// is taken over before it finishes.
    async fn while_leased<T>(
        &self,
        key: &ConversationKey,
        lease: LeaseToken,
        step: impl Future<Output = Result<T, EngineError>>,
    ) -> Result<T, EngineError> {
        tokio::select! {
            biased;
            result = step => result,
            lost = self.keep_lease(key, lease) => Err(lost),
        }
    }

    /// Resolves only once the lease has been lost.
    async fn keep_lease(&self, key: &ConversationKey, lease: LeaseToken) -> EngineError {
        let period = self.config.lease_renew_interval();
        loop {
            tokio::time::sleep(period).await;
            match self.store.renew_lease(key, lease, self.config.lease_ttl).await {
                Ok(()) => debug!("lease renewed"),
                Err(StoreError::LeaseLost(key)) => {
                    error!("lease taken over mid-step, abandoning the step");
                    return StoreError::LeaseLost(key).into();
                }
                Err(err) => warn!(error = %err, "lease renewal failed, will retry"),
            }
        }
    }

    async fn release_lease(&self, key: &ConversationKey, lease: LeaseToken) {
        if let Err(err) = self.store.release_lease(key, lease).await {
            warn!(error = %err, "failed to release lease; it will expire");
        }
    }

    async fn reset_locked(
        &self,
        key: &ConversationKey,
        lease: LeaseToken,
    ) -> Result<ConversationState, EngineError> {
        let mut state = self
            .store
            .load(key)
            .await?
            .unwrap_or_else(|| ConversationState::idle(key.clone()));

        state.reset();
        state.version += 1;
        state.updated_at = Some(Utc::now());
        self.store.save(&state, lease).await?;

        info!("conversation reset to idle");
        Ok(state)
    }

    // -----------------------------------------------------------------------
    // Internal: one resume step, under the lease.
    // -----------------------------------------------------------------------

    async fn resume_step(
        &self,
        key: &ConversationKey,
        event: &EngineEvent,
        lease: LeaseToken,
    ) -> Result<StepOutcome, EngineError> {
        let mut state = self
            .store
            .load(key)
            .await?
            .unwrap_or_else(|| ConversationState::idle(key.clone()));
        let now = event.at();

        // Explicit starts are operator actions and bypass the takeover flag.
        if state.human != 0 && !matches!(event, EngineEvent::Start { .. }) {
            debug!(human = state.human, "human takeover, ignoring event");
            let skipped = Disposition::Ignored("human takeover");
            return Ok(StepOutcome::new(&state, skipped, StepStats::default()));
        }

        if let EngineEvent::Inbound(inbound) = event {
            if inbound.event_id.is_some() && inbound.event_id == state.last_event_id {
                debug!(event_id = ?inbound.event_id, "duplicate delivery, ignoring");
                return Ok(StepOutcome::new(&state, Disposition::Duplicate, StepStats::default()));
            }
        }

        let mut stats = StepStats::default();
        let disposition = match self.plan(&state, event).await? {
            Plan::Skip(disposition) => {
                debug!(?disposition, phase = ?state.phase(), "nothing to do");
                return Ok(StepOutcome::new(&state, disposition, stats));
            }

            Plan::Record => {
                self.record_inbound(&mut state, event);
                debug!("delay pending, message recorded only");
                Disposition::Recorded
            }

            Plan::Expire => {
                info!(node_id = ?state.current_node_id, "reply wait expired, completing run");
                state.clear_suspension();
                state.execution_status = Some(ExecutionStatus::Completed);
                Disposition::Advanced
            }

            Plan::Begin { flow_id } => {
                let flow = self.flows.load_flow(&flow_id).await?;
                check_flow(&flow)?;

                begin_run(&mut state, &flow);
                self.record_inbound(&mut state, event);
                info!(
                    flow_id = %flow.id,
                    execution_id = ?state.execution_id,
                    "starting run"
                );
                self.traverse(&mut state, &flow, now, &mut stats).await;
                Disposition::Advanced
            }

            Plan::Continue => {
                self.record_inbound(&mut state, event);
                state.clear_suspension();

                let flow_id = state.flow_id.clone().unwrap_or_default();
                match self.flows.load_flow(&flow_id).await {
                    Ok(flow) => match check_flow(&flow) {
                        Ok(()) => self.continue_run(&mut state, &flow, now, &mut stats).await,
                        Err(err) => fail(&mut state, &mut stats, err),
                    },
                    Err(StoreError::FlowNotFound(id)) => {
                        fail(&mut state, &mut stats, StoreError::FlowNotFound(id).into());
                    }
                    Err(err) => return Err(err.into()),
                }
                Disposition::Advanced
            }
        };

        // ------------------------------------------------------------------
        // Persist exactly once.
        // ------------------------------------------------------------------
        state.version += 1;
        state.updated_at = Some(now);
        if let EngineEvent::Inbound(inbound) = event {
            if inbound.event_id.is_some() {
                state.last_event_id = inbound.event_id.clone();
            }
        }
        self.store.save(&state, lease).await?;

        debug!(
            phase = ?state.phase(),
            current_node_id = ?state.current_node_id,
            nodes_executed = stats.nodes_executed,
            messages_sent = stats.messages_sent,
            "resume step persisted"
        );
        Ok(StepOutcome::new(&state, disposition, stats))
    }

    async fn plan(&self, state: &ConversationState, event: &EngineEvent) -> Result<Plan, EngineError> {
        let plan = match (event, state.phase()) {
            (EngineEvent::Start { flow_id, .. }, _) => Plan::Begin { flow_id: flow_id.clone() },

            (EngineEvent::Inbound(_), Phase::Idle | Phase::Completed) => Plan::Begin {
                flow_id: self.resolve_flow(state).await?,
            },
            (EngineEvent::Inbound(_), Phase::Failed) => {
                Plan::Skip(Disposition::Ignored("conversation failed"))
            }
            (EngineEvent::Inbound(_), Phase::Active) if state.waiting_for_reply => Plan::Continue,
            (EngineEvent::Inbound(inbound), Phase::Active)
                if state.resume_at.is_some_and(|at| at <= inbound.received_at) =>
            {
                Plan::Continue
            }
            (EngineEvent::Inbound(_), Phase::Active) => Plan::Record,

            (EngineEvent::Wake { fired_at, .. }, Phase::Active) => {
                if state.resume_at.is_some_and(|at| at <= *fired_at) {
                    Plan::Continue
                } else if state.waiting_for_reply
                    && state.reply_expires_at.is_some_and(|at| at <= *fired_at)
                {
                    Plan::Expire
                } else {
                    Plan::Skip(Disposition::NotDue)
                }
            }
            (EngineEvent::Wake { .. }, _) => Plan::Skip(Disposition::NotDue),
        };
        Ok(plan)
    }

    /// The conversation's own flow if it has one, else the device's.
    async fn resolve_flow(&self, state: &ConversationState) -> Result<String, EngineError> {
        if let Some(flow_id) = &state.flow_id {
            return Ok(flow_id.clone());
        }
        self.flows
            .flow_for_device(&state.key.device_id)
            .await?
            .ok_or_else(|| EngineError::NoFlowForDevice(state.key.device_id.clone()))
    }

    fn record_inbound(&self, state: &mut ConversationState, event: &EngineEvent) {
        let EngineEvent::Inbound(inbound) = event else {
            return;
        };
        if inbound.prospect_name.is_some() {
            state.prospect_name = inbound.prospect_name.clone();
        }
        state.conv_last = Some(inbound.message_text.clone());
        state.push_transcript(
            format!("user: {}", inbound.message_text),
            self.config.transcript_limit,
        );
    }

    /// Step past the node the run was suspended on.
    async fn continue_run(
        &self,
        state: &mut ConversationState,
        flow: &ChatbotFlow,
        now: DateTime<Utc>,
        stats: &mut StepStats,
    ) {
        let current = state.current_node_id.clone().unwrap_or_default();
        if flow.node(&current).is_none() {
            fail(state, stats, EngineError::NodeNotFound(current));
            return;
        }

        match flow.successors(&current).next {
            Some(next) => {
                state.last_node_id = Some(current);
                state.current_node_id = Some(next);
                self.traverse(state, flow, now, stats).await;
            }
            None => {
                info!(node_id = %current, "run completed");
                state.execution_status = Some(ExecutionStatus::Completed);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internal: walk the graph until a node suspends or the run ends.
    // -----------------------------------------------------------------------

    async fn traverse(
        &self,
        state: &mut ConversationState,
        flow: &ChatbotFlow,
        now: DateTime<Utc>,
        stats: &mut StepStats,
    ) {
        let execution_id = state.execution_id.unwrap_or_default();

        loop {
            if stats.nodes_executed >= self.config.max_steps_per_resume {
                let limit = self.config.max_steps_per_resume;
                fail(state, stats, EngineError::CycleDetected { limit });
                return;
            }

            let node_id = state.current_node_id.clone().unwrap_or_default();
            let Some(node) = flow.node(&node_id) else {
                fail(state, stats, EngineError::NodeNotFound(node_id));
                return;
            };
            stats.nodes_executed += 1;

            let (result, sent, stage) = {
                let mut ctx = ExecutionContext {
                    node_id: &node_id,
                    execution_id,
                    device_id: &state.key.device_id,
                    prospect_num: &state.key.prospect_num,
                    niche: state.niche.as_deref(),
                    user_input: state.conv_last.as_deref().unwrap_or_default(),
                    previous_messages: &state.transcript,
                    stage: state.stage.clone(),
                    successors: flow.successors(&node_id),
                    now,
                    collaborators: &self.collaborators,
                    sent: Vec::new(),
                };
                let result = self.execute_with_retry(&node_id, &node.kind, &mut ctx).await;
                (result, ctx.sent, ctx.stage)
            };

            state.stage = stage;
            for content in sent {
                state.push_transcript(content.transcript_line(), self.config.transcript_limit);
                stats.messages_sent += 1;
            }

            match result {
                Ok(ExecutionResult::Advance(next)) => {
                    debug!(node_id = %node_id, next = %next, "advanced");
                    state.last_node_id = Some(node_id);
                    state.current_node_id = Some(next);
                }

                Ok(ExecutionResult::Suspend(SuspendReason::AwaitingReply { timeout_ms, expires_at })) => {
                    info!(node_id = %node_id, timeout_ms, "waiting for reply");
                    state.waiting_for_reply = true;
                    state.reply_expires_at = expires_at;
                    return;
                }

                Ok(ExecutionResult::Suspend(SuspendReason::DelayScheduled { resume_at })) => {
                    info!(node_id = %node_id, %resume_at, "delay scheduled");
                    state.resume_at = Some(resume_at);
                    return;
                }

                Ok(ExecutionResult::Terminate(TerminalStatus::Completed)) => {
                    info!(node_id = %node_id, "run completed");
                    state.execution_status = Some(ExecutionStatus::Completed);
                    return;
                }

                Ok(ExecutionResult::Terminate(TerminalStatus::Failed)) => {
                    let err = EngineError::NodeFatal {
                        node_id,
                        message: "node terminated the run".into(),
                    };
                    fail(state, stats, err);
                    return;
                }

                Err(err) => {
                    fail(state, stats, err);
                    return;
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internal: execute a single node with retry logic.
    // -----------------------------------------------------------------------

    async fn execute_with_retry(
        &self,
        node_id: &str,
        node: &dyn ExecutableNode,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<ExecutionResult, EngineError> {
        let mut attempts = 0u32;

        loop {
            // Only the deliveries of the final attempt are kept.
            ctx.sent.clear();

            match node.execute(ctx).await {
                Ok(result) => return Ok(result),

                Err(NodeError::Fatal(msg)) => {
                    return Err(EngineError::NodeFatal {
                        node_id: node_id.to_owned(),
                        message: msg,
                    });
                }

                Err(NodeError::Retryable(msg)) => {
                    attempts += 1;
                    if attempts > self.config.max_retries {
                        return Err(EngineError::NodeRetryExhausted {
                            node_id: node_id.to_owned(),
                            message: msg,
                        });
                    }

                    let delay = self
                        .config
                        .retry_base_delay
                        .saturating_mul(2u32.saturating_pow(attempts - 1));

                    warn!(
                        "node '{}' retryable error (attempt {}/{}), retrying in {:?}: {}",
                        node_id, attempts, self.config.max_retries, delay, msg
                    );

                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn check_flow(flow: &ChatbotFlow) -> Result<(), EngineError> {
    match validate(flow) {
        Ok(report) => {
            for warning in &report.warnings {
                warn!(flow_id = %flow.id, %warning, "flow warning");
            }
            Ok(())
        }
        Err(errors) => Err(EngineError::InvalidFlow {
            flow_id: flow.id.clone(),
            errors,
        }),
    }
}

/// Replace any previous run with a fresh one positioned on the start node.
fn begin_run(state: &mut ConversationState, flow: &ChatbotFlow) {
    state.reset();
    state.execution_id = Some(Uuid::new_v4());
    state.execution_status = Some(ExecutionStatus::Active);
    state.flow_id = Some(flow.id.clone());
    state.flow_reference = Some(flow.name.clone());
    if flow.user_id.is_some() {
        state.user_id = flow.user_id.clone();
    }
    if flow.niche.is_some() {
        state.niche = flow.niche.clone();
    }
    state.current_node_id = flow.start_node().map(|n| n.id.clone());
}

/// Mark the run failed, keeping `current_node_id` on the failing node.
fn fail(state: &mut ConversationState, stats: &mut StepStats, err: EngineError) {
    error!(node_id = ?state.current_node_id, error = %err, "conversation failed");
    state.clear_suspension();
    state.execution_status = Some(ExecutionStatus::Failed);
    state.error_message = Some(err.to_string());
    stats.failure = Some(err.to_string());
}
