//! Behaviour tests for the conversation engine.
//!
//! These run against `MemoryStore`/`MemoryFlows` and the mock providers from
//! `nodes::mock`, so no Postgres or network access is required.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use nodes::mock::{MockAi, MockMessenger};

use crate::{
    ChatbotFlow, ConversationEngine, ConversationKey, ConversationState, ConversationStore,
    Disposition, EngineConfig, EngineError, EngineEvent, InboundEvent, LeaseToken, MemoryFlows,
    MemoryStore, Phase, StoreError,
};

const DEVICE: &str = "dev-1";
const PROSPECT: &str = "60123456789";

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

struct Harness {
    engine: ConversationEngine,
    store: Arc<MemoryStore>,
    messenger: Arc<MockMessenger>,
    ai: Arc<MockAi>,
}

impl Harness {
    fn new(flows: Vec<ChatbotFlow>) -> Self {
        Self::with(flows, MockMessenger::new(), MockAi::replying("ok"), EngineConfig::default())
    }

    fn with(
        flows: Vec<ChatbotFlow>,
        messenger: MockMessenger,
        ai: MockAi,
        config: EngineConfig,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(MemoryFlows::new());
        for flow in flows {
            source.insert(flow);
        }
        let messenger = Arc::new(messenger);
        let ai = Arc::new(ai);
        let engine = ConversationEngine::new(
            store.clone(),
            source,
            messenger.clone(),
            ai.clone(),
            config,
        );
        Self { engine, store, messenger, ai }
    }

    async fn state(&self) -> ConversationState {
        self.store
            .load(&key())
            .await
            .unwrap()
            .expect("conversation should exist")
    }
}

fn key() -> ConversationKey {
    ConversationKey::new(DEVICE, PROSPECT)
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

fn inbound(text: &str, event_id: &str, secs: i64) -> EngineEvent {
    EngineEvent::Inbound(InboundEvent {
        device_id: DEVICE.into(),
        prospect_num: PROSPECT.into(),
        message_text: text.into(),
        received_at: at(secs),
        event_id: Some(event_id.into()),
        prospect_name: None,
    })
}

fn wake(secs: i64) -> EngineEvent {
    EngineEvent::Wake { key: key(), fired_at: at(secs) }
}

fn flow(value: serde_json::Value) -> ChatbotFlow {
    serde_json::from_value(value).expect("flow JSON should parse")
}

/// start → message("Hi") → user_reply(30s) → condition(user_input contains "yes")
///   true  → stage("Qualified") → message("Great!")
///   false → message("Ok, bye")
fn qualifier_flow() -> ChatbotFlow {
    flow(json!({
        "id": "qualifier",
        "name": "Lead qualifier",
        "id_device": DEVICE,
        "nodes": [
            { "id": "start", "type": "start", "data": {} },
            { "id": "hi", "type": "message", "data": { "message": "Hi" } },
            { "id": "wait", "type": "user_reply", "data": { "timeout": 30000 } },
            { "id": "ask", "type": "condition", "data": { "condition": "user_input contains \"yes\"" } },
            { "id": "qualified", "type": "stage", "data": { "stage": "Qualified" } },
            { "id": "great", "type": "message", "data": { "message": "Great!" } },
            { "id": "bye", "type": "message", "data": { "message": "Ok, bye" } }
        ],
        "edges": [
            { "source": "start", "target": "hi" },
            { "source": "hi", "target": "wait" },
            { "source": "wait", "target": "ask" },
            { "source": "ask", "target": "qualified", "sourceHandle": "true" },
            { "source": "ask", "target": "bye", "sourceHandle": "false" },
            { "source": "qualified", "target": "great" }
        ]
    }))
}

// ============================================================
// Traversal
// ============================================================

#[tokio::test]
async fn interested_prospect_is_qualified() {
    let h = Harness::new(vec![qualifier_flow()]);

    let first = h.engine.handle(inbound("Hello", "m1", 0)).await.unwrap();
    assert_eq!(first.disposition, Disposition::Advanced);
    assert_eq!(first.phase, Phase::Active);
    assert_eq!(first.current_node_id.as_deref(), Some("wait"));
    assert_eq!(first.messages_sent, 1);

    let suspended = h.state().await;
    assert!(suspended.waiting_for_reply);
    assert_eq!(suspended.reply_expires_at, Some(at(30)));
    assert_eq!(suspended.transcript, vec!["user: Hello", "bot: Hi"]);

    let second = h.engine.handle(inbound("yes please", "m2", 5)).await.unwrap();
    assert_eq!(second.phase, Phase::Completed);
    assert_eq!(second.current_node_id.as_deref(), Some("great"));

    let done = h.state().await;
    assert_eq!(done.stage.as_deref(), Some("Qualified"));
    assert_eq!(done.conv_last.as_deref(), Some("yes please"));
    assert_eq!(done.last_node_id.as_deref(), Some("qualified"));
    assert!(!done.waiting_for_reply);
    assert_eq!(done.version, 2);
    assert_eq!(h.messenger.sent_payloads(), vec!["Hi", "Great!"]);
}

#[tokio::test]
async fn uninterested_prospect_takes_false_branch() {
    let h = Harness::new(vec![qualifier_flow()]);

    h.engine.handle(inbound("Hello", "m1", 0)).await.unwrap();
    h.engine.handle(inbound("no thanks", "m2", 5)).await.unwrap();

    let done = h.state().await;
    assert_eq!(done.phase(), Phase::Completed);
    assert_eq!(done.stage, None);
    assert_eq!(h.messenger.sent_payloads(), vec!["Hi", "Ok, bye"]);
}

#[tokio::test]
async fn unparseable_condition_routes_to_false() {
    let h = Harness::new(vec![flow(json!({
        "id": "budget",
        "name": "Budget check",
        "id_device": DEVICE,
        "nodes": [
            { "id": "start", "type": "start", "data": {} },
            { "id": "check", "type": "condition", "data": { "condition": "budget > 5" } },
            { "id": "rich", "type": "message", "data": { "message": "Premium plan" } },
            { "id": "basic", "type": "message", "data": { "message": "Basic plan" } }
        ],
        "edges": [
            { "source": "start", "target": "check" },
            { "source": "check", "target": "rich", "sourceHandle": "true" },
            { "source": "check", "target": "basic", "sourceHandle": "false" }
        ]
    }))]);

    let outcome = h.engine.handle(inbound("hi", "m1", 0)).await.unwrap();
    assert_eq!(outcome.phase, Phase::Completed);
    assert_eq!(h.messenger.sent_payloads(), vec!["Basic plan"]);
}

#[tokio::test]
async fn idle_conversation_starts_at_start_successor_with_fresh_execution_id() {
    let h = Harness::new(vec![flow(json!({
        "id": "greeter",
        "name": "Greeter",
        "id_device": DEVICE,
        "nodes": [
            { "id": "start", "type": "start", "data": {} },
            { "id": "wait", "type": "user_reply", "data": { "timeout": 0 } },
            { "id": "thanks", "type": "message", "data": { "message": "Thanks!" } }
        ],
        "edges": [
            { "source": "start", "target": "wait" },
            { "source": "wait", "target": "thanks" }
        ]
    }))]);

    let first = h.engine.handle(inbound("hello", "m1", 0)).await.unwrap();
    assert_eq!(first.phase, Phase::Active);
    assert_eq!(first.current_node_id.as_deref(), Some("wait"));
    assert_eq!(h.state().await.reply_expires_at, None, "timeout 0 waits forever");

    let finished = h.engine.handle(inbound("bye", "m2", 60)).await.unwrap();
    assert_eq!(finished.phase, Phase::Completed);

    // A completed conversation restarts from `start` on the next message.
    let restarted = h.engine.handle(inbound("hello again", "m3", 120)).await.unwrap();
    assert_eq!(restarted.phase, Phase::Active);
    assert_eq!(restarted.current_node_id.as_deref(), Some("wait"));
    assert!(first.execution_id.is_some());
    assert_ne!(restarted.execution_id, first.execution_id);
    assert_eq!(h.state().await.transcript, vec!["user: hello again"]);
}

#[tokio::test]
async fn redelivered_reply_does_not_double_advance() {
    let h = Harness::new(vec![qualifier_flow()]);

    h.engine.handle(inbound("Hello", "m1", 0)).await.unwrap();
    h.engine.handle(inbound("yes please", "m2", 5)).await.unwrap();
    let version = h.state().await.version;

    let again = h.engine.handle(inbound("yes please", "m2", 5)).await.unwrap();
    assert_eq!(again.disposition, Disposition::Duplicate);
    assert_eq!(h.state().await.version, version);
    assert_eq!(h.messenger.sent_payloads(), vec!["Hi", "Great!"]);
}

// ============================================================
// Delays and timers
// ============================================================

fn delayed_flow(delay_ms: u64) -> ChatbotFlow {
    flow(json!({
        "id": "drip",
        "name": "Drip",
        "id_device": DEVICE,
        "nodes": [
            { "id": "start", "type": "start", "data": {} },
            { "id": "pause", "type": "delay", "data": { "delay": delay_ms } },
            { "id": "follow-up", "type": "message", "data": { "message": "Still there?" } }
        ],
        "edges": [
            { "source": "start", "target": "pause" },
            { "source": "pause", "target": "follow-up" }
        ]
    }))
}

#[tokio::test]
async fn zero_delay_suspends_and_is_immediately_resumable() {
    let h = Harness::new(vec![delayed_flow(0)]);

    let suspended = h.engine.handle(inbound("hi", "m1", 0)).await.unwrap();
    assert_eq!(suspended.phase, Phase::Active);
    assert_eq!(suspended.current_node_id.as_deref(), Some("pause"));
    assert_eq!(h.state().await.resume_at, Some(at(0)));
    assert!(h.messenger.sent_payloads().is_empty());

    assert_eq!(h.engine.due_wakeups(at(0), 10).await.unwrap(), vec![key()]);

    let resumed = h.engine.handle(wake(0)).await.unwrap();
    assert_eq!(resumed.phase, Phase::Completed);
    assert_eq!(h.messenger.sent_payloads(), vec!["Still there?"]);
    assert_eq!(h.state().await.resume_at, None);
}

#[tokio::test]
async fn early_wake_and_messages_during_delay_do_not_advance() {
    let h = Harness::new(vec![delayed_flow(60_000)]);
    h.engine.handle(inbound("hi", "m1", 0)).await.unwrap();

    let early = h.engine.handle(wake(30)).await.unwrap();
    assert_eq!(early.disposition, Disposition::NotDue);

    let recorded = h.engine.handle(inbound("hello?", "m2", 40)).await.unwrap();
    assert_eq!(recorded.disposition, Disposition::Recorded);
    assert_eq!(recorded.current_node_id.as_deref(), Some("pause"));

    let state = h.state().await;
    assert_eq!(state.transcript, vec!["user: hi", "user: hello?"]);
    assert_eq!(state.conv_last.as_deref(), Some("hello?"));
    assert!(h.messenger.sent_payloads().is_empty());

    h.engine.handle(wake(60)).await.unwrap();
    assert_eq!(h.messenger.sent_payloads(), vec!["Still there?"]);
}

#[tokio::test]
async fn inbound_after_elapsed_delay_resumes_the_run() {
    let h = Harness::new(vec![delayed_flow(60_000)]);
    h.engine.handle(inbound("hi", "m1", 0)).await.unwrap();

    // No timer fired; the prospect's message alone moves the run on.
    let resumed = h.engine.handle(inbound("are you there?", "m2", 61)).await.unwrap();
    assert_eq!(resumed.disposition, Disposition::Advanced);
    assert_eq!(resumed.phase, Phase::Completed);
    assert_eq!(h.messenger.sent_payloads(), vec!["Still there?"]);

    let state = h.state().await;
    assert_eq!(state.conv_last.as_deref(), Some("are you there?"));
    assert_eq!(state.resume_at, None);
}

#[tokio::test]
async fn reply_timeout_completes_the_run() {
    let h = Harness::new(vec![qualifier_flow()]);
    h.engine.handle(inbound("Hello", "m1", 0)).await.unwrap();

    assert!(h.engine.due_wakeups(at(29), 10).await.unwrap().is_empty());
    assert_eq!(h.engine.handle(wake(29)).await.unwrap().disposition, Disposition::NotDue);

    assert_eq!(h.engine.due_wakeups(at(30), 10).await.unwrap(), vec![key()]);
    let expired = h.engine.handle(wake(30)).await.unwrap();
    assert_eq!(expired.phase, Phase::Completed);

    let state = h.state().await;
    assert!(!state.waiting_for_reply);
    assert_eq!(state.reply_expires_at, None);
    assert_eq!(h.messenger.sent_payloads(), vec!["Hi"]);
}

// ============================================================
// Failures
// ============================================================

#[tokio::test]
async fn stage_cycle_trips_the_step_guard() {
    let h = Harness::new(vec![flow(json!({
        "id": "loop",
        "name": "Loop",
        "id_device": DEVICE,
        "nodes": [
            { "id": "start", "type": "start", "data": {} },
            { "id": "a", "type": "stage", "data": { "stage": "A" } },
            { "id": "b", "type": "stage", "data": { "stage": "B" } }
        ],
        "edges": [
            { "source": "start", "target": "a" },
            { "source": "a", "target": "b" },
            { "source": "b", "target": "a" }
        ]
    }))]);

    let outcome = h.engine.handle(inbound("hi", "m1", 0)).await.unwrap();
    let expected = EngineError::CycleDetected { limit: 100 }.to_string();

    assert_eq!(outcome.phase, Phase::Failed);
    assert_eq!(outcome.nodes_executed, 100);
    assert_eq!(outcome.failure.as_deref(), Some(expected.as_str()));
    assert_eq!(h.state().await.error_message, Some(expected));
}

#[tokio::test(start_paused = true)]
async fn transient_send_failure_is_retried() {
    let h = Harness::with(
        vec![qualifier_flow()],
        MockMessenger::failing(1),
        MockAi::replying("ok"),
        EngineConfig::default(),
    );

    let outcome = h.engine.handle(inbound("Hello", "m1", 0)).await.unwrap();
    assert_eq!(outcome.phase, Phase::Active);
    assert_eq!(outcome.messages_sent, 1);
    assert_eq!(h.messenger.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fail_until_reset() {
    let config = EngineConfig { max_retries: 2, ..EngineConfig::default() };
    let h = Harness::with(vec![qualifier_flow()], MockMessenger::failing(3), MockAi::replying("ok"), config);

    let failed = h.engine.handle(inbound("Hello", "m1", 0)).await.unwrap();
    assert_eq!(failed.phase, Phase::Failed);
    assert_eq!(failed.current_node_id.as_deref(), Some("hi"));
    assert!(failed.failure.unwrap().contains("exceeded retry limit"));
    assert_eq!(h.messenger.call_count(), 3);

    // A failed conversation stops reacting to the prospect.
    let ignored = h.engine.handle(inbound("hello?", "m2", 10)).await.unwrap();
    assert_eq!(ignored.disposition, Disposition::Ignored("conversation failed"));
    assert_eq!(h.messenger.call_count(), 3);

    let reset = h.engine.reset(&key()).await.unwrap();
    assert_eq!(reset.phase(), Phase::Idle);
    assert_eq!(reset.error_message, None);

    let restarted = h.engine.handle(inbound("Hello", "m3", 20)).await.unwrap();
    assert_eq!(restarted.phase, Phase::Active);
    assert_eq!(h.messenger.sent_payloads(), vec!["Hi"]);
}

#[tokio::test]
async fn unknown_device_and_invalid_flow_write_nothing() {
    let h = Harness::new(vec![]);
    let err = h.engine.handle(inbound("hi", "m1", 0)).await.unwrap_err();
    assert!(matches!(err, EngineError::NoFlowForDevice(ref device) if device == DEVICE));
    assert_eq!(h.store.load(&key()).await.unwrap(), None);

    let broken = flow(json!({
        "id": "broken",
        "name": "Broken",
        "id_device": DEVICE,
        "nodes": [ { "id": "hi", "type": "message", "data": { "message": "Hi" } } ],
        "edges": []
    }));
    let h = Harness::new(vec![broken]);
    let err = h.engine.handle(inbound("hi", "m1", 0)).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidFlow { ref flow_id, .. } if flow_id == "broken"));
    assert_eq!(h.store.load(&key()).await.unwrap(), None);
}

// ============================================================
// Operator controls
// ============================================================

#[tokio::test]
async fn human_takeover_ignores_events_without_writing() {
    let h = Harness::new(vec![qualifier_flow()]);
    let mut held = ConversationState::idle(key());
    held.human = 1;
    h.store.put(held.clone());

    let outcome = h.engine.handle(inbound("Hello", "m1", 0)).await.unwrap();
    assert_eq!(outcome.disposition, Disposition::Ignored("human takeover"));
    assert_eq!(h.state().await, held);
    assert!(h.messenger.sent_payloads().is_empty());
}

#[tokio::test]
async fn explicit_start_assigns_flow_and_restarts() {
    let h = Harness::new(vec![qualifier_flow(), delayed_flow(1000)]);
    h.engine.handle(inbound("Hello", "m1", 0)).await.unwrap();

    let start = EngineEvent::Start { key: key(), flow_id: "drip".into(), requested_at: at(10) };
    let outcome = h.engine.handle(start).await.unwrap();
    assert_eq!(outcome.current_node_id.as_deref(), Some("pause"));

    let state = h.state().await;
    assert_eq!(state.flow_id.as_deref(), Some("drip"));
    assert_eq!(state.flow_reference.as_deref(), Some("Drip"));
    assert!(!state.waiting_for_reply);
    assert_eq!(state.resume_at, Some(at(11)));
    assert!(state.transcript.is_empty());
}

// ============================================================
// AI prompts
// ============================================================

#[tokio::test]
async fn ai_reply_is_sent_and_updates_stage() {
    let reply = r#"{"Stage":"Interested","Response":[
        {"type":"text","content":"Nice choice!"},
        {"type":"image","content":"https://cdn.example.com/condo.png"}
    ]}"#;
    let mut advisor = flow(json!({
        "id": "advisor",
        "name": "Advisor",
        "niche": "Property",
        "id_device": DEVICE,
        "nodes": [
            { "id": "start", "type": "start", "data": {} },
            { "id": "ai", "type": "ai_prompt", "data": { "prompt": "Qualify the lead", "model": "openai/gpt-4.1" } }
        ],
        "edges": [ { "source": "start", "target": "ai" } ]
    }));
    advisor.user_id = Some("user-7".into());
    let h = Harness::with(vec![advisor], MockMessenger::new(), MockAi::replying(reply), EngineConfig::default());

    let outcome = h.engine.handle(inbound("I want a condo", "m1", 0)).await.unwrap();
    assert_eq!(outcome.phase, Phase::Completed);
    assert_eq!(outcome.messages_sent, 2);
    assert_eq!(
        h.messenger.sent_payloads(),
        vec!["Nice choice!", "https://cdn.example.com/condo.png"]
    );

    let execution_id = outcome.execution_id.unwrap();
    assert_eq!(h.messenger.sent()[1].idempotency_key, format!("{execution_id}:ai:1"));

    let calls = h.ai.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].prompt, "Qualify the lead");
    assert_eq!(calls[0].context.user_input, "I want a condo");
    assert_eq!(calls[0].context.previous_messages, vec!["user: I want a condo"]);
    assert_eq!(calls[0].context.niche.as_deref(), Some("Property"));

    let state = h.state().await;
    assert_eq!(state.stage.as_deref(), Some("Interested"));
    assert_eq!(state.user_id.as_deref(), Some("user-7"));
    assert_eq!(
        state.transcript,
        vec![
            "user: I want a condo",
            "bot: Nice choice!",
            "bot: [image] https://cdn.example.com/condo.png",
        ]
    );
}

// ============================================================
// Concurrency
// ============================================================

#[tokio::test(start_paused = true)]
async fn concurrent_step_is_rejected_when_lease_is_busy() {
    let config = EngineConfig { lease_retry_attempts: 0, ..EngineConfig::default() };
    let h = Harness::with(
        vec![qualifier_flow()],
        MockMessenger::slow(Duration::from_secs(1)),
        MockAi::replying("ok"),
        config,
    );

    let (first, second) = tokio::join!(
        h.engine.handle(inbound("Hello", "m1", 0)),
        h.engine.handle(inbound("yes", "m2", 0)),
    );

    assert_eq!(first.unwrap().current_node_id.as_deref(), Some("wait"));
    assert!(matches!(second, Err(EngineError::LeaseConflict(ref k)) if *k == key()));
    assert_eq!(h.state().await.version, 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_steps_are_serialized() {
    let config = EngineConfig { lease_retry_attempts: 50, ..EngineConfig::default() };
    let h = Harness::with(
        vec![qualifier_flow()],
        MockMessenger::slow(Duration::from_secs(1)),
        MockAi::replying("ok"),
        config,
    );

    let (first, second) = tokio::join!(
        h.engine.handle(inbound("Hello", "m1", 0)),
        h.engine.handle(inbound("yes", "m2", 1)),
    );

    assert_eq!(first.unwrap().phase, Phase::Active);
    assert_eq!(second.unwrap().phase, Phase::Completed);

    let state = h.state().await;
    assert_eq!(state.version, 2);
    assert_eq!(state.stage.as_deref(), Some("Qualified"));
    assert_eq!(h.messenger.sent_payloads(), vec!["Hi", "Great!"]);
}

/// Real time on purpose: `MemoryStore` expires leases on the wall clock.
#[tokio::test]
async fn lease_is_renewed_while_a_slow_step_runs() {
    let config = EngineConfig {
        lease_ttl: Duration::from_millis(150),
        lease_retry_attempts: 20,
        ..EngineConfig::default()
    };
    let h = Harness::with(
        vec![qualifier_flow()],
        MockMessenger::slow(Duration::from_millis(500)),
        MockAi::replying("ok"),
        config,
    );

    let (first, second) = tokio::join!(h.engine.handle(inbound("Hello", "m1", 0)), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.engine.handle(inbound("yes", "m2", 1)).await
    });

    assert_eq!(first.unwrap().phase, Phase::Active);
    assert_eq!(second.unwrap().phase, Phase::Completed);
    assert_eq!(h.messenger.sent_payloads(), vec!["Hi", "Great!"]);
    assert_eq!(h.state().await.version, 2);
}

/// Delegates to `MemoryStore` but reports every renewal as taken over.
struct StolenLeaseStore(MemoryStore);

#[async_trait::async_trait]
impl ConversationStore for StolenLeaseStore {
    async fn acquire_lease(
        &self,
        key: &ConversationKey,
        ttl: Duration,
    ) -> Result<LeaseToken, StoreError> {
        self.0.acquire_lease(key, ttl).await
    }

    async fn renew_lease(
        &self,
        key: &ConversationKey,
        _lease: LeaseToken,
        _ttl: Duration,
    ) -> Result<(), StoreError> {
        Err(StoreError::LeaseLost(key.clone()))
    }

    async fn release_lease(&self, key: &ConversationKey, lease: LeaseToken) -> Result<(), StoreError> {
        self.0.release_lease(key, lease).await
    }

    async fn load(&self, key: &ConversationKey) -> Result<Option<ConversationState>, StoreError> {
        self.0.load(key).await
    }

    async fn save(&self, state: &ConversationState, lease: LeaseToken) -> Result<(), StoreError> {
        self.0.save(state, lease).await
    }

    async fn due_wakeups(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ConversationKey>, StoreError> {
        self.0.due_wakeups(now, limit).await
    }
}

#[tokio::test(start_paused = true)]
async fn step_is_abandoned_when_its_lease_is_taken_over() {
    let store = Arc::new(StolenLeaseStore(MemoryStore::new()));
    let flows = Arc::new(MemoryFlows::new());
    flows.insert(qualifier_flow());
    let messenger = Arc::new(MockMessenger::slow(Duration::from_secs(1)));
    let config = EngineConfig { lease_ttl: Duration::from_millis(300), ..EngineConfig::default() };
    let engine = ConversationEngine::new(
        store.clone(),
        flows,
        messenger.clone(),
        Arc::new(MockAi::replying("ok")),
        config,
    );

    let result = engine.handle(inbound("Hello", "m1", 0)).await;

    assert!(matches!(result, Err(EngineError::Store(StoreError::LeaseLost(ref k))) if *k == key()));
    assert!(messenger.sent_payloads().is_empty());
    assert!(store.load(&key()).await.unwrap().is_none());
}
