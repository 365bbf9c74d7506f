// Integration tests for the agent loop controller
//
// Each scenario drives a run against a scripted gateway and in-memory stores.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use agentrun_core::{
    AgentLoopController, AgentState, InMemoryRunStore, InMemoryStepStore, LoopConfig, Message,
    MessageRole, ProgressBroadcaster, ProgressStatus, RetryPolicy, Run, RunOutcome, RunStatus,
    RunStore, ScriptedGateway, ScriptedReply, StaticTool, StepFailure, StepStore, Tool, ToolCall,
    ToolRegistry,
};

/// search_repos stand-in that counts its invocations
struct CountingSearch {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for CountingSearch {
    fn name(&self) -> &str {
        "search_repos"
    }

    fn description(&self) -> &str {
        "Search public repositories"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"]
        })
    }

    async fn run(&self, input: Value) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        format!("found 3 repositories for {}", input["query"].as_str().unwrap_or(""))
    }
}

struct Harness {
    gateway: Arc<ScriptedGateway>,
    step_store: Arc<InMemoryStepStore>,
    progress: Arc<ProgressBroadcaster>,
    tool_calls: Arc<AtomicUsize>,
    config: LoopConfig,
}

impl Harness {
    fn new(gateway: ScriptedGateway) -> Self {
        Self {
            gateway: Arc::new(gateway),
            step_store: Arc::new(InMemoryStepStore::new()),
            progress: Arc::new(ProgressBroadcaster::new()),
            tool_calls: Arc::new(AtomicUsize::new(0)),
            config: LoopConfig::default()
                .with_llm_retry(RetryPolicy::fixed(Duration::ZERO, 3))
                .with_tool_retry(RetryPolicy::fixed(Duration::ZERO, 2)),
        }
    }

    /// Same stores, different gateway (a process restart)
    fn restart(&self, gateway: ScriptedGateway) -> Self {
        Self {
            gateway: Arc::new(gateway),
            step_store: self.step_store.clone(),
            progress: self.progress.clone(),
            tool_calls: self.tool_calls.clone(),
            config: self.config.clone(),
        }
    }

    fn controller(&self) -> AgentLoopController {
        let tools = ToolRegistry::builder()
            .tool(CountingSearch {
                calls: self.tool_calls.clone(),
            })
            .build();

        AgentLoopController::new(
            self.config.clone(),
            self.gateway.clone(),
            Arc::new(tools),
            self.step_store.clone(),
            self.progress.clone(),
        )
    }
}

fn search(id: &str) -> ToolCall {
    ToolCall::new(id, "search_repos", r#"{"query":"rust web"}"#)
}

#[tokio::test]
async fn test_immediate_final_answer() {
    let harness = Harness::new(ScriptedGateway::new().with_text("pong"));
    let mut run = Run::new("run-a", "agent-1", "ping");

    let outcome = harness.controller().run(&mut run).await.unwrap();

    assert_eq!(outcome, RunOutcome::complete(1, "pong"));
    assert_eq!(run.status, RunStatus::Complete);
    assert_eq!(run.result.as_deref(), Some("pong"));
    assert_eq!(run.messages, vec![Message::user("ping"), Message::assistant("pong")]);
    assert_eq!(harness.progress.current().status, ProgressStatus::Complete);
    assert_eq!(harness.progress.current().result.as_deref(), Some("pong"));
}

#[tokio::test]
async fn test_one_tool_round_then_answer() {
    let harness = Harness::new(
        ScriptedGateway::new()
            .with_tool_calls(vec![search("c1")])
            .with_text("done"),
    );
    let mut run = Run::new("run-b", "agent-1", "Find popular Rust web frameworks");

    let outcome = harness.controller().run(&mut run).await.unwrap();

    assert_eq!(outcome, RunOutcome::complete(2, "done"));
    assert_eq!(harness.tool_calls.load(Ordering::SeqCst), 1);
    assert_eq!(run.messages.len(), 4);

    let tool_message = &run.messages[2];
    assert_eq!(tool_message.role, MessageRole::Tool);
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("c1"));
    assert_eq!(tool_message.content, "found 3 repositories for rust web");

    // The second LLM call sees the tool result
    let second = &harness.gateway.requests()[1];
    assert_eq!(second.messages.len(), 3);
    assert_eq!(second.messages[2], *tool_message);

    let record = harness
        .step_store
        .load_step("run-b", "tool-0-c1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.result, Some(json!("found 3 repositories for rust web")));
}

#[tokio::test(start_paused = true)]
async fn test_llm_failures_exhaust_the_run() {
    let gateway = ScriptedGateway::new().with_fallback(ScriptedReply::Failure(
        StepFailure::retryable("upstream returned 503").with_type("HTTP_503"),
    ));
    let mut harness = Harness::new(gateway);
    harness.config = LoopConfig::default();
    let mut run = Run::new("run-c", "agent-1", "ping");

    let outcome = harness.controller().run(&mut run).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Error);
    assert_eq!(outcome.turns, 1);
    assert!(outcome.result.is_none());
    let cause = outcome.error.unwrap();
    assert!(cause.contains("llm-turn-0"), "unexpected cause: {cause}");
    assert!(cause.contains("upstream returned 503"));
    assert_eq!(harness.gateway.call_count(), 3);

    let state = harness.progress.current();
    assert_eq!(state.status, ProgressStatus::Error);
    assert_eq!(state.message, cause);
}

#[tokio::test]
async fn test_turn_budget_exhausted() {
    let gateway = ScriptedGateway::new();
    for turn in 0..10 {
        gateway.push(ScriptedReply::Body(agentrun_core::memory::tool_call_completion(
            &[search(&format!("c{turn}"))],
        )));
    }
    let harness = Harness::new(gateway);
    let mut run = Run::new("run-d", "agent-1", "Find popular Rust web frameworks");

    let outcome = harness.controller().run(&mut run).await.unwrap();

    assert_eq!(outcome, RunOutcome::max_turns_reached(10));
    assert!(run.result.is_none());
    assert_eq!(harness.gateway.call_count(), 10);
    assert_eq!(harness.tool_calls.load(Ordering::SeqCst), 10);
    assert_eq!(run.messages.len(), 21);

    let state = harness.progress.current();
    assert_eq!(state.status, ProgressStatus::Complete);
    assert_eq!(state.message, "Stopped after 10 turns without a final answer");
    assert!(state.result.is_none());
}

#[tokio::test]
async fn test_unknown_tool_is_reported_to_the_model() {
    let harness = Harness::new(
        ScriptedGateway::new()
            .with_tool_calls(vec![ToolCall::new("c1", "frobnicate", "{}")])
            .with_text("sorry, no such tool"),
    );
    let mut run = Run::new("run-e", "agent-1", "frobnicate the repo");

    let outcome = harness.controller().run(&mut run).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Complete);
    assert_eq!(outcome.turns, 2);
    assert_eq!(run.messages[2].content, "Unknown tool: frobnicate");
    assert_eq!(harness.tool_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalid_arguments_are_reported_to_the_model() {
    let harness = Harness::new(
        ScriptedGateway::new()
            .with_tool_calls(vec![
                ToolCall::new("c1", "search_repos", "{}"),
                ToolCall::new("c2", "search_repos", "not json"),
            ])
            .with_text("I need a query"),
    );
    let mut run = Run::new("run-f", "agent-1", "search");

    let outcome = harness.controller().run(&mut run).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Complete);
    assert_eq!(run.messages[2].content, "Invalid arguments for search_repos");
    assert_eq!(run.messages[3].content, "Invalid arguments for search_repos");
    assert_eq!(harness.tool_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unusable_responses_skip_the_turn() {
    let harness = Harness::new(
        ScriptedGateway::new()
            .with_body(json!({"error": "overloaded"}))
            .with_body(json!({"id": "chatcmpl-2", "model": "gpt-4o-mini", "choices": []}))
            .with_text("pong"),
    );
    let mut run = Run::new("run-g", "agent-1", "ping");

    let outcome = harness.controller().run(&mut run).await.unwrap();

    assert_eq!(outcome, RunOutcome::complete(3, "pong"));
    // Skipped turns add nothing to the transcript
    assert_eq!(run.messages, vec![Message::user("ping"), Message::assistant("pong")]);
    assert_eq!(harness.gateway.requests()[2].messages.len(), 1);
}

#[tokio::test]
async fn test_replay_serves_every_step_from_checkpoints() {
    let first = Harness::new(
        ScriptedGateway::new()
            .with_tool_calls(vec![search("c1")])
            .with_text("done"),
    );
    let mut run = Run::new("run-h", "agent-1", "Find popular Rust web frameworks");
    let original = first.controller().run(&mut run).await.unwrap();

    // Nothing scripted: any gateway call would fail the run
    let second = first.restart(ScriptedGateway::new());
    let mut replayed = Run::new("run-h", "agent-1", "Find popular Rust web frameworks");
    let outcome = second.controller().run(&mut replayed).await.unwrap();

    assert_eq!(outcome, original);
    assert_eq!(second.gateway.call_count(), 0);
    assert_eq!(second.tool_calls.load(Ordering::SeqCst), 1);
    assert_eq!(replayed.messages, run.messages);
}

#[tokio::test]
async fn test_resume_continues_at_first_unfinished_step() {
    let first = Harness::new(
        ScriptedGateway::new()
            .with_tool_calls(vec![search("c1")])
            .with_failure(StepFailure::non_retryable("process crashed")),
    );
    let mut crashed = Run::new("run-i", "agent-1", "Find popular Rust web frameworks");
    let outcome = first.controller().run(&mut crashed).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Error);

    // Snapshot persisted after turn 0, before the failing LLM step
    let mut snapshot = Run::new("run-i", "agent-1", "Find popular Rust web frameworks");
    snapshot.messages = crashed.messages[..3].to_vec();
    snapshot.turn = 1;

    let second = first.restart(ScriptedGateway::new().with_text("done"));
    let outcome = second.controller().run(&mut snapshot).await.unwrap();

    assert_eq!(outcome, RunOutcome::complete(2, "done"));
    assert_eq!(second.gateway.call_count(), 1);
    assert_eq!(second.tool_calls.load(Ordering::SeqCst), 1);
    // Replayed messages are not appended twice
    assert_eq!(snapshot.messages.len(), 4);
    assert_eq!(snapshot.messages[3], Message::assistant("done"));

    let record = second
        .step_store
        .load_step("run-i", "llm-turn-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.attempts, 2);
}

#[tokio::test]
async fn test_progress_sequence_for_a_tool_round() {
    let harness = Harness::new(
        ScriptedGateway::new()
            .with_tool_calls(vec![search("c1")])
            .with_text("done"),
    );
    let mut subscription = harness.progress.subscribe();
    assert_eq!(*subscription.snapshot(), AgentState::default());

    let mut run = Run::new("run-j", "agent-1", "Find popular Rust web frameworks");
    harness.controller().run(&mut run).await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..5 {
        let state = subscription.recv().await.unwrap();
        seen.push((state.status, state.message));
    }

    assert_eq!(
        seen,
        vec![
            (ProgressStatus::Searching, "Starting task...".to_string()),
            (ProgressStatus::Analyzing, "Processing turn 1...".to_string()),
            (ProgressStatus::Fetching, "Using tool: search_repos...".to_string()),
            (ProgressStatus::Analyzing, "Processing turn 2...".to_string()),
            (ProgressStatus::Complete, "Task complete".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_new_run_clears_previous_result() {
    let harness = Harness::new(
        ScriptedGateway::new()
            .with_text("first answer")
            .with_tool_calls(vec![search("c1")]),
    );

    let mut first = Run::new("run-k1", "agent-1", "ping");
    harness.controller().run(&mut first).await.unwrap();
    assert_eq!(harness.progress.current().result.as_deref(), Some("first answer"));

    let mut subscription = harness.progress.subscribe();
    let mut second = Run::new("run-k2", "agent-1", "search");
    harness.controller().run(&mut second).await.unwrap();

    let started = subscription.recv().await.unwrap();
    assert_eq!(started.status, ProgressStatus::Searching);
    assert!(started.result.is_none());
}

#[tokio::test]
async fn test_run_store_sees_every_turn() {
    let harness = Harness::new(
        ScriptedGateway::new()
            .with_tool_calls(vec![search("c1")])
            .with_text("done"),
    );
    let run_store = Arc::new(InMemoryRunStore::new());
    let mut run = Run::new("run-l", "agent-1", "Find popular Rust web frameworks");
    run_store.create_run(&run).await.unwrap();

    let controller = harness.controller().with_run_store(run_store.clone());
    controller.run(&mut run).await.unwrap();

    let stored = run_store.get_run("run-l").await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Complete);
    assert_eq!(stored.turn, 2);
    assert_eq!(stored.messages, run.messages);
    assert_eq!(stored.result.as_deref(), Some("done"));
}

#[tokio::test]
async fn test_static_tools_answer_every_call() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .with_tool_calls(vec![ToolCall::new("c1", "get_weather", "")])
            .with_text("sunny"),
    );
    let controller = AgentLoopController::new(
        LoopConfig::default(),
        gateway.clone(),
        Arc::new(
            ToolRegistry::builder()
                .tool(StaticTool::new("get_weather", "sunny, 21C"))
                .build(),
        ),
        Arc::new(InMemoryStepStore::new()),
        Arc::new(ProgressBroadcaster::new()),
    );
    let mut run = Run::new("run-m", "agent-1", "weather?");

    let outcome = controller.run(&mut run).await.unwrap();

    assert_eq!(outcome, RunOutcome::complete(2, "sunny"));
    assert_eq!(run.messages[2].content, "sunny, 21C");
}
