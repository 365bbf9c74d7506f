// Agent Loop Controller
//
// Drives one run turn by turn: LLM step, then tool steps, until the model
// gives a final answer, the turn budget runs out, a step is exhausted, or
// termination is requested.
//
// Every LLM call and tool call goes through the StepExecutor. A run is always
// driven from turn 0 with the task as the only message; completed steps are
// served from their checkpoints, so a resumed run rebuilds the same
// transcript and continues at the first unfinished step.

use std::sync::Arc;

use agentrun_durable::{
    llm_step_key, tool_step_key, StepError, StepExecutor, StepFailure, StepStore,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::LoopConfig;
use crate::error::{AgentRunError, Result};
use crate::llm::{parse_response, ChatRequest, LlmGateway};
use crate::message::Message;
use crate::progress::{ProgressBroadcaster, ProgressStatus, ProgressUpdate};
use crate::run::{Run, RunOutcome};
use crate::store::RunStore;
use crate::tools::ToolRegistry;

/// Drives a run to a terminal status
///
/// # Example
///
/// ```ignore
/// let controller = AgentLoopController::new(
///     LoopConfig::default(),
///     Arc::new(OpenAiCompatibleGateway::from_env()?),
///     Arc::new(ToolRegistry::builder().tool(EchoTool).build()),
///     Arc::new(InMemoryStepStore::new()),
///     hub.broadcaster("agent-1"),
/// );
///
/// let mut run = Run::new("run-1", "agent-1", "ping");
/// let outcome = controller.run(&mut run).await?;
/// ```
pub struct AgentLoopController {
    config: LoopConfig,
    gateway: Arc<dyn LlmGateway>,
    tools: Arc<ToolRegistry>,
    executor: StepExecutor,
    progress: Arc<ProgressBroadcaster>,
    run_store: Option<Arc<dyn RunStore>>,
    cancellation: CancellationToken,
}

impl AgentLoopController {
    pub fn new(
        config: LoopConfig,
        gateway: Arc<dyn LlmGateway>,
        tools: Arc<ToolRegistry>,
        step_store: Arc<dyn StepStore>,
        progress: Arc<ProgressBroadcaster>,
    ) -> Self {
        Self {
            config,
            gateway,
            tools,
            executor: StepExecutor::new(step_store),
            progress,
            run_store: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Persist a run snapshot after every turn and at the end
    pub fn with_run_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.run_store = Some(store);
        self
    }

    /// Stop before the next step once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.executor = self.executor.with_cancellation(token.clone());
        self.cancellation = token;
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Drive `run` until it reaches a terminal status
    ///
    /// Returns `Ok` for every terminal outcome, including `error`. `Err` is
    /// reserved for runs that cannot be driven at all (already terminal) and
    /// for failures persisting the run itself.
    #[instrument(skip(self, run), fields(run_id = %run.id, agent_id = %run.agent_id))]
    pub async fn run(&self, run: &mut Run) -> Result<RunOutcome> {
        if run.is_terminal() {
            return Err(AgentRunError::RunTerminal {
                run_id: run.id.clone(),
                status: run.status,
            });
        }

        info!(resumed_at_turn = run.turn, "starting run");
        self.progress.publish(
            ProgressUpdate::new()
                .status(ProgressStatus::Searching)
                .message("Starting task...")
                .clear_result(),
        );

        let mut transcript = vec![Message::user(run.task.clone())];
        let tool_schemas = self.tools.tool_schemas();
        let max_turns = self.config.max_turns;

        for turn in 0..max_turns {
            if self.cancellation.is_cancelled() {
                return self.finish_cancelled(run, turn).await;
            }

            self.progress.publish(
                ProgressUpdate::new()
                    .status(ProgressStatus::Analyzing)
                    .message(format!("Processing turn {}...", turn + 1)),
            );

            let request = self.build_request(&transcript, &tool_schemas);
            let key = llm_step_key(turn);
            let body: Value = match self
                .executor
                .execute(&run.id, &key, &self.config.llm_retry, |_| {
                    self.gateway.complete(request.clone())
                })
                .await
            {
                Ok(body) => body,
                Err(e) => return self.finish_step_error(run, turn, e).await,
            };

            let assistant = match parse_response(&body) {
                Ok(assistant) => assistant,
                Err(e) => {
                    warn!(
                        turn,
                        step_key = %key,
                        error = %e,
                        "skipping turn with unusable response"
                    );
                    self.checkpoint(run, turn + 1).await?;
                    continue;
                }
            };

            let is_final = assistant.is_final();
            let content = assistant.content.clone();
            let tool_calls = assistant.tool_calls.clone();
            append(run, &mut transcript, assistant.into_message())?;

            if is_final {
                self.publish_terminal(
                    ProgressUpdate::new()
                        .status(ProgressStatus::Complete)
                        .message("Task complete")
                        .result(content.clone()),
                );
                return self.finish(run, RunOutcome::complete(turn + 1, content)).await;
            }

            for call in &tool_calls {
                if self.cancellation.is_cancelled() {
                    return self.finish_cancelled(run, turn).await;
                }

                self.progress.publish(
                    ProgressUpdate::new()
                        .status(ProgressStatus::Fetching)
                        .message(format!("Using tool: {}...", call.name)),
                );

                let key = tool_step_key(turn, &call.id);
                debug!(turn, step_key = %key, tool_name = %call.name, "executing tool step");
                let output: String = match self
                    .executor
                    .execute(&run.id, &key, &self.config.tool_retry, |_| async move {
                        Ok::<_, StepFailure>(self.tools.dispatch(&call.name, &call.arguments).await)
                    })
                    .await
                {
                    Ok(output) => output,
                    Err(e) => return self.finish_step_error(run, turn, e).await,
                };

                append(run, &mut transcript, Message::tool(call.id.clone(), output))?;
            }

            self.checkpoint(run, turn + 1).await?;
        }

        info!(max_turns, "turn budget exhausted without a final answer");
        self.publish_terminal(
            ProgressUpdate::new()
                .status(ProgressStatus::Complete)
                .message(format!(
                    "Stopped after {} turns without a final answer",
                    max_turns
                ))
                .clear_result(),
        );
        self.finish(run, RunOutcome::max_turns_reached(max_turns)).await
    }

    fn build_request(&self, transcript: &[Message], tool_schemas: &[Value]) -> ChatRequest {
        let mut messages = Vec::with_capacity(transcript.len() + 1);
        if let Some(prompt) = &self.config.system_prompt {
            messages.push(Message::system(prompt.clone()));
        }
        messages.extend_from_slice(transcript);

        ChatRequest::new(self.config.model.clone(), messages)
            .with_tools(tool_schemas.to_vec())
            .with_max_tokens(self.config.max_tokens)
    }

    /// Publish the final observer state unless termination was requested
    ///
    /// A final answer already in flight when `reset` is called still
    /// completes the run, but the idle state set by `reset` stays visible.
    fn publish_terminal(&self, update: ProgressUpdate) {
        if self.cancellation.is_cancelled() {
            debug!("termination requested, leaving observer state untouched");
            return;
        }
        self.progress.publish(update);
    }

    async fn persist(&self, run: &Run) -> Result<()> {
        let Some(store) = &self.run_store else {
            return Ok(());
        };
        if let Err(e) = store.save_run(run).await {
            error!(error = %e, "failed to persist run");
            self.progress.publish(
                ProgressUpdate::new()
                    .status(ProgressStatus::Error)
                    .message(format!("Failed to persist run: {}", e))
                    .clear_result(),
            );
            return Err(e);
        }
        Ok(())
    }

    async fn checkpoint(&self, run: &mut Run, next_turn: usize) -> Result<()> {
        run.turn = run.turn.max(next_turn);
        self.persist(run).await
    }

    async fn finish(&self, run: &mut Run, outcome: RunOutcome) -> Result<RunOutcome> {
        run.finish(&outcome);
        self.persist(run).await?;
        info!(status = %outcome.status, turns = outcome.turns, "run finished");
        Ok(outcome)
    }

    async fn finish_cancelled(&self, run: &mut Run, turn: usize) -> Result<RunOutcome> {
        // The observer state is reset by whoever requested termination
        info!(turn, "termination requested, stopping run");
        self.finish(run, RunOutcome::cancelled(turn)).await
    }

    async fn finish_step_error(
        &self,
        run: &mut Run,
        turn: usize,
        err: StepError,
    ) -> Result<RunOutcome> {
        if err.is_cancelled() {
            return self.finish_cancelled(run, turn).await;
        }

        let cause = err.to_string();
        error!(turn, step_key = ?err.key(), error = %cause, "step failed, run aborted");
        self.publish_terminal(
            ProgressUpdate::new()
                .status(ProgressStatus::Error)
                .message(cause.clone()),
        );
        self.finish(run, RunOutcome::error(turn + 1, cause)).await
    }
}

/// Append to the replayed transcript, extending the run once replay caught up
fn append(run: &mut Run, transcript: &mut Vec<Message>, message: Message) -> Result<()> {
    transcript.push(message.clone());
    if transcript.len() > run.messages.len() {
        run.push_message(message)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ScriptedGateway;
    use crate::tools::StaticTool;
    use crate::memory::text_completion;
    use crate::message::ToolCall;
    use crate::run::RunStatus;
    use agentrun_durable::{InMemoryStepStore, RetryPolicy};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Gateway that requests termination while its call is in flight
    struct InterruptedGateway {
        token: CancellationToken,
        progress: Arc<ProgressBroadcaster>,
    }

    #[async_trait]
    impl LlmGateway for InterruptedGateway {
        async fn complete(&self, _request: ChatRequest) -> std::result::Result<Value, StepFailure> {
            self.token.cancel();
            self.progress.reset();
            Ok(text_completion("late answer"))
        }
    }

    /// Run store whose writes always fail
    struct ReadOnlyRunStore;

    #[async_trait]
    impl RunStore for ReadOnlyRunStore {
        async fn create_run(&self, _run: &Run) -> Result<()> {
            Err(AgentRunError::store("read-only"))
        }

        async fn get_run(&self, _run_id: &str) -> Result<Option<Run>> {
            Ok(None)
        }

        async fn save_run(&self, _run: &Run) -> Result<()> {
            Err(AgentRunError::store("read-only"))
        }

        async fn list_runs(&self, _status: Option<RunStatus>) -> Result<Vec<Run>> {
            Ok(Vec::new())
        }
    }

    fn controller(gateway: Arc<ScriptedGateway>, config: LoopConfig) -> AgentLoopController {
        AgentLoopController::new(
            config,
            gateway,
            Arc::new(
                ToolRegistry::builder()
                    .tool(StaticTool::new("search_repos", "found 3 repositories"))
                    .build(),
            ),
            Arc::new(InMemoryStepStore::new()),
            Arc::new(ProgressBroadcaster::new()),
        )
    }

    fn fast_config() -> LoopConfig {
        LoopConfig::default()
            .with_llm_retry(RetryPolicy::fixed(Duration::ZERO, 3))
            .with_tool_retry(RetryPolicy::fixed(Duration::ZERO, 2))
    }

    #[tokio::test]
    async fn test_system_prompt_is_sent_but_not_stored() {
        let gateway = Arc::new(ScriptedGateway::new().with_text("pong"));
        let controller = controller(gateway.clone(), fast_config().with_system_prompt("Be brief"));
        let mut run = Run::new("run-1", "agent-1", "ping");

        controller.run(&mut run).await.unwrap();

        let request = &gateway.requests()[0];
        assert_eq!(request.messages[0], Message::system("Be brief"));
        assert_eq!(request.messages[1], Message::user("ping"));
        assert_eq!(run.messages[0], Message::user("ping"));
        assert_eq!(run.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_request_declares_tools() {
        let gateway = Arc::new(ScriptedGateway::new().with_text("pong"));
        let controller = controller(gateway.clone(), fast_config().with_max_tokens(64));
        let mut run = Run::new("run-1", "agent-1", "ping");

        controller.run(&mut run).await.unwrap();

        let request = &gateway.requests()[0];
        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(request.max_tokens, Some(64));
        assert_eq!(request.tools[0]["function"]["name"], "search_repos");
    }

    #[tokio::test]
    async fn test_terminal_run_is_rejected() {
        let gateway = Arc::new(ScriptedGateway::new());
        let controller = controller(gateway.clone(), fast_config());
        let mut run = Run::new("run-1", "agent-1", "ping");
        run.finish(&RunOutcome::complete(1, "pong"));

        let result = controller.run(&mut run).await;
        assert!(matches!(result, Err(AgentRunError::RunTerminal { .. })));
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_turn_budget() {
        let gateway = Arc::new(ScriptedGateway::new());
        let controller = controller(gateway.clone(), fast_config().with_max_turns(0));
        let mut run = Run::new("run-1", "agent-1", "ping");

        let outcome = controller.run(&mut run).await.unwrap();
        assert_eq!(outcome, RunOutcome::max_turns_reached(0));
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_turn() {
        let gateway = Arc::new(ScriptedGateway::new().with_text("pong"));
        let token = CancellationToken::new();
        token.cancel();
        let controller = controller(gateway.clone(), fast_config()).with_cancellation(token);
        let mut run = Run::new("run-1", "agent-1", "ping");

        let outcome = controller.run(&mut run).await.unwrap();
        assert_eq!(outcome, RunOutcome::cancelled(0));
        assert_eq!(gateway.call_count(), 0);
        assert_eq!(run.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_checkpoint_publishes_error() {
        let gateway = Arc::new(ScriptedGateway::new().with_tool_calls(vec![ToolCall::new(
            "c1",
            "search_repos",
            "{}",
        )]));
        let progress = Arc::new(ProgressBroadcaster::new());
        let controller = AgentLoopController::new(
            fast_config(),
            gateway,
            Arc::new(
                ToolRegistry::builder()
                    .tool(StaticTool::new("search_repos", "found 3 repositories"))
                    .build(),
            ),
            Arc::new(InMemoryStepStore::new()),
            progress.clone(),
        )
        .with_run_store(Arc::new(ReadOnlyRunStore));
        let mut run = Run::new("run-1", "agent-1", "search");

        let result = controller.run(&mut run).await;
        assert!(matches!(result, Err(AgentRunError::Store(_))));

        let state = progress.current();
        assert_eq!(state.status, ProgressStatus::Error);
        assert!(state.message.contains("read-only"));
        assert!(state.result.is_none());
    }

    #[tokio::test]
    async fn test_final_answer_after_termination_keeps_observer_state() {
        let token = CancellationToken::new();
        let progress = Arc::new(ProgressBroadcaster::new());
        let gateway = Arc::new(InterruptedGateway {
            token: token.clone(),
            progress: progress.clone(),
        });
        let controller = AgentLoopController::new(
            fast_config(),
            gateway,
            Arc::new(ToolRegistry::new()),
            Arc::new(InMemoryStepStore::new()),
            progress.clone(),
        )
        .with_cancellation(token);
        let mut run = Run::new("run-1", "agent-1", "ping");

        let outcome = controller.run(&mut run).await.unwrap();
        assert_eq!(outcome, RunOutcome::complete(1, "late answer"));
        assert_eq!(run.result.as_deref(), Some("late answer"));

        let state = progress.current();
        assert_eq!(state.status, ProgressStatus::Idle);
        assert!(state.result.is_none());
    }
}
