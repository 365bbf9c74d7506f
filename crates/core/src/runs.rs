// Run control surface
//
// RunManager starts runs on tokio tasks, answers status queries from the run
// store, resumes persisted runs, and handles reset/termination requests. It
// is transport-agnostic; the CLI (or any server) wraps it.

use std::sync::Arc;

use agentrun_durable::StepStore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::LoopConfig;
use crate::controller::AgentLoopController;
use crate::error::{AgentRunError, Result};
use crate::llm::LlmGateway;
use crate::message::Message;
use crate::progress::{AgentState, ProgressHub, Subscription};
use crate::run::{Run, RunStatus, RunView};
use crate::store::RunStore;
use crate::tools::ToolRegistry;

/// A run currently driven by a task in this process
struct ActiveRun {
    agent_id: String,
    cancellation: CancellationToken,
    done: watch::Receiver<bool>,
}

/// Claim on the active-run slot of one run id
struct Slot {
    cancellation: CancellationToken,
    done: watch::Sender<bool>,
}

/// Starts, inspects, resumes and terminates runs
///
/// # Example
///
/// ```ignore
/// let manager = RunManager::new(config, gateway, tools, step_store, run_store);
/// let run_id = manager.start("agent-1", "Find popular Rust web frameworks").await?;
/// let view = manager.wait(&run_id).await?;
/// ```
pub struct RunManager {
    config: LoopConfig,
    gateway: Arc<dyn LlmGateway>,
    tools: Arc<ToolRegistry>,
    step_store: Arc<dyn StepStore>,
    run_store: Arc<dyn RunStore>,
    progress: Arc<ProgressHub>,
    active: Arc<DashMap<String, ActiveRun>>,
}

impl RunManager {
    pub fn new(
        config: LoopConfig,
        gateway: Arc<dyn LlmGateway>,
        tools: Arc<ToolRegistry>,
        step_store: Arc<dyn StepStore>,
        run_store: Arc<dyn RunStore>,
    ) -> Self {
        Self {
            config,
            gateway,
            tools,
            step_store,
            run_store,
            progress: Arc::new(ProgressHub::new()),
            active: Arc::new(DashMap::new()),
        }
    }

    /// Share a progress hub with other components
    pub fn with_progress_hub(mut self, hub: Arc<ProgressHub>) -> Self {
        self.progress = hub;
        self
    }

    pub fn progress(&self) -> &Arc<ProgressHub> {
        &self.progress
    }

    /// Subscribe to an agent's progress
    pub fn subscribe(&self, agent_id: &str) -> Subscription {
        self.progress.subscribe(agent_id)
    }

    /// Start a run with a generated id
    pub async fn start(&self, agent_id: &str, task: &str) -> Result<String> {
        let run_id = Uuid::now_v7().to_string();
        self.start_with_id(&run_id, agent_id, task).await
    }

    /// Start a run with an externally assigned id
    #[instrument(skip(self, task))]
    pub async fn start_with_id(
        &self,
        run_id: &str,
        agent_id: &str,
        task: &str,
    ) -> Result<String> {
        let run = Run::new(run_id, agent_id, task);
        self.run_store.create_run(&run).await?;
        info!("run created");
        if let Some(slot) = self.reserve(run_id) {
            self.spawn(run, slot);
        }
        Ok(run_id.to_string())
    }

    /// Current projection of a run
    pub async fn status(&self, run_id: &str) -> Result<RunView> {
        Ok(self.load(run_id).await?.view())
    }

    /// Wait for the in-flight task of a run (if any), then report its status
    pub async fn wait(&self, run_id: &str) -> Result<RunView> {
        let done = self.active.get(run_id).map(|active| active.done.clone());
        if let Some(mut done) = done {
            // A dropped sender means the task is gone as well
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.status(run_id).await
    }

    /// Re-drive a persisted run that has not finished
    ///
    /// Completed steps are served from their checkpoints. Resuming a run that
    /// is already in flight in this process is a no-op.
    #[instrument(skip(self))]
    pub async fn resume(&self, run_id: &str) -> Result<String> {
        let Some(slot) = self.reserve(run_id) else {
            info!("run already in flight");
            return Ok(run_id.to_string());
        };

        let run = match self.load(run_id).await {
            Ok(run) if !run.is_terminal() => run,
            Ok(run) => {
                self.release(slot, run_id);
                return Err(AgentRunError::RunTerminal {
                    run_id: run.id,
                    status: run.status,
                });
            }
            Err(e) => {
                self.release(slot, run_id);
                return Err(e);
            }
        };

        info!(turn = run.turn, "resuming run");
        self.spawn(run, slot);
        Ok(run_id.to_string())
    }

    /// Resume every persisted run that is still `running` but not in flight
    pub async fn resume_pending(&self) -> Result<Vec<String>> {
        let mut resumed = Vec::new();
        for run in self.run_store.list_runs(Some(RunStatus::Running)).await? {
            if !self.active.contains_key(&run.id) {
                resumed.push(self.resume(&run.id).await?);
            }
        }
        Ok(resumed)
    }

    /// Request termination and reset the agent's progress state
    ///
    /// With a `run_id`, only that run is cancelled; without one, every
    /// in-flight run of the agent is. Cancelling is best-effort: a step
    /// already dispatched completes, and the run stops before the next one.
    /// The progress state is reset unconditionally.
    #[instrument(skip(self))]
    pub fn reset(&self, agent_id: &str, run_id: Option<&str>) -> AgentState {
        match run_id {
            Some(run_id) => {
                if let Some(active) = self.active.get(run_id) {
                    info!("cancelling run");
                    active.cancellation.cancel();
                }
            }
            None => {
                for active in self.active.iter().filter(|a| a.agent_id == agent_id) {
                    info!(run_id = %active.key(), "cancelling run");
                    active.cancellation.cancel();
                }
            }
        }
        self.progress.reset(agent_id)
    }

    /// Transcript of a run
    pub async fn messages(&self, run_id: &str) -> Result<Vec<Message>> {
        Ok(self.load(run_id).await?.messages)
    }

    /// List runs, optionally filtered by status
    pub async fn list(&self, status: Option<RunStatus>) -> Result<Vec<RunView>> {
        Ok(self
            .run_store
            .list_runs(status)
            .await?
            .iter()
            .map(Run::view)
            .collect())
    }

    /// Whether a run is driven by a task in this process
    pub fn is_active(&self, run_id: &str) -> bool {
        self.active.contains_key(run_id)
    }

    async fn load(&self, run_id: &str) -> Result<Run> {
        self.run_store
            .get_run(run_id)
            .await?
            .ok_or_else(|| AgentRunError::run_not_found(run_id))
    }

    /// Atomically claim `run_id`, or `None` when it is already in flight
    ///
    /// The agent is filled in by `spawn` once the run is loaded.
    fn reserve(&self, run_id: &str) -> Option<Slot> {
        match self.active.entry(run_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(entry) => {
                let cancellation = CancellationToken::new();
                let (done, done_rx) = watch::channel(false);
                entry.insert(ActiveRun {
                    agent_id: String::new(),
                    cancellation: cancellation.clone(),
                    done: done_rx,
                });
                Some(Slot { cancellation, done })
            }
        }
    }

    fn release(&self, slot: Slot, run_id: &str) {
        self.active.remove(run_id);
        let _ = slot.done.send(true);
    }

    fn spawn(&self, mut run: Run, slot: Slot) {
        let Slot {
            cancellation,
            done: done_tx,
        } = slot;

        let controller = AgentLoopController::new(
            self.config.clone(),
            self.gateway.clone(),
            self.tools.clone(),
            self.step_store.clone(),
            self.progress.broadcaster(&run.agent_id),
        )
        .with_run_store(self.run_store.clone())
        .with_cancellation(cancellation);

        if let Some(mut active) = self.active.get_mut(&run.id) {
            active.agent_id = run.agent_id.clone();
        }

        let active = self.active.clone();
        tokio::spawn(async move {
            match controller.run(&mut run).await {
                Ok(outcome) if outcome.status == RunStatus::Error => {
                    warn!(run_id = %run.id, error = ?outcome.error, "run ended with an error");
                }
                Ok(outcome) => {
                    info!(
                        run_id = %run.id,
                        status = %outcome.status,
                        turns = outcome.turns,
                        "run ended"
                    );
                }
                Err(e) => {
                    error!(run_id = %run.id, error = %e, "run could not be driven");
                }
            }
            active.remove(&run.id);
            let _ = done_tx.send(true);
        });
    }
}
