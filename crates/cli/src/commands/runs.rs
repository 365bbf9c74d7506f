// Run commands - start, resume and follow runs

use anyhow::{bail, Context as _, Result};
use clap::Args;

use agentrun_core::{
    AgentState, LoopConfig, RunManager, RunStatus, RunStore, RunView, Subscription,
};

use crate::context::Context;
use crate::commands::inspect::show_view;

/// Loop settings that override the environment
#[derive(Args, Debug, Default)]
pub struct LoopOverrides {
    /// Model name
    #[arg(long)]
    model: Option<String>,

    /// Maximum number of turns
    #[arg(long)]
    max_turns: Option<usize>,

    /// System prompt sent ahead of the transcript
    #[arg(long)]
    system_prompt: Option<String>,
}

impl LoopOverrides {
    fn into_config(self) -> Result<LoopConfig> {
        let mut config = LoopConfig::from_env()?;
        if let Some(model) = self.model {
            config.model = model;
        }
        if let Some(max_turns) = self.max_turns {
            config = config.with_max_turns(max_turns);
        }
        if let Some(prompt) = self.system_prompt {
            config = config.with_system_prompt(prompt);
        }
        Ok(config)
    }
}

pub async fn run(
    ctx: &Context,
    agent_id: &str,
    run_id: Option<String>,
    task: &str,
    overrides: LoopOverrides,
) -> Result<()> {
    let manager = ctx.manager(overrides.into_config()?)?;
    let mut subscription = manager.subscribe(agent_id);

    let run_id = match run_id {
        Some(run_id) => manager.start_with_id(&run_id, agent_id, task).await?,
        None => manager.start(agent_id, task).await?,
    };
    if ctx.output.is_text() && !ctx.quiet {
        println!("Started run: {}", run_id);
    }

    let view = follow(ctx, &manager, agent_id, &run_id, &mut subscription).await?;
    print_view(ctx, &view)
}

pub async fn resume(ctx: &Context, run_id: &str, overrides: LoopOverrides) -> Result<()> {
    let run = ctx
        .run_store()
        .get_run(run_id)
        .await?
        .with_context(|| format!("Run not found: {}", run_id))?;

    let manager = ctx.manager(overrides.into_config()?)?;
    let mut subscription = manager.subscribe(&run.agent_id);
    manager.resume(run_id).await?;
    if ctx.output.is_text() && !ctx.quiet {
        println!("Resumed run: {} (turn {})", run_id, run.turn);
    }

    let view = follow(ctx, &manager, &run.agent_id, run_id, &mut subscription).await?;
    print_view(ctx, &view)
}

pub async fn resume_pending(ctx: &Context, overrides: LoopOverrides) -> Result<()> {
    let manager = ctx.manager(overrides.into_config()?)?;
    let resumed = manager.resume_pending().await?;

    if resumed.is_empty() {
        if ctx.output.is_text() {
            println!("No pending runs.");
        }
        return Ok(());
    }

    let mut views = Vec::with_capacity(resumed.len());
    for run_id in &resumed {
        views.push(manager.wait(run_id).await?);
    }

    if ctx.output.is_text() {
        for view in &views {
            println!("{}  {}  ({} turns)", view.run_id, view.status, view.turns);
        }
    } else {
        ctx.output.print_value(&views)?;
    }
    Ok(())
}

/// Print progress until the run's task finishes
///
/// Ctrl-C requests termination; the run stops before its next step.
async fn follow(
    ctx: &Context,
    manager: &RunManager,
    agent_id: &str,
    run_id: &str,
    subscription: &mut Subscription,
) -> Result<RunView> {
    let wait = manager.wait(run_id);
    tokio::pin!(wait);
    let mut interrupted = false;

    let view = loop {
        tokio::select! {
            view = &mut wait => break view?,
            Some(state) = subscription.recv() => report(ctx, &state),
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                signal?;
                interrupted = true;
                eprintln!("Interrupted, stopping run {}...", run_id);
                manager.reset(agent_id, Some(run_id));
            }
        }
    };

    // Updates published right before the task finished
    while let Some(state) = subscription.try_recv() {
        report(ctx, &state);
    }
    Ok(view)
}

fn report(ctx: &Context, state: &AgentState) {
    if ctx.quiet || !ctx.output.is_text() {
        return;
    }
    eprintln!("[{}] {}", state.status, state.message);
}

fn print_view(ctx: &Context, view: &RunView) -> Result<()> {
    show_view(ctx, view)?;
    if view.status == RunStatus::Error {
        bail!("run {} failed", view.run_id);
    }
    Ok(())
}
