// Inspection commands - read runs straight from the run store

use anyhow::{Context as _, Result};

use agentrun_core::{Run, RunStatus, RunStore, RunView};

use crate::context::Context;
use crate::output::{print_field, print_table_header, print_table_row};

async fn load(ctx: &Context, run_id: &str) -> Result<Run> {
    ctx.run_store()
        .get_run(run_id)
        .await?
        .with_context(|| format!("Run not found: {}", run_id))
}

pub async fn status(ctx: &Context, run_id: &str) -> Result<()> {
    let view = load(ctx, run_id).await?.view();
    show_view(ctx, &view)
}

/// Print a run projection in the selected format
pub fn show_view(ctx: &Context, view: &RunView) -> Result<()> {
    if ctx.output.is_text() {
        print_field("Run", &view.run_id);
        print_field("Status", view.status.as_str());
        print_field("Turns", &view.turns.to_string());
        if let Some(output) = &view.output {
            print_field("Output", output);
        }
        if let Some(error) = &view.error {
            print_field("Error", error);
        }
    } else {
        ctx.output.print_value(view)?;
    }
    Ok(())
}

pub async fn messages(ctx: &Context, run_id: &str) -> Result<()> {
    let run = load(ctx, run_id).await?;

    if !ctx.output.is_text() {
        return ctx.output.print_value(&run.messages);
    }

    for message in &run.messages {
        match &message.tool_call_id {
            Some(call_id) => println!("[{} {}] {}", message.role, call_id, message.content),
            None if message.content.is_empty() => println!("[{}]", message.role),
            None => println!("[{}] {}", message.role, message.content),
        }
        for call in message.tool_calls() {
            println!("  -> {} {}({})", call.id, call.name, call.arguments);
        }
    }
    Ok(())
}

pub async fn list(ctx: &Context, status: Option<&str>) -> Result<()> {
    let status = status.map(str::parse::<RunStatus>).transpose()?;
    let runs = ctx.run_store().list_runs(status).await?;

    if !ctx.output.is_text() {
        let views: Vec<RunView> = runs.iter().map(Run::view).collect();
        return ctx.output.print_value(&views);
    }

    if runs.is_empty() {
        println!("No runs found.");
        return Ok(());
    }

    print_table_header(&[
        ("RUN ID", 36),
        ("AGENT", 16),
        ("STATUS", 17),
        ("TURNS", 5),
        ("TASK", 40),
    ]);
    for run in &runs {
        let turns = run.turn.to_string();
        print_table_row(&[
            (&run.id, 36),
            (&run.agent_id, 16),
            (run.status.as_str(), 17),
            (&turns, 5),
            (&run.task, 40),
        ]);
    }
    Ok(())
}
