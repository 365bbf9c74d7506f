// Agentrun CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json/yaml output formats for scripting.
// Design Decision: DATABASE_URL selects the PostgreSQL stores; without it runs
// live in memory for the lifetime of the process.

mod commands;
mod context;
mod output;

use clap::{Parser, Subcommand};

use agentrun_core::telemetry::{init_telemetry, TelemetryConfig};

use crate::context::Context;

#[derive(Parser)]
#[command(name = "agentrun")]
#[command(about = "Agentrun CLI - Drive durable multi-turn agent runs")]
#[command(version)]
pub struct Cli {
    /// PostgreSQL connection string for run and step storage
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    /// Suppress progress output
    #[arg(long, short)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a run and follow it to completion
    Run {
        /// Task given to the agent
        task: String,

        /// Agent identity the run publishes progress under
        #[arg(long, short, default_value = "default")]
        agent: String,

        /// Run ID (generated when omitted)
        #[arg(long)]
        run_id: Option<String>,

        #[command(flatten)]
        overrides: commands::runs::LoopOverrides,
    },

    /// Resume a persisted run that has not finished
    Resume {
        /// Run ID
        run_id: String,

        #[command(flatten)]
        overrides: commands::runs::LoopOverrides,
    },

    /// Resume every persisted run still marked running
    ResumePending {
        #[command(flatten)]
        overrides: commands::runs::LoopOverrides,
    },

    /// Show the status of a run
    Status {
        /// Run ID
        run_id: String,
    },

    /// Print the transcript of a run
    Messages {
        /// Run ID
        run_id: String,
    },

    /// List runs
    List {
        /// Filter by status
        #[arg(
            long,
            value_parser = ["running", "complete", "error", "max_turns_reached", "cancelled"]
        )]
        status: Option<String>,
    },

    /// Apply database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();
    init_telemetry(TelemetryConfig::from_env());
    if let Ok(path) = dotenv {
        tracing::debug!("Loaded .env from {:?}", path);
    }

    let cli = Cli::parse();
    let ctx = Context::connect(cli.database_url.as_deref(), &cli.output, cli.quiet).await?;

    match cli.command {
        Commands::Run {
            task,
            agent,
            run_id,
            overrides,
        } => commands::runs::run(&ctx, &agent, run_id, &task, overrides).await,
        Commands::Resume { run_id, overrides } => {
            commands::runs::resume(&ctx, &run_id, overrides).await
        }
        Commands::ResumePending { overrides } => {
            commands::runs::resume_pending(&ctx, overrides).await
        }
        Commands::Status { run_id } => commands::inspect::status(&ctx, &run_id).await,
        Commands::Messages { run_id } => commands::inspect::messages(&ctx, &run_id).await,
        Commands::List { status } => commands::inspect::list(&ctx, status.as_deref()).await,
        Commands::Migrate => ctx.migrate().await,
    }
}
