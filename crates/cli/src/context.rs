// Store selection and RunManager wiring shared by all commands

use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use sqlx::PgPool;
use tracing::{info, warn};

use agentrun_core::{
    EchoTool, InMemoryRunStore, InMemoryStepStore, LoopConfig, OpenAiCompatibleGateway,
    PostgresRunStore, PostgresStepStore, RunManager, RunStore, StepStore, ToolRegistry,
};

use crate::output::OutputFormat;

pub struct Context {
    pub output: OutputFormat,
    pub quiet: bool,
    pool: Option<PgPool>,
    step_store: Arc<dyn StepStore>,
    run_store: Arc<dyn RunStore>,
}

impl Context {
    pub async fn connect(database_url: Option<&str>, output: &str, quiet: bool) -> Result<Self> {
        let output = OutputFormat::parse(output);

        let Some(database_url) = database_url else {
            warn!("DATABASE_URL not set, runs are kept in memory and lost on exit");
            return Ok(Self {
                output,
                quiet,
                pool: None,
                step_store: Arc::new(InMemoryStepStore::new()),
                run_store: Arc::new(InMemoryRunStore::new()),
            });
        };

        let pool = PgPool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        info!("Connected to database");

        Ok(Self {
            output,
            quiet,
            step_store: Arc::new(PostgresStepStore::new(pool.clone())),
            run_store: Arc::new(PostgresRunStore::new(pool.clone())),
            pool: Some(pool),
        })
    }

    pub fn run_store(&self) -> &Arc<dyn RunStore> {
        &self.run_store
    }

    /// Build a manager driving runs against the configured gateway
    pub fn manager(&self, config: LoopConfig) -> Result<RunManager> {
        let gateway = OpenAiCompatibleGateway::from_env()
            .context("Failed to configure the LLM gateway")?;
        let tools = ToolRegistry::builder().tool(EchoTool).build();

        Ok(RunManager::new(
            config,
            Arc::new(gateway),
            Arc::new(tools),
            self.step_store.clone(),
            self.run_store.clone(),
        ))
    }

    pub async fn migrate(&self) -> Result<()> {
        let Some(pool) = &self.pool else {
            bail!("DATABASE_URL must be set to run migrations");
        };
        sqlx::migrate!("../../migrations")
            .run(pool)
            .await
            .context("Failed to apply migrations")?;
        info!("Migrations applied");
        Ok(())
    }
}
