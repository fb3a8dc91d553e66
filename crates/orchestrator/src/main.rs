use anyhow::Result;
use workflow_orchestrator::collaborators::SecurityConfig;
use workflow_orchestrator::telemetry::init_tracing;
use workflow_orchestrator::{OrchestratorConfig, RunnerComponents, WorkflowRunner};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();
    init_tracing();

    tracing::info!("orchestratord starting...");

    let config = OrchestratorConfig::from_env();
    tracing::info!(
        schedules_dir = %config.scheduler.schedules_dir.display(),
        max_concurrent = config.lifecycle.admission.max_concurrent_workflows,
        "configuration loaded"
    );

    let runner = WorkflowRunner::new(config, RunnerComponents::in_memory(SecurityConfig::default()));
    runner.initialize().await?;

    tracing::info!("orchestratord ready, waiting for shutdown signal...");
    tokio::signal::ctrl_c().await?;

    runner.stop().await;
    tracing::info!("orchestratord shutdown complete");
    Ok(())
}
