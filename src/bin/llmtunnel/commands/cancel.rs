use llmtunnel::core::job::Engine;
use std::path::PathBuf;

pub async fn handle_cancel(config_path: &Option<PathBuf>) -> anyhow::Result<()> {
    let config = super::load(config_path)?;
    let orchestrator = super::build_orchestrator(&config)?;

    let names = Engine::all_job_names();
    orchestrator.cancel(&names).await;
    println!("Cancel requested for jobs named {}.", names.join(", "));
    Ok(())
}
