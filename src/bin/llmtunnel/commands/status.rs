use llmtunnel::core::job::JobState;
use owo_colors::OwoColorize;
use std::path::PathBuf;

pub async fn handle_status(config_path: &Option<PathBuf>, job_id: &str) -> anyhow::Result<()> {
    let config = super::load(config_path)?;
    let orchestrator = super::build_orchestrator(&config)?;

    let (state, raw) = orchestrator.status(job_id).await?;
    let label = match state {
        JobState::Running => state.green().to_string(),
        JobState::Pending => state.yellow().to_string(),
        JobState::Failed => state.red().to_string(),
        JobState::Unknown => state.to_string(),
    };
    if raw.is_empty() {
        println!("Job {job_id}: {label} (not in queue)");
    } else {
        println!("Job {job_id}: {label} ({raw})");
    }
    Ok(())
}
