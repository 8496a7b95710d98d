use llmtunnel::core::job::{Engine, JobState};
use std::path::PathBuf;

pub async fn handle_attach(
    config_path: &Option<PathBuf>,
    job_id: &str,
    engine: Engine,
    local_port: Option<u16>,
) -> anyhow::Result<()> {
    let config = super::load(config_path)?;
    let orchestrator = super::build_orchestrator(&config)?;

    let (state, raw) = orchestrator.status(job_id).await?;
    if state != JobState::Running {
        let raw = if raw.is_empty() { "not in queue" } else { raw.as_str() };
        anyhow::bail!("Job {job_id} is not running ({raw}); only running jobs can be attached");
    }

    let info = orchestrator
        .read_connection_record(job_id, engine.job_name(), config.polling.connection_policy())
        .await?;
    super::serve_tunnel(&orchestrator, &info, local_port, job_id).await
}
