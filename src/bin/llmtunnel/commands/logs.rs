use llmtunnel::core::job::{error_log_path, Engine};
use std::path::PathBuf;

pub async fn handle_logs(
    config_path: &Option<PathBuf>,
    job_id: &str,
    engine: Engine,
) -> anyhow::Result<()> {
    let config = super::load(config_path)?;
    let orchestrator = super::build_orchestrator(&config)?;

    let log = orchestrator.error_log(job_id, engine.job_name()).await;
    if log.trim().is_empty() {
        let path = error_log_path(orchestrator.remote_base(), engine.job_name(), job_id);
        anyhow::bail!("No error log found at {path}");
    }
    print!("{log}");
    Ok(())
}
