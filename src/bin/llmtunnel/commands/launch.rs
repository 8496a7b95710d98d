use crate::cli::LaunchArgs;
use anyhow::Context;
use llmtunnel::core::job::JobRequest;
use llmtunnel::utils::parse_wall_time;
use std::path::PathBuf;

pub async fn handle_launch(config_path: &Option<PathBuf>, args: LaunchArgs) -> anyhow::Result<()> {
    let config = super::load(config_path)?;
    let model = args.model.context("--model is required")?;
    let wall_time = parse_wall_time(&args.time)
        .with_context(|| format!("Invalid --time value '{}'", args.time))?;

    let request = JobRequest::builder(args.engine, model)
        .gpus(args.gpus)
        .wall_time(wall_time)
        .partition(args.partition)
        .quantization(args.quantization)
        .max_context_length(args.max_model_len)
        .build()?;

    let orchestrator = super::build_orchestrator(&config)?;
    let job = orchestrator.submit(request).await?;
    println!("Submitted job {}. Waiting for it to start...", job.id);

    let job = orchestrator
        .await_ready(job, config.polling.state_policy())
        .await?;
    let info = orchestrator
        .retrieve_connection_info(&job, config.polling.connection_policy())
        .await?;

    super::serve_tunnel(&orchestrator, &info, args.local_port, &job.id).await
}
