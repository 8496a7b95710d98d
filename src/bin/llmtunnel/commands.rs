use crate::cli::{Commands, LlmTunnel};
use anyhow::Context;
use llmtunnel::config::{load_config, Config};
use llmtunnel::core::error::OrchestratorError;
use llmtunnel::core::job::ConnectionInfo;
use llmtunnel::core::partition::PartitionPlanner;
use llmtunnel::orchestrator::JobOrchestrator;
use llmtunnel::scheduler::SlurmScheduler;
use llmtunnel::shell::SshShell;
use llmtunnel::tunnel::TunnelExit;
use owo_colors::OwoColorize;
use std::path::PathBuf;

mod attach;
mod cancel;
mod chat;
mod completions;
mod launch;
mod logs;
mod status;

pub type Orchestrator = JobOrchestrator<SlurmScheduler<SshShell>, SshShell>;

pub async fn handle_commands(args: LlmTunnel) -> anyhow::Result<()> {
    let config_path = args.config;
    match args.command {
        None if args.launch.cancel => cancel::handle_cancel(&config_path).await,
        None => launch::handle_launch(&config_path, args.launch).await,
        Some(Commands::Attach {
            job_id,
            engine,
            local_port,
        }) => attach::handle_attach(&config_path, &job_id, engine, local_port).await,
        Some(Commands::Status { job_id }) => status::handle_status(&config_path, &job_id).await,
        Some(Commands::Logs { job_id, engine }) => {
            logs::handle_logs(&config_path, &job_id, engine).await
        }
        Some(Commands::Chat { port, max_tokens }) => {
            chat::handle_chat(&config_path, port, max_tokens).await
        }
        Some(Commands::Completions { shell }) => completions::handle_completions(shell),
    }
}

fn load(config_path: &Option<PathBuf>) -> anyhow::Result<Config> {
    load_config(config_path.as_ref()).context("Failed to load configuration")
}

fn build_orchestrator(config: &Config) -> anyhow::Result<Orchestrator> {
    let shell = SshShell::from_config(&config.cluster);
    let scheduler = SlurmScheduler::new(shell.clone());
    let planner = PartitionPlanner::from_config(&config.partitions)
        .context("Invalid [partitions] configuration")?;
    Ok(JobOrchestrator::new(
        scheduler,
        shell,
        planner,
        config.cluster.remote_base.clone(),
    )
    .with_diagnostic_lines(config.polling.diagnostic_lines))
}

/// Open the tunnel and keep it up until Ctrl-C or until the forward dies.
async fn serve_tunnel(
    orchestrator: &Orchestrator,
    info: &ConnectionInfo,
    local_port: Option<u16>,
    job_id: &str,
) -> anyhow::Result<()> {
    let tunnel = orchestrator.open_tunnel(info, local_port).await?;
    println!(
        "{} {} is served at {}",
        "Ready:".green().bold(),
        info.model.bold(),
        tunnel.local_url().cyan()
    );
    println!("Press Ctrl+C to close the tunnel.");

    let exit = tunnel
        .hold(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await
        .map_err(OrchestratorError::from)?;

    if exit == TunnelExit::Disconnected {
        println!("Tunnel closed by the remote side.");
    }
    println!("Job {job_id} is still running.");
    println!("Reattach with `llmtunnel attach {job_id}` or stop it with `llmtunnel --cancel`.");
    Ok(())
}
