mod cli;
mod commands;

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use llmtunnel::core::error::OrchestratorError;
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;

#[tokio::main]
async fn main() -> ExitCode {
    match real_main().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:?}");
            ExitCode::from(exit_code(&err))
        }
    }
}

async fn real_main() -> anyhow::Result<()> {
    let args = cli::LlmTunnel::parse();
    let _guard = init_tracing(&args.verbosity, writes_session_log(&args))?;
    commands::handle_commands(args).await
}

/// Launch and attach hold a tunnel for hours, so they also log to a file.
fn writes_session_log(args: &cli::LlmTunnel) -> bool {
    match args.command {
        None => !args.launch.cancel,
        Some(cli::Commands::Attach { .. }) => true,
        Some(_) => false,
    }
}

fn init_tracing(
    verbosity: &Verbosity<InfoLevel>,
    session_log: bool,
) -> anyhow::Result<Option<WorkerGuard>> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let (file_layer, guard) = if session_log {
        let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
            .rotation(tracing_appender::rolling::Rotation::DAILY)
            .filename_prefix("session")
            .filename_suffix("log")
            .max_log_files(7)
            .build(llmtunnel::core::get_log_dir()?)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(non_blocking);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(verbosity.tracing_level_filter())
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<OrchestratorError>()
        .map_or(1, OrchestratorError::exit_code)
}
