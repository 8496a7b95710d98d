use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use llmtunnel::chat::{DEFAULT_CHAT_PORT, DEFAULT_REPLY_TOKENS};
use llmtunnel::core::job::Engine;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "llmtunnel",
    author,
    version = llmtunnel::version(),
    about = "Launch an LLM inference server as a Slurm job and tunnel it to localhost."
)]
#[command(styles = llmtunnel::utils::STYLES)]
#[command(args_conflicts_with_subcommands = true, subcommand_negates_reqs = true)]
pub struct LlmTunnel {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub launch: LaunchArgs,

    /// The configuration file to use
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,
}

#[derive(Debug, Args)]
pub struct LaunchArgs {
    /// Inference server to start
    #[arg(short, long, value_enum, default_value_t = Engine::Vllm)]
    pub engine: Engine,

    /// Model to serve, e.g. "Qwen/Qwen3-32B"
    #[arg(short, long, required_unless_present = "cancel")]
    pub model: Option<String>,

    /// Number of GPUs to request
    #[arg(short, long, default_value_t = 1)]
    pub gpus: u32,

    /// Wall time limit, e.g. "30", "06:00:00" or "1-12"
    #[arg(short, long, default_value = "06:00:00")]
    pub time: String,

    /// Partition to submit to; chosen from GPU count and wall time when omitted
    #[arg(short, long)]
    pub partition: Option<String>,

    /// Quantization method passed to the server, e.g. "fp8"
    #[arg(long)]
    pub quantization: Option<String>,

    /// Maximum context length the server accepts
    #[arg(long, value_name = "TOKENS")]
    pub max_model_len: Option<u32>,

    /// Local port of the tunnel (default: the server's port)
    #[arg(short, long)]
    pub local_port: Option<u16>,

    /// Cancel running serving jobs instead of launching one
    #[arg(
        long,
        conflicts_with_all = ["model", "partition", "quantization", "max_model_len", "local_port"]
    )]
    pub cancel: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Reconnect the tunnel to a job that is already running
    Attach {
        /// Slurm job ID
        job_id: String,

        /// Engine the job was launched with
        #[arg(short, long, value_enum, default_value_t = Engine::Vllm)]
        engine: Engine,

        /// Local port of the tunnel (default: the server's port)
        #[arg(short, long)]
        local_port: Option<u16>,
    },
    /// Show the scheduler state of a job
    Status {
        /// Slurm job ID
        job_id: String,
    },
    /// Print the tail of a job's error log
    Logs {
        /// Slurm job ID
        job_id: String,

        /// Engine the job was launched with
        #[arg(short, long, value_enum, default_value_t = Engine::Vllm)]
        engine: Engine,
    },
    /// Chat with the model behind an open tunnel
    Chat {
        /// Local port of the tunnel
        #[arg(short, long, default_value_t = DEFAULT_CHAT_PORT)]
        port: u16,

        /// Reply length limit in tokens
        #[arg(long, default_value_t = DEFAULT_REPLY_TOKENS)]
        max_tokens: u64,
    },
    /// Generate shell completion scripts
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        LlmTunnel::command().debug_assert();
    }

    #[test]
    fn launch_flags_parse_without_subcommand() {
        let args = LlmTunnel::try_parse_from([
            "llmtunnel",
            "--model",
            "Qwen/Qwen3-32B",
            "--gpus",
            "4",
            "--engine",
            "sglang",
        ])
        .unwrap();
        assert!(args.command.is_none());
        assert_eq!(args.launch.model.as_deref(), Some("Qwen/Qwen3-32B"));
        assert_eq!(args.launch.gpus, 4);
        assert_eq!(args.launch.engine, Engine::Sglang);
        assert_eq!(args.launch.time, "06:00:00");
    }

    #[test]
    fn launch_requires_model() {
        assert!(LlmTunnel::try_parse_from(["llmtunnel", "--gpus", "2"]).is_err());
    }

    #[test]
    fn cancel_needs_no_model() {
        let args = LlmTunnel::try_parse_from(["llmtunnel", "--cancel"]).unwrap();
        assert!(args.launch.cancel);
    }

    #[test]
    fn subcommands_need_no_model() {
        let args = LlmTunnel::try_parse_from(["llmtunnel", "attach", "12345"]).unwrap();
        let Some(Commands::Attach {
            job_id,
            engine,
            local_port,
        }) = args.command
        else {
            panic!("expected attach");
        };
        assert_eq!(job_id, "12345");
        assert_eq!(engine, Engine::Vllm);
        assert_eq!(local_port, None);
    }
}
