use crate::core::error::ShellError;
use crate::shell::{quote, quote_path, SecureShell};
use crate::utils::format_wall_time;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Everything `sbatch` needs to queue one serving job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitSpec {
    pub job_name: String,
    pub partition: String,
    pub wall_time: Duration,
    pub gpu_spec: String,
    pub cpus: u32,
    pub memory: String,
    pub env: Vec<(String, String)>,
    /// Batch script path, relative to the working directory.
    pub script: String,
    /// Remote directory the job runs in; logs go to its `logs/` subdirectory.
    pub work_dir: String,
}

/// Workload manager on the cluster.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BatchScheduler: Send + Sync {
    /// Queue a job and return the scheduler's textual response.
    async fn submit(&self, spec: &SubmitSpec) -> Result<String, ShellError>;

    /// Current state string of a job; empty once the job left the queue.
    async fn query_state(&self, job_id: &str) -> Result<String, ShellError>;

    /// Cancel every job of the current user with this name.
    async fn cancel_by_name(&self, name: &str) -> Result<(), ShellError>;
}

/// [`BatchScheduler`] running the Slurm CLI on the login node.
pub struct SlurmScheduler<H> {
    shell: H,
}

impl<H: SecureShell> SlurmScheduler<H> {
    pub fn new(shell: H) -> Self {
        Self { shell }
    }
}

pub(crate) fn render_sbatch(spec: &SubmitSpec) -> String {
    let exports = std::iter::once("ALL".to_string())
        .chain(spec.env.iter().map(|(k, v)| format!("{k}={v}")))
        .collect::<Vec<_>>()
        .join(",");

    let args = [
        format!("--job-name={}", spec.job_name),
        format!("--partition={}", spec.partition),
        format!("--time={}", format_wall_time(spec.wall_time)),
        format!("--gres={}", spec.gpu_spec),
        format!("--cpus-per-task={}", spec.cpus),
        format!("--mem={}", spec.memory),
        "--output=logs/%x-%j.out".to_string(),
        "--error=logs/%x-%j.err".to_string(),
        format!("--export={exports}"),
    ];

    let mut command = format!("cd {} && mkdir -p logs && sbatch", quote_path(&spec.work_dir));
    for arg in args.iter() {
        command.push(' ');
        command.push_str(&quote(arg));
    }
    command.push(' ');
    command.push_str(&quote(&spec.script));
    command
}

pub(crate) fn render_squeue(job_id: &str) -> String {
    // squeue exits non-zero for job IDs it no longer knows; that is an empty state
    format!("squeue -h -j {} -o %T 2>/dev/null || true", quote(job_id))
}

pub(crate) fn render_scancel(name: &str) -> String {
    format!("scancel --user=\"$USER\" --name={}", quote(name))
}

#[async_trait]
impl<H: SecureShell> BatchScheduler for SlurmScheduler<H> {
    async fn submit(&self, spec: &SubmitSpec) -> Result<String, ShellError> {
        let command = render_sbatch(spec);
        debug!(%command, "submitting batch job");
        self.shell.exec(&command).await
    }

    async fn query_state(&self, job_id: &str) -> Result<String, ShellError> {
        let output = self.shell.exec(&render_squeue(job_id)).await?;
        Ok(output.trim().to_string())
    }

    async fn cancel_by_name(&self, name: &str) -> Result<(), ShellError> {
        self.shell.exec(&render_scancel(name)).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::MockSecureShell;

    fn spec() -> SubmitSpec {
        SubmitSpec {
            job_name: "vllm-serve".to_string(),
            partition: "gpu_devel".to_string(),
            wall_time: Duration::from_secs(6 * 3600),
            gpu_spec: "gpu:2".to_string(),
            cpus: 16,
            memory: "128G".to_string(),
            env: vec![
                ("MODEL".to_string(), "Qwen/Qwen3-32B".to_string()),
                ("NUM_GPUS".to_string(), "2".to_string()),
            ],
            script: "vllm_serve.sh".to_string(),
            work_dir: "/home/me/llm".to_string(),
        }
    }

    #[test]
    fn sbatch_command_carries_every_resource() {
        let command = render_sbatch(&spec());
        assert!(command.starts_with("cd /home/me/llm && mkdir -p logs && sbatch "));
        assert!(command.contains("--partition=gpu_devel"));
        assert!(command.contains("--time=06:00:00"));
        assert!(command.contains("--gres=gpu:2"));
        assert!(command.contains("--cpus-per-task=16"));
        assert!(command.contains("--mem=128G"));
        assert!(command.contains("--export=ALL,MODEL=Qwen/Qwen3-32B,NUM_GPUS=2"));
        assert!(command.ends_with(" vllm_serve.sh"));
    }

    #[test]
    fn sbatch_command_quotes_hostile_values() {
        let mut spec = spec();
        spec.work_dir = "my dir; rm -rf ~".to_string();
        let command = render_sbatch(&spec);
        assert!(command.starts_with("cd 'my dir; rm -rf ~' && "));
    }

    #[test]
    fn sbatch_command_expands_home_relative_work_dir() {
        let mut spec = spec();
        spec.work_dir = "~/llm".to_string();
        assert!(render_sbatch(&spec).starts_with("cd ~/llm && mkdir -p logs && sbatch "));
    }

    #[test]
    fn scancel_targets_current_user_by_name() {
        assert_eq!(
            render_scancel("vllm-serve"),
            "scancel --user=\"$USER\" --name=vllm-serve"
        );
    }

    #[tokio::test]
    async fn query_state_trims_output() {
        let mut shell = MockSecureShell::new();
        shell
            .expect_exec()
            .withf(|command: &str| command == render_squeue("12345"))
            .times(1)
            .returning(|_| Ok("RUNNING\n".to_string()));

        let scheduler = SlurmScheduler::new(shell);
        assert_eq!(scheduler.query_state("12345").await.unwrap(), "RUNNING");
    }

    #[tokio::test]
    async fn submit_returns_raw_scheduler_output() {
        let mut shell = MockSecureShell::new();
        shell
            .expect_exec()
            .times(1)
            .returning(|_| Ok("Submitted batch job 4242\n".to_string()));

        let scheduler = SlurmScheduler::new(shell);
        let output = scheduler.submit(&spec()).await.unwrap();
        assert_eq!(output, "Submitted batch job 4242\n");
    }
}
