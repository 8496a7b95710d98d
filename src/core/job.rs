use anyhow::{ensure, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{Display, EnumIter, IntoEnumIterator};

/// Inference server that the remote batch script starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, ValueEnum)]
pub enum Engine {
    #[strum(to_string = "vllm")]
    Vllm,
    #[strum(to_string = "sglang")]
    Sglang,
}

impl Engine {
    /// Slurm job name, also used as the cancel pattern.
    pub fn job_name(self) -> &'static str {
        match self {
            Engine::Vllm => "vllm-serve",
            Engine::Sglang => "sglang-serve",
        }
    }

    /// Batch script under the remote base directory.
    pub fn script_name(self) -> &'static str {
        match self {
            Engine::Vllm => "vllm_serve.sh",
            Engine::Sglang => "sglang_serve.sh",
        }
    }

    pub fn all_job_names() -> Vec<&'static str> {
        Engine::iter().map(Engine::job_name).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    engine: Engine,
    model: String,
    gpus: u32,
    wall_time: Duration,
    partition: Option<String>,
    quantization: Option<String>,
    max_context_length: Option<u32>,
}

impl JobRequest {
    pub fn builder(engine: Engine, model: impl Into<String>) -> JobRequestBuilder {
        JobRequestBuilder::new(engine, model.into())
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn gpus(&self) -> u32 {
        self.gpus
    }

    pub fn wall_time(&self) -> Duration {
        self.wall_time
    }

    pub fn partition(&self) -> Option<&str> {
        self.partition.as_deref()
    }

    pub fn quantization(&self) -> Option<&str> {
        self.quantization.as_deref()
    }

    pub fn max_context_length(&self) -> Option<u32> {
        self.max_context_length
    }

    /// Environment exported to the batch script.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("ENGINE".to_string(), self.engine.to_string()),
            ("MODEL".to_string(), self.model.clone()),
            ("NUM_GPUS".to_string(), self.gpus.to_string()),
        ];
        if let Some(quantization) = &self.quantization {
            env.push(("QUANTIZATION".to_string(), quantization.clone()));
        }
        if let Some(max_len) = self.max_context_length {
            env.push(("MAX_MODEL_LEN".to_string(), max_len.to_string()));
        }
        env
    }
}

pub struct JobRequestBuilder {
    engine: Engine,
    model: String,
    gpus: u32,
    wall_time: Duration,
    partition: Option<String>,
    quantization: Option<String>,
    max_context_length: Option<u32>,
}

impl JobRequestBuilder {
    fn new(engine: Engine, model: String) -> Self {
        Self {
            engine,
            model,
            gpus: 1,
            wall_time: Duration::from_secs(6 * 3600),
            partition: None,
            quantization: None,
            max_context_length: None,
        }
    }

    pub fn gpus(mut self, gpus: u32) -> Self {
        self.gpus = gpus;
        self
    }

    pub fn wall_time(mut self, wall_time: Duration) -> Self {
        self.wall_time = wall_time;
        self
    }

    pub fn partition(mut self, partition: Option<String>) -> Self {
        self.partition = partition;
        self
    }

    pub fn quantization(mut self, quantization: Option<String>) -> Self {
        self.quantization = quantization;
        self
    }

    pub fn max_context_length(mut self, max_context_length: Option<u32>) -> Self {
        self.max_context_length = max_context_length;
        self
    }

    pub fn build(self) -> Result<JobRequest> {
        ensure!(!self.model.trim().is_empty(), "Model name cannot be empty");
        ensure!(self.gpus > 0, "GPU count must be at least 1");
        ensure!(!self.wall_time.is_zero(), "Wall time must be positive");
        Ok(JobRequest {
            engine: self.engine,
            model: self.model,
            gpus: self.gpus,
            wall_time: self.wall_time,
            partition: self.partition.filter(|p| !p.is_empty()),
            quantization: self.quantization.filter(|q| !q.is_empty()),
            max_context_length: self.max_context_length,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum JobState {
    #[strum(to_string = "Pending")]
    Pending,
    #[strum(to_string = "Running")]
    Running,
    #[strum(to_string = "Failed")]
    Failed,
    #[strum(to_string = "Unknown")]
    Unknown,
}

/// Slurm states after which a job will never reach RUNNING again.
const TERMINAL_STATES: &[&str] = &[
    "BOOT_FAIL",
    "CANCELLED",
    "COMPLETED",
    "DEADLINE",
    "FAILED",
    "NODE_FAIL",
    "OUT_OF_MEMORY",
    "PREEMPTED",
    "TIMEOUT",
];

const PENDING_STATES: &[&str] = &[
    "PENDING",
    "CONFIGURING",
    "REQUEUED",
    "REQUEUE_HOLD",
    "REQUEUE_FED",
    "RESIZING",
    "SUSPENDED",
];

impl JobState {
    /// Map the `%T` column of `squeue` output. An empty string means the job
    /// is no longer known to the queue.
    pub fn from_squeue(raw: &str) -> Self {
        let state = raw.trim().to_ascii_uppercase();
        // squeue may append a reason, e.g. "CANCELLED by 1234"
        let state = state.split_whitespace().next().unwrap_or("");
        if state.is_empty() || TERMINAL_STATES.contains(&state) {
            JobState::Failed
        } else if state == "RUNNING" {
            JobState::Running
        } else if PENDING_STATES.contains(&state) {
            JobState::Pending
        } else {
            JobState::Unknown
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmittedJob {
    pub id: String,
    pub request: JobRequest,
    pub state: JobState,
}

impl SubmittedJob {
    pub fn new(id: String, request: JobRequest) -> Self {
        Self {
            id,
            request,
            state: JobState::Pending,
        }
    }

    pub fn job_name(&self) -> &'static str {
        self.request.engine().job_name()
    }

    pub fn connection_record_path(&self, remote_base: &str) -> String {
        connection_record_path(remote_base, &self.id)
    }

    pub fn error_log_path(&self, remote_base: &str) -> String {
        error_log_path(remote_base, self.job_name(), &self.id)
    }
}

pub fn connection_record_path(remote_base: &str, job_id: &str) -> String {
    format!(
        "{}/logs/connection-{}.json",
        remote_base.trim_end_matches('/'),
        job_id
    )
}

pub fn error_log_path(remote_base: &str, job_name: &str, job_id: &str) -> String {
    format!(
        "{}/logs/{}-{}.err",
        remote_base.trim_end_matches('/'),
        job_name,
        job_id
    )
}

/// Record written by the remote job once the server accepts requests.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConnectionInfo {
    pub node: String,
    pub port: u16,
    pub model: String,
}

impl ConnectionInfo {
    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rejects_zero_gpus() {
        assert!(JobRequest::builder(Engine::Vllm, "Qwen/Qwen3-32B")
            .gpus(0)
            .build()
            .is_err());
    }

    #[test]
    fn builder_rejects_empty_model() {
        assert!(JobRequest::builder(Engine::Vllm, "  ").build().is_err());
    }

    #[test]
    fn empty_partition_override_is_treated_as_unset() {
        let request = JobRequest::builder(Engine::Sglang, "m")
            .partition(Some(String::new()))
            .build()
            .unwrap();
        assert_eq!(request.partition(), None);
    }

    #[test]
    fn env_vars_include_optional_settings() {
        let request = JobRequest::builder(Engine::Vllm, "Qwen/Qwen3-32B")
            .gpus(2)
            .quantization(Some("awq".to_string()))
            .max_context_length(Some(32768))
            .build()
            .unwrap();
        let env = request.env_vars();
        assert!(env.contains(&("ENGINE".to_string(), "vllm".to_string())));
        assert!(env.contains(&("NUM_GPUS".to_string(), "2".to_string())));
        assert!(env.contains(&("QUANTIZATION".to_string(), "awq".to_string())));
        assert!(env.contains(&("MAX_MODEL_LEN".to_string(), "32768".to_string())));
    }

    #[test]
    fn squeue_states_map_to_job_states() {
        assert_eq!(JobState::from_squeue("RUNNING\n"), JobState::Running);
        assert_eq!(JobState::from_squeue("PENDING"), JobState::Pending);
        assert_eq!(JobState::from_squeue(""), JobState::Failed);
        assert_eq!(JobState::from_squeue("  \n"), JobState::Failed);
        assert_eq!(JobState::from_squeue("CANCELLED by 501"), JobState::Failed);
        assert_eq!(JobState::from_squeue("COMPLETING"), JobState::Unknown);
    }

    #[test]
    fn remote_paths_depend_on_job_id() {
        let request = JobRequest::builder(Engine::Vllm, "m").build().unwrap();
        let job = SubmittedJob::new("12345".to_string(), request);
        assert_eq!(
            job.connection_record_path("/home/me/llm/"),
            "/home/me/llm/logs/connection-12345.json"
        );
        assert_eq!(
            job.error_log_path("/home/me/llm"),
            "/home/me/llm/logs/vllm-serve-12345.err"
        );
    }

    #[test]
    fn connection_info_ignores_extra_fields() {
        let info =
            ConnectionInfo::parse(r#"{"node":"gpu042","port":27347,"model":"m","pid":7}"#).unwrap();
        assert_eq!(info.node, "gpu042");
        assert_eq!(info.port, 27347);
    }

    #[test]
    fn job_names_cover_every_engine() {
        assert_eq!(Engine::all_job_names(), vec!["vllm-serve", "sglang-serve"]);
    }
}
