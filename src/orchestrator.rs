//! Job lifecycle: submit a serving job, wait for it to run, read the
//! connection record it writes, and forward a local port to it.

use crate::config::RetryPolicy;
use crate::core::error::{ConnectionInfoFailure, OrchestratorError};
use crate::core::job::{
    connection_record_path, error_log_path, ConnectionInfo, JobRequest, JobState, SubmittedJob,
};
use crate::core::partition::PartitionPlanner;
use crate::scheduler::{BatchScheduler, SubmitSpec};
use crate::shell::{quote_path, SecureShell};
use crate::tunnel::TunnelHandle;
use crate::utils::extract_job_id;
use tracing::{debug, info, warn};

const DEFAULT_DIAGNOSTIC_LINES: u32 = 40;

pub struct JobOrchestrator<S, H> {
    scheduler: S,
    shell: H,
    planner: PartitionPlanner,
    remote_base: String,
    diagnostic_lines: u32,
}

impl<S: BatchScheduler, H: SecureShell> JobOrchestrator<S, H> {
    pub fn new(scheduler: S, shell: H, planner: PartitionPlanner, remote_base: String) -> Self {
        Self {
            scheduler,
            shell,
            planner,
            remote_base,
            diagnostic_lines: DEFAULT_DIAGNOSTIC_LINES,
        }
    }

    pub fn with_diagnostic_lines(mut self, lines: u32) -> Self {
        self.diagnostic_lines = lines;
        self
    }

    pub fn remote_base(&self) -> &str {
        &self.remote_base
    }

    pub async fn submit(&self, request: JobRequest) -> Result<SubmittedJob, OrchestratorError> {
        let allocation = self.planner.allocate(&request);
        for warning in &allocation.warnings {
            warn!("{warning}");
        }

        let engine = request.engine();
        let spec = SubmitSpec {
            job_name: engine.job_name().to_string(),
            partition: allocation.partition.clone(),
            wall_time: request.wall_time(),
            gpu_spec: allocation.gpu_spec.clone(),
            cpus: allocation.cpus,
            memory: allocation.memory_spec(),
            env: request.env_vars(),
            script: engine.script_name().to_string(),
            work_dir: self.remote_base.clone(),
        };
        info!(
            model = request.model(),
            partition = %spec.partition,
            gpus = request.gpus(),
            cpus = spec.cpus,
            memory = %spec.memory,
            "Submitting {engine} job"
        );

        let output = self
            .scheduler
            .submit(&spec)
            .await
            .map_err(|source| OrchestratorError::Submission {
                message: "scheduler rejected the job".to_string(),
                source: Some(source),
            })?;

        let id = extract_job_id(&output).ok_or_else(|| {
            OrchestratorError::submission(format!(
                "no job ID in scheduler output {:?}",
                output.trim()
            ))
        })?;
        info!("Submitted batch job {id}");
        Ok(SubmittedJob::new(id, request))
    }

    /// Poll the scheduler until the job runs, fails, or the budget runs out.
    pub async fn await_ready(
        &self,
        mut job: SubmittedJob,
        policy: RetryPolicy,
    ) -> Result<SubmittedJob, OrchestratorError> {
        for attempt in 1..=policy.max_attempts {
            let raw = self.scheduler.query_state(&job.id).await?;
            job.state = JobState::from_squeue(&raw);
            debug!(job_id = %job.id, attempt, state = %raw.trim(), "polled job state");

            match job.state {
                JobState::Running => {
                    info!(job_id = %job.id, "Job is running");
                    return Ok(job);
                }
                JobState::Failed => {
                    let diagnostic = self.error_log(&job.id, job.job_name()).await;
                    return Err(OrchestratorError::JobFailed {
                        job_id: job.id,
                        state: raw.trim().to_string(),
                        diagnostic,
                    });
                }
                JobState::Pending | JobState::Unknown => {}
            }

            if attempt < policy.max_attempts {
                tokio::time::sleep(policy.interval).await;
            }
        }

        let diagnostic = self.error_log(&job.id, job.job_name()).await;
        Err(OrchestratorError::StartupTimeout {
            job_id: job.id,
            polls: policy.max_attempts,
            diagnostic,
        })
    }

    pub async fn retrieve_connection_info(
        &self,
        job: &SubmittedJob,
        policy: RetryPolicy,
    ) -> Result<ConnectionInfo, OrchestratorError> {
        self.read_connection_record(&job.id, job.job_name(), policy)
            .await
    }

    /// Read the connection record of a job known only by ID and job name.
    ///
    /// The remote job writes the record some time after it starts running, so
    /// an empty read is retried; unparseable content is not.
    pub async fn read_connection_record(
        &self,
        job_id: &str,
        job_name: &str,
        policy: RetryPolicy,
    ) -> Result<ConnectionInfo, OrchestratorError> {
        let path = connection_record_path(&self.remote_base, job_id);
        let command = format!("cat {} 2>/dev/null || true", quote_path(&path));

        for attempt in 1..=policy.max_attempts {
            let content = self.shell.exec(&command).await?;
            let content = content.trim();
            if !content.is_empty() {
                return ConnectionInfo::parse(content)
                    .inspect(|info| {
                        info!(
                            node = %info.node,
                            port = info.port,
                            model = %info.model,
                            "Server is ready"
                        )
                    })
                    .map_err(|err| OrchestratorError::ConnectionInfoTimeout {
                        job_id: job_id.to_string(),
                        reason: ConnectionInfoFailure::Malformed(err.to_string()),
                        log_path: error_log_path(&self.remote_base, job_name, job_id),
                    });
            }

            debug!(%path, attempt, "connection record not written yet");
            if attempt < policy.max_attempts {
                tokio::time::sleep(policy.interval).await;
            }
        }

        Err(OrchestratorError::ConnectionInfoTimeout {
            job_id: job_id.to_string(),
            reason: ConnectionInfoFailure::Missing {
                attempts: policy.max_attempts,
            },
            log_path: error_log_path(&self.remote_base, job_name, job_id),
        })
    }

    /// Forward `local_port` (default: the server port) to the serving node.
    pub async fn open_tunnel(
        &self,
        info: &ConnectionInfo,
        local_port: Option<u16>,
    ) -> Result<TunnelHandle, OrchestratorError> {
        let local_port = local_port.unwrap_or(info.port);
        let session = self.shell.forward(local_port, &info.node, info.port).await?;
        info!(
            "Tunnel open: localhost:{local_port} -> {}:{}",
            info.node, info.port
        );
        Ok(TunnelHandle::new(
            local_port,
            info.node.clone(),
            info.port,
            session,
        ))
    }

    /// Cancel every job with one of `job_names`. Failures are only logged.
    pub async fn cancel(&self, job_names: &[&str]) {
        for name in job_names {
            match self.scheduler.cancel_by_name(name).await {
                Ok(()) => info!("Cancelled jobs named {name}"),
                Err(err) => warn!("Failed to cancel jobs named {name}: {err}"),
            }
        }
    }

    pub async fn status(&self, job_id: &str) -> Result<(JobState, String), OrchestratorError> {
        let raw = self.scheduler.query_state(job_id).await?;
        Ok((JobState::from_squeue(&raw), raw.trim().to_string()))
    }

    /// Tail of the job's stderr log, or an empty string when it cannot be read.
    pub async fn error_log(&self, job_id: &str, job_name: &str) -> String {
        let path = error_log_path(&self.remote_base, job_name, job_id);
        let command = format!(
            "tail -n {} {} 2>/dev/null || true",
            self.diagnostic_lines,
            quote_path(&path)
        );
        match self.shell.exec(&command).await {
            Ok(content) => content,
            Err(err) => {
                warn!("Could not read {path}: {err}");
                String::new()
            }
        }
    }
}
