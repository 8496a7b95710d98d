use thiserror::Error;

/// Failure of a command run through a [`crate::shell::SecureShell`].
#[derive(Error, Debug)]
pub enum ShellError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("ssh connection to {host} failed: {stderr}")]
    Transport { host: String, stderr: String },
    #[error("remote command exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },
    #[error("killed by signal")]
    KilledBySignal,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConnectionInfoFailure {
    #[error("no connection record after {attempts} attempts")]
    Missing { attempts: u32 },
    #[error("connection record is malformed: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("job submission failed: {message}")]
    Submission {
        message: String,
        #[source]
        source: Option<ShellError>,
    },
    #[error("job {job_id} did not start after {polls} polls{}", format_diagnostic(.diagnostic))]
    StartupTimeout {
        job_id: String,
        polls: u32,
        diagnostic: String,
    },
    #[error("job {job_id} stopped before running (state: {}){}", display_state(.state), format_diagnostic(.diagnostic))]
    JobFailed {
        job_id: String,
        state: String,
        diagnostic: String,
    },
    #[error("connection info for job {job_id} unavailable: {reason}; check {log_path}")]
    ConnectionInfoTimeout {
        job_id: String,
        reason: ConnectionInfoFailure,
        log_path: String,
    },
    #[error(transparent)]
    Shell(#[from] ShellError),
}

impl OrchestratorError {
    pub fn submission(message: impl Into<String>) -> Self {
        OrchestratorError::Submission {
            message: message.into(),
            source: None,
        }
    }

    /// Process exit code the CLI reports for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            OrchestratorError::Submission { .. } => 2,
            OrchestratorError::StartupTimeout { .. } => 3,
            OrchestratorError::JobFailed { .. } => 4,
            OrchestratorError::ConnectionInfoTimeout { .. } => 5,
            OrchestratorError::Shell(_) => 6,
        }
    }
}

fn format_diagnostic(diagnostic: &str) -> String {
    if diagnostic.trim().is_empty() {
        String::new()
    } else {
        format!("\n--- remote error log ---\n{}", diagnostic.trim_end())
    }
}

fn display_state(state: &str) -> &str {
    if state.is_empty() {
        "gone from queue"
    } else {
        state
    }
}
