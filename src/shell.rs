use crate::config::ClusterConfig;
use crate::core::error::ShellError;
use async_trait::async_trait;
use shell_escape::escape;
use std::borrow::Cow;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};
use tracing::{debug, trace};

/// Exit status ssh itself uses for connection and authentication failures.
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// Quote a value for the remote POSIX shell.
pub fn quote(value: &str) -> Cow<'_, str> {
    escape(Cow::Borrowed(value))
}

/// Quote a remote path, leaving a leading `~/` unquoted so the remote shell
/// still expands it to the home directory.
pub fn quote_path(path: &str) -> Cow<'_, str> {
    match path.strip_prefix("~/") {
        Some(rest) => Cow::Owned(format!("~/{}", quote(rest))),
        None if path == "~" => Cow::Borrowed(path),
        None => quote(path),
    }
}

/// Remote command execution and port forwarding on the cluster login node.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecureShell: Send + Sync {
    /// Run `command` through the remote shell and return its stdout.
    async fn exec(&self, command: &str) -> Result<String, ShellError>;

    /// Start forwarding `local_port` to `remote_host:remote_port`.
    async fn forward(
        &self,
        local_port: u16,
        remote_host: &str,
        remote_port: u16,
    ) -> Result<Box<dyn ForwardSession>, ShellError>;
}

/// A running port forward.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ForwardSession: Send {
    /// Resolves when the forward ends on its own.
    async fn wait(&mut self) -> Result<(), ShellError>;

    /// Stop the forward.
    async fn terminate(&mut self) -> Result<(), ShellError>;
}

/// [`SecureShell`] backed by the system OpenSSH client.
#[derive(Debug, Clone)]
pub struct SshShell {
    host: String,
    user: Option<String>,
    port: Option<u16>,
    options: Vec<String>,
}

impl SshShell {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            options: Vec::new(),
        }
    }

    pub fn from_config(cluster: &ClusterConfig) -> Self {
        Self {
            host: cluster.host.clone(),
            user: cluster.user.clone().filter(|u| !u.is_empty()),
            port: cluster.ssh_port,
            options: cluster.ssh_options.clone(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }

    /// Arguments shared by every invocation, up to and including the destination.
    fn base_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        for option in &self.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        args
    }

    fn exec_args(&self, command: &str) -> Vec<String> {
        let mut args = self.base_args();
        args.push(self.destination());
        args.push(command.to_string());
        args
    }

    fn forward_args(&self, local_port: u16, remote_host: &str, remote_port: u16) -> Vec<String> {
        let mut args = self.base_args();
        args.push("-N".to_string());
        args.push("-L".to_string());
        args.push(format!("{local_port}:{remote_host}:{remote_port}"));
        args.push(self.destination());
        args
    }

    fn status_error(&self, status: ExitStatus, stderr: &[u8]) -> ShellError {
        let stderr = String::from_utf8_lossy(stderr).trim().to_string();
        match status.code() {
            Some(SSH_TRANSPORT_FAILURE) => ShellError::Transport {
                host: self.host.clone(),
                stderr,
            },
            Some(code) => ShellError::NonZeroExit { code, stderr },
            None => ShellError::KilledBySignal,
        }
    }
}

#[async_trait]
impl SecureShell for SshShell {
    async fn exec(&self, command: &str) -> Result<String, ShellError> {
        trace!(host = %self.host, %command, "ssh exec");
        let output = Command::new("ssh")
            .args(self.exec_args(command))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ShellError::Spawn {
                program: "ssh".to_string(),
                source,
            })?;

        if !output.status.success() {
            let err = self.status_error(output.status, &output.stderr);
            debug!(host = %self.host, %command, error = %err, "ssh exec failed");
            return Err(err);
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn forward(
        &self,
        local_port: u16,
        remote_host: &str,
        remote_port: u16,
    ) -> Result<Box<dyn ForwardSession>, ShellError> {
        let args = self.forward_args(local_port, remote_host, remote_port);
        debug!(host = %self.host, ?args, "starting ssh port forward");
        let mut command = Command::new("ssh");
        command.args(&args).stdin(Stdio::null()).kill_on_drop(true);
        // Own process group, so a terminal Ctrl-C reaches only us
        #[cfg(unix)]
        command.process_group(0);
        let child = command.spawn().map_err(|source| ShellError::Spawn {
            program: "ssh".to_string(),
            source,
        })?;
        Ok(Box::new(SshForward {
            host: self.host.clone(),
            child,
        }))
    }
}

/// The `ssh -N -L` child process. Killed when dropped.
struct SshForward {
    host: String,
    child: Child,
}

#[async_trait]
impl ForwardSession for SshForward {
    async fn wait(&mut self) -> Result<(), ShellError> {
        let status = self.child.wait().await?;
        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(ShellError::Transport {
                host: self.host.clone(),
                stderr: format!("port forward exited with code {code}"),
            }),
            None => Err(ShellError::KilledBySignal),
        }
    }

    async fn terminate(&mut self) -> Result<(), ShellError> {
        debug!(host = %self.host, "terminating ssh port forward");
        self.child.kill().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell() -> SshShell {
        SshShell::from_config(&ClusterConfig {
            host: "bouchet".to_string(),
            user: Some("me".to_string()),
            ssh_port: Some(2222),
            ssh_options: vec!["ServerAliveInterval=60".to_string()],
            remote_base: "llm".to_string(),
        })
    }

    #[test]
    fn exec_args_end_with_destination_and_command() {
        let args = shell().exec_args("squeue -h -j 1 -o %T");
        assert_eq!(
            args,
            vec![
                "-p",
                "2222",
                "-o",
                "ServerAliveInterval=60",
                "me@bouchet",
                "squeue -h -j 1 -o %T"
            ]
        );
    }

    #[test]
    fn forward_args_describe_local_forward() {
        let args = shell().forward_args(8000, "gpu042", 27347);
        assert!(args.windows(2).any(|w| w == ["-L", "8000:gpu042:27347"]));
        assert!(args.contains(&"-N".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("me@bouchet"));
    }

    #[test]
    fn quote_path_keeps_home_expansion() {
        assert_eq!(quote_path("~/llm"), "~/llm");
        assert_eq!(quote_path("~/my llm/logs"), "~/'my llm/logs'");
        assert_eq!(quote_path("~"), "~");
        assert_eq!(quote_path("/srv/my llm"), "'/srv/my llm'");
        assert_eq!(quote_path("~other/llm"), "'~other/llm'");
    }

    #[test]
    fn destination_without_user_is_host() {
        let shell = SshShell::new("login");
        assert_eq!(shell.destination(), "login");
        assert_eq!(shell.host(), "login");
        assert!(shell.base_args().is_empty());
    }
}
