use crate::core::get_config_dir;
use crate::core::partition::PartitionConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Deserialize, Debug, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub partitions: PartitionsConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ClusterConfig {
    /// ssh destination of the login node (host name or `~/.ssh/config` alias)
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub ssh_port: Option<u16>,
    /// Extra `-o` options passed to every ssh invocation
    #[serde(default = "default_ssh_options")]
    pub ssh_options: Vec<String>,
    /// Remote directory holding the batch scripts and the `logs/` directory
    #[serde(default = "default_remote_base")]
    pub remote_base: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            user: None,
            ssh_port: None,
            ssh_options: default_ssh_options(),
            remote_base: default_remote_base(),
        }
    }
}

fn default_host() -> String {
    "login".to_string()
}

fn default_ssh_options() -> Vec<String> {
    vec![
        "ServerAliveInterval=60".to_string(),
        "ExitOnForwardFailure=yes".to_string(),
    ]
}

fn default_remote_base() -> String {
    "llmtunnel".to_string()
}

#[derive(Deserialize, Debug, Clone)]
pub struct PartitionsConfig {
    #[serde(default = "default_fast_partition")]
    pub fast: PartitionConfig,
    #[serde(default = "default_standard_partition")]
    pub standard: PartitionConfig,
    /// Largest GPU count still eligible for the fast partition
    #[serde(default = "default_fast_max_gpus")]
    pub fast_max_gpus: u32,
    /// Longest wall time still eligible for the fast partition (Slurm time format)
    #[serde(default = "default_fast_max_wall_time")]
    pub fast_max_wall_time: String,
    #[serde(default = "default_cpus_per_gpu")]
    pub cpus_per_gpu: u32,
    #[serde(default = "default_memory_per_gpu_gb")]
    pub memory_per_gpu_gb: u32,
    /// Optional GPU model for the gres spec, e.g. `h200` gives `gpu:h200:<n>`
    #[serde(default)]
    pub gpu_type: Option<String>,
}

impl Default for PartitionsConfig {
    fn default() -> Self {
        Self {
            fast: default_fast_partition(),
            standard: default_standard_partition(),
            fast_max_gpus: default_fast_max_gpus(),
            fast_max_wall_time: default_fast_max_wall_time(),
            cpus_per_gpu: default_cpus_per_gpu(),
            memory_per_gpu_gb: default_memory_per_gpu_gb(),
            gpu_type: None,
        }
    }
}

fn default_fast_partition() -> PartitionConfig {
    PartitionConfig::new("gpu_devel".to_string(), Some(16), Some(128))
}

fn default_standard_partition() -> PartitionConfig {
    PartitionConfig::new("gpu".to_string(), Some(64), Some(512))
}

fn default_fast_max_gpus() -> u32 {
    2
}

fn default_fast_max_wall_time() -> String {
    "06:00:00".to_string()
}

fn default_cpus_per_gpu() -> u32 {
    8
}

fn default_memory_per_gpu_gb() -> u32 {
    64
}

#[derive(Deserialize, Debug, Clone)]
pub struct PollingConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
    #[serde(default = "default_connection_retry_secs")]
    pub connection_retry_secs: u64,
    #[serde(default = "default_connection_max_attempts")]
    pub connection_max_attempts: u32,
    /// Lines of the remote error log shown when a job fails
    #[serde(default = "default_diagnostic_lines")]
    pub diagnostic_lines: u32,
}

impl PollingConfig {
    pub fn state_policy(&self) -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(self.interval_secs), self.max_polls)
    }

    pub fn connection_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.connection_retry_secs),
            self.connection_max_attempts,
        )
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_polls: default_max_polls(),
            connection_retry_secs: default_connection_retry_secs(),
            connection_max_attempts: default_connection_max_attempts(),
            diagnostic_lines: default_diagnostic_lines(),
        }
    }
}

fn default_interval_secs() -> u64 {
    10
}

fn default_max_polls() -> u32 {
    360
}

fn default_connection_retry_secs() -> u64 {
    5
}

fn default_connection_max_attempts() -> u32 {
    60
}

fn default_diagnostic_lines() -> u32 {
    40
}

/// Fixed-interval retry budget for the polling loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

fn default_max_output_tokens() -> u64 {
    4096
}

pub fn load_config(config_path: Option<&PathBuf>) -> Result<Config, config::ConfigError> {
    let mut config_vec = vec![];

    // User-provided config file
    if let Some(config_path) = config_path {
        if config_path.exists() {
            config_vec.push(config_path.clone());
        } else {
            tracing::warn!("Config file {config_path:?} not found.");
        }
    }

    // Default config file
    if let Ok(default_config_path) = get_config_dir().map(|d| d.join("llmtunnel.toml")) {
        if default_config_path.exists() {
            config_vec.push(default_config_path);
        }
    }

    // Earlier sources have lower priority, so the explicit file goes last
    let settings = config::Config::builder();
    let settings = config_vec.iter().rev().fold(settings, |s, path| {
        s.add_source(config::File::from(path.as_path()))
    });

    settings
        .add_source(
            config::Environment::with_prefix("LLMTUNNEL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("cluster.ssh_options"),
        )
        .build()?
        .try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.partitions.fast_max_gpus, 2);
        assert_eq!(config.partitions.fast_max_wall_time, "06:00:00");
        assert_eq!(config.polling.state_policy().interval, Duration::from_secs(10));
        assert_eq!(config.chat.max_output_tokens, 4096);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[cluster]
host = "bouchet"
remote_base = "/home/me/llm"

[partitions]
gpu_type = "h200"

[partitions.fast]
name = "gpu_h200_devel"
max_cpus = 8

[polling]
max_polls = 5
"#
        )
        .unwrap();

        let config = load_config(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.cluster.host, "bouchet");
        assert_eq!(config.cluster.remote_base, "/home/me/llm");
        assert_eq!(config.partitions.fast.name(), "gpu_h200_devel");
        assert_eq!(config.partitions.fast.max_cpus(), Some(8));
        assert_eq!(config.partitions.fast.max_memory_gb(), None);
        assert_eq!(config.partitions.standard.name(), "gpu");
        assert_eq!(config.partitions.gpu_type.as_deref(), Some("h200"));
        assert_eq!(config.polling.max_polls, 5);
        assert_eq!(config.polling.interval_secs, 10);
    }

    #[test]
    fn test_env_overrides_file_and_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[chat]\nmax_output_tokens = 100").unwrap();

        std::env::set_var("LLMTUNNEL_CHAT__MAX_OUTPUT_TOKENS", "777");
        let config = load_config(Some(&file.path().to_path_buf()));
        std::env::remove_var("LLMTUNNEL_CHAT__MAX_OUTPUT_TOKENS");

        assert_eq!(config.unwrap().chat.max_output_tokens, 777);
    }

    #[test]
    fn test_retry_policy_needs_one_attempt() {
        assert_eq!(RetryPolicy::new(Duration::ZERO, 0).max_attempts, 1);
    }
}
