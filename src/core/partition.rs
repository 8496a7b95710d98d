use crate::config::PartitionsConfig;
use crate::core::job::JobRequest;
use crate::utils::parse_wall_time;
use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

/// A Slurm partition and the per-job resource ceiling it enforces.
///
/// A missing ceiling means the partition does not clamp that resource.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PartitionConfig {
    /// The string passed to `sbatch --partition`.
    name: String,
    #[serde(default)]
    max_cpus: Option<u32>,
    #[serde(default)]
    max_memory_gb: Option<u32>,
}

impl PartitionConfig {
    pub fn new(name: String, max_cpus: Option<u32>, max_memory_gb: Option<u32>) -> Self {
        Self {
            name,
            max_cpus,
            max_memory_gb,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_cpus(&self) -> Option<u32> {
        self.max_cpus
    }

    pub fn max_memory_gb(&self) -> Option<u32> {
        self.max_memory_gb
    }
}

/// Resolved resources for a single `sbatch` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceAllocation {
    pub partition: String,
    pub cpus: u32,
    pub memory_gb: u32,
    pub gpu_spec: String,
    /// Human-readable notes about values clamped to the partition ceiling.
    pub warnings: Vec<String>,
}

impl ResourceAllocation {
    pub fn memory_spec(&self) -> String {
        format!("{}G", self.memory_gb)
    }
}

/// Chooses a partition and sizes CPU and memory requests for a job.
#[derive(Debug, Clone)]
pub struct PartitionPlanner {
    fast: PartitionConfig,
    standard: PartitionConfig,
    fast_max_gpus: u32,
    fast_max_wall_time: Duration,
    cpus_per_gpu: u32,
    memory_per_gpu_gb: u32,
    gpu_type: Option<String>,
}

impl PartitionPlanner {
    pub fn from_config(config: &PartitionsConfig) -> Result<Self> {
        Ok(Self {
            fast: config.fast.clone(),
            standard: config.standard.clone(),
            fast_max_gpus: config.fast_max_gpus,
            fast_max_wall_time: parse_wall_time(&config.fast_max_wall_time)?,
            cpus_per_gpu: config.cpus_per_gpu,
            memory_per_gpu_gb: config.memory_per_gpu_gb,
            gpu_type: config.gpu_type.clone().filter(|t| !t.is_empty()),
        })
    }

    /// Fast queue only when both the GPU count and the wall time fit its limits.
    pub fn choose(&self, gpus: u32, wall_time: Duration) -> &PartitionConfig {
        if gpus <= self.fast_max_gpus && wall_time <= self.fast_max_wall_time {
            &self.fast
        } else {
            &self.standard
        }
    }

    /// Looks up a partition override among the configured ones. Unknown names
    /// are passed through without a ceiling.
    fn lookup(&self, name: &str) -> PartitionConfig {
        [&self.fast, &self.standard]
            .into_iter()
            .find(|p| p.name() == name)
            .cloned()
            .unwrap_or_else(|| PartitionConfig::new(name.to_string(), None, None))
    }

    pub fn allocate(&self, request: &JobRequest) -> ResourceAllocation {
        let partition = match request.partition() {
            Some(name) => self.lookup(name),
            None => self.choose(request.gpus(), request.wall_time()).clone(),
        };

        let mut warnings = Vec::new();
        let wanted_cpus = request.gpus().saturating_mul(self.cpus_per_gpu);
        let cpus = clamp(wanted_cpus, partition.max_cpus());
        if cpus < wanted_cpus {
            warnings.push(format!(
                "requested {wanted_cpus} CPUs exceeds the {} limit, using {cpus}",
                partition.name()
            ));
        }

        let wanted_memory = request.gpus().saturating_mul(self.memory_per_gpu_gb);
        let memory_gb = clamp(wanted_memory, partition.max_memory_gb());
        if memory_gb < wanted_memory {
            warnings.push(format!(
                "requested {wanted_memory}G memory exceeds the {} limit, using {memory_gb}G",
                partition.name()
            ));
        }

        let gpu_spec = match &self.gpu_type {
            Some(gpu_type) => format!("gpu:{gpu_type}:{}", request.gpus()),
            None => format!("gpu:{}", request.gpus()),
        };

        ResourceAllocation {
            partition: partition.name().to_string(),
            cpus,
            memory_gb,
            gpu_spec,
            warnings,
        }
    }
}

fn clamp(value: u32, ceiling: Option<u32>) -> u32 {
    match ceiling {
        Some(ceiling) => value.min(ceiling),
        None => value,
    }
}
