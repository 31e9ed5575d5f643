//! Worker pool sizing.

use pixel_slicer_config::PoolConfig;

/// Pool size derived from configuration and the host's core count.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerPlan {
    /// Logical CPU cores detected
    pub logical_cores: u32,
    /// Number of workers to spawn
    pub workers: u32,
}

impl WorkerPlan {
    /// Derive the pool size, detecting cores with num_cpus.
    pub fn derive(cfg: &PoolConfig) -> Self {
        Self::derive_for_cores(cfg, num_cpus::get() as u32)
    }

    /// Explicit `workers` wins; otherwise half the cores, at least one.
    pub fn derive_for_cores(cfg: &PoolConfig, logical_cores: u32) -> Self {
        let workers = if cfg.workers > 0 {
            cfg.workers
        } else {
            derive_workers(logical_cores)
        };

        Self {
            logical_cores,
            workers,
        }
    }
}

fn derive_workers(cores: u32) -> u32 {
    (cores / 2).max(1)
}
