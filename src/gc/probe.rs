use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

use super::GcError;

/// Process memory figures taken at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemorySample {
    pub rss_bytes: u64,
    pub total_bytes: u64,
    pub percent_of_total: f64,
}

impl MemorySample {
    pub fn new(rss_bytes: u64, total_bytes: u64) -> Result<Self, GcError> {
        if total_bytes == 0 {
            return Err(GcError::Sampling("total memory reported as zero".to_string()));
        }
        Ok(Self {
            rss_bytes,
            total_bytes,
            percent_of_total: rss_bytes as f64 * 100.0 / total_bytes as f64,
        })
    }

    pub fn rss_mb(&self) -> f64 {
        self.rss_bytes as f64 / 1_000_000.0
    }
}

/// Abstraction for reading process memory, injectable for testing.
pub trait MemoryProbe: Send + Sync {
    fn sample(&self) -> Result<MemorySample, GcError>;
}

/// Reads the current process RSS and total system memory through `sysinfo`.
#[derive(Debug, Default)]
pub struct SysinfoProbe;

impl MemoryProbe for SysinfoProbe {
    fn sample(&self) -> Result<MemorySample, GcError> {
        let pid = sysinfo::get_current_pid().map_err(|e| GcError::Sampling(e.to_string()))?;

        let mut system = System::new();
        system.refresh_memory();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );

        let process = system
            .process(pid)
            .ok_or_else(|| GcError::Sampling(format!("process {} not found", pid)))?;

        MemorySample::new(process.memory(), system.total_memory())
    }
}

/// Probe backed by a closure.
pub struct FnProbe {
    sample_fn: Box<dyn Fn() -> Result<MemorySample, GcError> + Send + Sync>,
}

impl FnProbe {
    pub fn new(sample_fn: impl Fn() -> Result<MemorySample, GcError> + Send + Sync + 'static) -> Self {
        Self {
            sample_fn: Box::new(sample_fn),
        }
    }
}

impl MemoryProbe for FnProbe {
    fn sample(&self) -> Result<MemorySample, GcError> {
        (self.sample_fn)()
    }
}
