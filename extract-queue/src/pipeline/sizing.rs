//! Worker pool sizing from accelerator memory.
//!
//! One worker per `gpu_mem_per_worker` bytes of device memory, never fewer
//! than one. The value is computed once at startup and assumes this service
//! is the only user of the GPU; nothing enforces that.

use process_utils::std_command;
use tracing::{debug, info};

/// Reports the total memory of the accelerator, if there is one.
pub trait DeviceMemoryProbe: Send + Sync {
    /// Total device memory in bytes, or `None` when no accelerator is present.
    fn total_memory_bytes(&self) -> Option<u64>;
}

/// Probe that queries the first NVIDIA GPU through `nvidia-smi`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NvidiaSmiProbe;

impl DeviceMemoryProbe for NvidiaSmiProbe {
    fn total_memory_bytes(&self) -> Option<u64> {
        let output = std_command("nvidia-smi")
            .args(["--query-gpu=memory.total", "--format=csv,noheader,nounits"])
            .output()
            .ok()?;

        if !output.status.success() {
            debug!("nvidia-smi exited with {}", output.status);
            return None;
        }

        parse_nvidia_smi_memory(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Probe with a fixed answer, for configuration overrides and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub Option<u64>);

impl DeviceMemoryProbe for FixedProbe {
    fn total_memory_bytes(&self) -> Option<u64> {
        self.0
    }
}

/// Parse the first line of `nvidia-smi --query-gpu=memory.total` (MiB) into bytes.
fn parse_nvidia_smi_memory(stdout: &str) -> Option<u64> {
    let mib = stdout.lines().next()?.trim().parse::<u64>().ok()?;
    mib.checked_mul(1024 * 1024)
}

/// Number of workers the device can hold.
pub fn worker_count(probe: &dyn DeviceMemoryProbe, gpu_mem_per_worker: u64) -> usize {
    let Some(total) = probe.total_memory_bytes() else {
        info!("No accelerator detected, using a single worker");
        return 1;
    };

    let count = total
        .checked_div(gpu_mem_per_worker)
        .map(|n| usize::try_from(n).unwrap_or(usize::MAX))
        .unwrap_or(1)
        .max(1);

    info!(
        device_memory_bytes = total,
        gpu_mem_per_worker, count, "Sized worker pool from device memory"
    );
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    const GB: u64 = 1_000_000_000;

    #[test]
    fn test_no_accelerator_means_one_worker() {
        assert_eq!(worker_count(&FixedProbe(None), 4 * GB), 1);
    }

    #[test]
    fn test_never_zero_workers() {
        assert_eq!(worker_count(&FixedProbe(Some(0)), 4 * GB), 1);
        assert_eq!(worker_count(&FixedProbe(Some(3 * GB)), 4 * GB), 1);
        assert_eq!(worker_count(&FixedProbe(Some(16 * GB)), 0), 1);
    }

    #[test]
    fn test_floor_division() {
        assert_eq!(worker_count(&FixedProbe(Some(16 * GB)), 4 * GB), 4);
        assert_eq!(worker_count(&FixedProbe(Some(24 * GB - 1)), 4 * GB), 5);
    }

    #[test]
    fn test_parse_nvidia_smi() {
        assert_eq!(
            parse_nvidia_smi_memory("16384\n24576\n"),
            Some(16384 * 1024 * 1024)
        );
        assert_eq!(parse_nvidia_smi_memory(" 8192 \n"), Some(8192 * 1024 * 1024));
        assert_eq!(parse_nvidia_smi_memory("[N/A]\n"), None);
        assert_eq!(parse_nvidia_smi_memory(""), None);
    }
}
