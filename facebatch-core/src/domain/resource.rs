//! Resource pressure snapshots

use serde::{Deserialize, Serialize};

const GIB: f64 = (1024 * 1024 * 1024) as f64;

/// Point-in-time view of host (and optionally accelerator) memory
///
/// A zeroed sample means the OS query failed; it reads as zero pressure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub used_memory_bytes: u64,
    pub total_memory_bytes: u64,
    pub accelerator_used_bytes: Option<u64>,
}

impl ResourceSample {
    /// Host memory in use as a percentage of total
    pub fn percent_used(&self) -> f64 {
        if self.total_memory_bytes == 0 {
            return 0.0;
        }
        self.used_memory_bytes as f64 / self.total_memory_bytes as f64 * 100.0
    }

    pub fn used_memory_gb(&self) -> f64 {
        self.used_memory_bytes as f64 / GIB
    }

    pub fn total_memory_gb(&self) -> f64 {
        self.total_memory_bytes as f64 / GIB
    }

    pub fn accelerator_used_gb(&self) -> Option<f64> {
        self.accelerator_used_bytes.map(|b| b as f64 / GIB)
    }
}
