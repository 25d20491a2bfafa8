//! Resource monitor
//!
//! Best-effort memory sampling used for admission decisions. A failed OS
//! query yields a zeroed sample; resource checks never abort the run.

use async_trait::async_trait;
use facebatch_core::ResourceSample;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::System;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::debug;

/// Source of resource readings
#[async_trait]
pub trait ResourceProbe: Send + Sync {
    /// Reads current usage; must not fail
    async fn sample(&self) -> ResourceSample;
}

/// Host memory via `sysinfo`, accelerator memory via `nvidia-smi`
pub struct SystemProbe {
    system: Mutex<System>,
    query_accelerator: bool,
}

impl SystemProbe {
    pub fn new(query_accelerator: bool) -> Self {
        Self {
            system: Mutex::new(System::new()),
            query_accelerator,
        }
    }

    fn host_memory(&self) -> (u64, u64) {
        match self.system.lock() {
            Ok(mut system) => {
                system.refresh_memory();
                (system.used_memory(), system.total_memory())
            }
            Err(_) => (0, 0),
        }
    }
}

#[async_trait]
impl ResourceProbe for SystemProbe {
    async fn sample(&self) -> ResourceSample {
        let (used, total) = self.host_memory();
        let accelerator_used_bytes = if self.query_accelerator {
            accelerator_used_bytes().await
        } else {
            None
        };

        ResourceSample {
            used_memory_bytes: used,
            total_memory_bytes: total,
            accelerator_used_bytes,
        }
    }
}

/// Used accelerator memory, summed over all GPUs
async fn accelerator_used_bytes() -> Option<u64> {
    let mut command = Command::new("nvidia-smi");
    command
        .args(["--query-gpu=memory.used", "--format=csv,nounits,noheader"])
        .kill_on_drop(true);

    let output = match tokio::time::timeout(Duration::from_secs(5), command.output()).await {
        Ok(Ok(output)) if output.status.success() => output,
        Ok(Ok(_)) | Ok(Err(_)) | Err(_) => {
            debug!("Accelerator memory query unavailable");
            return None;
        }
    };

    parse_mib_lines(&String::from_utf8_lossy(&output.stdout))
}

/// Parses one MiB value per line into bytes
fn parse_mib_lines(text: &str) -> Option<u64> {
    let values: Vec<f64> = text
        .lines()
        .filter_map(|line| line.trim().parse::<f64>().ok())
        .collect();
    if values.is_empty() {
        return None;
    }
    Some((values.iter().sum::<f64>() * 1024.0 * 1024.0) as u64)
}

/// Samples pressure and waits for it to ease
#[derive(Clone)]
pub struct ResourceMonitor {
    probe: Arc<dyn ResourceProbe>,
    poll_interval: Duration,
}

impl ResourceMonitor {
    pub fn new(probe: Arc<dyn ResourceProbe>, poll_interval: Duration) -> Self {
        Self {
            probe,
            poll_interval,
        }
    }

    pub async fn sample(&self) -> ResourceSample {
        self.probe.sample().await
    }

    /// Polls until memory use drops below `threshold_percent` or `timeout` elapses
    ///
    /// Returns whether the threshold was reached.
    pub async fn wait_until_below(&self, threshold_percent: f64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            let sample = self.sample().await;
            let percent = sample.percent_used();
            if percent < threshold_percent {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            debug!(
                "Memory at {:.1}%, waiting for it to drop below {:.1}%",
                percent, threshold_percent
            );
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! Scripted probes for exercising admission control

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns readings from a list, repeating the last one
    pub struct ScriptedProbe {
        percents: Vec<u64>,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        pub fn new(percents: Vec<u64>) -> Self {
            Self {
                percents,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn constant(percent: u64) -> Self {
            Self::new(vec![percent])
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ResourceProbe for ScriptedProbe {
        async fn sample(&self) -> ResourceSample {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let percent = self
                .percents
                .get(n)
                .or_else(|| self.percents.last())
                .copied()
                .unwrap_or(0);
            ResourceSample {
                used_memory_bytes: percent,
                total_memory_bytes: 100,
                accelerator_used_bytes: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedProbe;
    use super::*;

    #[test]
    fn test_parse_mib_lines() {
        assert_eq!(parse_mib_lines("1024\n"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_mib_lines("512\n512\n"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_mib_lines("No devices were found"), None);
        assert_eq!(parse_mib_lines(""), None);
    }

    #[tokio::test]
    async fn test_wait_returns_true_once_pressure_drops() {
        let probe = Arc::new(ScriptedProbe::new(vec![95, 90, 40]));
        let monitor = ResourceMonitor::new(probe.clone(), Duration::from_millis(5));

        assert!(monitor.wait_until_below(50.0, Duration::from_secs(5)).await);
        assert_eq!(probe.calls(), 3);
    }

    #[tokio::test]
    async fn test_wait_times_out_under_constant_pressure() {
        let probe = Arc::new(ScriptedProbe::constant(99));
        let monitor = ResourceMonitor::new(probe.clone(), Duration::from_millis(10));

        let started = std::time::Instant::now();
        let reached = monitor
            .wait_until_below(50.0, Duration::from_millis(60))
            .await;

        assert!(!reached);
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert!(probe.calls() >= 2);
    }

    #[tokio::test]
    async fn test_system_probe_never_fails() {
        let probe = SystemProbe::new(false);
        let sample = probe.sample().await;
        assert!(sample.used_memory_bytes <= sample.total_memory_bytes);
        assert_eq!(sample.accelerator_used_bytes, None);
    }
}
