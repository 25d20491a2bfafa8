//! Capabilities service
//!
//! Decides which execution backend the pipeline should use. Discovery is
//! best-effort: any failure resolves to the CPU backend.

use async_trait::async_trait;
use facebatch_core::ExecutionBackend;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Service trait for accelerator discovery
#[async_trait]
pub trait CapabilitiesService: Send + Sync {
    /// Whether an accelerated backend is usable on this host
    async fn accelerator_available(&self) -> bool;

    /// Resolves `Auto` to a concrete backend; explicit choices pass through
    async fn resolve_backend(&self, requested: ExecutionBackend) -> ExecutionBackend {
        match requested {
            ExecutionBackend::Auto => {
                if self.accelerator_available().await {
                    ExecutionBackend::Cuda
                } else {
                    ExecutionBackend::Cpu
                }
            }
            explicit => explicit,
        }
    }
}

/// Probes for NVIDIA GPUs with `nvidia-smi -L`
pub struct StandardCapabilitiesService {
    probe_program: String,
}

impl StandardCapabilitiesService {
    pub fn new() -> Self {
        Self::with_probe("nvidia-smi")
    }

    /// Uses a different probe binary; it must print one `GPU ...` line per device
    pub fn with_probe(program: impl Into<String>) -> Self {
        Self {
            probe_program: program.into(),
        }
    }
}

impl Default for StandardCapabilitiesService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilitiesService for StandardCapabilitiesService {
    async fn accelerator_available(&self) -> bool {
        let mut command = Command::new(&self.probe_program);
        command.arg("-L").kill_on_drop(true);

        match tokio::time::timeout(PROBE_TIMEOUT, command.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                let listing = String::from_utf8_lossy(&output.stdout);
                let gpus = listing
                    .lines()
                    .filter(|line| line.trim_start().starts_with("GPU"))
                    .count();
                info!("Detected {} accelerator(s)", gpus);
                gpus > 0
            }
            Ok(Ok(output)) => {
                debug!("Accelerator probe exited with {}", output.status);
                false
            }
            Ok(Err(e)) => {
                debug!("Accelerator probe unavailable: {}", e);
                false
            }
            Err(_) => {
                debug!("Accelerator probe timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(bool);

    #[async_trait]
    impl CapabilitiesService for Fixed {
        async fn accelerator_available(&self) -> bool {
            self.0
        }
    }

    #[tokio::test]
    async fn test_auto_resolves_from_probe() {
        assert_eq!(
            Fixed(true).resolve_backend(ExecutionBackend::Auto).await,
            ExecutionBackend::Cuda
        );
        assert_eq!(
            Fixed(false).resolve_backend(ExecutionBackend::Auto).await,
            ExecutionBackend::Cpu
        );
    }

    #[tokio::test]
    async fn test_explicit_backend_passes_through() {
        assert_eq!(
            Fixed(false).resolve_backend(ExecutionBackend::Cuda).await,
            ExecutionBackend::Cuda
        );
        assert_eq!(
            Fixed(true).resolve_backend(ExecutionBackend::Cpu).await,
            ExecutionBackend::Cpu
        );
    }

    #[tokio::test]
    async fn test_missing_probe_degrades_to_cpu() {
        let service = StandardCapabilitiesService::with_probe("/nonexistent/nvidia-smi");
        assert!(!service.accelerator_available().await);
        assert_eq!(
            service.resolve_backend(ExecutionBackend::Auto).await,
            ExecutionBackend::Cpu
        );
    }
}
