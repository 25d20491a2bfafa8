//! Run configuration
//!
//! Resolved once at startup and shared read-only by every worker.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Execution backend passed to the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionBackend {
    /// Resolve at startup by probing for an accelerator
    Auto,
    Cuda,
    Cpu,
}

impl ExecutionBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionBackend::Auto => "auto",
            ExecutionBackend::Cuda => "cuda",
            ExecutionBackend::Cpu => "cpu",
        }
    }

    /// Video encoder that matches the backend
    pub fn default_encoder(&self) -> &'static str {
        match self {
            ExecutionBackend::Cuda => "h264_nvenc",
            _ => "libx264",
        }
    }
}

impl FromStr for ExecutionBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(ExecutionBackend::Auto),
            "cuda" | "gpu" => Ok(ExecutionBackend::Cuda),
            "cpu" => Ok(ExecutionBackend::Cpu),
            other => Err(ConfigError::Invalid(format!(
                "unknown execution backend '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ExecutionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything a run needs to know, fixed before scheduling starts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfiguration {
    /// Directory holding the reference artifact
    pub source_dir: PathBuf,
    /// Directory holding the job inputs
    pub input_dir: PathBuf,
    /// Directory read for skip detection and written with results
    pub output_dir: PathBuf,
    /// Working directory of the pipeline process
    pub working_dir: PathBuf,
    /// Parent of the per-job scratch directories
    pub scratch_root: PathBuf,

    /// Program that runs the pipeline (e.g. `python`)
    pub pipeline_program: String,
    /// Arguments placed before the generated ones (e.g. `run.py`)
    pub pipeline_args: Vec<String>,
    /// Ordered processing stages
    pub frame_processors: Vec<String>,
    pub execution_backend: ExecutionBackend,
    pub execution_threads: u32,
    /// Memory ceiling handed to the pipeline, in GB
    pub max_memory_gb: u32,
    /// Encoder override; derived from the backend when unset
    pub output_video_encoder: Option<String>,
    pub output_video_quality: u32,
    pub temp_frame_format: String,
    pub temp_frame_quality: u32,
    pub keep_fps: bool,
    pub many_faces: bool,
    pub output_extension: String,

    /// Jobs in flight at once
    pub concurrency: usize,
    /// Wall-clock budget for one pipeline invocation
    pub job_timeout: Duration,
    /// Memory percentage above which new submissions wait
    pub high_water_percent: f64,
    /// Memory percentage an admission wait tries to reach
    pub admission_target_percent: f64,
    /// Longest an admission wait may last before proceeding anyway
    pub admission_timeout: Duration,
    /// Resource polling interval during an admission wait
    pub poll_interval: Duration,
    /// Log resource usage every N completions (0 disables)
    pub status_every: usize,

    /// Re-run jobs whose output already exists
    pub overwrite_existing: bool,
    /// Extra roots probed for a misplaced output artifact
    pub fallback_dirs: Vec<PathBuf>,
    /// Name of the frame directory the pipeline creates next to its input
    pub frame_dir_name: String,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("source"),
            input_dir: PathBuf::from("inputVideos"),
            output_dir: PathBuf::from("outputVideos"),
            working_dir: PathBuf::from("."),
            scratch_root: std::env::temp_dir().join("facebatch"),
            pipeline_program: "python".to_string(),
            pipeline_args: vec!["run.py".to_string()],
            frame_processors: vec!["face_swapper".to_string(), "face_enhancer".to_string()],
            execution_backend: ExecutionBackend::Auto,
            execution_threads: 6,
            max_memory_gb: 11,
            output_video_encoder: None,
            output_video_quality: 18,
            temp_frame_format: "png".to_string(),
            temp_frame_quality: 100,
            keep_fps: true,
            many_faces: true,
            output_extension: "mp4".to_string(),
            concurrency: 1,
            job_timeout: Duration::from_secs(3600),
            high_water_percent: 85.0,
            admission_target_percent: 50.0,
            admission_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
            status_every: 5,
            overwrite_existing: false,
            fallback_dirs: Vec::new(),
            frame_dir_name: "temp".to_string(),
        }
    }
}

impl RunConfiguration {
    /// Encoder passed to the pipeline
    pub fn video_encoder(&self) -> &str {
        self.output_video_encoder
            .as_deref()
            .unwrap_or_else(|| self.execution_backend.default_encoder())
    }

    /// Rejects settings the scheduler and runner cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline_program.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "pipeline_program cannot be empty".to_string(),
            ));
        }
        if self.frame_processors.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one frame processor is required".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "concurrency must be greater than 0".to_string(),
            ));
        }
        if self.job_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "job_timeout must be greater than 0".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "poll_interval must be greater than 0".to_string(),
            ));
        }
        let in_range = |p: f64| (0.0..=100.0).contains(&p);
        if !in_range(self.high_water_percent) || !in_range(self.admission_target_percent) {
            return Err(ConfigError::Invalid(
                "memory thresholds must be between 0 and 100".to_string(),
            ));
        }
        if self.admission_target_percent > self.high_water_percent {
            return Err(ConfigError::Invalid(
                "admission target cannot exceed the high-water mark".to_string(),
            ));
        }
        if self.output_extension.is_empty() || self.output_extension.contains('.') {
            return Err(ConfigError::Invalid(
                "output_extension must be a bare extension like 'mp4'".to_string(),
            ));
        }
        Ok(())
    }
}
