//! Job domain types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// One unit of work: a single input artifact to run through the pipeline.
///
/// Created once by the catalog and never mutated after submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// 1-based position in the sorted catalog
    pub id: usize,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Output file name derived from the source and input names
    pub derived_key: String,
}

impl JobDescriptor {
    /// File name of the input artifact, for display
    pub fn input_name(&self) -> String {
        self.input_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.input_path.display().to_string())
    }
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Skipped,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "Pending"),
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Succeeded => write!(f, "Succeeded"),
            JobStatus::Failed => write!(f, "Failed"),
            JobStatus::TimedOut => write!(f, "TimedOut"),
            JobStatus::Skipped => write!(f, "Skipped"),
        }
    }
}

/// Why a job failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The pipeline exited with a non-zero status
    ExternalPipelineError,
    /// The pipeline exited cleanly but no output artifact could be found
    OutputNotCreated,
    /// The pipeline program could not be started
    SpawnFailed,
    /// The run was interrupted and the pipeline was killed
    Cancelled,
    /// The worker running the job was lost
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::ExternalPipelineError => "pipeline error",
            FailureKind::OutputNotCreated => "output not created",
            FailureKind::SpawnFailed => "spawn failed",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal error",
        };
        write!(f, "{}", s)
    }
}

/// Why a job was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Output was already present when the catalog was built
    PreExisting,
    /// Output appeared between cataloging and the job starting
    AlreadyExists,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::PreExisting => write!(f, "pre-existing"),
            SkipReason::AlreadyExists => write!(f, "already-exists"),
        }
    }
}

/// Final result of running one job
///
/// Produced exactly once by the worker that ran the job, consumed once by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success { size_bytes: u64, duration: Duration },
    Skipped(SkipReason),
    Failed { kind: FailureKind, detail: String },
    TimedOut { after: Duration },
}

impl JobOutcome {
    pub fn failed(kind: FailureKind, detail: impl Into<String>) -> Self {
        JobOutcome::Failed {
            kind,
            detail: detail.into(),
        }
    }

    /// Terminal status this outcome maps to
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Success { .. } => JobStatus::Succeeded,
            JobOutcome::Skipped(_) => JobStatus::Skipped,
            JobOutcome::Failed { .. } => JobStatus::Failed,
            JobOutcome::TimedOut { .. } => JobStatus::TimedOut,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success { .. })
    }

    /// Timeouts count as failures in the tally
    pub fn is_failure(&self) -> bool {
        matches!(self, JobOutcome::Failed { .. } | JobOutcome::TimedOut { .. })
    }
}
