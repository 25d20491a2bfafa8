//! Execution service
//!
//! Runs one job through the external pipeline:
//! - Skips the job if its output appeared since cataloging
//! - Spawns the pipeline with a wall-clock timeout
//! - Classifies the exit (timeout, non-zero, missing output)
//! - Recovers an output written to a known alternate location
//! - Removes scratch state on every exit path

use async_trait::async_trait;
use facebatch_core::{
    FailureKind, JobDescriptor, JobOutcome, RunConfiguration, SkipReason, SourceArtifact,
};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::pipeline::build_command;
use super::scratch::{ScratchGuard, ScratchSpace};
use crate::catalog::existing_size;
use crate::shutdown::ShutdownSignal;

/// Characters of diagnostic output kept in a failure detail
const EXCERPT_CHARS: usize = 500;

/// How long to wait for output pipes after the pipeline exits or is killed
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Bytes of each output stream kept while the pipeline runs
const TAIL_BYTES: usize = 4096;

/// Service trait for running a single job
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Runs `job` to a terminal outcome
    ///
    /// Never returns an error: every failure is folded into the outcome.
    async fn run(
        &self,
        source: &SourceArtifact,
        job: &JobDescriptor,
        config: &RunConfiguration,
        timeout: Duration,
        shutdown: ShutdownSignal,
    ) -> JobOutcome;
}

/// Runs jobs as child processes of the configured pipeline program
pub struct StandardExecutionService {
    scratch: Arc<dyn ScratchSpace>,
}

/// How the child process ended
enum Exit {
    Finished(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

impl StandardExecutionService {
    pub fn new(scratch: Arc<dyn ScratchSpace>) -> Self {
        Self { scratch }
    }

    async fn run_inner(
        &self,
        source: &SourceArtifact,
        job: &JobDescriptor,
        config: &RunConfiguration,
        timeout: Duration,
        mut shutdown: ShutdownSignal,
        guard: &ScratchGuard<'_>,
    ) -> JobOutcome {
        let started = Instant::now();

        if config.overwrite_existing {
            discard_output(&job.output_path);
        } else if existing_size(&job.output_path).is_some() {
            debug!("Output for job {} appeared before it started", job.id);
            return JobOutcome::Skipped(SkipReason::AlreadyExists);
        }

        if let Err(e) = self.scratch.prepare(guard.dirs()) {
            return JobOutcome::failed(
                FailureKind::SpawnFailed,
                format!(
                    "could not create scratch dir {}: {}",
                    guard.dirs().temp_dir.display(),
                    e
                ),
            );
        }

        let mut command = build_command(source, job, config, guard.dirs());
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return JobOutcome::failed(
                    FailureKind::SpawnFailed,
                    format!("{}: {}", config.pipeline_program, e),
                );
            }
        };

        info!(
            "Job {} started: {} -> {}",
            job.id,
            job.input_name(),
            job.derived_key
        );

        let group = child.id();
        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        let exit = tokio::select! {
            biased;
            _ = shutdown.triggered() => Exit::Cancelled,
            status = child.wait() => Exit::Finished(status),
            _ = tokio::time::sleep(timeout) => Exit::TimedOut,
        };

        // Helpers the pipeline left behind must not outlive the job: they hold
        // memory and could still write the output or scratch after cleanup.
        kill_group(group, job.id);
        if matches!(exit, Exit::TimedOut | Exit::Cancelled) {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill pipeline for job {}: {}", job.id, e);
            }
        }

        let stdout = collect(stdout).await;
        let stderr = collect(stderr).await;

        let outcome = match exit {
            Exit::TimedOut => {
                warn!("Job {} timed out after {:?}", job.id, timeout);
                JobOutcome::TimedOut { after: timeout }
            }
            Exit::Cancelled => {
                JobOutcome::failed(FailureKind::Cancelled, "interrupted before completion")
            }
            Exit::Finished(Err(e)) => JobOutcome::failed(
                FailureKind::ExternalPipelineError,
                format!("failed waiting for pipeline: {}", e),
            ),
            Exit::Finished(Ok(status)) if !status.success() => {
                let code = status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                JobOutcome::failed(
                    FailureKind::ExternalPipelineError,
                    format!("exit {}: {}", code, excerpt(&stderr, &stdout)),
                )
            }
            Exit::Finished(Ok(_)) => {
                let candidates = fallback_candidates(job, config, &guard.dirs().temp_dir);
                let expected = job.output_path.clone();
                let job_id = job.id;

                // Recovering an output may copy a large file across filesystems.
                let located = tokio::task::spawn_blocking(move || {
                    locate_output(job_id, &expected, candidates)
                })
                .await;

                match located {
                    Ok(Ok(size_bytes)) => JobOutcome::Success {
                        size_bytes,
                        duration: started.elapsed(),
                    },
                    Ok(Err(probed)) => JobOutcome::failed(
                        FailureKind::OutputNotCreated,
                        format!(
                            "looked in {}",
                            probed
                                .iter()
                                .map(|p| p.display().to_string())
                                .collect::<Vec<_>>()
                                .join(", ")
                        ),
                    ),
                    Err(e) => JobOutcome::failed(
                        FailureKind::Internal,
                        format!("output lookup failed: {}", e),
                    ),
                }
            }
        };

        // A partial file left behind would make the next run skip this job.
        if outcome.is_failure() {
            discard_output(&job.output_path);
        }

        outcome
    }
}

#[async_trait]
impl ExecutionService for StandardExecutionService {
    async fn run(
        &self,
        source: &SourceArtifact,
        job: &JobDescriptor,
        config: &RunConfiguration,
        timeout: Duration,
        shutdown: ShutdownSignal,
    ) -> JobOutcome {
        let guard = ScratchGuard::new(self.scratch.as_ref(), job);
        self.run_inner(source, job, config, timeout, shutdown, &guard)
            .await
    }
}

fn spawn_reader<R>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pipe.map(|pipe| tokio::spawn(read_tail(pipe, TAIL_BYTES)))
}

/// Reads a stream to its end, keeping only the last `limit` bytes
async fn read_tail<R>(mut pipe: R, limit: usize) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut tail = VecDeque::with_capacity(limit);
    let mut chunk = [0u8; 1024];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend(&chunk[..n]);
                let excess = tail.len().saturating_sub(limit);
                tail.drain(..excess);
            }
        }
    }
    tail.into()
}

/// Kills every process left in the pipeline's group
#[cfg(unix)]
fn kill_group(group: Option<u32>, job_id: usize) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pgid) = group.and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) => debug!("Killed process group {} of job {}", pgid, job_id),
        Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill process group of job {}: {}", job_id, e),
    }
}

#[cfg(not(unix))]
fn kill_group(_group: Option<u32>, _job_id: usize) {}

/// Collects a pipe, giving up if a surviving grandchild keeps it open
async fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(mut handle) = handle else {
        return String::new();
    };
    match tokio::time::timeout(PIPE_DRAIN_TIMEOUT, &mut handle).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(_)) => String::new(),
        Err(_) => {
            handle.abort();
            String::new()
        }
    }
}

/// Tail of stderr, or of stdout when stderr is empty
fn excerpt(stderr: &str, stdout: &str) -> String {
    let text = if stderr.trim().is_empty() {
        stdout.trim()
    } else {
        stderr.trim()
    };
    if text.is_empty() {
        return "no diagnostic output".to_string();
    }
    let count = text.chars().count();
    if count <= EXCERPT_CHARS {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - EXCERPT_CHARS).collect();
    format!("...{}", tail)
}

/// Finds the output artifact and returns its size
///
/// When the expected path is empty or missing, the candidate locations are
/// probed and a match is moved into place. Returns the probed paths if
/// nothing usable was found.
fn locate_output(
    job_id: usize,
    expected: &Path,
    candidates: Vec<PathBuf>,
) -> Result<u64, Vec<PathBuf>> {
    if let Some(size) = existing_size(expected).filter(|s| *s > 0) {
        return Ok(size);
    }

    let mut probed = vec![expected.to_path_buf()];
    for candidate in candidates {
        if candidate == expected || probed.contains(&candidate) {
            continue;
        }
        if existing_size(&candidate).filter(|s| *s > 0).is_some() {
            match relocate(&candidate, expected) {
                Ok(size) => {
                    info!(
                        "Recovered output for job {} from {}",
                        job_id,
                        candidate.display()
                    );
                    return Ok(size);
                }
                Err(e) => warn!(
                    "Found output at {} but could not move it: {}",
                    candidate.display(),
                    e
                ),
            }
        }
        probed.push(candidate);
    }

    Err(probed)
}

fn fallback_candidates(
    job: &JobDescriptor,
    config: &RunConfiguration,
    temp_dir: &Path,
) -> Vec<PathBuf> {
    let name = job.derived_key.as_str();
    let mut roots = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd);
    }
    roots.push(config.working_dir.clone());
    roots.push(temp_dir.to_path_buf());
    roots.extend(config.fallback_dirs.iter().cloned());
    roots.into_iter().map(|root| root.join(name)).collect()
}

/// Moves a file, copying when a rename crosses filesystems
fn relocate(from: &Path, to: &Path) -> std::io::Result<u64> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if std::fs::rename(from, to).is_err() {
        std::fs::copy(from, to)?;
        std::fs::remove_file(from)?;
    }
    Ok(std::fs::metadata(to)?.len())
}

fn discard_output(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove output {}: {}", path.display(), e),
    }
}
