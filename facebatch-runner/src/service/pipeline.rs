//! External pipeline invocation
//!
//! Builds the child process for one job. The pipeline is a black box: it
//! gets a fixed parameter set and is expected to write exactly one file at
//! the output path.

use facebatch_core::{ExecutionBackend, JobDescriptor, RunConfiguration, SourceArtifact};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use super::scratch::ScratchDirs;

/// Generated arguments, appended after `pipeline_args`
pub fn pipeline_arguments(
    source: &SourceArtifact,
    job: &JobDescriptor,
    config: &RunConfiguration,
) -> Vec<String> {
    let backend = match config.execution_backend {
        ExecutionBackend::Auto => ExecutionBackend::Cpu,
        other => other,
    };

    let mut args = vec![
        "-s".to_string(),
        absolute(&source.path),
        "-t".to_string(),
        absolute(&job.input_path),
        "-o".to_string(),
        absolute(&job.output_path),
        "--frame-processor".to_string(),
    ];
    args.extend(config.frame_processors.iter().cloned());
    args.push("--execution-provider".to_string());
    args.push(backend.as_str().to_string());

    if config.keep_fps {
        args.push("--keep-fps".to_string());
    }
    if config.many_faces {
        args.push("--many-faces".to_string());
    }

    args.extend([
        "--max-memory".to_string(),
        config.max_memory_gb.to_string(),
        "--execution-threads".to_string(),
        config.execution_threads.to_string(),
        "--output-video-encoder".to_string(),
        config.video_encoder().to_string(),
        "--output-video-quality".to_string(),
        config.output_video_quality.to_string(),
        "--temp-frame-format".to_string(),
        config.temp_frame_format.clone(),
        "--temp-frame-quality".to_string(),
        config.temp_frame_quality.to_string(),
    ]);

    args
}

/// Child process for one job, with piped output and a private temp directory
pub fn build_command(
    source: &SourceArtifact,
    job: &JobDescriptor,
    config: &RunConfiguration,
    scratch: &ScratchDirs,
) -> Command {
    let mut command = Command::new(&config.pipeline_program);
    command
        .args(&config.pipeline_args)
        .args(pipeline_arguments(source, job, config))
        .current_dir(&config.working_dir)
        .env("TMPDIR", &scratch.temp_dir)
        .env("TEMP", &scratch.temp_dir)
        .env("TMP", &scratch.temp_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Own process group, so the pipeline and its helpers can be killed together
    // and a terminal Ctrl-C reaches only this process.
    #[cfg(unix)]
    command.process_group(0);

    command
}

/// Paths are made absolute because the pipeline runs in its own working directory
fn absolute(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}
