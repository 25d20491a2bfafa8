//! Runner configuration
//!
//! Builds the `RunConfiguration` from built-in defaults overridden by
//! `FACEBATCH_*` environment variables. CLI flags are applied on top in `main`.

use anyhow::{Context, Result};
use facebatch_core::{ExecutionBackend, RunConfiguration};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Loads configuration from the process environment
///
/// Recognised variables (all optional):
/// - FACEBATCH_SOURCE_DIR, FACEBATCH_INPUT_DIR, FACEBATCH_OUTPUT_DIR
/// - FACEBATCH_WORKING_DIR, FACEBATCH_SCRATCH_ROOT
/// - FACEBATCH_PIPELINE_PROGRAM, FACEBATCH_PIPELINE_ARGS (whitespace separated)
/// - FACEBATCH_FRAME_PROCESSORS (whitespace separated, in stage order)
/// - FACEBATCH_BACKEND (auto, cuda, cpu), FACEBATCH_ENCODER
/// - FACEBATCH_THREADS, FACEBATCH_MAX_MEMORY_GB, FACEBATCH_QUALITY
/// - FACEBATCH_TEMP_FRAME_FORMAT, FACEBATCH_TEMP_FRAME_QUALITY
/// - FACEBATCH_KEEP_FPS, FACEBATCH_MANY_FACES, FACEBATCH_OVERWRITE (true/false)
/// - FACEBATCH_OUTPUT_EXTENSION, FACEBATCH_FRAME_DIR_NAME
/// - FACEBATCH_WORKERS, FACEBATCH_STATUS_EVERY
/// - FACEBATCH_JOB_TIMEOUT, FACEBATCH_ADMISSION_TIMEOUT, FACEBATCH_POLL_INTERVAL (seconds)
/// - FACEBATCH_HIGH_WATER, FACEBATCH_ADMISSION_TARGET (percent)
/// - FACEBATCH_FALLBACK_DIRS (platform path list)
pub fn from_env() -> Result<RunConfiguration> {
    from_lookup(|key| std::env::var(key).ok())
}

/// Builds a configuration from an arbitrary variable lookup
pub fn from_lookup<F>(lookup: F) -> Result<RunConfiguration>
where
    F: Fn(&str) -> Option<String>,
{
    let vars = Vars { lookup };
    let mut config = RunConfiguration::default();

    vars.path("FACEBATCH_SOURCE_DIR", &mut config.source_dir);
    vars.path("FACEBATCH_INPUT_DIR", &mut config.input_dir);
    vars.path("FACEBATCH_OUTPUT_DIR", &mut config.output_dir);
    vars.path("FACEBATCH_WORKING_DIR", &mut config.working_dir);
    vars.path("FACEBATCH_SCRATCH_ROOT", &mut config.scratch_root);

    if let Some(program) = vars.get("FACEBATCH_PIPELINE_PROGRAM") {
        config.pipeline_program = program;
    }
    if let Some(args) = vars.get("FACEBATCH_PIPELINE_ARGS") {
        config.pipeline_args = split_words(&args);
    }
    if let Some(stages) = vars.get("FACEBATCH_FRAME_PROCESSORS") {
        config.frame_processors = split_words(&stages);
    }

    vars.parsed("FACEBATCH_BACKEND", &mut config.execution_backend);
    if let Some(encoder) = vars.get("FACEBATCH_ENCODER") {
        config.output_video_encoder = Some(encoder);
    }
    vars.parsed("FACEBATCH_THREADS", &mut config.execution_threads);
    vars.parsed("FACEBATCH_MAX_MEMORY_GB", &mut config.max_memory_gb);
    vars.parsed("FACEBATCH_QUALITY", &mut config.output_video_quality);
    if let Some(format) = vars.get("FACEBATCH_TEMP_FRAME_FORMAT") {
        config.temp_frame_format = format;
    }
    vars.parsed("FACEBATCH_TEMP_FRAME_QUALITY", &mut config.temp_frame_quality);
    vars.parsed("FACEBATCH_KEEP_FPS", &mut config.keep_fps);
    vars.parsed("FACEBATCH_MANY_FACES", &mut config.many_faces);
    vars.parsed("FACEBATCH_OVERWRITE", &mut config.overwrite_existing);
    if let Some(ext) = vars.get("FACEBATCH_OUTPUT_EXTENSION") {
        config.output_extension = ext.trim_start_matches('.').to_string();
    }
    if let Some(name) = vars.get("FACEBATCH_FRAME_DIR_NAME") {
        config.frame_dir_name = name;
    }

    vars.parsed("FACEBATCH_WORKERS", &mut config.concurrency);
    vars.parsed("FACEBATCH_STATUS_EVERY", &mut config.status_every);
    vars.seconds("FACEBATCH_JOB_TIMEOUT", &mut config.job_timeout);
    vars.seconds("FACEBATCH_ADMISSION_TIMEOUT", &mut config.admission_timeout);
    vars.seconds("FACEBATCH_POLL_INTERVAL", &mut config.poll_interval);
    vars.parsed("FACEBATCH_HIGH_WATER", &mut config.high_water_percent);
    vars.parsed("FACEBATCH_ADMISSION_TARGET", &mut config.admission_target_percent);

    if let Some(dirs) = vars.get("FACEBATCH_FALLBACK_DIRS") {
        config.fallback_dirs = std::env::split_paths(&dirs).collect();
    }

    config
        .validate()
        .context("Configuration from environment is invalid")?;
    Ok(config)
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn path(&self, key: &str, target: &mut PathBuf) {
        if let Some(value) = self.get(key) {
            *target = PathBuf::from(value);
        }
    }

    /// Malformed values keep the default and log a warning
    fn parsed<T>(&self, key: &str, target: &mut T)
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(value) = self.get(key) {
            match value.parse::<T>() {
                Ok(parsed) => *target = parsed,
                Err(e) => warn!("Ignoring {}='{}': {}", key, value, e),
            }
        }
    }

    fn seconds(&self, key: &str, target: &mut Duration) {
        let mut secs = target.as_secs();
        self.parsed(key, &mut secs);
        *target = Duration::from_secs(secs);
    }
}

fn split_words(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

/// Command-line values that take precedence over the environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub workers: Option<usize>,
    pub overwrite: bool,
    pub timeout_secs: Option<u64>,
    pub backend: Option<String>,
}

/// Applies command-line overrides and re-validates
pub fn apply_overrides(config: &mut RunConfiguration, overrides: &Overrides) -> Result<()> {
    if let Some(workers) = overrides.workers {
        config.concurrency = workers;
    }
    if overrides.overwrite {
        config.overwrite_existing = true;
    }
    if let Some(secs) = overrides.timeout_secs {
        config.job_timeout = Duration::from_secs(secs);
    }
    if let Some(backend) = &overrides.backend {
        config.execution_backend = parse_backend(backend)?;
    }

    config
        .validate()
        .context("Invalid command-line options")?;
    Ok(())
}

/// Parses a backend name given on the command line
pub fn parse_backend(value: &str) -> Result<ExecutionBackend> {
    value
        .parse::<ExecutionBackend>()
        .map_err(|e| anyhow::anyhow!("{}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = from_lookup(|_| None).unwrap();
        assert_eq!(config.input_dir, PathBuf::from("inputVideos"));
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.job_timeout, Duration::from_secs(3600));
        assert_eq!(config.poll_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_env_overrides() {
        let config = from_lookup(lookup(&[
            ("FACEBATCH_INPUT_DIR", "/data/in"),
            ("FACEBATCH_WORKERS", "3"),
            ("FACEBATCH_JOB_TIMEOUT", "120"),
            ("FACEBATCH_BACKEND", "cpu"),
            ("FACEBATCH_FRAME_PROCESSORS", "face_enhancer face_swapper face_enhancer"),
            ("FACEBATCH_OUTPUT_EXTENSION", ".mkv"),
            ("FACEBATCH_OVERWRITE", "true"),
        ]))
        .unwrap();

        assert_eq!(config.input_dir, PathBuf::from("/data/in"));
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.job_timeout, Duration::from_secs(120));
        assert_eq!(config.execution_backend, ExecutionBackend::Cpu);
        assert_eq!(
            config.frame_processors,
            vec!["face_enhancer", "face_swapper", "face_enhancer"]
        );
        assert_eq!(config.output_extension, "mkv");
        assert!(config.overwrite_existing);
    }

    #[test]
    fn test_malformed_values_keep_defaults() {
        let config = from_lookup(lookup(&[
            ("FACEBATCH_WORKERS", "many"),
            ("FACEBATCH_BACKEND", "quantum"),
            ("FACEBATCH_JOB_TIMEOUT", "-5"),
        ]))
        .unwrap();

        assert_eq!(config.concurrency, 1);
        assert_eq!(config.execution_backend, ExecutionBackend::Auto);
        assert_eq!(config.job_timeout, Duration::from_secs(3600));
    }

    #[test]
    fn test_cli_overrides_take_precedence() {
        let mut config = from_lookup(lookup(&[("FACEBATCH_WORKERS", "3")])).unwrap();
        apply_overrides(
            &mut config,
            &Overrides {
                workers: Some(2),
                overwrite: true,
                timeout_secs: Some(60),
                backend: Some("gpu".to_string()),
            },
        )
        .unwrap();

        assert_eq!(config.concurrency, 2);
        assert!(config.overwrite_existing);
        assert_eq!(config.job_timeout, Duration::from_secs(60));
        assert_eq!(config.execution_backend, ExecutionBackend::Cuda);
    }

    #[test]
    fn test_bad_cli_values_are_errors() {
        let mut config = RunConfiguration::default();
        let bad_backend = Overrides {
            backend: Some("quantum".to_string()),
            ..Default::default()
        };
        assert!(apply_overrides(&mut config, &bad_backend).is_err());

        let zero_timeout = Overrides {
            timeout_secs: Some(0),
            ..Default::default()
        };
        assert!(apply_overrides(&mut config, &zero_timeout).is_err());
    }

    #[test]
    fn test_invalid_combination_is_rejected() {
        let result = from_lookup(lookup(&[("FACEBATCH_WORKERS", "0")]));
        assert!(result.is_err());
    }
}
