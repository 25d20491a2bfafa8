//! Facebatch
//!
//! Runs one source face against a directory of input videos through an
//! external pipeline, a bounded number of jobs at a time.
//!
//! Architecture:
//! - Configuration: built-in defaults, then `FACEBATCH_*` variables, then flags
//! - Catalog: discovers the source and inputs and derives output names
//! - Monitor: samples host and accelerator memory for admission control
//! - Services: capability discovery, scratch space and job execution
//! - Scheduler: worker pool that harvests outcomes in completion order
//! - Report: per-job lines, final summary and the optional JSON report

mod catalog;
mod config;
mod monitor;
mod report;
mod scheduler;
mod service;
mod shutdown;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use facebatch_core::{ExecutionBackend, JobOutcome, ResultAggregator, SkipReason};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Overrides;
use crate::monitor::{ResourceMonitor, SystemProbe};
use crate::report::{Banner, ConsoleReporter};
use crate::scheduler::WorkerPool;
use crate::service::{
    CapabilitiesService, JobScratchSpace, StandardCapabilitiesService, StandardExecutionService,
};

#[derive(Parser, Debug)]
#[command(name = "facebatch")]
#[command(about = "Batch face swapping over a directory of videos", long_about = None)]
#[command(version)]
struct Cli {
    /// Jobs to run: a 1-based index ("5") or an inclusive range ("3-5")
    range: Option<String>,

    /// Run N jobs at once (2 when given without a value)
    #[arg(short, long, value_name = "N", num_args = 0..=1, default_missing_value = "2")]
    parallel: Option<usize>,

    /// Re-run jobs whose output already exists
    #[arg(long)]
    overwrite: bool,

    /// Per-job wall-clock limit in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Execution backend: auto, cuda or cpu
    #[arg(long, value_name = "B")]
    backend: Option<String>,

    /// Write the final summary as JSON to this path
    #[arg(long, value_name = "PATH", env = "FACEBATCH_REPORT")]
    report: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "facebatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = config::from_env()?;
    config::apply_overrides(
        &mut config,
        &Overrides {
            workers: cli.parallel,
            overwrite: cli.overwrite,
            timeout_secs: cli.timeout,
            backend: cli.backend.clone(),
        },
    )?;

    let capabilities = StandardCapabilitiesService::new();
    config.execution_backend = capabilities
        .resolve_backend(config.execution_backend)
        .await;
    info!(
        "Backend {} (encoder {}), {} worker(s)",
        config.execution_backend,
        config.video_encoder(),
        config.concurrency
    );
    let config = Arc::new(config);

    catalog::ensure_layout(&[
        config.source_dir.as_path(),
        config.input_dir.as_path(),
        config.output_dir.as_path(),
    ])
    .context("Failed to prepare directories")?;

    let catalog = match catalog::discover(
        &config.source_dir,
        &config.input_dir,
        &config.output_dir,
        &config.output_extension,
    ) {
        Ok(catalog) => catalog,
        Err(e) if e.is_missing_artifacts() => {
            error!("{}", e);
            eprintln!("{} {}", "✗".red().bold(), e);
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e).context("Failed to scan directories"),
    };

    let range = catalog::parse_range(cli.range.as_deref());
    let selection = catalog.select(range, config.overwrite_existing);

    let probe = Arc::new(SystemProbe::new(
        config.execution_backend == ExecutionBackend::Cuda,
    ));
    let monitor = ResourceMonitor::new(probe, config.poll_interval);

    report::print_banner(&Banner {
        source: &catalog.source,
        discovered: catalog.jobs.len(),
        selected: selection.len(),
        pre_skipped: &selection.pre_skipped,
        workers: config.concurrency,
        backend: config.execution_backend.as_str(),
        host: monitor.sample().await,
    });

    let mut aggregator = ResultAggregator::new();
    for _ in &selection.pre_skipped {
        aggregator.record(&JobOutcome::Skipped(SkipReason::PreExisting));
    }

    let (trigger, signal) = shutdown::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after running jobs are terminated");
            trigger.trigger();
        }
    });

    let scratch = Arc::new(JobScratchSpace::new(
        config.scratch_root.clone(),
        config.frame_dir_name.clone(),
    ));
    let executor = Arc::new(StandardExecutionService::new(scratch));
    let pool = WorkerPool::new(
        Arc::clone(&config),
        Arc::new(catalog.source.clone()),
        executor,
        monitor,
    );

    let mut reporter = ConsoleReporter;
    let outcome = pool
        .execute(selection.pending, &mut aggregator, &mut reporter, signal)
        .await;

    let summary = aggregator.summary();
    report::print_summary(&summary, report::inventory(&config.output_dir));
    report::print_leftovers(&outcome.results, &outcome.not_started);

    if let Some(path) = &cli.report {
        report::write_report(path, &summary)?;
    }

    Ok(ExitCode::SUCCESS)
}
