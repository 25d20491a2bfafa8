//! Console reporting
//!
//! Per-job lines and the final summary go to stdout; diagnostics go through
//! `tracing`.

use anyhow::{Context, Result};
use colored::*;
use facebatch_core::{JobDescriptor, JobOutcome, ResourceSample, SourceArtifact, Summary};
use std::path::Path;
use std::time::Duration;
use tracing::info;

const MIB: f64 = (1024 * 1024) as f64;
const GIB: f64 = (1024 * 1024 * 1024) as f64;

/// Receives progress from the harvesting loop
pub trait ProgressReporter: Send {
    /// A job's outcome arrived; `completed` counts outcomes so far, including this one
    fn job_finished(
        &mut self,
        completed: usize,
        total: usize,
        job: &JobDescriptor,
        outcome: &JobOutcome,
    );

    /// Periodic resource reading
    fn resource_status(&mut self, completed: usize, sample: &ResourceSample);
}

/// Prints coloured lines to stdout
#[derive(Debug, Default)]
pub struct ConsoleReporter;

impl ProgressReporter for ConsoleReporter {
    fn job_finished(
        &mut self,
        completed: usize,
        total: usize,
        job: &JobDescriptor,
        outcome: &JobOutcome,
    ) {
        println!("{}", outcome_line(completed, total, job, outcome));
    }

    fn resource_status(&mut self, completed: usize, sample: &ResourceSample) {
        match sample.accelerator_used_gb() {
            Some(gpu) => info!(
                "Status after {} job(s): RAM {:.1}/{:.1} GB ({:.0}%), GPU {:.1} GB",
                completed,
                sample.used_memory_gb(),
                sample.total_memory_gb(),
                sample.percent_used(),
                gpu
            ),
            None => info!(
                "Status after {} job(s): RAM {:.1}/{:.1} GB ({:.0}%)",
                completed,
                sample.used_memory_gb(),
                sample.total_memory_gb(),
                sample.percent_used()
            ),
        }
    }
}

/// `[n/total] <mark> <name> <detail>`
pub fn outcome_line(
    completed: usize,
    total: usize,
    job: &JobDescriptor,
    outcome: &JobOutcome,
) -> String {
    let counter = format!("[{}/{}]", completed, total).dimmed();
    let name = job.input_name();

    match outcome {
        JobOutcome::Success {
            size_bytes,
            duration,
        } => format!(
            "{} {} {} ({:.1} MB) - {}",
            counter,
            "✓".green().bold(),
            name.green(),
            *size_bytes as f64 / MIB,
            format_duration(*duration)
        ),
        JobOutcome::Skipped(reason) => format!(
            "{} {} {} ({})",
            counter,
            "⏭".yellow(),
            name.yellow(),
            reason
        ),
        JobOutcome::Failed { kind, detail } => format!(
            "{} {} {} - {}: {}",
            counter,
            "✗".red().bold(),
            name.red(),
            kind,
            detail
        ),
        JobOutcome::TimedOut { after } => format!(
            "{} {} {} - timed out after {}",
            counter,
            "✗".red().bold(),
            name.red(),
            format_duration(*after)
        ),
    }
}

/// What the run is about to do
pub struct Banner<'a> {
    pub source: &'a SourceArtifact,
    pub discovered: usize,
    pub selected: usize,
    pub pre_skipped: &'a [(JobDescriptor, u64)],
    pub workers: usize,
    pub backend: &'a str,
    pub host: ResourceSample,
}

pub fn print_banner(banner: &Banner<'_>) {
    println!("{}", "Batch plan".bold());
    println!("  Source:      {}", banner.source.file_name().cyan());
    println!("  Discovered:  {}", banner.discovered);
    println!("  Selected:    {}", banner.selected);
    println!(
        "  To process:  {}",
        (banner.selected - banner.pre_skipped.len()).to_string().bold()
    );
    println!("  Workers:     {}", banner.workers);
    println!("  Backend:     {}", banner.backend);
    println!(
        "  Host RAM:    {:.1} GB ({:.0}% in use)",
        banner.host.total_memory_gb(),
        banner.host.percent_used()
    );

    if !banner.pre_skipped.is_empty() {
        println!(
            "  {} {} output(s) already present:",
            "⏭".yellow(),
            banner.pre_skipped.len()
        );
        for (job, size) in banner.pre_skipped {
            println!(
                "    {} ({:.1} MB)",
                job.derived_key.dimmed(),
                *size as f64 / MIB
            );
        }
    }
    println!();
}

/// Files and bytes currently in a directory (non-recursive)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Inventory {
    pub files: usize,
    pub bytes: u64,
}

pub fn inventory(dir: &Path) -> Inventory {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Inventory::default();
    };

    entries
        .filter_map(|entry| entry.ok()?.metadata().ok())
        .filter(|meta| meta.is_file())
        .fold(Inventory::default(), |acc, meta| Inventory {
            files: acc.files + 1,
            bytes: acc.bytes + meta.len(),
        })
}

pub fn print_summary(summary: &Summary, output: Inventory) {
    println!();
    if summary.cancelled {
        println!("{}", "Run interrupted, partial results:".yellow().bold());
    } else {
        println!("{}", "Run complete".bold());
    }

    println!("  {} Succeeded: {}", "✓".green(), summary.succeeded);
    println!("  {} Skipped:   {}", "⏭".yellow(), summary.skipped);
    if summary.timed_out > 0 {
        println!(
            "  {} Failed:    {} ({} timed out)",
            "✗".red(),
            summary.failed,
            summary.timed_out
        );
    } else {
        println!("  {} Failed:    {}", "✗".red(), summary.failed);
    }
    if summary.not_started > 0 {
        println!("  Not started: {}", summary.not_started);
    }
    if summary.memory_warnings > 0 {
        println!(
            "  {} memory pressure warning(s)",
            summary.memory_warnings.to_string().yellow()
        );
    }

    println!(
        "  Produced:  {} file(s), {:.2} GB",
        summary.produced_files,
        summary.produced_bytes as f64 / GIB
    );
    println!(
        "  Output dir: {} file(s), {:.2} GB",
        output.files,
        output.bytes as f64 / GIB
    );
    println!(
        "  Started:   {}",
        summary
            .started_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
    );
    println!("  Elapsed:   {}", format_duration(summary.elapsed()));
    if let Some(avg) = summary.avg_ms_per_success {
        println!(
            "  Average:   {} per success",
            format_duration(Duration::from_millis(avg as u64))
        );
    }
}

/// Names the jobs a later run will pick up again
pub fn print_leftovers(results: &[(JobDescriptor, JobOutcome)], not_started: &[JobDescriptor]) {
    for line in leftover_lines(results, not_started) {
        println!("{}", line);
    }
}

fn leftover_lines(
    results: &[(JobDescriptor, JobOutcome)],
    not_started: &[JobDescriptor],
) -> Vec<String> {
    let mut lines = Vec::new();

    let failed: Vec<String> = results
        .iter()
        .filter(|(_, outcome)| outcome.is_failure())
        .map(|(job, _)| job.input_name())
        .collect();
    if !failed.is_empty() {
        lines.push(format!("  {} Retry next run: {}", "✗".red(), failed.join(", ")));
    }

    if !not_started.is_empty() {
        let names: Vec<String> = not_started.iter().map(JobDescriptor::input_name).collect();
        lines.push(format!("  Not started: {}", names.join(", ").dimmed()));
    }
    lines
}

/// Writes the summary as pretty JSON
pub fn write_report(path: &Path, summary: &Summary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary).context("Failed to serialize summary")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    info!("Summary written to {}", path.display());
    Ok(())
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m{:02}s", secs / 3600, secs % 3600 / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Keeps everything it was told, in order
    #[derive(Debug, Default)]
    pub struct RecordingReporter {
        pub finished: Vec<(usize, usize, JobDescriptor, JobOutcome)>,
        pub statuses: Vec<usize>,
    }

    impl RecordingReporter {
        pub fn finished_ids(&self) -> Vec<usize> {
            self.finished.iter().map(|(_, _, job, _)| job.id).collect()
        }
    }

    impl ProgressReporter for RecordingReporter {
        fn job_finished(
            &mut self,
            completed: usize,
            total: usize,
            job: &JobDescriptor,
            outcome: &JobOutcome,
        ) {
            self.finished
                .push((completed, total, job.clone(), outcome.clone()));
        }

        fn resource_status(&mut self, completed: usize, _sample: &ResourceSample) {
            self.statuses.push(completed);
        }
    }
}
