//! Worker pool
//!
//! Submits jobs in catalog order, at most `concurrency` at a time, and
//! harvests outcomes in completion order. Each job runs in its own task that
//! owns a semaphore permit for as long as its pipeline process (and scratch
//! cleanup) lasts.

use facebatch_core::{
    FailureKind, JobDescriptor, JobOutcome, ResultAggregator, RunConfiguration, SourceArtifact,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tracing::{debug, info, warn};

use crate::monitor::ResourceMonitor;
use crate::report::ProgressReporter;
use crate::service::ExecutionService;
use crate::shutdown::ShutdownSignal;

type Completion = (JobDescriptor, JobOutcome);

/// Outcomes of one `execute` call
#[derive(Debug, Default)]
pub struct PoolReport {
    /// Every submitted job exactly once, in completion order
    pub results: Vec<Completion>,
    /// Jobs never submitted because the run was interrupted
    pub not_started: Vec<JobDescriptor>,
}

/// Bounded pool of pipeline workers
pub struct WorkerPool {
    config: Arc<RunConfiguration>,
    source: Arc<SourceArtifact>,
    executor: Arc<dyn ExecutionService>,
    monitor: ResourceMonitor,
    semaphore: Arc<Semaphore>,
}

/// Mutable state owned by the harvesting loop
struct Harvest<'a> {
    total: usize,
    completed: usize,
    status_every: usize,
    in_flight: BTreeMap<usize, JobDescriptor>,
    results: Vec<Completion>,
    aggregator: &'a mut ResultAggregator,
    reporter: &'a mut dyn ProgressReporter,
}

impl WorkerPool {
    pub fn new(
        config: Arc<RunConfiguration>,
        source: Arc<SourceArtifact>,
        executor: Arc<dyn ExecutionService>,
        monitor: ResourceMonitor,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            config,
            source,
            executor,
            monitor,
            semaphore,
        }
    }

    /// Runs `jobs` to completion, or until `shutdown` fires
    ///
    /// Outcomes are recorded in `aggregator` and passed to `reporter` as they
    /// arrive. After an interrupt no new job is submitted; the jobs already
    /// running observe the same signal and report `Cancelled`.
    pub async fn execute(
        &self,
        jobs: Vec<JobDescriptor>,
        aggregator: &mut ResultAggregator,
        reporter: &mut dyn ProgressReporter,
        mut shutdown: ShutdownSignal,
    ) -> PoolReport {
        let total = jobs.len();
        info!(
            "Scheduling {} job(s) on {} worker(s)",
            total, self.config.concurrency
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<Completion>();
        let mut harvest = Harvest {
            total,
            completed: 0,
            status_every: self.config.status_every,
            in_flight: BTreeMap::new(),
            results: Vec::with_capacity(total),
            aggregator,
            reporter,
        };

        let mut queue = jobs.into_iter();
        let mut not_started = Vec::new();

        while let Some(job) = queue.next() {
            if shutdown.is_triggered() {
                not_started.push(job);
                break;
            }

            // Wait for a free worker, reporting whatever finishes meanwhile.
            let permit = loop {
                tokio::select! {
                    biased;
                    _ = shutdown.triggered() => break None,
                    Some(done) = rx.recv() => self.harvest(&mut harvest, done).await,
                    permit = self.semaphore.clone().acquire_owned() => break permit.ok(),
                }
            };
            let Some(permit) = permit else {
                not_started.push(job);
                break;
            };

            if !self.admit(&mut harvest, &mut rx, &mut shutdown, &job).await {
                not_started.push(job);
                break;
            }

            harvest.in_flight.insert(job.id, job.clone());
            self.spawn_job(job, permit, tx.clone(), shutdown.clone());
        }
        not_started.extend(queue);

        if !not_started.is_empty() {
            warn!(
                "Interrupted: {} job(s) will not be started",
                not_started.len()
            );
            harvest.aggregator.mark_cancelled();
            harvest.aggregator.record_not_started(not_started.len());
        }

        // Drain: the channel closes once every spawned task has finished.
        drop(tx);
        while let Some(done) = rx.recv().await {
            self.harvest(&mut harvest, done).await;
        }

        // A task that ended without sending (it panicked) still gets an outcome.
        let lost: Vec<JobDescriptor> = std::mem::take(&mut harvest.in_flight)
            .into_values()
            .collect();
        for job in lost {
            warn!("Worker for job {} ended without reporting", job.id);
            let outcome =
                JobOutcome::failed(FailureKind::Internal, "worker ended without an outcome");
            harvest.in_flight.insert(job.id, job.clone());
            self.harvest(&mut harvest, (job, outcome)).await;
        }

        debug!(
            "Pool drained: {} outcome(s), {} not started",
            harvest.results.len(),
            not_started.len()
        );

        PoolReport {
            results: harvest.results,
            not_started,
        }
    }

    /// Holds a submission while memory is above the high-water mark
    ///
    /// Returns false only when interrupted. A wait that times out is logged
    /// and the job is admitted anyway.
    async fn admit(
        &self,
        harvest: &mut Harvest<'_>,
        rx: &mut mpsc::UnboundedReceiver<Completion>,
        shutdown: &mut ShutdownSignal,
        job: &JobDescriptor,
    ) -> bool {
        let sample = self.monitor.sample().await;
        let percent = sample.percent_used();
        if percent <= self.config.high_water_percent {
            return true;
        }

        info!(
            "Memory at {:.1}% before job {}, waiting for it to drop below {:.0}%",
            percent, job.id, self.config.admission_target_percent
        );

        let wait = self.monitor.wait_until_below(
            self.config.admission_target_percent,
            self.config.admission_timeout,
        );
        tokio::pin!(wait);

        let reached = loop {
            tokio::select! {
                biased;
                _ = shutdown.triggered() => return false,
                Some(done) = rx.recv() => self.harvest(harvest, done).await,
                reached = &mut wait => break reached,
            }
        };

        if !reached {
            warn!(
                "Memory still above {:.0}% after {:?}, starting job {} anyway",
                self.config.admission_target_percent, self.config.admission_timeout, job.id
            );
            harvest.aggregator.record_memory_warning();
        }
        true
    }

    fn spawn_job(
        &self,
        job: JobDescriptor,
        permit: OwnedSemaphorePermit,
        tx: mpsc::UnboundedSender<Completion>,
        shutdown: ShutdownSignal,
    ) {
        let executor = Arc::clone(&self.executor);
        let config = Arc::clone(&self.config);
        let source = Arc::clone(&self.source);

        debug!("Submitting job {}", job.id);
        tokio::spawn(async move {
            let outcome = executor
                .run(&source, &job, &config, config.job_timeout, shutdown)
                .await;
            // The slot frees only after the run, scratch cleanup included, is over.
            drop(permit);
            let _ = tx.send((job, outcome));
        });
    }

    /// Single serialization point for counters and reporting
    async fn harvest(&self, harvest: &mut Harvest<'_>, (job, outcome): Completion) {
        if harvest.in_flight.remove(&job.id).is_none() {
            warn!("Ignoring duplicate outcome for job {}", job.id);
            return;
        }

        harvest.completed += 1;
        harvest.aggregator.record(&outcome);
        harvest
            .reporter
            .job_finished(harvest.completed, harvest.total, &job, &outcome);

        if harvest.status_every > 0 && harvest.completed % harvest.status_every == 0 {
            let sample = self.monitor.sample().await;
            harvest.reporter.resource_status(harvest.completed, &sample);
        }

        harvest.results.push((job, outcome));
    }
}
