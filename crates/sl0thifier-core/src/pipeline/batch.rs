//! Batch coordinator: discovery, job creation and bounded parallel dispatch.
//!
//! One job per discovered image runs end-to-end on a blocking worker. The
//! number of jobs in flight is bounded by a semaphore sized to
//! `processing.parallel_workers`. Every input yields exactly one outcome,
//! delivered through a callback as it completes, and the run ends with a
//! [`BatchSummary`]. A job's failure never cancels its siblings. When two
//! sources map to the same output file, the later one fails at the output
//! step instead of overwriting the earlier result.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{BatchError, ErrorKind, OutputError};
use crate::job::{Job, JobOptions};
use crate::stage::StageSet;
use crate::types::{BatchSummary, JobFailure, PipelineOutcome, PipelineStep};

use super::cancel::CancellationToken;
use super::discovery::{DiscoveredFile, FileDiscovery};
use super::executor::PipelineExecutor;
use super::registry::StageRegistry;

/// Everything a finished run produced.
#[derive(Debug)]
pub struct BatchReport {
    /// One outcome per discovered image, in discovery order
    pub outcomes: Vec<PipelineOutcome>,
    pub summary: BatchSummary,
}

/// Drives a whole run.
pub struct BatchCoordinator {
    config: Config,
    stages: StageSet,
    cancel: CancellationToken,
}

impl BatchCoordinator {
    pub fn new(config: Config, stages: StageSet) -> Self {
        Self {
            config,
            stages,
            cancel: CancellationToken::new(),
        }
    }

    /// Coordinator with the production adapters for `config`.
    pub fn from_config(config: Config) -> Self {
        let stages = StageSet::from_config(&config);
        Self::new(config, stages)
    }

    /// Token that aborts the run when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Supported images at `input` (a file or a directory).
    pub fn discover(&self, input: &Path) -> Result<Vec<DiscoveredFile>, BatchError> {
        if !input.exists() {
            return Err(BatchError::InputNotFound(input.to_path_buf()));
        }
        Ok(FileDiscovery::new(self.config.processing.clone()).discover(input))
    }

    /// Process every image at `input` with the `options` template.
    ///
    /// Fails before any job runs if the template is invalid, the input is
    /// missing, a mandatory stage is unavailable or the output directory
    /// cannot be created. Otherwise always returns a report.
    pub async fn run<F>(
        &self,
        input: &Path,
        options: &JobOptions,
        on_outcome: F,
    ) -> Result<BatchReport, BatchError>
    where
        F: Fn(&PipelineOutcome) + Send + Sync + 'static,
    {
        let files = self.discover(input)?;
        if files.is_empty() {
            tracing::warn!("No supported images found at {:?}", input);
        }
        self.run_files(&files, options, on_outcome).await
    }

    /// Process an already-discovered list of images.
    pub async fn run_files<F>(
        &self,
        files: &[DiscoveredFile],
        options: &JobOptions,
        on_outcome: F,
    ) -> Result<BatchReport, BatchError>
    where
        F: Fn(&PipelineOutcome) + Send + Sync + 'static,
    {
        let start = Instant::now();
        options.validate()?;

        let registry = Arc::new(StageRegistry::build(&self.stages, options)?);

        let jobs = files
            .iter()
            .map(|file| Job::new(file.path.clone(), options))
            .collect::<Result<Vec<_>, _>>()?;

        if jobs.is_empty() {
            return Ok(BatchReport {
                outcomes: vec![],
                summary: BatchSummary::from_outcomes(&[], start.elapsed()),
            });
        }

        let output_dir = options.resolved_output_dir();
        std::fs::create_dir_all(&output_dir).map_err(|e| BatchError::OutputDir {
            path: output_dir.clone(),
            message: e.to_string(),
        })?;

        let workers = self.config.parallel_workers();
        tracing::info!(
            "Processing {} images with {} workers -> {:?}",
            jobs.len(),
            workers,
            output_dir
        );

        let executor = Arc::new(PipelineExecutor::new(registry.clone(), &self.config));
        let outcomes = self.dispatch(executor, jobs, workers, on_outcome).await;

        registry.release();

        let summary = BatchSummary::from_outcomes(&outcomes, start.elapsed());
        tracing::info!(
            "Batch finished: {} succeeded, {} failed, {} cancelled in {:.1}s",
            summary.succeeded,
            summary.failed,
            summary.cancelled,
            summary.total_seconds
        );
        Ok(BatchReport { outcomes, summary })
    }

    async fn dispatch<F>(
        &self,
        executor: Arc<PipelineExecutor>,
        jobs: Vec<Job>,
        workers: usize,
        on_outcome: F,
    ) -> Vec<PipelineOutcome>
    where
        F: Fn(&PipelineOutcome) + Send + Sync + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let on_outcome = Arc::new(on_outcome);
        let mut slots = Vec::with_capacity(jobs.len());
        let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::with_capacity(jobs.len());

        for job in jobs {
            let output_path = executor.output_path(&job);
            if let Some(first) = claimed.get(&output_path) {
                let err = OutputError::Collision {
                    path: output_path,
                    claimed_by: first.clone(),
                };
                tracing::warn!("Skipping {:?}: {err}", job.source());
                let failure =
                    JobFailure::new(PipelineStep::Output, ErrorKind::Output, err.to_string());
                let outcome = PipelineOutcome::failed(job, failure, vec![]);
                on_outcome(&outcome);
                slots.push(Slot::Done(outcome));
                continue;
            }
            claimed.insert(output_path, job.source().to_path_buf());

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) if !self.cancel.is_cancelled() => permit,
                Ok(_) => {
                    let outcome = PipelineOutcome::cancelled(job, None, vec![]);
                    on_outcome(&outcome);
                    slots.push(Slot::Done(outcome));
                    continue;
                }
                Err(_) => {
                    tracing::warn!("Worker semaphore closed unexpectedly; cancelling remaining jobs");
                    self.cancel.cancel();
                    let outcome = PipelineOutcome::cancelled(job, None, vec![]);
                    on_outcome(&outcome);
                    slots.push(Slot::Done(outcome));
                    continue;
                }
            };

            let executor = executor.clone();
            let cancel = self.cancel.clone();
            let on_outcome = on_outcome.clone();
            let fallback = job.clone();

            let handle = tokio::task::spawn_blocking(move || {
                let outcome = executor.run(job, &cancel);
                drop(permit); // Release worker slot before callback
                on_outcome(&outcome);
                outcome
            });
            slots.push(Slot::Running(fallback, handle));
        }

        let mut outcomes = Vec::with_capacity(slots.len());
        for slot in slots {
            let outcome = match slot {
                Slot::Done(outcome) => outcome,
                Slot::Running(job, handle) => match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!("Worker for {:?} panicked: {e}", job.source());
                        let failure = JobFailure::new(
                            PipelineStep::Worker,
                            ErrorKind::Execution,
                            format!("worker task failed: {e}"),
                        );
                        let outcome = PipelineOutcome::failed(job, failure, vec![]);
                        on_outcome(&outcome);
                        outcome
                    }
                },
            };
            outcomes.push(outcome);
        }
        outcomes
    }
}

/// A job's place in the dispatch order.
enum Slot {
    Done(PipelineOutcome),
    Running(Job, JoinHandle<PipelineOutcome>),
}
