//! Run orchestration for pixel-slicer
//!
//! Validates configuration, spawns the worker pool, queues the initial scan
//! and optionally hands the queue to the directory watcher.

use crate::concurrency::WorkerPlan;
use crate::coordinator::{Coordinator, RunSummary};
use crate::encode::Encoders;
use crate::paths::OutputLayout;
use crate::pool::{JobContext, WorkerPool};
use crate::postprocess::PostProcessor;
use crate::progress::{NoProgress, ProgressObserver};
use crate::queue::job_queue;
use crate::scan::{media_jobs, scan_directory, ScanError};
use crate::upload::{HttpUploader, Uploader};
use crate::watch::{DirectoryWatcher, WatchError};
use pixel_slicer_config::{Config, ValidationError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Fatal errors that end a run.
#[derive(Debug, Error)]
pub enum SlicerError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("Scan failed: {0}")]
    Scan(#[from] ScanError),

    #[error("Scan task failed: {0}")]
    ScanTask(#[from] tokio::task::JoinError),

    #[error("Watcher failed: {0}")]
    Watch(#[from] WatchError),

    #[error("Job queue closed before the scan was queued")]
    QueueClosed,
}

/// A validated pipeline ready to run.
pub struct Slicer {
    config: Arc<Config>,
    plan: WorkerPlan,
    ctx: JobContext,
}

impl Slicer {
    /// Validate `config` and build the default collaborators.
    pub fn new(config: Config) -> Result<Self, SlicerError> {
        let encoders = Encoders::from_config(&config);
        let uploader: Arc<dyn Uploader> = Arc::new(HttpUploader::new(&config.s3));
        Self::with_collaborators(config, encoders, uploader)
    }

    /// Validate `config` and use the given encoders and uploader.
    ///
    /// The uploader is only used when `s3.enabled` is set.
    pub fn with_collaborators(
        mut config: Config,
        encoders: Encoders,
        uploader: Arc<dyn Uploader>,
    ) -> Result<Self, SlicerError> {
        config.validate()?;

        let plan = WorkerPlan::derive(&config.pool);
        let layout = OutputLayout::from_config(&config);
        let uploader = config.s3.enabled.then_some(uploader);
        let post = PostProcessor::new(layout.clone(), uploader, config.fs.move_processed);

        let ctx = JobContext {
            images: config.image_configurations.clone(),
            videos: config.video_configurations.clone(),
            layout,
            encoders,
            post,
            progress: Arc::new(NoProgress),
        };

        Ok(Self {
            config: Arc::new(config),
            plan,
            ctx,
        })
    }

    /// The validated configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn workers(&self) -> u32 {
        self.plan.workers
    }

    /// Report queued and finished jobs to `progress`.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressObserver>) -> Self {
        self.ctx.progress = progress;
        self
    }

    /// Process everything under the input directory.
    ///
    /// Without watch mode the run ends once the scan is processed. With watch
    /// mode it continues until `shutdown` is cancelled. Per-job failures are
    /// counted in the summary; only fatal errors return `Err`.
    ///
    /// # Known limitations
    ///
    /// In watch mode the watcher is registered after the scan has been
    /// queued, so files created between the end of the walk and watch
    /// registration can be missed. Scan and watch results are not deduped:
    /// a file seen by both is dispatched twice and the two jobs race on its
    /// output paths.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<RunSummary, SlicerError> {
        let fs = &self.config.fs;
        let workers = self.plan.workers as usize;

        tracing::info!(
            input = %fs.input_dir.display(),
            output = %fs.output_dir.display(),
            workers,
            watch = fs.watch,
            "Starting run"
        );

        let (jobs_tx, jobs_rx) = job_queue(self.config.pool.queue_capacity);
        let (coordinator, channels) = Coordinator::new(workers);
        let ctx = Arc::new(self.ctx.clone());
        let pool = WorkerPool::spawn(
            workers,
            jobs_rx,
            ctx.clone(),
            channels.errors,
            channels.done,
        );

        // Dropping the sender on error closes the queue so workers exit.
        let root = fs.input_dir.clone();
        let files = tokio::task::spawn_blocking(move || scan_directory(&root)).await??;
        let (jobs, _) = media_jobs(files);
        ctx.progress.jobs_queued(jobs.len() as u64);
        for job in jobs {
            tracing::debug!(job_id = %job.id, file = %job.input, "Queued");
            jobs_tx
                .send(job)
                .await
                .map_err(|_| SlicerError::QueueClosed)?;
        }

        let watcher = if fs.watch {
            let watcher =
                DirectoryWatcher::new(fs.input_dir.clone(), Duration::from_millis(fs.settle_ms))
                    .with_progress(ctx.progress.clone());
            Some(tokio::spawn(watcher.run(jobs_tx, shutdown.clone())))
        } else {
            drop(jobs_tx);
            None
        };

        match coordinator.drive(watcher).await {
            Ok(summary) => {
                pool.join().await;
                Ok(summary)
            }
            Err(e) => {
                shutdown.cancel();
                Err(e.into())
            }
        }
    }
}
