//! Worker pool consuming the job queue.
//!
//! Each worker takes jobs until the queue is closed and drained, encodes
//! them on the blocking thread pool, hands successful results to
//! post-processing and reports failures on the error channel. Every finished
//! job, failed or not, is reported to the [`ProgressObserver`]. On exit every
//! worker sends exactly one [`WorkerDone`].

use crate::encode::{EncodeError, Encoders, OutputFailure, WorkResult};
use crate::jobs::{InputFile, Job};
use crate::paths::OutputLayout;
use crate::postprocess::{PostProcessError, PostProcessor};
use crate::progress::ProgressObserver;
use crate::queue::JobReceiver;
use pixel_slicer_config::{ImageConfiguration, VideoConfiguration};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Read-only state shared by every worker.
#[derive(Clone)]
pub struct JobContext {
    pub images: Vec<ImageConfiguration>,
    pub videos: Vec<VideoConfiguration>,
    pub layout: OutputLayout,
    pub encoders: Encoders,
    pub post: PostProcessor,
    pub progress: Arc<dyn ProgressObserver>,
}

/// A job that did not complete.
#[derive(Debug, Error)]
pub enum JobFailure {
    /// At least one output failed; `produced` lists the ones that did not.
    #[error("{input}: {count} output(s) failed", count = .failures.len())]
    EncodeFailed {
        input: InputFile,
        produced: Vec<PathBuf>,
        failures: Vec<OutputFailure>,
    },

    #[error("{input}: {source}")]
    PostProcess {
        input: InputFile,
        #[source]
        source: PostProcessError,
    },
}

impl JobFailure {
    pub fn input(&self) -> &InputFile {
        match self {
            JobFailure::EncodeFailed { input, .. } | JobFailure::PostProcess { input, .. } => input,
        }
    }
}

/// Completion signal sent once by each worker as it exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerDone {
    pub worker: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Encode and post-process a single job.
pub async fn process_job(job: Job, ctx: &Arc<JobContext>) -> Result<Vec<PathBuf>, JobFailure> {
    tracing::info!(job_id = %job.id, file = %job.input, kind = %job.kind, "Processing");

    let encode_ctx = Arc::clone(ctx);
    let encode_job = job.clone();
    let result = tokio::task::spawn_blocking(move || {
        encode_ctx.encoders.encode(
            &encode_job,
            &encode_ctx.images,
            &encode_ctx.videos,
            &encode_ctx.layout,
        )
    })
    .await
    .unwrap_or_else(|e| WorkResult {
        produced: Vec::new(),
        failures: vec![OutputFailure {
            spec: "*".to_string(),
            error: EncodeError::TaskAborted(e.to_string()),
        }],
    });

    if !result.is_success() {
        return Err(JobFailure::EncodeFailed {
            input: job.input,
            produced: result.produced,
            failures: result.failures,
        });
    }

    if let Err(source) = ctx.post.run(&job.input, &result.produced).await {
        return Err(JobFailure::PostProcess {
            input: job.input,
            source,
        });
    }

    tracing::info!(
        job_id = %job.id,
        file = %job.input,
        outputs = result.produced.len(),
        "Finished"
    );
    Ok(result.produced)
}

async fn worker_loop(
    worker: usize,
    jobs: JobReceiver,
    ctx: Arc<JobContext>,
    errors: mpsc::UnboundedSender<JobFailure>,
    done: mpsc::UnboundedSender<WorkerDone>,
) {
    let mut report = WorkerDone {
        worker,
        ..WorkerDone::default()
    };

    while let Some(job) = jobs.next().await {
        match process_job(job, &ctx).await {
            Ok(_) => report.succeeded += 1,
            Err(failure) => {
                report.failed += 1;
                // Only fails once the coordinator is gone.
                let _ = errors.send(failure);
            }
        }
        ctx.progress.job_finished();
    }

    drop(errors);
    tracing::info!(
        worker,
        succeeded = report.succeeded,
        failed = report.failed,
        "Worker finished"
    );
    let _ = done.send(report);
}

/// Handles of the spawned workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks sharing `jobs`.
    pub fn spawn(
        workers: usize,
        jobs: JobReceiver,
        ctx: Arc<JobContext>,
        errors: mpsc::UnboundedSender<JobFailure>,
        done: mpsc::UnboundedSender<WorkerDone>,
    ) -> Self {
        let handles = (0..workers.max(1))
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    jobs.clone(),
                    ctx.clone(),
                    errors.clone(),
                    done.clone(),
                ))
            })
            .collect();
        Self { handles }
    }

    /// Wait for every worker task; panics are logged.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::mock::MockEncoder;
    use crate::progress::mock::CountingProgress;
    use crate::progress::NoProgress;
    use crate::queue::job_queue;
    use pixel_slicer_config::{FileOutputType, MediaKind};
    use proptest::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn context(
        root: &Path,
        mock: Arc<MockEncoder>,
        images: Vec<ImageConfiguration>,
    ) -> Arc<JobContext> {
        let layout = OutputLayout::new(root.join("output"), root.join("processed"), false);
        Arc::new(JobContext {
            images,
            videos: Vec::new(),
            layout: layout.clone(),
            encoders: Encoders::new(mock.clone(), mock),
            post: PostProcessor::new(layout, None, false),
            progress: Arc::new(NoProgress),
        })
    }

    fn image_job(root: &Path, name: &str) -> Job {
        let input_root = root.join("input");
        std::fs::create_dir_all(&input_root).unwrap();
        let path = input_root.join(name);
        std::fs::write(&path, b"src").unwrap();
        Job::new(InputFile::from_full_path(&input_root, &path).unwrap(), MediaKind::Image)
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_produced_path() {
        let dir = TempDir::new().unwrap();
        let images = vec![
            ImageConfiguration::new(500, 80, FileOutputType::Jpg),
            ImageConfiguration::new(2000, 80, FileOutputType::Jpg),
        ];
        let ctx = context(dir.path(), Arc::new(MockEncoder::failing(&[2000])), images);

        let failure = process_job(image_job(dir.path(), "a.jpg"), &ctx)
            .await
            .unwrap_err();

        match failure {
            JobFailure::EncodeFailed {
                produced, failures, ..
            } => {
                assert_eq!(produced, vec![dir.path().join("output/a-500.jpg")]);
                assert!(produced[0].exists());
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].spec, "image[1]");
            }
            other => panic!("unexpected failure: {other}"),
        }
    }

    #[tokio::test]
    async fn test_encode_failure_skips_post_processing() {
        let dir = TempDir::new().unwrap();
        let layout =
            OutputLayout::new(dir.path().join("output"), dir.path().join("processed"), false);
        let mock = Arc::new(MockEncoder::failing(&[500]));
        let ctx = Arc::new(JobContext {
            images: vec![ImageConfiguration::new(500, 80, FileOutputType::Jpg)],
            videos: Vec::new(),
            layout: layout.clone(),
            encoders: Encoders::new(mock.clone(), mock),
            post: PostProcessor::new(layout, None, true),
            progress: Arc::new(NoProgress),
        });

        let job = image_job(dir.path(), "keep.jpg");
        let original = job.input.path.clone();
        assert!(process_job(job, &ctx).await.is_err());
        assert!(original.exists(), "original must stay when encoding fails");
    }

    #[tokio::test]
    async fn test_every_finished_job_advances_progress() {
        let dir = TempDir::new().unwrap();
        let images = vec![ImageConfiguration::new(10, 80, FileOutputType::Jpg)];
        let progress = Arc::new(CountingProgress::default());
        let shared = context(dir.path(), Arc::new(MockEncoder::failing(&[10])), images);
        let mut ctx = JobContext::clone(&shared);
        ctx.progress = progress.clone();

        let (tx, rx) = job_queue(4);
        let (errors_tx, _errors_rx) = mpsc::unbounded_channel();
        let (done_tx, _done_rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::spawn(2, rx, Arc::new(ctx), errors_tx, done_tx);

        for i in 0..5 {
            tx.send(image_job(dir.path(), &format!("{}.jpg", i))).await.unwrap();
        }
        drop(tx);
        pool.join().await;

        assert_eq!(progress.counts(), (0, 5));
    }

    async fn run_pool(workers: usize, jobs: usize, failing: bool) -> (Vec<WorkerDone>, usize) {
        let dir = TempDir::new().unwrap();
        let mock = if failing {
            MockEncoder::failing(&[10])
        } else {
            MockEncoder::default()
        };
        let ctx = context(
            dir.path(),
            Arc::new(mock),
            vec![ImageConfiguration::new(10, 80, FileOutputType::Jpg)],
        );

        let (tx, rx) = job_queue(4);
        let (errors_tx, mut errors_rx) = mpsc::unbounded_channel();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::spawn(workers, rx, ctx, errors_tx, done_tx);

        for i in 0..jobs {
            tx.send(image_job(dir.path(), &format!("{}.jpg", i))).await.unwrap();
        }
        drop(tx);
        pool.join().await;

        let mut signals = Vec::new();
        while let Some(done) = done_rx.recv().await {
            signals.push(done);
        }
        let mut errors = 0;
        while errors_rx.recv().await.is_some() {
            errors += 1;
        }
        (signals, errors)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        /// N workers send exactly N completion signals, whatever the job count.
        #[test]
        fn prop_one_completion_signal_per_worker(
            workers in 1usize..6,
            jobs in 1usize..24,
            failing in proptest::bool::ANY,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (signals, errors) = rt.block_on(run_pool(workers, jobs, failing));

            prop_assert_eq!(signals.len(), workers);
            let mut ids: Vec<usize> = signals.iter().map(|s| s.worker).collect();
            ids.sort();
            prop_assert_eq!(ids, (0..workers).collect::<Vec<_>>());

            let succeeded: usize = signals.iter().map(|s| s.succeeded).sum();
            let failed: usize = signals.iter().map(|s| s.failed).sum();
            prop_assert_eq!(succeeded + failed, jobs);
            prop_assert_eq!(failed, errors);
            prop_assert_eq!(failed, if failing { jobs } else { 0 });
        }
    }
}
