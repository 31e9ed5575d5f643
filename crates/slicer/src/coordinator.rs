//! Run completion and shutdown.
//!
//! The coordinator owns the error channel. It drains job failures while the
//! workers run and counts one completion signal per worker. After the last
//! signal it drops its own error sender, which ends the drain.

use crate::pool::{JobFailure, WorkerDone};
use crate::watch::WatchError;
use std::fmt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// Workers are running and the queue is open.
    Running,
    /// The queue is closed; workers are finishing what is left.
    Draining,
    /// Every worker has signalled completion.
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Running => write!(f, "running"),
            RunPhase::Draining => write!(f, "draining"),
            RunPhase::Done => write!(f, "done"),
        }
    }
}

/// Job counts for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Senders handed to the worker pool.
pub struct PoolChannels {
    pub errors: mpsc::UnboundedSender<JobFailure>,
    pub done: mpsc::UnboundedSender<WorkerDone>,
}

pub type WatcherHandle = JoinHandle<Result<(), WatchError>>;

pub struct Coordinator {
    phase: RunPhase,
    remaining: usize,
    errors_tx: Option<mpsc::UnboundedSender<JobFailure>>,
    errors_rx: mpsc::UnboundedReceiver<JobFailure>,
    done_rx: mpsc::UnboundedReceiver<WorkerDone>,
    summary: RunSummary,
}

impl Coordinator {
    /// A coordinator expecting `workers` completion signals.
    pub fn new(workers: usize) -> (Self, PoolChannels) {
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let channels = PoolChannels {
            errors: errors_tx.clone(),
            done: done_tx,
        };
        let coordinator = Self {
            phase: RunPhase::Running,
            remaining: workers,
            errors_tx: Some(errors_tx),
            errors_rx,
            done_rx,
            summary: RunSummary::default(),
        };
        (coordinator, channels)
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Record that no more jobs will be queued.
    pub fn queue_closed(&mut self) {
        if self.phase == RunPhase::Running {
            self.set_phase(RunPhase::Draining);
        }
    }

    fn set_phase(&mut self, phase: RunPhase) {
        tracing::info!(from = %self.phase, to = %phase, "Run phase changed");
        self.phase = phase;
    }

    fn record_failure(&mut self, failure: JobFailure) {
        self.summary.failed += 1;
        tracing::error!(file = %failure.input(), error = %failure, "Job failed");
        if let JobFailure::EncodeFailed { failures, produced, .. } = &failure {
            for output in failures {
                tracing::error!(spec = %output.spec, error = %output.error, "Output failed");
            }
            for path in produced {
                tracing::debug!(output = %path.display(), "Output kept");
            }
        }
    }

    fn worker_finished(&mut self, done: Option<WorkerDone>) {
        match done {
            Some(done) => {
                self.summary.succeeded += done.succeeded;
                self.remaining = self.remaining.saturating_sub(1);
            }
            None => {
                tracing::error!(
                    missing = self.remaining,
                    "Workers exited without signalling completion"
                );
                self.remaining = 0;
            }
        }
        if self.remaining == 0 {
            self.errors_tx.take();
            self.set_phase(RunPhase::Done);
        }
    }

    /// Drive the run to completion.
    ///
    /// In watch mode `watcher` is the watcher task; the queue closes when it
    /// returns. A watcher error ends the run immediately.
    pub async fn drive(mut self, watcher: Option<WatcherHandle>) -> Result<RunSummary, WatchError> {
        let mut watcher = watcher;
        if watcher.is_none() {
            self.queue_closed();
        }
        if self.remaining == 0 {
            self.worker_finished(Some(WorkerDone::default()));
        }

        loop {
            tokio::select! {
                failure = self.errors_rx.recv() => match failure {
                    Some(failure) => self.record_failure(failure),
                    None => break,
                },
                done = self.done_rx.recv(), if self.remaining > 0 => {
                    self.worker_finished(done);
                }
                result = wait_for(&mut watcher), if watcher.is_some() => {
                    watcher = None;
                    match result {
                        Ok(Ok(())) => self.queue_closed(),
                        Ok(Err(e)) => return Err(e),
                        Err(e) => {
                            tracing::error!(error = %e, "Watcher task failed");
                            self.queue_closed();
                        }
                    }
                }
            }
        }

        tracing::info!(
            succeeded = self.summary.succeeded,
            failed = self.summary.failed,
            "Run complete"
        );
        Ok(self.summary)
    }
}

async fn wait_for(
    watcher: &mut Option<WatcherHandle>,
) -> Result<Result<(), WatchError>, tokio::task::JoinError> {
    match watcher {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{EncodeError, OutputFailure};
    use crate::jobs::InputFile;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    fn failure(name: &str) -> JobFailure {
        JobFailure::EncodeFailed {
            input: InputFile::from_full_path(Path::new("/in"), &Path::new("/in").join(name))
                .unwrap(),
            produced: vec![PathBuf::from("/out/kept.jpg")],
            failures: vec![OutputFailure {
                spec: "image[0]".to_string(),
                error: EncodeError::UnsupportedFormat("bmp".to_string()),
            }],
        }
    }

    #[tokio::test]
    async fn test_counts_signals_and_failures() {
        let (coordinator, channels) = Coordinator::new(2);
        assert_eq!(coordinator.phase(), RunPhase::Running);

        let errors = channels.errors.clone();
        let done = channels.done.clone();
        drop(channels);

        tokio::spawn(async move {
            errors.send(failure("a.jpg")).unwrap();
            done.send(WorkerDone { worker: 0, succeeded: 3, failed: 1 }).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            done.send(WorkerDone { worker: 1, succeeded: 2, failed: 0 }).unwrap();
        });

        let summary = tokio::time::timeout(Duration::from_secs(5), coordinator.drive(None))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary, RunSummary { succeeded: 5, failed: 1 });
        assert!(!summary.is_success());
    }

    #[tokio::test]
    async fn test_missing_signals_do_not_hang() {
        let (coordinator, channels) = Coordinator::new(3);
        let done = channels.done.clone();
        drop(channels);
        done.send(WorkerDone::default()).unwrap();
        drop(done);

        let summary = tokio::time::timeout(Duration::from_secs(5), coordinator.drive(None))
            .await
            .unwrap()
            .unwrap();
        assert!(summary.is_success());
    }

    #[tokio::test]
    async fn test_watcher_error_is_fatal() {
        let (coordinator, channels) = Coordinator::new(1);
        let watcher: WatcherHandle = tokio::spawn(async {
            Err(WatchError::EventStreamClosed(PathBuf::from("/in")))
        });

        let result = tokio::time::timeout(Duration::from_secs(5), coordinator.drive(Some(watcher)))
            .await
            .unwrap();
        assert!(matches!(result, Err(WatchError::EventStreamClosed(_))));
        drop(channels);
    }

    #[tokio::test]
    async fn test_watcher_exit_closes_queue() {
        let (coordinator, channels) = Coordinator::new(1);
        let done = channels.done.clone();
        drop(channels);

        let watcher: WatcherHandle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            // The worker finishes once the watcher's sender is gone.
            done.send(WorkerDone { worker: 0, succeeded: 1, failed: 0 }).unwrap();
            Ok(())
        });

        let summary = tokio::time::timeout(Duration::from_secs(5), coordinator.drive(Some(watcher)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.succeeded, 1);
    }
}
