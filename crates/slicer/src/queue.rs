//! Bounded job queue shared by the scanner, the watcher and the workers.
//!
//! Producers wait when the queue is full. The queue closes once every
//! [`JobSender`] has been dropped; receivers then drain what is left and
//! get `None`.

use crate::jobs::Job;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

/// Default number of jobs the queue holds before producers wait.
pub const DEFAULT_QUEUE_CAPACITY: usize = 2048;

/// Returned when sending on a queue with no receivers left.
#[derive(Debug, Error)]
#[error("Job queue is closed")]
pub struct QueueClosed(pub Job);

/// Producer half of the job queue.
#[derive(Debug, Clone)]
pub struct JobSender {
    tx: mpsc::Sender<Job>,
}

impl JobSender {
    /// Enqueue a job, waiting while the queue is full.
    pub async fn send(&self, job: Job) -> Result<(), QueueClosed> {
        self.tx.send(job).await.map_err(|e| QueueClosed(e.0))
    }
}

/// Consumer half of the job queue, shared by all workers.
#[derive(Debug, Clone)]
pub struct JobReceiver {
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
}

impl JobReceiver {
    /// Take the next job; `None` once the queue is closed and empty.
    pub async fn next(&self) -> Option<Job> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }
}

/// Create a job queue holding up to `capacity` jobs.
pub fn job_queue(capacity: usize) -> (JobSender, JobReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        JobSender { tx },
        JobReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}
