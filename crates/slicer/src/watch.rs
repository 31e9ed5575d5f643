//! Directory watcher feeding newly created files into the job queue.
//!
//! Only create events are handled; renames and modifications are ignored.
//! Each created file is settled in its own task before it is queued.

use crate::classify::classify_path;
use crate::jobs::{InputFile, Job};
use crate::progress::{NoProgress, ProgressObserver};
use crate::queue::JobSender;
use crate::scan::{resolve_root, ScanError};
use crate::stability::{wait_until_settled, MAX_SETTLE_ATTEMPTS};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use pixel_slicer_config::MediaKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the channel between the notify thread and the watch loop.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Fatal watcher errors.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Watch root unusable: {0}")]
    Root(#[from] ScanError),

    #[error("Watching {path} failed: {source}")]
    WatchFailed {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("Watch event stream for {0} closed unexpectedly")]
    EventStreamClosed(PathBuf),
}

/// Paths of non-directory entries created by `event`.
pub fn created_paths(event: &notify::Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(_) => event
            .paths
            .iter()
            .filter(|path| !path.is_dir())
            .cloned()
            .collect(),
        _ => Vec::new(),
    }
}

/// Watches an input root recursively until cancelled.
///
/// # Known limitations
///
/// The watch is registered only after the initial scan has finished. A file
/// created between the end of that walk and registration is never queued.
/// Nothing dedups scan and watch results either: a file that the scan lists
/// and that also raises a create event is dispatched twice, and both jobs
/// race on the same output paths.
#[derive(Clone)]
pub struct DirectoryWatcher {
    root: PathBuf,
    settle: Duration,
    progress: Arc<dyn ProgressObserver>,
}

impl DirectoryWatcher {
    pub fn new(root: PathBuf, settle: Duration) -> Self {
        Self {
            root,
            settle,
            progress: Arc::new(NoProgress),
        }
    }

    /// Report each queued file to `progress`.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressObserver>) -> Self {
        self.progress = progress;
        self
    }

    /// Queue a job for each file created under the root until `shutdown` fires.
    ///
    /// Returns `Err` if the underlying watch fails; the run cannot continue
    /// without it.
    pub async fn run(self, jobs: JobSender, shutdown: CancellationToken) -> Result<(), WatchError> {
        let root = resolve_root(&self.root)?;
        let (tx, mut rx) = mpsc::channel::<notify::Result<notify::Event>>(EVENT_CHANNEL_CAPACITY);

        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                // Receiver gone means the loop below has exited.
                let _ = tx.blocking_send(res);
            })
            .map_err(|source| WatchError::WatchFailed {
                path: root.clone(),
                source,
            })?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::WatchFailed {
                path: root.clone(),
                source,
            })?;

        tracing::info!(dir = %root.display(), "Watching for new files");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Watcher stopping");
                    break;
                }
                event = rx.recv() => match event {
                    Some(Ok(event)) => {
                        for path in created_paths(&event) {
                            self.spawn_settle(&root, path, jobs.clone(), shutdown.clone());
                        }
                    }
                    Some(Err(source)) => {
                        return Err(WatchError::WatchFailed { path: root, source });
                    }
                    None => return Err(WatchError::EventStreamClosed(root)),
                },
            }
        }

        drop(watcher);
        Ok(())
    }

    fn spawn_settle(
        &self,
        root: &Path,
        path: PathBuf,
        jobs: JobSender,
        shutdown: CancellationToken,
    ) {
        let kind = classify_path(&path);
        if kind == MediaKind::Unknown {
            tracing::debug!(file = %path.display(), "Ignoring created file of unknown type");
            return;
        }
        let Some(input) = InputFile::from_full_path(root, &path) else {
            return;
        };
        let settle = self.settle;
        let progress = self.progress.clone();

        tokio::spawn(async move {
            let settled = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(file = %path.display(), "Shutdown before file settled");
                    return;
                }
                res = wait_until_settled(&path, settle, MAX_SETTLE_ATTEMPTS) => res,
            };

            match settled {
                Ok(size) => {
                    let job = Job::new(input, kind);
                    tracing::info!(
                        job_id = %job.id,
                        file = %path.display(),
                        size,
                        "Watcher queued job"
                    );
                    if jobs.send(job).await.is_err() {
                        tracing::debug!(file = %path.display(), "Queue closed, dropping file");
                    } else {
                        progress.jobs_queued(1);
                    }
                }
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Dropping created file");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::mock::CountingProgress;
    use crate::queue::job_queue;
    use notify::event::{CreateKind, ModifyKind};
    use tempfile::TempDir;

    #[test]
    fn test_created_paths_only_for_create_events() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.jpg");
        std::fs::write(&file, b"x").unwrap();

        let create = notify::Event::new(EventKind::Create(CreateKind::File)).add_path(file.clone());
        assert_eq!(created_paths(&create), vec![file.clone()]);

        let modify = notify::Event::new(EventKind::Modify(ModifyKind::Any)).add_path(file);
        assert!(created_paths(&modify).is_empty());
    }

    #[test]
    fn test_created_directories_are_skipped() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();

        let create = notify::Event::new(EventKind::Create(CreateKind::Folder)).add_path(sub);
        assert!(created_paths(&create).is_empty());
    }

    #[tokio::test]
    async fn test_missing_root_is_fatal() {
        let dir = TempDir::new().unwrap();
        let (tx, _rx) = job_queue(4);
        let watcher = DirectoryWatcher::new(dir.path().join("missing"), Duration::from_millis(10));
        let result = watcher.run(tx, CancellationToken::new()).await;
        assert!(matches!(result, Err(WatchError::Root(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_created_file_is_queued() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let (tx, rx) = job_queue(4);
        let shutdown = CancellationToken::new();

        let progress = Arc::new(CountingProgress::default());
        let watcher = DirectoryWatcher::new(root.clone(), Duration::from_millis(50))
            .with_progress(progress.clone());
        let handle = tokio::spawn(watcher.run(tx, shutdown.clone()));

        // Give the backend time to register the watch.
        tokio::time::sleep(Duration::from_millis(300)).await;
        std::fs::create_dir(root.join("sub")).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(root.join("sub/new.jpg"), b"pixels").unwrap();
        std::fs::write(root.join("ignored.txt"), b"text").unwrap();

        let job = tokio::time::timeout(Duration::from_secs(10), rx.next())
            .await
            .expect("watcher should queue the new file")
            .unwrap();
        assert_eq!(job.input.filename, "new.jpg");
        assert_eq!(job.input.subdir, PathBuf::from("sub"));
        assert_eq!(job.kind, MediaKind::Image);

        for _ in 0..50 {
            if progress.counts().0 == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(progress.counts(), (1, 0));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
