//! Run progress hooks.
//!
//! The library only reports counts; rendering is left to the caller.

/// Receives job counts as a run advances.
pub trait ProgressObserver: Send + Sync {
    /// `count` more jobs entered the queue.
    fn jobs_queued(&self, _count: u64) {}

    /// One job left a worker, successfully or not.
    fn job_finished(&self) {}
}

/// Observer that ignores every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    pub struct CountingProgress {
        pub queued: AtomicU64,
        pub finished: AtomicU64,
    }

    impl CountingProgress {
        pub fn counts(&self) -> (u64, u64) {
            (
                self.queued.load(Ordering::SeqCst),
                self.finished.load(Ordering::SeqCst),
            )
        }
    }

    impl ProgressObserver for CountingProgress {
        fn jobs_queued(&self, count: u64) {
            self.queued.fetch_add(count, Ordering::SeqCst);
        }

        fn job_finished(&self) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }
}
