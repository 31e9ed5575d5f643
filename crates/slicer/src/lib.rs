//! pixel-slicer
//!
//! Media conversion pipeline: scans (and optionally watches) an input
//! directory, resizes images and transcodes videos through a bounded job
//! queue and worker pool, then uploads outputs and relocates originals.

pub mod classify;
pub mod concurrency;
pub mod coordinator;
pub mod encode;
pub mod jobs;
pub mod paths;
pub mod pool;
pub mod postprocess;
pub mod progress;
pub mod queue;
pub mod scan;
pub mod signing;
pub mod slicer;
pub mod stability;
pub mod upload;
pub mod watch;

pub use pixel_slicer_config as config;
pub use pixel_slicer_config::Config;
pub use classify::{classify_path, IMAGE_EXTENSIONS, VIDEO_EXTENSIONS};
pub use concurrency::WorkerPlan;
pub use coordinator::{Coordinator, RunPhase, RunSummary};
pub use encode::{
    EncodeError, Encoders, FfmpegEncoder, ImageEncoder, NativeImageEncoder, VideoEncoder,
    WorkResult,
};
pub use jobs::{InputFile, Job};
pub use paths::OutputLayout;
pub use pool::{process_job, JobContext, JobFailure, WorkerDone, WorkerPool};
pub use postprocess::{move_file, PostProcessError, PostProcessor};
pub use progress::{NoProgress, ProgressObserver};
pub use queue::{job_queue, JobReceiver, JobSender, QueueClosed};
pub use scan::{media_jobs, scan_directory, ScanError, ScanSummary};
pub use signing::{Signer, SigningError};
pub use slicer::{Slicer, SlicerError};
pub use upload::{HttpUploader, UploadError, Uploader};
pub use watch::{DirectoryWatcher, WatchError};
