//! Encoding backends for pixel-slicer
//!
//! Images go through an [`ImageEncoder`] (in-process or ffmpeg), videos
//! through a [`VideoEncoder`] (always ffmpeg). The backend pair is chosen
//! once from configuration.

pub mod ffmpeg;
pub mod native;

pub use ffmpeg::{
    build_av1_commands, build_h264_command, build_h265_command, build_image_resize_command,
    build_thumbnail_command, build_transcode_commands, build_vp9_commands, FfmpegEncoder,
};
pub use native::NativeImageEncoder;

use crate::jobs::{InputFile, Job};
use crate::paths::OutputLayout;
use pixel_slicer_config::{
    Config, ImageBackend, ImageConfiguration, MediaKind, VideoConfiguration,
};
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use thiserror::Error;

/// Error type for a single output
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Source image could not be decoded
    #[error("Failed to decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    /// Resized image could not be written
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Format has no encoder in this backend
    #[error("No encoder for output format '{0}'")]
    UnsupportedFormat(String),

    /// Output spec is missing fields that validation fills in
    #[error("Output spec is incomplete: {0}")]
    Unvalidated(String),

    /// External process exited with non-zero status
    #[error("{program} failed with exit code: {code}")]
    ProcessFailed { program: String, code: i32 },

    /// External process was terminated by signal
    #[error("{program} was terminated by signal")]
    ProcessTerminated { program: String },

    /// Encoder reported success but the output file is absent
    #[error("Encoder produced no file at {0}")]
    MissingOutput(PathBuf),

    /// The process shared by several outputs failed
    #[error("Shared encode failed: {0}")]
    Shared(String),

    /// Blocking encode task did not complete
    #[error("Encode task aborted: {0}")]
    TaskAborted(String),

    /// IO error during encoding
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One output that could not be produced.
#[derive(Debug)]
pub struct OutputFailure {
    /// Which spec failed, e.g. `image[1]`.
    pub spec: String,
    pub error: EncodeError,
}

/// Outcome of encoding every spec for one input.
#[derive(Debug, Default)]
pub struct WorkResult {
    /// Files that were written.
    pub produced: Vec<PathBuf>,
    pub failures: Vec<OutputFailure>,
}

impl WorkResult {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn record(&mut self, spec: String, result: Result<PathBuf, EncodeError>) {
        match result {
            Ok(path) => {
                tracing::debug!(spec = %spec, output = %path.display(), "Output written");
                self.produced.push(path);
            }
            Err(error) => self.failures.push(OutputFailure { spec, error }),
        }
    }
}

/// Resizes one decoded image into every image output.
pub trait ImageEncoder: Send + Sync {
    /// Attempts every spec; failures are reported per spec, never short-circuited.
    fn resize(
        &self,
        input: &InputFile,
        specs: &[ImageConfiguration],
        layout: &OutputLayout,
    ) -> WorkResult;
}

/// Transcodes videos and grabs thumbnails.
pub trait VideoEncoder: Send + Sync {
    fn transcode(
        &self,
        input: &InputFile,
        spec: &VideoConfiguration,
        layout: &OutputLayout,
    ) -> Result<PathBuf, EncodeError>;

    fn thumbnail(
        &self,
        input: &InputFile,
        spec: &VideoConfiguration,
        layout: &OutputLayout,
    ) -> Result<PathBuf, EncodeError>;
}

/// The backend pair used for a run.
#[derive(Clone)]
pub struct Encoders {
    pub image: Arc<dyn ImageEncoder>,
    pub video: Arc<dyn VideoEncoder>,
}

impl Encoders {
    pub fn new(image: Arc<dyn ImageEncoder>, video: Arc<dyn VideoEncoder>) -> Self {
        Self { image, video }
    }

    /// Select backends from `encoder.image_backend` and `encoder.ffmpeg_path`.
    pub fn from_config(cfg: &Config) -> Self {
        let ffmpeg = Arc::new(FfmpegEncoder::new(cfg.encoder.ffmpeg_path.clone()));
        let image: Arc<dyn ImageEncoder> = match cfg.encoder.image_backend {
            ImageBackend::Native => Arc::new(NativeImageEncoder),
            ImageBackend::Ffmpeg => ffmpeg.clone(),
        };
        Self {
            image,
            video: ffmpeg,
        }
    }

    /// Encode every configured output for `job`. Blocking.
    pub fn encode(
        &self,
        job: &Job,
        images: &[ImageConfiguration],
        videos: &[VideoConfiguration],
        layout: &OutputLayout,
    ) -> WorkResult {
        match job.kind {
            MediaKind::Image => self.image.resize(&job.input, images, layout),
            MediaKind::Video => {
                let mut result = WorkResult::default();
                for (i, spec) in videos.iter().enumerate() {
                    let outcome = match spec.target_kind() {
                        MediaKind::Image => self.video.thumbnail(&job.input, spec, layout),
                        MediaKind::Video => self.video.transcode(&job.input, spec, layout),
                        MediaKind::Unknown => Err(EncodeError::Unvalidated(format!(
                            "video[{}] has no output format",
                            i
                        ))),
                    };
                    result.record(format!("video[{}]", i), outcome);
                }
                result
            }
            MediaKind::Unknown => WorkResult::default(),
        }
    }
}

/// Execute an external command, mapping its exit status.
pub(crate) fn run_command(mut cmd: Command) -> Result<(), EncodeError> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    tracing::debug!(command = ?cmd, "Running external encoder");

    let status = cmd.status()?;

    if status.success() {
        Ok(())
    } else {
        match status.code() {
            Some(code) => Err(EncodeError::ProcessFailed { program, code }),
            None => Err(EncodeError::ProcessTerminated { program }),
        }
    }
}
