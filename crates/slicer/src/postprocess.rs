//! Post-processing of a finished job: upload outputs, then relocate the original.

use crate::jobs::InputFile;
use crate::paths::OutputLayout;
use crate::upload::{UploadError, Uploader};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors that fail a job after encoding succeeded.
#[derive(Debug, Error)]
pub enum PostProcessError {
    #[error("Upload failed: {0}")]
    UploadFailed(#[from] UploadError),

    #[error("Produced file {0} is not under the output directory")]
    NoStorageKey(PathBuf),

    #[error("Failed to move {from} to {to}: {source}")]
    MoveFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Move `from` to `to`, creating parent directories and replacing an existing file.
///
/// A plain rename is tried first; across filesystems this falls back to
/// copy then remove.
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }

    if fs::rename(from, to).is_ok() {
        return Ok(());
    }

    if to.is_file() {
        fs::remove_file(to)?;
    }
    fs::copy(from, to)?;
    fs::remove_file(from)
}

/// What happens to a job once its outputs exist.
#[derive(Clone)]
pub struct PostProcessor {
    layout: OutputLayout,
    uploader: Option<Arc<dyn Uploader>>,
    move_processed: bool,
}

impl PostProcessor {
    pub fn new(
        layout: OutputLayout,
        uploader: Option<Arc<dyn Uploader>>,
        move_processed: bool,
    ) -> Self {
        Self {
            layout,
            uploader,
            move_processed,
        }
    }

    /// Upload every produced file, then move the original if enabled.
    ///
    /// The original is only moved after all uploads succeed.
    pub async fn run(
        &self,
        input: &InputFile,
        produced: &[PathBuf],
    ) -> Result<(), PostProcessError> {
        if let Some(uploader) = &self.uploader {
            for local in produced {
                let key = self
                    .layout
                    .storage_key(local)
                    .ok_or_else(|| PostProcessError::NoStorageKey(local.clone()))?;
                uploader.put(local, &key).await?;
                tracing::debug!(file = %local.display(), key = %key, "Uploaded");
            }
        }

        if self.move_processed {
            let to = self.layout.processed_path(input);
            let from = input.path.clone();
            let dest = to.clone();
            // Copy fallback can be slow for large videos.
            tokio::task::spawn_blocking(move || move_file(&from, &dest))
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
                .and_then(|res| res)
                .map_err(|source| PostProcessError::MoveFailed {
                    from: input.path.clone(),
                    to: to.clone(),
                    source,
                })?;
            tracing::debug!(from = %input.path.display(), to = %to.display(), "Moved original");
        }

        Ok(())
    }
}
