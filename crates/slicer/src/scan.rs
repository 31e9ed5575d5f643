//! Scanner module for discovering media files under the input directory.
//!
//! The whole tree below the root is walked. Every regular file becomes an
//! [`InputFile`]; [`media_jobs`] then drops files of unknown kind.

use crate::classify::classify_path;
use crate::jobs::{InputFile, Job};
use pixel_slicer_config::MediaKind;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Errors that end a scan.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The root itself is missing or cannot be listed.
    #[error("Directory {path} is unreadable: {source}")]
    DirectoryUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Resolves `root` to an absolute path and checks that it can be listed.
pub fn resolve_root(root: &Path) -> Result<PathBuf, ScanError> {
    let unreadable = |source| ScanError::DirectoryUnreadable {
        path: root.to_path_buf(),
        source,
    };
    let resolved = fs::canonicalize(root).map_err(unreadable)?;
    fs::read_dir(&resolved).map_err(unreadable)?;
    Ok(resolved)
}

/// Recursively lists every regular file under `root`.
///
/// Symlinks are followed, so a linked file is listed under the link's path
/// and a linked directory is walked. Link cycles, broken links and other
/// unreadable entries below the root are logged and skipped.
/// Ordering follows the walk and is not guaranteed.
pub fn scan_directory(root: &Path) -> Result<Vec<InputFile>, ScanError> {
    let root = resolve_root(root)?;
    let mut files = Vec::new();

    for entry in WalkDir::new(&root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(
                    path = ?e.path(),
                    error = %e,
                    "Skipping unreadable entry"
                );
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        if let Some(file) = InputFile::from_full_path(&root, entry.path()) {
            files.push(file);
        }
    }

    Ok(files)
}

/// Counts of what a scan found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub files: usize,
    pub images: usize,
    pub videos: usize,
}

/// Classifies scanned files and builds one job per image or video.
pub fn media_jobs(files: Vec<InputFile>) -> (Vec<Job>, ScanSummary) {
    let mut summary = ScanSummary {
        files: files.len(),
        ..ScanSummary::default()
    };
    let mut jobs = Vec::new();

    for file in files {
        let kind = classify_path(Path::new(&file.filename));
        match kind {
            MediaKind::Image => summary.images += 1,
            MediaKind::Video => summary.videos += 1,
            MediaKind::Unknown => {
                tracing::debug!(file = %file, "Ignoring file of unknown type");
                continue;
            }
        }
        jobs.push(Job::new(file, kind));
    }

    tracing::info!(
        files = summary.files,
        images = summary.images,
        videos = summary.videos,
        "Scan complete"
    );

    (jobs, summary)
}
