//! Job types flowing through the queue.

use pixel_slicer_config::MediaKind;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A discovered input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    /// Full path to the file.
    pub path: PathBuf,
    /// File name including extension.
    pub filename: String,
    /// Directory of the file relative to the input root; empty for top-level files.
    pub subdir: PathBuf,
}

impl InputFile {
    /// Builds an `InputFile` for `path` found under `root`.
    ///
    /// Returns `None` when the path has no file name. A path outside `root`
    /// is treated as top-level.
    pub fn from_full_path(root: &Path, path: &Path) -> Option<Self> {
        let filename = path.file_name()?.to_string_lossy().into_owned();
        let subdir = path
            .parent()
            .and_then(|parent| parent.strip_prefix(root).ok())
            .map(Path::to_path_buf)
            .unwrap_or_default();

        Some(Self {
            path: path.to_path_buf(),
            filename,
            subdir,
        })
    }

    /// File name without its extension.
    pub fn stem(&self) -> &str {
        Path::new(&self.filename)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(&self.filename)
    }
}

impl fmt::Display for InputFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.subdir.join(&self.filename).display())
    }
}

/// One unit of work: an input file and its classified kind.
#[derive(Debug, Clone)]
pub struct Job {
    /// Identifier used to correlate log lines.
    pub id: Uuid,
    pub input: InputFile,
    pub kind: MediaKind,
}

impl Job {
    pub fn new(input: InputFile, kind: MediaKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            input,
            kind,
        }
    }
}
