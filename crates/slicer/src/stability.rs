//! Settling check for files that may still be being written.
//!
//! A file counts as settled once its size is unchanged across one interval.

use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// Upper bound on size comparisons before a file is given up on.
pub const MAX_SETTLE_ATTEMPTS: u32 = 30;

/// Outcome of comparing two consecutive size samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeSample {
    Unchanged(u64),
    Changed { previous: u64, current: u64 },
}

/// Compare two consecutive size samples.
#[inline]
pub fn compare_samples(previous: u64, current: u64) -> SizeSample {
    if previous == current {
        SizeSample::Unchanged(current)
    } else {
        SizeSample::Changed { previous, current }
    }
}

/// Reasons a file never settled.
#[derive(Debug, Error)]
pub enum SettleError {
    /// The file disappeared or became unreadable.
    #[error("File could not be read while settling: {0}")]
    Vanished(#[from] io::Error),

    /// The size kept changing.
    #[error("File size still changing after {attempts} checks (last size {last_size})")]
    StillChanging { attempts: u32, last_size: u64 },
}

/// Wait until the size of `path` is stable for one `interval`.
///
/// Returns the settled size.
pub async fn wait_until_settled(
    path: &Path,
    interval: Duration,
    max_attempts: u32,
) -> Result<u64, SettleError> {
    let mut previous = tokio::fs::metadata(path).await?.len();

    for _ in 0..max_attempts {
        sleep(interval).await;
        let current = tokio::fs::metadata(path).await?.len();
        match compare_samples(previous, current) {
            SizeSample::Unchanged(size) => return Ok(size),
            SizeSample::Changed { current, .. } => previous = current,
        }
    }

    Err(SettleError::StillChanging {
        attempts: max_attempts,
        last_size: previous,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;
    use tempfile::TempDir;

    proptest! {
        #[test]
        fn prop_compare_samples(previous: u64, current: u64) {
            let sample = compare_samples(previous, current);
            if previous == current {
                prop_assert_eq!(sample, SizeSample::Unchanged(current));
            } else {
                prop_assert_eq!(sample, SizeSample::Changed { previous, current });
            }
        }
    }

    #[tokio::test]
    async fn test_static_file_settles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.jpg");
        std::fs::write(&path, b"12345").unwrap();

        let size = wait_until_settled(&path, Duration::from_millis(10), 3)
            .await
            .unwrap();
        assert_eq!(size, 5);
    }

    #[tokio::test]
    async fn test_missing_file_vanishes() {
        let dir = TempDir::new().unwrap();
        let result =
            wait_until_settled(&dir.path().join("gone.mp4"), Duration::from_millis(10), 3).await;
        assert!(matches!(result, Err(SettleError::Vanished(_))));
    }

    #[tokio::test]
    async fn test_growing_file_never_settles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("growing.mp4");
        std::fs::write(&path, b"x").unwrap();

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            for _ in 0..40 {
                let mut f = std::fs::OpenOptions::new()
                    .append(true)
                    .open(&writer_path)
                    .unwrap();
                f.write_all(b"more").unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let result = wait_until_settled(&path, Duration::from_millis(20), 2).await;
        writer.abort();
        assert!(matches!(
            result,
            Err(SettleError::StillChanging { attempts: 2, .. })
        ));
    }
}
