//! Classifier module for sorting discovered files into media kinds.
//!
//! Classification is by file extension only; file contents are never read.

use pixel_slicer_config::MediaKind;
use std::path::Path;

/// Image file extensions (case-insensitive matching).
pub const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".tiff", ".tif"];

/// Video file extensions (case-insensitive matching).
pub const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".mov"];

/// Classifies a path as image, video or unknown by its extension.
pub fn classify_path(path: &Path) -> MediaKind {
    let ext = match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!(".{}", ext.to_lowercase()),
        None => return MediaKind::Unknown,
    };

    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        MediaKind::Image
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        MediaKind::Video
    } else {
        MediaKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_classify_images() {
        assert_eq!(classify_path(Path::new("/in/a.jpg")), MediaKind::Image);
        assert_eq!(classify_path(Path::new("/in/a.JPEG")), MediaKind::Image);
        assert_eq!(classify_path(Path::new("/in/a.png")), MediaKind::Image);
        assert_eq!(classify_path(Path::new("/in/scan.TIFF")), MediaKind::Image);
        assert_eq!(classify_path(Path::new("/in/scan.tif")), MediaKind::Image);
    }

    #[test]
    fn test_classify_videos() {
        assert_eq!(classify_path(Path::new("clip.mp4")), MediaKind::Video);
        assert_eq!(classify_path(Path::new("clip.MOV")), MediaKind::Video);
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(classify_path(Path::new("notes.txt")), MediaKind::Unknown);
        assert_eq!(classify_path(Path::new("movie.mkv")), MediaKind::Unknown);
        assert_eq!(classify_path(Path::new("README")), MediaKind::Unknown);
        assert_eq!(classify_path(Path::new(".jpg")), MediaKind::Unknown);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_extension_case_is_ignored(
            stem in "[a-z0-9_]{1,16}",
            ext in prop::sample::select(vec!["jpg", "jpeg", "png", "tiff", "tif", "mp4", "mov"]),
            upper in proptest::bool::ANY,
        ) {
            let ext_cased = if upper { ext.to_uppercase() } else { ext.to_string() };
            let lower = classify_path(Path::new(&format!("{}.{}", stem, ext)));
            let cased = classify_path(Path::new(&format!("{}.{}", stem, ext_cased)));
            prop_assert_eq!(lower, cased);
            prop_assert_ne!(lower, MediaKind::Unknown);
        }
    }
}
