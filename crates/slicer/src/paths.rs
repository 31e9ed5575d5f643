//! Output and processed path layout.
//!
//! Outputs mirror the input tree under the output root:
//! `input/sub/photo.jpg` with suffix `-800.jpg` becomes `output/sub/photo-800.jpg`.
//! Processed originals mirror it under the processed root.

use crate::jobs::InputFile;
use pixel_slicer_config::{
    Config, FileOutputType, ImageConfiguration, VideoCodec, VideoConfiguration,
};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Where outputs and processed originals land, and how outputs are named.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputLayout {
    output_root: PathBuf,
    processed_root: PathBuf,
    debug_filenames: bool,
}

impl OutputLayout {
    pub fn new(output_root: PathBuf, processed_root: PathBuf, debug_filenames: bool) -> Self {
        Self {
            output_root,
            processed_root,
            debug_filenames,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.fs.output_dir.clone(),
            cfg.fs.processed_dir.clone(),
            cfg.debug_filenames,
        )
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// `-{w}.{ext}`, or `-{w}-q{q}.{ext}` with debug file names.
    pub fn image_suffix(&self, spec: &ImageConfiguration) -> String {
        self.still_suffix(spec.max_width, spec.quality, &spec.format)
    }

    /// Thumbnails are named like resized images.
    pub fn thumbnail_suffix(&self, spec: &VideoConfiguration, format: &FileOutputType) -> String {
        self.still_suffix(spec.max_width, spec.quality, format)
    }

    fn still_suffix(&self, width: u32, quality: u32, format: &FileOutputType) -> String {
        if self.debug_filenames {
            format!("-{}-q{}.{}", width, quality, format)
        } else {
            format!("-{}.{}", width, format)
        }
    }

    /// `-{w}-q{q}-p{preset}.{codec}.{ext}`; the preset part only for codecs that take one.
    ///
    /// vp9 and av1 names have no `-p` segment at all, e.g. `-720-q30.vp9.webm`
    /// rather than `-720-q30-p.vp9.webm`. Tools that expect an empty `-p`
    /// segment will not match these names.
    pub fn transcode_suffix(
        &self,
        spec: &VideoConfiguration,
        codec: &VideoCodec,
        container: &FileOutputType,
    ) -> String {
        let preset = match (&spec.preset, codec.takes_preset()) {
            (Some(preset), true) => format!("-p{}", preset),
            _ => String::new(),
        };
        format!(
            "-{}-q{}{}.{}.{}",
            spec.max_width, spec.quality, preset, codec, container
        )
    }

    /// `output_root/subdir/stem{suffix}`
    pub fn output_path(&self, input: &InputFile, suffix: &str) -> PathBuf {
        self.output_root
            .join(&input.subdir)
            .join(format!("{}{}", input.stem(), suffix))
    }

    /// Like [`output_path`](Self::output_path), creating the parent directory.
    pub fn prepare_output_path(&self, input: &InputFile, suffix: &str) -> io::Result<PathBuf> {
        let path = self.output_path(input, suffix);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(path)
    }

    /// Object storage key for an output: the path below the output root with `/` separators.
    pub fn storage_key(&self, local: &Path) -> Option<String> {
        let relative = local.strip_prefix(&self.output_root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }

    /// `processed_root/subdir/filename`
    pub fn processed_path(&self, input: &InputFile) -> PathBuf {
        self.processed_root.join(&input.subdir).join(&input.filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(debug: bool) -> OutputLayout {
        OutputLayout::new(PathBuf::from("output"), PathBuf::from("processed"), debug)
    }

    fn photo() -> InputFile {
        InputFile::from_full_path(Path::new("/in"), Path::new("/in/sub/photo.jpg")).unwrap()
    }

    #[test]
    fn test_image_suffixes() {
        let spec = ImageConfiguration::new(800, 80, FileOutputType::Jpg);
        assert_eq!(layout(false).image_suffix(&spec), "-800.jpg");
        assert_eq!(layout(true).image_suffix(&spec), "-800-q80.jpg");
    }

    #[test]
    fn test_output_path_mirrors_subdir() {
        let path = layout(false).output_path(&photo(), "-800.jpg");
        assert_eq!(path, PathBuf::from("output/sub/photo-800.jpg"));
    }

    #[test]
    fn test_transcode_suffix_with_and_without_preset() {
        let l = layout(false);
        let mut spec = VideoConfiguration::new(720, 23).with_codec(VideoCodec::H264);
        spec.validate("video[0]").unwrap();
        assert_eq!(
            l.transcode_suffix(&spec, &VideoCodec::H264, &FileOutputType::Mp4),
            "-720-q23-pslow.h264.mp4"
        );

        let mut spec = VideoConfiguration::new(720, 30).with_codec(VideoCodec::Vp9);
        spec.validate("video[0]").unwrap();
        assert_eq!(
            l.transcode_suffix(&spec, &VideoCodec::Vp9, &FileOutputType::Webm),
            "-720-q30.vp9.webm"
        );
    }

    #[test]
    fn test_thumbnail_suffix_is_image_style() {
        let spec = VideoConfiguration::new(320, 4).with_format(FileOutputType::Jpg);
        assert_eq!(layout(false).thumbnail_suffix(&spec, &FileOutputType::Jpg), "-320.jpg");
        assert_eq!(layout(true).thumbnail_suffix(&spec, &FileOutputType::Jpg), "-320-q4.jpg");
    }

    #[test]
    fn test_storage_key_strips_output_root() {
        let l = layout(false);
        assert_eq!(
            l.storage_key(Path::new("output/sub/photo-800.jpg")),
            Some("sub/photo-800.jpg".to_string())
        );
        assert_eq!(l.storage_key(Path::new("elsewhere/photo.jpg")), None);
    }

    #[test]
    fn test_processed_path() {
        assert_eq!(
            layout(false).processed_path(&photo()),
            PathBuf::from("processed/sub/photo.jpg")
        );
    }

    #[test]
    fn test_prepare_output_path_creates_dirs() {
        let dir = tempfile::TempDir::new().unwrap();
        let l = OutputLayout::new(dir.path().join("out"), dir.path().join("done"), false);
        let path = l.prepare_output_path(&photo(), "-10.jpg").unwrap();
        assert!(path.parent().unwrap().is_dir());
        assert!(!path.exists());
    }
}
