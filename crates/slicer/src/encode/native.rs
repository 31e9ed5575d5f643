//! In-process image resizing with the `image` crate.
//!
//! The source is decoded once and resized with Lanczos3 for each output.
//! JPEG honours the configured quality; WebP output is lossless.

use super::{EncodeError, ImageEncoder, WorkResult};
use crate::jobs::InputFile;
use crate::paths::OutputLayout;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use pixel_slicer_config::{FileOutputType, ImageConfiguration, IMAGE_QUALITY_MAX};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Resizes images without external tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeImageEncoder;

/// Output dimensions for a source of `width`×`height` capped at `max_width`.
///
/// Images are never upscaled. Height keeps the aspect ratio and is at least 1.
pub fn target_dimensions(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if width <= max_width || width == 0 {
        return (width, height);
    }
    let scaled = (height as u64 * max_width as u64 + width as u64 / 2) / width as u64;
    (max_width, scaled.max(1) as u32)
}

fn write_image(
    img: &DynamicImage,
    path: &Path,
    spec: &ImageConfiguration,
) -> Result<(), EncodeError> {
    let writer = BufWriter::new(File::create(path)?);
    let written = match spec.format {
        FileOutputType::Jpg => {
            let quality = spec.quality.min(IMAGE_QUALITY_MAX) as u8;
            DynamicImage::ImageRgb8(img.to_rgb8())
                .write_with_encoder(JpegEncoder::new_with_quality(writer, quality))
        }
        FileOutputType::Webp => {
            DynamicImage::ImageRgba8(img.to_rgba8())
                .write_with_encoder(WebPEncoder::new_lossless(writer))
        }
        ref other => return Err(EncodeError::UnsupportedFormat(other.to_string())),
    };
    written.map_err(|source| EncodeError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn resize_one(
    img: &DynamicImage,
    input: &InputFile,
    spec: &ImageConfiguration,
    layout: &OutputLayout,
) -> Result<PathBuf, EncodeError> {
    if !matches!(spec.format, FileOutputType::Jpg | FileOutputType::Webp) {
        return Err(EncodeError::UnsupportedFormat(spec.format.to_string()));
    }
    let (width, height) = target_dimensions(img.width(), img.height(), spec.max_width);
    let resized = if width == img.width() {
        img.clone()
    } else {
        img.resize_exact(width, height, FilterType::Lanczos3)
    };

    let path = layout.prepare_output_path(input, &layout.image_suffix(spec))?;
    write_image(&resized, &path, spec)?;
    Ok(path)
}

impl ImageEncoder for NativeImageEncoder {
    fn resize(
        &self,
        input: &InputFile,
        specs: &[ImageConfiguration],
        layout: &OutputLayout,
    ) -> WorkResult {
        let mut result = WorkResult::default();

        let img = match image::open(&input.path) {
            Ok(img) => img,
            Err(e) => {
                for i in 0..specs.len() {
                    result.record(
                        format!("image[{}]", i),
                        Err(EncodeError::Decode {
                            path: input.path.clone(),
                            reason: e.to_string(),
                        }),
                    );
                }
                return result;
            }
        };

        for (i, spec) in specs.iter().enumerate() {
            result.record(format!("image[{}]", i), resize_one(&img, input, spec, layout));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn write_source(dir: &Path, name: &str, width: u32, height: u32) -> InputFile {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let path = dir.join(name);
        img.save(&path).unwrap();
        InputFile::from_full_path(dir, &path).unwrap()
    }

    #[test]
    fn test_resize_800x600_to_500() {
        let dir = TempDir::new().unwrap();
        let input_root = dir.path().join("input");
        std::fs::create_dir(&input_root).unwrap();
        let input = write_source(&input_root, "a.jpg", 800, 600);
        let layout =
            OutputLayout::new(dir.path().join("output"), dir.path().join("processed"), false);

        let specs = vec![ImageConfiguration::new(500, 80, FileOutputType::Jpg)];
        let result = NativeImageEncoder.resize(&input, &specs, &layout);

        assert!(result.is_success(), "{:?}", result.failures);
        let expected = dir.path().join("output/a-500.jpg");
        assert_eq!(result.produced, vec![expected.clone()]);

        let out = image::open(&expected).unwrap();
        assert_eq!((out.width(), out.height()), (500, 375));
    }

    #[test]
    fn test_webp_and_no_upscale() {
        let dir = TempDir::new().unwrap();
        let input = write_source(dir.path(), "small.png", 120, 80);
        let layout = OutputLayout::new(dir.path().join("out"), dir.path().join("done"), false);

        let specs = vec![ImageConfiguration::new(500, 80, FileOutputType::Webp)];
        let result = NativeImageEncoder.resize(&input, &specs, &layout);

        assert!(result.is_success(), "{:?}", result.failures);
        let out = image::open(&result.produced[0]).unwrap();
        assert_eq!((out.width(), out.height()), (120, 80));
    }

    #[test]
    fn test_bad_source_fails_every_spec() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not an image").unwrap();
        let input = InputFile::from_full_path(dir.path(), &path).unwrap();
        let layout = OutputLayout::new(dir.path().join("out"), dir.path().join("done"), false);

        let specs = vec![
            ImageConfiguration::new(500, 80, FileOutputType::Jpg),
            ImageConfiguration::new(200, 80, FileOutputType::Webp),
        ];
        let result = NativeImageEncoder.resize(&input, &specs, &layout);

        assert!(result.produced.is_empty());
        assert_eq!(result.failures.len(), 2);
        assert!(matches!(result.failures[1].error, EncodeError::Decode { .. }));
    }

    #[test]
    fn test_one_bad_spec_keeps_the_good_output() {
        let dir = TempDir::new().unwrap();
        let input = write_source(dir.path(), "a.png", 64, 64);
        let layout = OutputLayout::new(dir.path().join("out"), dir.path().join("done"), false);

        let specs = vec![
            ImageConfiguration::new(32, 80, FileOutputType::Mp4),
            ImageConfiguration::new(32, 80, FileOutputType::Jpg),
        ];
        let result = NativeImageEncoder.resize(&input, &specs, &layout);

        assert_eq!(result.produced, vec![dir.path().join("out/a-32.jpg")]);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].spec, "image[0]");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_target_dimensions(width in 1u32..10_000, height in 1u32..10_000, max in 1u32..5_000) {
            let (w, h) = target_dimensions(width, height, max);
            prop_assert!(w <= width);
            prop_assert!(h >= 1);
            if width <= max {
                prop_assert_eq!((w, h), (width, height));
            } else {
                prop_assert_eq!(w, max);
            }
        }
    }
}
