//! Output media specifications and their compatibility rules.
//!
//! Every configured output is validated once, when the configuration is loaded.
//! Validation also fills in the defaults a spec may omit (container from codec,
//! codec from container, x26x preset) and rounds odd video widths up to even.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest accepted image encoder quality.
pub const IMAGE_QUALITY_MAX: u32 = 100;

/// Highest accepted video quantizer (CRF / qscale).
pub const VIDEO_QUALITY_MAX: u32 = 30;

/// Preset applied to h264/h265 outputs that don't name one.
pub const DEFAULT_X26X_PRESET: &str = "slow";

/// Broad category of a piece of media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Unknown,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
            MediaKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// File extension of an output file.
///
/// For images this is the image format, for videos the container.
/// Unrecognised names are kept as `Other` so validation can report them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FileOutputType {
    Jpg,
    Webp,
    Mp4,
    Webm,
    Other(String),
}

impl FileOutputType {
    pub fn as_str(&self) -> &str {
        match self {
            FileOutputType::Jpg => "jpg",
            FileOutputType::Webp => "webp",
            FileOutputType::Mp4 => "mp4",
            FileOutputType::Webm => "webm",
            FileOutputType::Other(s) => s,
        }
    }

    /// The kind of media this output format holds.
    pub fn media_kind(&self) -> MediaKind {
        match self {
            FileOutputType::Jpg | FileOutputType::Webp => MediaKind::Image,
            FileOutputType::Mp4 | FileOutputType::Webm => MediaKind::Video,
            FileOutputType::Other(_) => MediaKind::Unknown,
        }
    }
}

impl Default for FileOutputType {
    fn default() -> Self {
        FileOutputType::Jpg
    }
}

impl From<String> for FileOutputType {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "jpg" | "jpeg" => FileOutputType::Jpg,
            "webp" => FileOutputType::Webp,
            "mp4" => FileOutputType::Mp4,
            "webm" => FileOutputType::Webm,
            _ => FileOutputType::Other(s),
        }
    }
}

impl From<&str> for FileOutputType {
    fn from(s: &str) -> Self {
        FileOutputType::from(s.to_string())
    }
}

impl From<FileOutputType> for String {
    fn from(f: FileOutputType) -> Self {
        f.as_str().to_string()
    }
}

impl fmt::Display for FileOutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Codec used for a video transcode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VideoCodec {
    H264,
    H265,
    Vp9,
    Av1,
    Other(String),
}

impl VideoCodec {
    /// Every codec the pipeline can drive.
    pub fn known() -> [VideoCodec; 4] {
        [VideoCodec::H264, VideoCodec::H265, VideoCodec::Vp9, VideoCodec::Av1]
    }

    pub fn as_str(&self) -> &str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::H265 => "h265",
            VideoCodec::Vp9 => "vp9",
            VideoCodec::Av1 => "av1",
            VideoCodec::Other(s) => s,
        }
    }

    /// The one container this codec may be muxed into, `None` for unknown codecs.
    pub fn container(&self) -> Option<FileOutputType> {
        match self {
            VideoCodec::H264 | VideoCodec::H265 => Some(FileOutputType::Mp4),
            VideoCodec::Vp9 | VideoCodec::Av1 => Some(FileOutputType::Webm),
            VideoCodec::Other(_) => None,
        }
    }

    /// Codec used for a container when the spec names none.
    pub fn default_for(container: &FileOutputType) -> Option<VideoCodec> {
        match container {
            FileOutputType::Mp4 => Some(VideoCodec::H264),
            FileOutputType::Webm => Some(VideoCodec::Vp9),
            _ => None,
        }
    }

    /// Whether the encoder behind this codec understands `-preset`.
    pub fn takes_preset(&self) -> bool {
        matches!(self, VideoCodec::H264 | VideoCodec::H265)
    }
}

impl From<String> for VideoCodec {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "h264" => VideoCodec::H264,
            "h265" => VideoCodec::H265,
            "vp9" => VideoCodec::Vp9,
            "av1" => VideoCodec::Av1,
            _ => VideoCodec::Other(s),
        }
    }
}

impl From<&str> for VideoCodec {
    fn from(s: &str) -> Self {
        VideoCodec::from(s.to_string())
    }
}

impl From<VideoCodec> for String {
    fn from(c: VideoCodec) -> Self {
        c.as_str().to_string()
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when an output spec or filesystem setting is not usable.
///
/// `spec` names the offending entry, e.g. `image[1]`, `video[0]` or `fs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    InvalidConfiguration { spec: String, reason: String },
    UnknownMediaType { spec: String, format: String },
    UnknownCodec { spec: String, codec: String },
}

impl ValidationError {
    pub fn invalid(spec: &str, reason: impl Into<String>) -> Self {
        ValidationError::InvalidConfiguration {
            spec: spec.to_string(),
            reason: reason.into(),
        }
    }

    /// Name of the spec the error refers to.
    pub fn spec(&self) -> &str {
        match self {
            ValidationError::InvalidConfiguration { spec, .. }
            | ValidationError::UnknownMediaType { spec, .. }
            | ValidationError::UnknownCodec { spec, .. } => spec,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidConfiguration { spec, reason } => {
                write!(f, "invalid configuration {}: {}", spec, reason)
            }
            ValidationError::UnknownMediaType { spec, format } => {
                write!(f, "{}: unknown media type '{}'", spec, format)
            }
            ValidationError::UnknownCodec { spec, codec } => {
                write!(f, "{}: unknown video codec '{}'", spec, codec)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Output size, quality and format for one resized image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfiguration {
    pub max_width: u32,
    pub quality: u32,
    #[serde(default)]
    pub format: FileOutputType,
}

impl ImageConfiguration {
    pub fn new(max_width: u32, quality: u32, format: FileOutputType) -> Self {
        Self {
            max_width,
            quality,
            format,
        }
    }

    pub fn validate(&self, label: &str) -> Result<(), ValidationError> {
        if self.max_width == 0 {
            return Err(ValidationError::invalid(label, "max_width must be greater than 0"));
        }
        if self.quality == 0 || self.quality > IMAGE_QUALITY_MAX {
            return Err(ValidationError::invalid(
                label,
                format!(
                    "image quality should be between 1 and {} ({})",
                    IMAGE_QUALITY_MAX, self.quality
                ),
            ));
        }

        match self.format.media_kind() {
            MediaKind::Image => Ok(()),
            MediaKind::Video => Err(ValidationError::invalid(
                label,
                format!("image configuration cannot use video format '{}'", self.format),
            )),
            MediaKind::Unknown => Err(ValidationError::UnknownMediaType {
                spec: label.to_string(),
                format: self.format.to_string(),
            }),
        }
    }
}

/// Output size, quality, container and codec for one video output.
///
/// When `format` is an image format the output is a single-frame thumbnail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConfiguration {
    pub max_width: u32,
    pub quality: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<FileOutputType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<VideoCodec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
}

impl VideoConfiguration {
    pub fn new(max_width: u32, quality: u32) -> Self {
        Self {
            max_width,
            quality,
            format: None,
            codec: None,
            preset: None,
        }
    }

    pub fn with_format(mut self, format: FileOutputType) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_codec(mut self, codec: VideoCodec) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn with_preset(mut self, preset: &str) -> Self {
        self.preset = Some(preset.to_string());
        self
    }

    /// What this spec produces: a video (transcode) or an image (thumbnail).
    pub fn target_kind(&self) -> MediaKind {
        self.format
            .as_ref()
            .map(FileOutputType::media_kind)
            .unwrap_or(MediaKind::Unknown)
    }

    /// Validate and complete the spec.
    ///
    /// Fills in a missing container or codec, the default x26x preset, and
    /// bumps an odd `max_width` to the next even value. Running it on an
    /// already validated spec changes nothing.
    pub fn validate(&mut self, label: &str) -> Result<(), ValidationError> {
        if self.max_width == 0 {
            return Err(ValidationError::invalid(label, "max_width must be greater than 0"));
        }

        let format = match (&self.format, &self.codec) {
            (Some(format), _) => format.clone(),
            (None, Some(codec)) => codec.container().ok_or_else(|| ValidationError::UnknownCodec {
                spec: label.to_string(),
                codec: codec.to_string(),
            })?,
            (None, None) => {
                return Err(ValidationError::invalid(
                    label,
                    "video configuration needs a format or a codec",
                ))
            }
        };

        match format.media_kind() {
            MediaKind::Unknown => {
                return Err(ValidationError::UnknownMediaType {
                    spec: label.to_string(),
                    format: format.to_string(),
                })
            }
            MediaKind::Image => {
                if let Some(codec) = &self.codec {
                    return Err(ValidationError::invalid(
                        label,
                        format!("codec '{}' cannot be used with image format '{}'", codec, format),
                    ));
                }
            }
            MediaKind::Video => {
                let codec = match &self.codec {
                    Some(codec) => codec.clone(),
                    None => VideoCodec::default_for(&format).ok_or_else(|| {
                        ValidationError::invalid(label, format!("no default codec for '{}'", format))
                    })?,
                };
                let expected = codec.container().ok_or_else(|| ValidationError::UnknownCodec {
                    spec: label.to_string(),
                    codec: codec.to_string(),
                })?;
                if expected != format {
                    return Err(ValidationError::invalid(
                        label,
                        format!(
                            "codec '{}' cannot be used with container '{}' (use {})",
                            codec, format, expected
                        ),
                    ));
                }
                if codec.takes_preset() && self.preset.is_none() {
                    self.preset = Some(DEFAULT_X26X_PRESET.to_string());
                }
                self.codec = Some(codec);
            }
        }
        self.format = Some(format);

        if self.quality == 0 || self.quality > VIDEO_QUALITY_MAX {
            return Err(ValidationError::invalid(
                label,
                format!(
                    "video quality should be between 1 and {} ({})",
                    VIDEO_QUALITY_MAX, self.quality
                ),
            ));
        }

        // yuv420 output needs even dimensions
        if self.max_width % 2 != 0 {
            self.max_width = self.max_width.checked_add(1).ok_or_else(|| {
                ValidationError::invalid(label, format!("max_width too large ({})", self.max_width))
            })?;
        }

        Ok(())
    }
}

/// Validate every image and video spec, labelling errors by position.
pub fn validate_specs(
    images: &[ImageConfiguration],
    videos: &mut [VideoConfiguration],
) -> Result<(), ValidationError> {
    for (i, spec) in images.iter().enumerate() {
        spec.validate(&format!("image[{}]", i))?;
    }
    for (i, spec) in videos.iter_mut().enumerate() {
        spec.validate(&format!("video[{}]", i))?;
    }
    Ok(())
}
