//! ffmpeg external-process backend
//!
//! Every codec has its own argument builder returning one `Command` per
//! pass. Scaling always uses `scale={width}:-2` so the height keeps the
//! aspect ratio and stays even.

use super::{run_command, EncodeError, ImageEncoder, VideoEncoder, WorkResult};
use crate::jobs::InputFile;
use crate::paths::OutputLayout;
use pixel_slicer_config::{
    FileOutputType, ImageConfiguration, MediaKind, VideoCodec, VideoConfiguration,
    DEFAULT_X26X_PRESET, IMAGE_QUALITY_MAX,
};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// `-cpu-used` for libaom; favours speed over a small quality loss.
const AV1_CPU_USED: &str = "8";

/// Runs ffmpeg for videos and, when configured, images.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    program: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }
}

fn base_command(program: &Path) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(["-nostdin", "-hide_banner", "-loglevel", "error", "-y"]);
    cmd
}

fn scale_filter(width: u32) -> String {
    format!("scale={}:-2", width)
}

/// Pass log prefix shared by both passes of a two-pass encode.
fn pass_log_prefix(output: &Path) -> OsString {
    let mut prefix = output.as_os_str().to_owned();
    prefix.push(".log");
    prefix
}

fn x26x_command(
    program: &Path,
    encoder: &str,
    input: &Path,
    output: &Path,
    spec: &VideoConfiguration,
) -> Command {
    let preset = spec.preset.as_deref().unwrap_or(DEFAULT_X26X_PRESET);
    let mut cmd = base_command(program);
    cmd.arg("-i").arg(input);
    cmd.arg("-vf").arg(scale_filter(spec.max_width));
    cmd.arg("-c:v").arg(encoder);
    cmd.arg("-crf").arg(spec.quality.to_string());
    cmd.arg("-preset").arg(preset);
    cmd.arg("-movflags").arg("+faststart");
    cmd.arg(output);
    cmd
}

/// One-pass libx264 with CRF, preset and `+faststart`.
pub fn build_h264_command(
    program: &Path,
    input: &Path,
    output: &Path,
    spec: &VideoConfiguration,
) -> Command {
    x26x_command(program, "libx264", input, output, spec)
}

/// One-pass libx265 with CRF, preset and `+faststart`.
pub fn build_h265_command(
    program: &Path,
    input: &Path,
    output: &Path,
    spec: &VideoConfiguration,
) -> Command {
    x26x_command(program, "libx265", input, output, spec)
}

fn two_pass_command(
    program: &Path,
    encoder: &str,
    input: &Path,
    output: &Path,
    spec: &VideoConfiguration,
    pass: u8,
) -> Command {
    let mut cmd = base_command(program);
    cmd.arg("-i").arg(input);
    cmd.arg("-vf").arg(scale_filter(spec.max_width));
    cmd.arg("-c:v").arg(encoder);
    cmd.arg("-b:v").arg("0");
    cmd.arg("-crf").arg(spec.quality.to_string());
    cmd.arg("-pass").arg(pass.to_string());
    cmd.arg("-passlogfile").arg(pass_log_prefix(output));
    cmd
}

/// Two-pass constant-quality libvpx-vp9; audio is skipped in the first pass.
pub fn build_vp9_commands(
    program: &Path,
    input: &Path,
    output: &Path,
    spec: &VideoConfiguration,
) -> Vec<Command> {
    let mut first = two_pass_command(program, "libvpx-vp9", input, output, spec, 1);
    first.arg("-an").arg(output);

    let mut second = two_pass_command(program, "libvpx-vp9", input, output, spec, 2);
    second.arg(output);

    vec![first, second]
}

/// Two-pass libaom-av1 at `-cpu-used 8`, libopus audio in the second pass.
pub fn build_av1_commands(
    program: &Path,
    input: &Path,
    output: &Path,
    spec: &VideoConfiguration,
) -> Vec<Command> {
    let mut first = two_pass_command(program, "libaom-av1", input, output, spec, 1);
    first.arg("-cpu-used").arg(AV1_CPU_USED);
    first.arg("-an").arg(output);

    let mut second = two_pass_command(program, "libaom-av1", input, output, spec, 2);
    second.arg("-cpu-used").arg(AV1_CPU_USED);
    second.arg("-c:a").arg("libopus");
    second.arg(output);

    vec![first, second]
}

/// Commands for transcoding `input` into `output`, one per pass.
pub fn build_transcode_commands(
    program: &Path,
    input: &Path,
    output: &Path,
    spec: &VideoConfiguration,
    codec: &VideoCodec,
) -> Result<Vec<Command>, EncodeError> {
    match codec {
        VideoCodec::H264 => Ok(vec![build_h264_command(program, input, output, spec)]),
        VideoCodec::H265 => Ok(vec![build_h265_command(program, input, output, spec)]),
        VideoCodec::Vp9 => Ok(build_vp9_commands(program, input, output, spec)),
        VideoCodec::Av1 => Ok(build_av1_commands(program, input, output, spec)),
        VideoCodec::Other(name) => Err(EncodeError::Unvalidated(format!(
            "unknown codec '{}'",
            name
        ))),
    }
}

/// First frame at t=0, scaled, no audio, `-q:v` set to the spec quality.
pub fn build_thumbnail_command(
    program: &Path,
    input: &Path,
    output: &Path,
    spec: &VideoConfiguration,
) -> Command {
    let mut cmd = base_command(program);
    cmd.arg("-ss").arg("0");
    cmd.arg("-i").arg(input);
    cmd.arg("-vframes").arg("1");
    cmd.arg("-an");
    cmd.arg("-vf").arg(scale_filter(spec.max_width));
    cmd.arg("-q:v").arg(spec.quality.to_string());
    cmd.arg(output);
    cmd
}

/// Map 1..=100 (best) onto mjpeg's qscale 31..=2 (best).
fn jpeg_qscale(quality: u32) -> u32 {
    let quality = quality.clamp(1, IMAGE_QUALITY_MAX);
    2 + ((IMAGE_QUALITY_MAX - quality) * 29 + 49) / 99
}

/// One ffmpeg process that decodes `input` once and writes every output.
///
/// The decoded frame is fanned out with a `split` filter; each branch is
/// scaled and mapped to its own output file.
pub fn build_image_resize_command(
    program: &Path,
    input: &Path,
    outputs: &[(&ImageConfiguration, PathBuf)],
) -> Command {
    let labels: String = (0..outputs.len()).map(|i| format!("[s{}]", i)).collect();
    let mut graph = format!("[0:v]split={}{}", outputs.len(), labels);
    for (i, (spec, _)) in outputs.iter().enumerate() {
        graph.push_str(&format!(";[s{}]{}[o{}]", i, scale_filter(spec.max_width), i));
    }

    let mut cmd = base_command(program);
    cmd.arg("-i").arg(input);
    cmd.arg("-filter_complex").arg(graph);
    for (i, (spec, path)) in outputs.iter().enumerate() {
        cmd.arg("-map").arg(format!("[o{}]", i));
        cmd.arg("-frames:v").arg("1");
        match spec.format {
            FileOutputType::Webp => {
                cmd.arg("-c:v").arg("libwebp");
                cmd.arg("-quality").arg(spec.quality.to_string());
            }
            _ => {
                cmd.arg("-q:v").arg(jpeg_qscale(spec.quality).to_string());
            }
        }
        cmd.arg(path);
    }
    cmd
}

/// Remove two-pass statistics files; missing files are fine.
fn remove_pass_logs(output: &Path) {
    let mut log = pass_log_prefix(output);
    log.push("-0.log");
    let _ = fs::remove_file(PathBuf::from(log));
}

fn ensure_written(path: PathBuf) -> Result<PathBuf, EncodeError> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(EncodeError::MissingOutput(path))
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn transcode(
        &self,
        input: &InputFile,
        spec: &VideoConfiguration,
        layout: &OutputLayout,
    ) -> Result<PathBuf, EncodeError> {
        let (codec, container) = match (&spec.codec, &spec.format) {
            (Some(codec), Some(container)) => (codec, container),
            _ => {
                return Err(EncodeError::Unvalidated(
                    "video spec needs both codec and format".to_string(),
                ))
            }
        };

        let output =
            layout.prepare_output_path(input, &layout.transcode_suffix(spec, codec, container))?;
        let commands = build_transcode_commands(&self.program, &input.path, &output, spec, codec)?;
        let passes = commands.len();

        let outcome = commands.into_iter().try_for_each(run_command);
        if passes > 1 {
            remove_pass_logs(&output);
        }
        outcome?;

        ensure_written(output)
    }

    fn thumbnail(
        &self,
        input: &InputFile,
        spec: &VideoConfiguration,
        layout: &OutputLayout,
    ) -> Result<PathBuf, EncodeError> {
        let format = match &spec.format {
            Some(format) if format.media_kind() == MediaKind::Image => format,
            _ => {
                return Err(EncodeError::Unvalidated(
                    "thumbnail spec needs an image format".to_string(),
                ))
            }
        };

        let output = layout.prepare_output_path(input, &layout.thumbnail_suffix(spec, format))?;
        run_command(build_thumbnail_command(&self.program, &input.path, &output, spec))?;
        ensure_written(output)
    }
}

impl ImageEncoder for FfmpegEncoder {
    fn resize(
        &self,
        input: &InputFile,
        specs: &[ImageConfiguration],
        layout: &OutputLayout,
    ) -> WorkResult {
        let mut result = WorkResult::default();
        let mut outputs = Vec::new();
        let mut labels = Vec::new();

        for (i, spec) in specs.iter().enumerate() {
            let label = format!("image[{}]", i);
            if !matches!(spec.format, FileOutputType::Jpg | FileOutputType::Webp) {
                result.record(label, Err(EncodeError::UnsupportedFormat(spec.format.to_string())));
                continue;
            }
            match layout.prepare_output_path(input, &layout.image_suffix(spec)) {
                Ok(path) => {
                    outputs.push((spec, path));
                    labels.push(label);
                }
                Err(e) => result.record(label, Err(e.into())),
            }
        }

        if outputs.is_empty() {
            return result;
        }

        let cmd = build_image_resize_command(&self.program, &input.path, &outputs);
        match run_command(cmd) {
            Ok(()) => {
                for (label, (_, path)) in labels.into_iter().zip(outputs) {
                    result.record(label, ensure_written(path));
                }
            }
            Err(e) => {
                let reason = e.to_string();
                for label in labels {
                    result.record(label, Err(EncodeError::Shared(reason.clone())));
                }
            }
        }
        result
    }
}
