//! Core configuration structures and loading logic

use crate::media::{
    validate_specs, FileOutputType, ImageConfiguration, ValidationError, VideoConfiguration,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Config file picked up from the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// TOML serialization error
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Serialize(e) => write!(f, "Failed to serialize config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(e: toml::ser::Error) -> Self {
        ConfigError::Serialize(e)
    }
}

/// Filesystem layout and discovery settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FsConfig {
    /// Directory scanned (and optionally watched) for media
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    /// Root that output files are written under, mirroring the input tree
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Root that originals are moved to once processed
    #[serde(default = "default_processed_dir")]
    pub processed_dir: PathBuf,
    /// Move originals into `processed_dir` after a successful job
    #[serde(default)]
    pub move_processed: bool,
    /// Keep watching `input_dir` for new files after the initial scan
    #[serde(default)]
    pub watch: bool,
    /// Interval used to decide a newly created file has finished being written
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("input")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_processed_dir() -> PathBuf {
    PathBuf::from("processed")
}

fn default_settle_ms() -> u64 {
    1000
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
            processed_dir: default_processed_dir(),
            move_processed: false,
            watch: false,
            settle_ms: default_settle_ms(),
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Number of workers (0 = half of the logical cores)
    #[serde(default)]
    pub workers: u32,
    /// Capacity of the bounded job queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    2048
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Which implementation resizes images
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageBackend {
    /// In-process decoding and resampling
    #[default]
    Native,
    /// A single ffmpeg process per image
    Ffmpeg,
}

/// Encoder selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    #[serde(default)]
    pub image_backend: ImageBackend,
    /// ffmpeg binary used for video (and for images with the ffmpeg backend)
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            image_backend: ImageBackend::default(),
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}

/// Object storage upload settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct S3Config {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint_url: String,
    /// Signing region; empty means `us-east-1`
    #[serde(default)]
    pub region: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Static credentials. Requests are sent unsigned when both are empty.
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
}

/// Region used for signing when `s3.region` is empty.
pub const DEFAULT_S3_REGION: &str = "us-east-1";

impl S3Config {
    /// Whether uploads are signed.
    pub fn has_credentials(&self) -> bool {
        !self.access_key_id.is_empty() && !self.secret_access_key.is_empty()
    }

    pub fn signing_region(&self) -> &str {
        if self.region.is_empty() {
            DEFAULT_S3_REGION
        } else {
            &self.region
        }
    }
}

fn default_bucket() -> String {
    "pixelslicer".to_string()
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint_url: String::new(),
            region: String::new(),
            bucket: default_bucket(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
        }
    }
}

fn default_image_configurations() -> Vec<ImageConfiguration> {
    vec![
        ImageConfiguration::new(500, 80, FileOutputType::Jpg),
        ImageConfiguration::new(500, 80, FileOutputType::Webp),
        ImageConfiguration::new(2000, 80, FileOutputType::Jpg),
        ImageConfiguration::new(2000, 80, FileOutputType::Webp),
    ]
}

fn default_video_configurations() -> Vec<VideoConfiguration> {
    vec![
        VideoConfiguration::new(480, 23).with_format(FileOutputType::Mp4),
        VideoConfiguration::new(720, 23).with_format(FileOutputType::Mp4),
    ]
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Include quality details in generated file names
    #[serde(default)]
    pub debug_filenames: bool,
    #[serde(default)]
    pub fs: FsConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub s3: S3Config,
    #[serde(rename = "image", default = "default_image_configurations")]
    pub image_configurations: Vec<ImageConfiguration>,
    #[serde(rename = "video", default = "default_video_configurations")]
    pub video_configurations: Vec<VideoConfiguration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug_filenames: false,
            fs: FsConfig::default(),
            pool: PoolConfig::default(),
            encoder: EncoderConfig::default(),
            s3: S3Config::default(),
            image_configurations: default_image_configurations(),
            video_configurations: default_video_configurations(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing sections and fields fall back to their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Render the configuration as TOML, e.g. for `--sample-config`
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - PIXEL_SLICER_INPUT_DIR -> fs.input_dir
    /// - PIXEL_SLICER_OUTPUT_DIR -> fs.output_dir
    /// - PIXEL_SLICER_PROCESSED_DIR -> fs.processed_dir
    /// - PIXEL_SLICER_MOVE_PROCESSED -> fs.move_processed
    /// - PIXEL_SLICER_WATCH -> fs.watch
    /// - PIXEL_SLICER_WORKERS -> pool.workers
    /// - PIXEL_SLICER_S3_ENABLED -> s3.enabled
    /// - PIXEL_SLICER_S3_ENDPOINT -> s3.endpoint_url
    /// - PIXEL_SLICER_S3_REGION -> s3.region
    /// - PIXEL_SLICER_S3_BUCKET -> s3.bucket
    /// - PIXEL_SLICER_S3_ACCESS_KEY_ID -> s3.access_key_id
    /// - PIXEL_SLICER_S3_SECRET_ACCESS_KEY -> s3.secret_access_key
    /// - PIXEL_SLICER_DEBUG_FILENAMES -> debug_filenames
    /// - PIXEL_SLICER_FFMPEG -> encoder.ffmpeg_path
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("PIXEL_SLICER_INPUT_DIR") {
            self.fs.input_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("PIXEL_SLICER_OUTPUT_DIR") {
            self.fs.output_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("PIXEL_SLICER_PROCESSED_DIR") {
            self.fs.processed_dir = PathBuf::from(val);
        }
        if let Some(flag) = env_flag("PIXEL_SLICER_MOVE_PROCESSED") {
            self.fs.move_processed = flag;
        }
        if let Some(flag) = env_flag("PIXEL_SLICER_WATCH") {
            self.fs.watch = flag;
        }
        if let Ok(val) = env::var("PIXEL_SLICER_WORKERS") {
            if let Ok(workers) = val.parse::<u32>() {
                self.pool.workers = workers;
            }
        }
        if let Some(flag) = env_flag("PIXEL_SLICER_S3_ENABLED") {
            self.s3.enabled = flag;
        }
        if let Ok(val) = env::var("PIXEL_SLICER_S3_ENDPOINT") {
            self.s3.endpoint_url = val;
        }
        if let Ok(val) = env::var("PIXEL_SLICER_S3_REGION") {
            self.s3.region = val;
        }
        if let Ok(val) = env::var("PIXEL_SLICER_S3_BUCKET") {
            self.s3.bucket = val;
        }
        if let Ok(val) = env::var("PIXEL_SLICER_S3_ACCESS_KEY_ID") {
            self.s3.access_key_id = val;
        }
        if let Ok(val) = env::var("PIXEL_SLICER_S3_SECRET_ACCESS_KEY") {
            self.s3.secret_access_key = val;
        }
        if let Some(flag) = env_flag("PIXEL_SLICER_DEBUG_FILENAMES") {
            self.debug_filenames = flag;
        }
        if let Ok(val) = env::var("PIXEL_SLICER_FFMPEG") {
            self.encoder.ffmpeg_path = PathBuf::from(val);
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from `path`, or from `./config.toml` if present, or use defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::load(local);
        }
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }

    /// Check the configuration and complete every output spec.
    ///
    /// Must succeed before any job is started.
    pub fn validate(&mut self) -> Result<(), ValidationError> {
        let fs = &self.fs;
        if fs.input_dir.as_os_str().is_empty() {
            return Err(ValidationError::invalid("fs", "no input dir supplied"));
        }
        if fs.output_dir.as_os_str().is_empty() {
            return Err(ValidationError::invalid("fs", "no output dir supplied"));
        }
        if fs.move_processed && absolutize(&fs.input_dir) == absolutize(&fs.processed_dir) {
            return Err(ValidationError::invalid(
                "fs",
                format!(
                    "input dir '{}' cannot match processed dir '{}'",
                    fs.input_dir.display(),
                    fs.processed_dir.display()
                ),
            ));
        }
        if fs.watch && !fs.move_processed {
            return Err(ValidationError::invalid(
                "fs",
                "watch requires move_processed, otherwise files are processed repeatedly",
            ));
        }
        if self.pool.queue_capacity == 0 {
            return Err(ValidationError::invalid("pool", "queue_capacity must be at least 1"));
        }
        if self.s3.enabled && (self.s3.endpoint_url.is_empty() || self.s3.bucket.is_empty()) {
            return Err(ValidationError::invalid(
                "s3",
                "upload is enabled but endpoint_url or bucket is empty",
            ));
        }
        if self.s3.access_key_id.is_empty() != self.s3.secret_access_key.is_empty() {
            return Err(ValidationError::invalid(
                "s3",
                "access_key_id and secret_access_key must be set together",
            ));
        }

        validate_specs(&self.image_configurations, &mut self.video_configurations)
    }
}

/// Accept "true", "1", "yes" as true; "false", "0", "no" as false
fn env_flag(name: &str) -> Option<bool> {
    let val = env::var(name).ok()?;
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
