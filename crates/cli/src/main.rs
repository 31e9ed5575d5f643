//! CLI entry point for pixel-slicer
//!
//! Loads configuration, applies command line overrides and runs the pipeline.

use clap::Parser;
use indicatif::ProgressStyle;
use pixel_slicer::{Config, ProgressObserver, Slicer};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// File written by `--sample-config`.
const SAMPLE_CONFIG_FILE: &str = "sample-config.toml";

/// pixel-slicer - resize images and transcode videos into web-ready variants
#[derive(Parser, Debug)]
#[command(name = "pixel-slicer")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (defaults to ./config.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input directory to scan
    #[arg(long = "dir")]
    input_dir: Option<PathBuf>,

    /// Directory outputs are written to
    #[arg(long = "outputdir")]
    output_dir: Option<PathBuf>,

    /// Directory processed originals are moved to
    #[arg(long = "processeddir")]
    processed_dir: Option<PathBuf>,

    /// Move originals to the processed directory after conversion
    #[arg(long)]
    move_processed: bool,

    /// Keep watching the input directory for new files
    #[arg(long)]
    watch: bool,

    /// Number of workers (0 = half the logical cores)
    #[arg(long)]
    workers: Option<u32>,

    /// Upload outputs to object storage
    #[arg(long = "enable-s3")]
    enable_s3: bool,

    /// Include quality details in output file names
    #[arg(long)]
    debug_filenames: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// Write the effective configuration to sample-config.toml and exit
    #[arg(long)]
    sample_config: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Flags override file and environment values; unset flags leave them alone.
    fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.input_dir {
            config.fs.input_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.fs.output_dir = dir.clone();
        }
        if let Some(dir) = &self.processed_dir {
            config.fs.processed_dir = dir.clone();
        }
        if self.move_processed {
            config.fs.move_processed = true;
        }
        if self.watch {
            config.fs.watch = true;
        }
        if let Some(workers) = self.workers {
            config.pool.workers = workers;
        }
        if self.enable_s3 {
            config.s3.enabled = true;
        }
        if self.debug_filenames {
            config.debug_filenames = true;
        }
    }
}

fn init_tracing(verbose: bool) {
    // Respect RUST_LOG if set
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if verbose {
            "pixel_slicer=debug,pixel_slicer_cli=debug".to_string()
        } else {
            "pixel_slicer=info,pixel_slicer_cli=info".to_string()
        }
    });

    // Log lines go through the indicatif writer so they don't tear the bar.
    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(EnvFilter::new(&env_filter))
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .init();
}

/// Job progress shown as a bar on the run span.
struct SpanProgress {
    span: Span,
}

impl SpanProgress {
    fn new(span: Span) -> Self {
        let style = ProgressStyle::with_template(
            "{spinner} [{elapsed_precise}] {wide_bar} {pos}/{len} jobs",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        span.pb_set_style(&style);
        span.pb_set_length(0);
        Self { span }
    }
}

impl ProgressObserver for SpanProgress {
    fn jobs_queued(&self, count: u64) {
        self.span.pb_inc_length(count);
    }

    fn job_finished(&self) {
        self.span.pb_inc(1);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = match Config::load_or_default(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    args.apply(&mut config);

    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    if args.print_config || args.sample_config {
        let rendered = match config.to_toml_string() {
            Ok(rendered) => rendered,
            Err(e) => {
                tracing::error!("{e}");
                return ExitCode::FAILURE;
            }
        };
        if args.print_config {
            print!("{rendered}");
        }
        if args.sample_config {
            if let Err(e) = std::fs::write(SAMPLE_CONFIG_FILE, rendered) {
                tracing::error!("Failed to write {SAMPLE_CONFIG_FILE}: {e}");
                return ExitCode::FAILURE;
            }
            tracing::info!("Wrote {SAMPLE_CONFIG_FILE}");
        }
        return ExitCode::SUCCESS;
    }

    let run_span = tracing::info_span!("slicing");
    let progress = Arc::new(SpanProgress::new(run_span.clone()));
    let slicer = match Slicer::new(config) {
        Ok(slicer) => slicer.with_progress(progress),
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing queued work");
            ctrl_c.cancel();
        }
    });

    match slicer.run(shutdown).instrument(run_span).await {
        Ok(summary) if summary.is_success() => ExitCode::SUCCESS,
        Ok(summary) => {
            tracing::error!(failed = summary.failed, "Some jobs failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "pixel-slicer",
            "--dir",
            "/srv/in",
            "--outputdir",
            "/srv/out",
            "--move-processed",
            "--watch",
            "--workers",
            "3",
            "--debug-filenames",
        ]);
        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.fs.input_dir, PathBuf::from("/srv/in"));
        assert_eq!(config.fs.output_dir, PathBuf::from("/srv/out"));
        assert_eq!(config.fs.processed_dir, PathBuf::from("processed"));
        assert!(config.fs.move_processed);
        assert!(config.fs.watch);
        assert_eq!(config.pool.workers, 3);
        assert!(config.debug_filenames);
        assert!(!config.s3.enabled);
    }

    #[test]
    fn test_absent_flags_keep_config() {
        let args = Args::parse_from(["pixel-slicer"]);
        let mut config = Config::default();
        config.fs.watch = true;
        config.pool.workers = 7;
        args.apply(&mut config);

        assert!(config.fs.watch);
        assert_eq!(config.pool.workers, 7);
        assert!(args.config.is_none());
    }
}
