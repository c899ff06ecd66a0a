//! The `sl0thifier process` command.

mod setup;
mod summary;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Args, ValueEnum};
use sl0thifier_core::{BackgroundColor, BatchCoordinator, Config, JobResult};

/// Arguments for the `process` command.
///
/// Unset options fall back to the `[job]` and `[processing]` config sections.
#[derive(Args, Debug, Default)]
pub struct ProcessArgs {
    /// Image file or directory to process
    #[arg(required = true)]
    pub input: PathBuf,

    /// Output width in pixels
    #[arg(long)]
    pub width: Option<u32>,

    /// Output height in pixels
    #[arg(long)]
    pub height: Option<u32>,

    /// Real-ESRGAN model name (see `sl0thifier models list`)
    #[arg(short = 'm', long)]
    pub model_name: Option<String>,

    /// CLAHE clip limit (0.1 - 5.0)
    #[arg(long)]
    pub clip_limit: Option<f32>,

    /// CLAHE tile grid size (2 - 16)
    #[arg(long)]
    pub tile_size: Option<u32>,

    /// Cut the subject out of its background
    #[arg(long)]
    pub remove_background: bool,

    /// Color placed behind the subject after background removal
    #[arg(long, value_enum)]
    pub background_color: Option<BackgroundArg>,

    /// Skip face restoration
    #[arg(long)]
    pub no_face_restore: bool,

    /// Output directory (defaults to ./sl0thified_<width>-<height>)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Output image format
    #[arg(short, long, value_enum)]
    pub format: Option<FormatArg>,

    /// Number of images processed in parallel (0 = one per core)
    #[arg(short, long)]
    pub parallel: Option<usize>,

    /// Descend into subdirectories
    #[arg(short, long)]
    pub recursive: bool,

    /// Write the batch summary as JSON to this file
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// Background color choices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackgroundArg {
    /// Keep transparency
    None,
    White,
    Black,
    Green,
}

impl From<BackgroundArg> for BackgroundColor {
    fn from(arg: BackgroundArg) -> Self {
        match arg {
            BackgroundArg::None => BackgroundColor::None,
            BackgroundArg::White => BackgroundColor::White,
            BackgroundArg::Black => BackgroundColor::Black,
            BackgroundArg::Green => BackgroundColor::Green,
        }
    }
}

/// Output format choices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Png,
    Webp,
    Jpeg,
}

impl std::fmt::Display for FormatArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatArg::Png => write!(f, "png"),
            FormatArg::Webp => write!(f, "webp"),
            FormatArg::Jpeg => write!(f, "jpeg"),
        }
    }
}

/// Execute the process command.
///
/// Fails when no image in the batch was enhanced successfully.
pub async fn execute(args: ProcessArgs, config: Config) -> anyhow::Result<()> {
    let (config, options) = setup::apply(&args, config)?;
    let coordinator = BatchCoordinator::from_config(config);

    let files = coordinator.discover(&args.input)?;
    if files.is_empty() {
        anyhow::bail!(
            "No supported image files found at {:?}\n\n  Hint: supported formats are {}.",
            args.input,
            coordinator.config().processing.supported_formats.join(", ")
        );
    }
    tracing::info!("Found {} image(s) to process", files.len());

    let cancel = coordinator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted: letting running stages finish, then stopping");
            cancel.cancel();
        }
    });

    let progress = summary::create_progress_bar(files.len() as u64)?;
    let bar = progress.clone();
    let start = Instant::now();
    let report = coordinator
        .run_files(&files, &options, move |outcome| {
            bar.inc(1);
            if let JobResult::Failed(failure) = &outcome.result {
                bar.println(format!(
                    "  failed: {} at {}: {}",
                    outcome.job.source().display(),
                    failure.step,
                    failure.message
                ));
            }
            let elapsed = start.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                bar.set_message(format!("{:.1} img/sec", bar.position() as f64 / elapsed));
            }
        })
        .await?;
    progress.finish_and_clear();

    summary::print_summary(&report.summary, &options.resolved_output_dir());

    if let Some(path) = &args.report {
        summary::write_report(path, &report.summary)?;
        tracing::info!("Report written to {:?}", path);
    }

    if !report.summary.any_succeeded() {
        anyhow::bail!("No images were enhanced successfully");
    }
    Ok(())
}
