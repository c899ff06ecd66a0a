//! Progress display and the end-of-run summary.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use sl0thifier_core::BatchSummary;

/// Create a progress bar for a batch of `total` images.
pub fn create_progress_bar(total: u64) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
            )?
            .progress_chars("##-"),
    );
    pb.set_message("starting...");
    Ok(pb)
}

/// Print the summary table to stderr.
pub fn print_summary(summary: &BatchSummary, output_dir: &Path) {
    eprintln!();
    eprintln!("  ====================================");
    eprintln!("               Summary");
    eprintln!("  ====================================");
    eprintln!("    Succeeded:    {:>8}", summary.succeeded);
    if summary.failed > 0 {
        eprintln!("    Failed:       {:>8}", summary.failed);
    }
    if summary.cancelled > 0 {
        eprintln!("    Cancelled:    {:>8}", summary.cancelled);
    }
    if !summary.skips.is_empty() {
        eprintln!("    Stage skips:  {:>8}", summary.skips.len());
    }
    eprintln!("  ------------------------------------");
    eprintln!("    Total:        {:>8}", summary.total());
    eprintln!("    Duration:     {:>7.1}s", summary.total_seconds);
    eprintln!("    Rate:         {:>7.1} img/sec", summary.images_per_second);
    eprintln!("  ====================================");

    if !summary.failures.is_empty() {
        eprintln!("\n  Failures:");
        for record in &summary.failures {
            eprintln!(
                "    - {} [{}] {}",
                record.source.display(),
                record.failure.step,
                record.failure.message
            );
        }
    }
    if !summary.skips.is_empty() {
        eprintln!("\n  Skipped stages:");
        for record in &summary.skips {
            eprintln!(
                "    - {} [{}] {}",
                record.source.display(),
                record.skip.stage,
                record.skip.reason
            );
        }
    }
    if summary.succeeded > 0 {
        eprintln!("\n  Output: {}", output_dir.display());
    }
}

/// Write the summary as pretty JSON.
pub fn write_report(path: &Path, summary: &BatchSummary) -> anyhow::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, summary)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
