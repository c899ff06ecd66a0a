//! sl0thifier core - batch image enhancement for dataset preparation.
//!
//! Every source image runs through a fixed sequence of transformations and
//! lands on disk at an exact target size:
//!
//! ```text
//! Decode → Face-Restore → Upscale → Enhance-Contrast → Remove-Background → Resize → Write
//! ```
//!
//! Face restoration and background removal are optional per batch. Each
//! stage hides its capability (ONNX model, external binary or pure image
//! math) behind the [`stage::StageAdapter`] contract. Jobs run in parallel,
//! and a failing image never takes its siblings down.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sl0thifier_core::{Config, JobOptions, Sl0thifier};
//!
//! #[tokio::main]
//! async fn main() -> sl0thifier_core::Result<()> {
//!     let sl0th = Sl0thifier::new(Config::load()?);
//!     let options = JobOptions { width: 1024, height: 1024, ..Default::default() };
//!
//!     let report = sl0th.process("./photos".as_ref(), &options, |_| {}).await?;
//!     println!("{} succeeded, {} failed", report.summary.succeeded, report.summary.failed);
//!     Ok(())
//! }
//! ```

// Module declarations
pub mod config;
pub mod error;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod stage;
pub mod types;

use std::path::Path;

// Re-exports for convenient access
pub use config::Config;
pub use error::{
    BatchError, ConfigError, ErrorKind, InputError, JobError, OutputError, Result, Sl0thError,
    StageError,
};
pub use job::{Job, JobOptions, StageConfig};
pub use output::{ImageWriter, OutputFormat};
pub use pipeline::{BatchCoordinator, BatchReport, CancellationToken, PipelineExecutor};
pub use stage::{StageAdapter, StageSet};
pub use types::{
    BackgroundColor, BatchSummary, JobFailure, JobResult, PipelineOutcome, PipelineStep,
    PixelBuffer, StageKind, StageResult,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Top-level entry point: a configured coordinator with production stages.
pub struct Sl0thifier {
    coordinator: BatchCoordinator,
}

impl Sl0thifier {
    pub fn new(config: Config) -> Self {
        tracing::debug!("Initializing sl0thifier v{}", VERSION);
        Self {
            coordinator: BatchCoordinator::from_config(config),
        }
    }

    /// Use custom stage adapters instead of the configured ones.
    pub fn with_stages(config: Config, stages: StageSet) -> Self {
        Self {
            coordinator: BatchCoordinator::new(config, stages),
        }
    }

    pub fn config(&self) -> &Config {
        self.coordinator.config()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.coordinator.cancellation_token()
    }

    /// Process every supported image at `input`.
    pub async fn process<F>(
        &self,
        input: &Path,
        options: &JobOptions,
        on_outcome: F,
    ) -> Result<BatchReport>
    where
        F: Fn(&PipelineOutcome) + Send + Sync + 'static,
    {
        Ok(self.coordinator.run(input, options, on_outcome).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_new_keeps_config() {
        let mut config = Config::default();
        config.processing.parallel_workers = 3;
        let sl0th = Sl0thifier::new(config);
        assert_eq!(sl0th.config().processing.parallel_workers, 3);
    }
}
