//! Core data types flowing through the pipeline.
//!
//! A [`PixelBuffer`] moves by value from stage to stage; every stage invocation
//! yields a [`StageResult`]; every job ends in exactly one [`PipelineOutcome`];
//! a run's outcomes fold into a [`BatchSummary`].

use std::path::PathBuf;

use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, StageError};
use crate::job::Job;

/// The five transformation stages, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    FaceRestore,
    Upscale,
    EnhanceContrast,
    RemoveBackground,
    Resize,
}

impl StageKind {
    /// Canonical execution order.
    pub const ORDER: [StageKind; 5] = [
        StageKind::FaceRestore,
        StageKind::Upscale,
        StageKind::EnhanceContrast,
        StageKind::RemoveBackground,
        StageKind::Resize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::FaceRestore => "face_restore",
            StageKind::Upscale => "upscale",
            StageKind::EnhanceContrast => "enhance_contrast",
            StageKind::RemoveBackground => "remove_background",
            StageKind::Resize => "resize",
        }
    }

    /// Optional stages degrade to `Skipped` when their backend is missing.
    pub fn is_optional(&self) -> bool {
        matches!(self, StageKind::RemoveBackground)
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where in a job's lifecycle something happened: input decoding, one of the
/// stages, or output persistence. `Worker` marks a job whose worker died
/// outside any step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Decode,
    Stage(StageKind),
    Output,
    Worker,
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStep::Decode => f.write_str("decode"),
            PipelineStep::Stage(kind) => write!(f, "{kind}"),
            PipelineStep::Output => f.write_str("output"),
            PipelineStep::Worker => f.write_str("worker"),
        }
    }
}

impl From<StageKind> for PipelineStep {
    fn from(kind: StageKind) -> Self {
        PipelineStep::Stage(kind)
    }
}

/// Solid color composited behind a cut-out subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundColor {
    /// Keep the alpha channel
    #[default]
    None,
    White,
    Black,
    Green,
}

impl BackgroundColor {
    /// RGB value to composite onto, or `None` to keep transparency.
    pub fn rgb(&self) -> Option<[u8; 3]> {
        match self {
            BackgroundColor::None => None,
            BackgroundColor::White => Some([255, 255, 255]),
            BackgroundColor::Black => Some([0, 0, 0]),
            BackgroundColor::Green => Some([0, 255, 0]),
        }
    }
}

/// An in-memory raster handed from stage to stage.
///
/// Ownership is linear: a stage consumes the buffer it receives and returns a
/// new one (or the same one, modified).
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    image: DynamicImage,
}

impl PixelBuffer {
    pub fn new(image: DynamicImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn has_alpha(&self) -> bool {
        self.image.color().has_alpha()
    }

    /// Non-empty with positive dimensions.
    pub fn is_well_formed(&self) -> bool {
        let (w, h) = self.dimensions();
        w > 0 && h > 0 && !self.image.as_bytes().is_empty()
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_image(self) -> DynamicImage {
        self.image
    }
}

impl From<DynamicImage> for PixelBuffer {
    fn from(image: DynamicImage) -> Self {
        Self::new(image)
    }
}

/// Result of a single stage invocation.
#[derive(Debug)]
pub enum StageResult {
    /// The stage ran and produced a buffer
    Success(PixelBuffer),
    /// The stage did not run; the carried buffer is the unchanged input
    Skipped { image: PixelBuffer, reason: String },
    /// The stage failed; the job stops here
    Failed(StageError),
}

impl StageResult {
    pub fn skipped(image: PixelBuffer, reason: impl Into<String>) -> Self {
        Self::Skipped {
            image,
            reason: reason.into(),
        }
    }
}

impl From<Result<PixelBuffer, StageError>> for StageResult {
    fn from(result: Result<PixelBuffer, StageError>) -> Self {
        match result {
            Ok(image) => StageResult::Success(image),
            Err(e) => StageResult::Failed(e),
        }
    }
}

/// A stage that did not run for a job, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSkip {
    pub stage: StageKind,
    pub reason: String,
}

/// Terminal failure of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobFailure {
    /// Where the job failed
    pub step: PipelineStep,
    /// Taxonomy bucket
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
}

impl JobFailure {
    pub fn new(step: PipelineStep, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            step,
            kind,
            message: message.into(),
        }
    }
}

impl From<StageError> for JobFailure {
    fn from(err: StageError) -> Self {
        Self::new(err.stage().into(), err.kind(), err.to_string())
    }
}

/// Terminal state of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobResult {
    Succeeded {
        output_path: PathBuf,
        width: u32,
        height: u32,
    },
    Failed(JobFailure),
    /// The batch was cancelled before this job finished
    Cancelled { after: Option<PipelineStep> },
}

/// The single outcome produced for each job.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub job: Job,
    pub result: JobResult,
    pub skipped: Vec<StageSkip>,
}

impl PipelineOutcome {
    pub fn failed(job: Job, failure: JobFailure, skipped: Vec<StageSkip>) -> Self {
        Self {
            job,
            result: JobResult::Failed(failure),
            skipped,
        }
    }

    pub fn cancelled(job: Job, after: Option<PipelineStep>, skipped: Vec<StageSkip>) -> Self {
        Self {
            job,
            result: JobResult::Cancelled { after },
            skipped,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.result, JobResult::Succeeded { .. })
    }
}

/// A failed image in a batch summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub source: PathBuf,
    #[serde(flatten)]
    pub failure: JobFailure,
}

/// A skipped stage in a batch summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkipRecord {
    pub source: PathBuf,
    #[serde(flatten)]
    pub skip: StageSkip,
}

/// Aggregate report over every outcome of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    /// Images written successfully
    pub succeeded: usize,

    /// Images that failed at some step
    pub failed: usize,

    /// Images not finished because the batch was cancelled
    pub cancelled: usize,

    /// Every failure with its originating step
    pub failures: Vec<FailureRecord>,

    /// Every stage that was skipped, per image
    pub skips: Vec<SkipRecord>,

    /// Output files written
    pub outputs: Vec<PathBuf>,

    /// Wall-clock duration of the run in seconds
    pub total_seconds: f64,

    /// Completed images (succeeded + failed) per second
    pub images_per_second: f64,
}

impl BatchSummary {
    /// Fold outcomes into a summary.
    pub fn from_outcomes(outcomes: &[PipelineOutcome], elapsed: std::time::Duration) -> Self {
        let mut summary = BatchSummary::default();

        for outcome in outcomes {
            let source = outcome.job.source().to_path_buf();
            summary
                .skips
                .extend(outcome.skipped.iter().cloned().map(|skip| SkipRecord {
                    source: source.clone(),
                    skip,
                }));

            match &outcome.result {
                JobResult::Succeeded { output_path, .. } => {
                    summary.succeeded += 1;
                    summary.outputs.push(output_path.clone());
                }
                JobResult::Failed(failure) => {
                    summary.failed += 1;
                    summary.failures.push(FailureRecord {
                        source,
                        failure: failure.clone(),
                    });
                }
                JobResult::Cancelled { .. } => summary.cancelled += 1,
            }
        }

        summary.total_seconds = elapsed.as_secs_f64();
        if summary.total_seconds > 0.0 {
            summary.images_per_second =
                (summary.succeeded + summary.failed) as f64 / summary.total_seconds;
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }

    /// A run counts as successful when at least one image made it through.
    pub fn any_succeeded(&self) -> bool {
        self.succeeded > 0
    }

    /// Failures of a given kind.
    pub fn failures_of(&self, kind: ErrorKind) -> impl Iterator<Item = &FailureRecord> {
        self.failures.iter().filter(move |f| f.failure.kind == kind)
    }
}
