//! Pipeline executor: runs one job through the registry's stages.
//!
//! Per job the state machine is `Pending → Running(stage_i) → {Running(stage_i+1),
//! Failed, Succeeded}`. `Success` feeds the new buffer forward and `Failed`
//! ends the job. Only optional stages may be skipped: an optional stage that
//! reports `Skipped`, or fails as unavailable, forwards its input untouched.
//! A mandatory stage reporting `Skipped` is an execution error. Every error and
//! panic raised inside a stage is contained here and becomes the job's
//! outcome; nothing escapes to sibling jobs.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::error::{ErrorKind, StageError};
use crate::job::Job;
use crate::output::{ImageWriter, OutputFormat};
use crate::types::{
    JobFailure, JobResult, PipelineOutcome, PipelineStep, PixelBuffer, StageKind, StageResult,
    StageSkip,
};

use super::cancel::CancellationToken;
use super::decode::ImageDecoder;
use super::registry::{PlannedStage, StageRegistry};

/// Why a job stopped before producing a final buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Interrupted {
    Failed(JobFailure),
    /// Cancellation observed after the given step (`None` = before decoding)
    Cancelled(Option<PipelineStep>),
}

/// Runs jobs end-to-end: decode, stages, output.
pub struct PipelineExecutor {
    registry: Arc<StageRegistry>,
    decoder: ImageDecoder,
    writer: ImageWriter,
}

impl PipelineExecutor {
    pub fn new(registry: Arc<StageRegistry>, config: &Config) -> Self {
        let format = OutputFormat::parse(&config.output.format).unwrap_or(OutputFormat::Png);
        Self {
            registry,
            decoder: ImageDecoder::new(config.limits.clone()),
            writer: ImageWriter::new(format),
        }
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Where `job`'s result will land.
    pub fn output_path(&self, job: &Job) -> PathBuf {
        self.writer.output_path(job)
    }

    /// Run a job to its single terminal outcome. Blocking.
    pub fn run(&self, job: Job, cancel: &CancellationToken) -> PipelineOutcome {
        let start = Instant::now();
        let mut skipped = Vec::new();

        if cancel.is_cancelled() {
            return PipelineOutcome::cancelled(job, None, skipped);
        }

        let image = match self.decoder.decode(job.source()) {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!("Failed to decode {:?}: {e}", job.source());
                let failure =
                    JobFailure::new(PipelineStep::Decode, ErrorKind::InvalidInput, e.to_string());
                return PipelineOutcome::failed(job, failure, skipped);
            }
        };
        tracing::trace!("  Decode: {:?}", start.elapsed());

        let image = match self.run_stages(&job, image, cancel, &mut skipped) {
            Ok(image) => image,
            Err(Interrupted::Failed(failure)) => {
                tracing::warn!(
                    "Failed {:?} at {}: {}",
                    job.source(),
                    failure.step,
                    failure.message
                );
                return PipelineOutcome::failed(job, failure, skipped);
            }
            Err(Interrupted::Cancelled(after)) => {
                tracing::debug!("Cancelled {:?}", job.source());
                return PipelineOutcome::cancelled(job, after, skipped);
            }
        };

        let (width, height) = image.dimensions();
        let result = match self.writer.write(&image, &job) {
            Ok(output_path) => {
                tracing::debug!(
                    "Processed {:?} in {:?} ({}x{})",
                    job.source(),
                    start.elapsed(),
                    width,
                    height
                );
                JobResult::Succeeded {
                    output_path,
                    width,
                    height,
                }
            }
            Err(e) => {
                tracing::warn!("Failed to write result for {:?}: {e}", job.source());
                JobResult::Failed(JobFailure::new(
                    PipelineStep::Output,
                    ErrorKind::Output,
                    e.to_string(),
                ))
            }
        };

        PipelineOutcome {
            job,
            result,
            skipped,
        }
    }

    /// Thread an already-decoded buffer through the job's stages.
    ///
    /// Cancellation is checked between stages; a running stage always
    /// finishes. Skipped stages are appended to `skipped`.
    pub fn run_stages(
        &self,
        job: &Job,
        mut image: PixelBuffer,
        cancel: &CancellationToken,
        skipped: &mut Vec<StageSkip>,
    ) -> Result<PixelBuffer, Interrupted> {
        let mut last_step = PipelineStep::Decode;

        for planned in self.registry.stages_for(job) {
            if cancel.is_cancelled() {
                return Err(Interrupted::Cancelled(Some(last_step)));
            }
            let kind = planned.kind();
            last_step = PipelineStep::Stage(kind);

            let adapter = match planned {
                PlannedStage::Run(adapter) => adapter,
                PlannedStage::Skip { kind, reason } => {
                    tracing::debug!("  {kind}: skipped ({reason})");
                    skipped.push(StageSkip {
                        stage: kind,
                        reason: reason.to_string(),
                    });
                    continue;
                }
            };

            if !image.is_well_formed() {
                return Err(Interrupted::Failed(
                    StageError::invalid_input(kind, "received an empty image").into(),
                ));
            }

            let stage_start = Instant::now();
            let config = job.stage_config(kind);
            let fallback = kind.is_optional().then(|| image.clone());
            let result = catch_unwind(AssertUnwindSafe(|| adapter.apply(image, &config)))
                .unwrap_or_else(|panic| {
                    StageResult::Failed(StageError::execution(kind, panic_message(&*panic)))
                });

            image = match result {
                StageResult::Success(next) => {
                    tracing::trace!(
                        "  {kind}: {:?} -> {}x{}",
                        stage_start.elapsed(),
                        next.width(),
                        next.height()
                    );
                    next
                }
                StageResult::Skipped { image, reason } if kind.is_optional() => {
                    tracing::debug!("  {kind}: skipped ({reason})");
                    skipped.push(StageSkip {
                        stage: kind,
                        reason,
                    });
                    image
                }
                StageResult::Skipped { reason, .. } => {
                    return Err(Interrupted::Failed(
                        StageError::execution(kind, format!("mandatory stage skipped: {reason}"))
                            .into(),
                    ));
                }
                StageResult::Failed(e) => match fallback {
                    Some(original) if e.kind() == ErrorKind::Unavailable => {
                        tracing::warn!("  {kind}: skipped ({e})");
                        skipped.push(StageSkip {
                            stage: kind,
                            reason: e.message(),
                        });
                        original
                    }
                    _ => return Err(Interrupted::Failed(e.into())),
                },
            };

            if kind == StageKind::Resize && image.dimensions() != job.target_size() {
                let (w, h) = job.target_size();
                return Err(Interrupted::Failed(
                    StageError::execution(
                        kind,
                        format!(
                            "produced {}x{} instead of {w}x{h}",
                            image.width(),
                            image.height()
                        ),
                    )
                    .into(),
                ));
            }
        }

        Ok(image)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobOptions, StageConfig};
    use crate::stage::{ContrastEnhancer, Resizer, StageAdapter, StageSet};
    use image::DynamicImage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records invocations; optionally scales, fails or panics.
    struct Mock {
        kind: StageKind,
        calls: Arc<AtomicUsize>,
        behavior: Behavior,
    }

    #[derive(Clone)]
    enum Behavior {
        Identity,
        Scale(u32),
        Fail,
        Unavailable,
        Skip,
        Panic,
        /// Cancel the batch from inside the stage
        CancelAfter(CancellationToken),
    }

    impl Mock {
        fn arc(kind: StageKind, behavior: Behavior) -> (Arc<dyn StageAdapter>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let mock = Mock {
                kind,
                calls: calls.clone(),
                behavior,
            };
            (Arc::new(mock), calls)
        }
    }

    impl StageAdapter for Mock {
        fn kind(&self) -> StageKind {
            self.kind
        }

        fn probe(&self, _options: &JobOptions) -> Result<(), StageError> {
            Ok(())
        }

        fn apply(&self, image: PixelBuffer, _config: &StageConfig<'_>) -> StageResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Identity => StageResult::Success(image),
                Behavior::Scale(s) => {
                    let (w, h) = image.dimensions();
                    StageResult::Success(PixelBuffer::new(DynamicImage::new_rgb8(w * s, h * s)))
                }
                Behavior::Fail => {
                    StageResult::Failed(StageError::execution(self.kind, "model exploded"))
                }
                Behavior::Unavailable => {
                    StageResult::Failed(StageError::unavailable(self.kind, "onnx runtime missing"))
                }
                Behavior::Skip => StageResult::Skipped {
                    image,
                    reason: "nothing to do".to_string(),
                },
                Behavior::Panic => panic!("index out of bounds"),
                Behavior::CancelAfter(token) => {
                    token.cancel();
                    StageResult::Success(image)
                }
            }
        }
    }

    fn executor(upscale: Behavior, options: &JobOptions) -> (PipelineExecutor, Arc<AtomicUsize>) {
        executor_with(upscale, Behavior::Identity, options)
    }

    fn executor_with(
        upscale: Behavior,
        background: Behavior,
        options: &JobOptions,
    ) -> (PipelineExecutor, Arc<AtomicUsize>) {
        let (face, _) = Mock::arc(StageKind::FaceRestore, Behavior::Identity);
        let (up, up_calls) = Mock::arc(StageKind::Upscale, upscale);
        let (bg, _) = Mock::arc(StageKind::RemoveBackground, background);
        let set = StageSet::new(face, up, Arc::new(ContrastEnhancer), bg, Arc::new(Resizer));
        let registry = StageRegistry::build(&set, options).unwrap();
        (
            PipelineExecutor::new(Arc::new(registry), &Config::default()),
            up_calls,
        )
    }

    fn job(options: &JobOptions) -> Job {
        Job::new(PathBuf::from("in.png"), options).unwrap()
    }

    #[test]
    fn test_stages_produce_exact_target() {
        let options = JobOptions::default();
        let (exec, calls) = executor(Behavior::Scale(4), &options);
        let mut skipped = Vec::new();
        let out = exec
            .run_stages(
                &job(&options),
                PixelBuffer::new(DynamicImage::new_rgb8(300, 400)),
                &CancellationToken::new(),
                &mut skipped,
            )
            .unwrap();
        assert_eq!(out.dimensions(), (512, 512));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(skipped.is_empty());
    }

    #[test]
    fn test_stage_failure_names_stage() {
        let options = JobOptions::default();
        let (exec, _) = executor(Behavior::Fail, &options);
        let err = exec
            .run_stages(
                &job(&options),
                PixelBuffer::new(DynamicImage::new_rgb8(8, 8)),
                &CancellationToken::new(),
                &mut Vec::new(),
            )
            .unwrap_err();
        let Interrupted::Failed(failure) = err else {
            panic!("expected failure");
        };
        assert_eq!(failure.step, PipelineStep::Stage(StageKind::Upscale));
        assert_eq!(failure.kind, ErrorKind::Execution);
        assert!(failure.message.contains("model exploded"));
    }

    fn with_background() -> JobOptions {
        JobOptions {
            remove_background: true,
            background_color: crate::types::BackgroundColor::White,
            ..Default::default()
        }
    }

    #[test]
    fn test_background_unavailable_at_apply_is_skipped() {
        let options = with_background();
        let (exec, _) = executor_with(Behavior::Identity, Behavior::Unavailable, &options);
        let mut skipped = Vec::new();
        let out = exec
            .run_stages(
                &job(&options),
                PixelBuffer::new(DynamicImage::new_rgb8(8, 8)),
                &CancellationToken::new(),
                &mut skipped,
            )
            .unwrap();

        assert_eq!(out.dimensions(), (512, 512));
        assert!(!out.has_alpha());
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].stage, StageKind::RemoveBackground);
        assert!(skipped[0].reason.contains("onnx runtime missing"));
    }

    #[test]
    fn test_background_execution_error_still_fails() {
        let options = with_background();
        let (exec, _) = executor_with(Behavior::Identity, Behavior::Fail, &options);
        let err = exec
            .run_stages(
                &job(&options),
                PixelBuffer::new(DynamicImage::new_rgb8(8, 8)),
                &CancellationToken::new(),
                &mut Vec::new(),
            )
            .unwrap_err();
        let Interrupted::Failed(failure) = err else {
            panic!("expected failure");
        };
        assert_eq!(failure.step, PipelineStep::Stage(StageKind::RemoveBackground));
        assert_eq!(failure.kind, ErrorKind::Execution);
    }

    #[test]
    fn test_mandatory_stage_cannot_skip() {
        let options = JobOptions::default();
        let (exec, _) = executor(Behavior::Skip, &options);
        let mut skipped = Vec::new();
        let err = exec
            .run_stages(
                &job(&options),
                PixelBuffer::new(DynamicImage::new_rgb8(8, 8)),
                &CancellationToken::new(),
                &mut skipped,
            )
            .unwrap_err();
        let Interrupted::Failed(failure) = err else {
            panic!("expected failure");
        };
        assert_eq!(failure.step, PipelineStep::Stage(StageKind::Upscale));
        assert_eq!(failure.kind, ErrorKind::Execution);
        assert!(failure.message.contains("nothing to do"));
        assert!(skipped.is_empty());
    }

    #[test]
    fn test_mandatory_stage_unavailable_at_apply_fails() {
        let options = JobOptions::default();
        let (exec, _) = executor(Behavior::Unavailable, &options);
        let err = exec
            .run_stages(
                &job(&options),
                PixelBuffer::new(DynamicImage::new_rgb8(8, 8)),
                &CancellationToken::new(),
                &mut Vec::new(),
            )
            .unwrap_err();
        let Interrupted::Failed(failure) = err else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, ErrorKind::Unavailable);
    }

    #[test]
    fn test_stage_panic_is_contained() {
        let options = JobOptions::default();
        let (exec, _) = executor(Behavior::Panic, &options);
        let err = exec
            .run_stages(
                &job(&options),
                PixelBuffer::new(DynamicImage::new_rgb8(8, 8)),
                &CancellationToken::new(),
                &mut Vec::new(),
            )
            .unwrap_err();
        let Interrupted::Failed(failure) = err else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, ErrorKind::Execution);
        assert!(failure.message.contains("index out of bounds"));
    }

    #[test]
    fn test_cancellation_stops_after_current_stage() {
        let token = CancellationToken::new();
        let options = JobOptions::default();
        let (exec, calls) = executor(Behavior::CancelAfter(token.clone()), &options);
        let err = exec
            .run_stages(
                &job(&options),
                PixelBuffer::new(DynamicImage::new_rgb8(8, 8)),
                &token,
                &mut Vec::new(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            Interrupted::Cancelled(Some(PipelineStep::Stage(StageKind::Upscale)))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancelled_before_start_never_decodes() {
        let options = JobOptions::default();
        let (exec, calls) = executor(Behavior::Identity, &options);
        let token = CancellationToken::new();
        token.cancel();

        let outcome = exec.run(job(&options), &token);
        assert_eq!(outcome.result, JobResult::Cancelled { after: None });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_source_is_invalid_input_at_decode() {
        let options = JobOptions::default();
        let (exec, calls) = executor(Behavior::Identity, &options);
        let outcome = exec.run(job(&options), &CancellationToken::new());
        let JobResult::Failed(failure) = outcome.result else {
            panic!("expected failure");
        };
        assert_eq!(failure.step, PipelineStep::Decode);
        assert_eq!(failure.kind, ErrorKind::InvalidInput);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
