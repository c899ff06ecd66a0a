//! The ordered, host-checked set of stages a batch runs.
//!
//! Built once per batch from the job template: every included stage is
//! probed up front. A missing mandatory stage aborts the batch with one
//! diagnostic; a missing optional stage is remembered and skipped per job.

use std::sync::Arc;

use crate::error::BatchError;
use crate::job::{Job, JobOptions};
use crate::stage::{StageAdapter, StageSet};
use crate::types::StageKind;

struct RegisteredStage {
    adapter: Arc<dyn StageAdapter>,
    /// Why the stage cannot run on this host, if it can't.
    unavailable: Option<String>,
}

/// One entry of a job's execution plan.
pub enum PlannedStage<'a> {
    Run(&'a dyn StageAdapter),
    Skip { kind: StageKind, reason: &'a str },
}

impl PlannedStage<'_> {
    pub fn kind(&self) -> StageKind {
        match self {
            PlannedStage::Run(adapter) => adapter.kind(),
            PlannedStage::Skip { kind, .. } => *kind,
        }
    }
}

/// Stages available to a batch, in canonical order.
pub struct StageRegistry {
    stages: Vec<RegisteredStage>,
}

impl StageRegistry {
    /// Probe every stage `options` includes.
    pub fn build(set: &StageSet, options: &JobOptions) -> Result<Self, BatchError> {
        options.validate()?;

        let mut stages = Vec::new();
        for kind in StageKind::ORDER {
            if !options.includes(kind) {
                continue;
            }
            let adapter = set.get(kind).clone();
            let unavailable = match adapter.probe(options) {
                Ok(()) => None,
                Err(e) if kind.is_optional() => {
                    tracing::warn!("{kind} will be skipped: {}", e.message());
                    Some(e.message())
                }
                Err(e) => {
                    return Err(BatchError::StageUnavailable {
                        stage: kind,
                        message: e.message(),
                    });
                }
            };
            stages.push(RegisteredStage {
                adapter,
                unavailable,
            });
        }

        tracing::debug!(
            "Stage registry: {}",
            stages
                .iter()
                .map(|s| s.adapter.kind().as_str())
                .collect::<Vec<_>>()
                .join(" -> ")
        );
        Ok(Self { stages })
    }

    /// The ordered plan for one job.
    pub fn stages_for(&self, job: &Job) -> Vec<PlannedStage<'_>> {
        self.stages
            .iter()
            .filter(|s| job.includes(s.adapter.kind()))
            .map(|s| match &s.unavailable {
                None => PlannedStage::Run(s.adapter.as_ref()),
                Some(reason) => PlannedStage::Skip {
                    kind: s.adapter.kind(),
                    reason,
                },
            })
            .collect()
    }

    /// Stage kinds a job will pass through (run or skipped).
    pub fn kinds_for(&self, job: &Job) -> Vec<StageKind> {
        self.stages_for(job).iter().map(|s| s.kind()).collect()
    }

    /// Release every adapter's model or process handle.
    pub fn release(&self) {
        for stage in &self.stages {
            stage.adapter.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageError;
    use crate::job::StageConfig;
    use crate::types::{PixelBuffer, StageResult};
    use std::path::PathBuf;

    struct Stub {
        kind: StageKind,
        available: bool,
    }

    impl StageAdapter for Stub {
        fn kind(&self) -> StageKind {
            self.kind
        }

        fn probe(&self, _options: &JobOptions) -> Result<(), StageError> {
            if self.available {
                Ok(())
            } else {
                Err(StageError::unavailable(self.kind, "not installed"))
            }
        }

        fn apply(&self, image: PixelBuffer, _config: &StageConfig<'_>) -> StageResult {
            StageResult::Success(image)
        }
    }

    fn set(unavailable: &[StageKind]) -> StageSet {
        let stub = |kind: StageKind| -> Arc<dyn StageAdapter> {
            Arc::new(Stub {
                kind,
                available: !unavailable.contains(&kind),
            })
        };
        StageSet::new(
            stub(StageKind::FaceRestore),
            stub(StageKind::Upscale),
            stub(StageKind::EnhanceContrast),
            stub(StageKind::RemoveBackground),
            stub(StageKind::Resize),
        )
    }

    fn job(options: &JobOptions) -> Job {
        Job::new(PathBuf::from("a.png"), options).unwrap()
    }

    #[test]
    fn test_background_excluded_when_disabled() {
        let options = JobOptions::default();
        let registry = StageRegistry::build(&set(&[]), &options).unwrap();
        assert_eq!(
            registry.kinds_for(&job(&options)),
            vec![
                StageKind::FaceRestore,
                StageKind::Upscale,
                StageKind::EnhanceContrast,
                StageKind::Resize
            ]
        );
    }

    #[test]
    fn test_full_order_with_background() {
        let options = JobOptions {
            remove_background: true,
            ..Default::default()
        };
        let registry = StageRegistry::build(&set(&[]), &options).unwrap();
        assert_eq!(registry.kinds_for(&job(&options)), StageKind::ORDER.to_vec());
    }

    #[test]
    fn test_missing_mandatory_stage_aborts() {
        let err = match StageRegistry::build(&set(&[StageKind::Upscale]), &JobOptions::default()) {
            Err(e) => e,
            Ok(_) => panic!("expected registry build to fail"),
        };
        assert!(matches!(
            err,
            BatchError::StageUnavailable {
                stage: StageKind::Upscale,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_face_model_ignored_when_disabled() {
        let options = JobOptions {
            restore_faces: false,
            ..Default::default()
        };
        assert!(StageRegistry::build(&set(&[StageKind::FaceRestore]), &options).is_ok());
    }

    #[test]
    fn test_missing_background_model_degrades_to_skip() {
        let options = JobOptions {
            remove_background: true,
            ..Default::default()
        };
        let registry =
            StageRegistry::build(&set(&[StageKind::RemoveBackground]), &options).unwrap();
        let job = job(&options);
        let plan = registry.stages_for(&job);
        assert_eq!(plan.len(), 5);
        assert!(matches!(
            plan[3],
            PlannedStage::Skip {
                kind: StageKind::RemoveBackground,
                reason: "not installed"
            }
        ));
    }

    #[test]
    fn test_invalid_template_rejected() {
        let options = JobOptions {
            clip_limit: 6.0,
            ..Default::default()
        };
        assert!(matches!(
            StageRegistry::build(&set(&[]), &options),
            Err(BatchError::InvalidOptions(_))
        ));
    }
}
