//! Stage adapters: one per transformation capability.
//!
//! Every capability sits behind the [`StageAdapter`] contract regardless of
//! whether it runs in-process (contrast, resize), through ONNX Runtime (face
//! restoration, background removal) or as an external executable (upscaling).
//!
//! Adapters are constructed once per batch and shared across concurrent jobs.
//! Each one is either stateless per call or serializes access to its backing
//! resource internally.

mod align;
pub mod background;
pub mod contrast;
pub mod detect;
pub mod face;
pub(crate) mod onnx;
pub mod resize;
pub mod retry;
pub mod upscale;

use std::sync::Arc;

use crate::config::Config;
use crate::error::StageError;
use crate::job::{JobOptions, StageConfig};
use crate::types::{PixelBuffer, StageKind, StageResult};

pub use background::BackgroundRemover;
pub use contrast::ContrastEnhancer;
pub use face::FaceRestorer;
pub use resize::Resizer;
pub use upscale::RealEsrganUpscaler;

/// Uniform contract for one pipeline stage.
pub trait StageAdapter: Send + Sync {
    /// Which stage this adapter implements.
    fn kind(&self) -> StageKind;

    /// Check that the backing binary or model exists on this host.
    ///
    /// Called once per batch, before any job runs. Must not load weights.
    fn probe(&self, options: &JobOptions) -> Result<(), StageError>;

    /// Transform one image.
    fn apply(&self, image: PixelBuffer, config: &StageConfig<'_>) -> StageResult;

    /// Drop any loaded model or process handle.
    fn release(&self) {}
}

/// The five adapters a batch can draw from, indexed by stage.
#[derive(Clone)]
pub struct StageSet {
    adapters: [Arc<dyn StageAdapter>; 5],
}

impl StageSet {
    /// Assemble a set from explicit adapters.
    pub fn new(
        face_restore: Arc<dyn StageAdapter>,
        upscale: Arc<dyn StageAdapter>,
        enhance_contrast: Arc<dyn StageAdapter>,
        remove_background: Arc<dyn StageAdapter>,
        resize: Arc<dyn StageAdapter>,
    ) -> Self {
        Self {
            adapters: [
                face_restore,
                upscale,
                enhance_contrast,
                remove_background,
                resize,
            ],
        }
    }

    /// Build the production adapters from configuration.
    ///
    /// Nothing is loaded here; ONNX sessions open on first use.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(FaceRestorer::new(
                config.resolve_model_path(&config.face_restore.model),
                config.resolve_model_path(&config.face_restore.detector),
                &config.face_restore,
            )),
            Arc::new(RealEsrganUpscaler::new(
                config.upscaler_binary(),
                config.upscaler_models_dir(),
                &config.upscale,
            )),
            Arc::new(ContrastEnhancer),
            Arc::new(BackgroundRemover::new(
                config.resolve_model_path(&config.background.model),
                config.background.input_size,
            )),
            Arc::new(Resizer),
        )
    }

    /// Replace the adapter for the stage `adapter` implements.
    pub fn with_adapter(mut self, adapter: Arc<dyn StageAdapter>) -> Self {
        let slot = slot(adapter.kind());
        self.adapters[slot] = adapter;
        self
    }

    pub fn get(&self, kind: StageKind) -> &Arc<dyn StageAdapter> {
        &self.adapters[slot(kind)]
    }
}

fn slot(kind: StageKind) -> usize {
    match kind {
        StageKind::FaceRestore => 0,
        StageKind::Upscale => 1,
        StageKind::EnhanceContrast => 2,
        StageKind::RemoveBackground => 3,
        StageKind::Resize => 4,
    }
}

/// Error for an adapter handed another stage's configuration.
pub(crate) fn config_mismatch(stage: StageKind, config: &StageConfig<'_>) -> StageResult {
    StageResult::Failed(StageError::execution(
        stage,
        format!("received configuration for {}", config.stage()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(StageKind);

    impl StageAdapter for Named {
        fn kind(&self) -> StageKind {
            self.0
        }

        fn probe(&self, _options: &JobOptions) -> Result<(), StageError> {
            Err(StageError::unavailable(self.0, "named stub"))
        }

        fn apply(&self, image: PixelBuffer, _config: &StageConfig<'_>) -> StageResult {
            StageResult::Success(image)
        }
    }

    #[test]
    fn test_from_config_maps_every_stage() {
        let set = StageSet::from_config(&Config::default());
        for kind in StageKind::ORDER {
            assert_eq!(set.get(kind).kind(), kind);
        }
    }

    #[test]
    fn test_with_adapter_replaces_matching_slot() {
        let options = JobOptions::default();
        let set = StageSet::from_config(&Config::default());
        assert!(set.get(StageKind::Resize).probe(&options).is_ok());

        let set = set.with_adapter(Arc::new(Named(StageKind::Resize)));
        let err = set.get(StageKind::Resize).probe(&options).unwrap_err();
        assert_eq!(err.message(), "named stub");
        assert!(set.get(StageKind::EnhanceContrast).probe(&options).is_ok());
    }
}
