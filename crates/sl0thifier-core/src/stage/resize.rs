//! Final resize to the job's exact target dimensions.

use image::imageops::FilterType;

use crate::error::{JobError, StageError};
use crate::job::{JobOptions, StageConfig};
use crate::types::{PixelBuffer, StageKind, StageResult};

use super::{config_mismatch, StageAdapter};

/// Lanczos resize to `width × height`, ignoring aspect ratio.
pub struct Resizer;

impl StageAdapter for Resizer {
    fn kind(&self) -> StageKind {
        StageKind::Resize
    }

    fn probe(&self, _options: &JobOptions) -> Result<(), StageError> {
        Ok(())
    }

    fn apply(&self, image: PixelBuffer, config: &StageConfig<'_>) -> StageResult {
        let StageConfig::Resize { width, height } = *config else {
            return config_mismatch(StageKind::Resize, config);
        };
        if width == 0 || height == 0 {
            return StageResult::Failed(StageError::invalid_input(
                StageKind::Resize,
                JobError::ZeroTargetSize { width, height }.to_string(),
            ));
        }
        if image.dimensions() == (width, height) {
            return StageResult::Success(image);
        }

        let resized = image
            .into_image()
            .resize_exact(width, height, FilterType::Lanczos3);
        StageResult::Success(PixelBuffer::new(resized))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbaImage};

    fn resize(image: DynamicImage, width: u32, height: u32) -> PixelBuffer {
        match Resizer.apply(PixelBuffer::new(image), &StageConfig::Resize { width, height }) {
            StageResult::Success(buffer) => buffer,
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn test_output_matches_target_regardless_of_aspect() {
        let out = resize(DynamicImage::new_rgb8(300, 400), 512, 512);
        assert_eq!(out.dimensions(), (512, 512));

        let out = resize(DynamicImage::new_rgb8(1920, 1080), 64, 200);
        assert_eq!(out.dimensions(), (64, 200));
    }

    #[test]
    fn test_alpha_channel_survives_resize() {
        let out = resize(DynamicImage::ImageRgba8(RgbaImage::new(10, 10)), 20, 5);
        assert!(out.has_alpha());
    }

    #[test]
    fn test_wrong_config_fails() {
        let result = Resizer.apply(
            PixelBuffer::new(DynamicImage::new_rgb8(4, 4)),
            &StageConfig::FaceRestore,
        );
        assert!(matches!(result, StageResult::Failed(_)));
    }
}
