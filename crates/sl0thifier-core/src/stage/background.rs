//! BiRefNet background removal via ONNX Runtime.
//!
//! The segmentation mask is predicted at the model's square input size,
//! resized back to the source dimensions and used as the alpha channel. When
//! a background color is requested the subject is composited onto it and the
//! result is RGB; otherwise the RGBA cut-out is kept.

use std::path::PathBuf;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};

use crate::error::StageError;
use crate::job::{JobOptions, StageConfig};
use crate::types::{BackgroundColor, PixelBuffer, StageKind, StageResult};

use super::onnx::{nchw_dims, to_nchw, LazySession};
use super::{config_mismatch, StageAdapter};

/// Background removal adapter. Inference is serialized by the session lock.
pub struct BackgroundRemover {
    session: LazySession,
    input_size: u32,
}

impl BackgroundRemover {
    pub fn new(model_path: PathBuf, input_size: u32) -> Self {
        Self {
            session: LazySession::new(StageKind::RemoveBackground, model_path),
            input_size: input_size.max(1),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.session.is_loaded()
    }

    fn predict_mask(&self, rgb: &RgbImage) -> Result<GrayImage, StageError> {
        let frame = DynamicImage::ImageRgb8(rgb.clone())
            .resize_exact(self.input_size, self.input_size, FilterType::Triangle)
            .to_rgb8();
        let tensor = to_nchw(&frame, 0.0, 1.0);
        let (shape, data) = self.session.infer(&tensor, "output_image")?;

        let mask = mask_from_output(&shape, &data).ok_or_else(|| {
            StageError::execution(
                StageKind::RemoveBackground,
                format!("unexpected mask shape {shape:?}"),
            )
        })?;
        Ok(DynamicImage::ImageLuma8(mask)
            .resize_exact(rgb.width(), rgb.height(), FilterType::Triangle)
            .to_luma8())
    }
}

impl StageAdapter for BackgroundRemover {
    fn kind(&self) -> StageKind {
        StageKind::RemoveBackground
    }

    fn probe(&self, _options: &JobOptions) -> Result<(), StageError> {
        self.session.probe()
    }

    fn apply(&self, image: PixelBuffer, config: &StageConfig<'_>) -> StageResult {
        let StageConfig::RemoveBackground { background } = *config else {
            return config_mismatch(StageKind::RemoveBackground, config);
        };

        let rgb = image.image().to_rgb8();
        let mask = match self.predict_mask(&rgb) {
            Ok(mask) => mask,
            Err(e) => return StageResult::Failed(e),
        };
        StageResult::Success(PixelBuffer::new(apply_mask(&rgb, &mask, background)))
    }

    fn release(&self) {
        self.session.unload();
    }
}

/// First channel of a `[1, 1, H, W]` output, clipped to [0, 1], as 8-bit.
fn mask_from_output(shape: &[i64], data: &[f32]) -> Option<GrayImage> {
    let (_, h, w) = nchw_dims(shape)?;
    if data.len() < h * w {
        return None;
    }
    Some(GrayImage::from_fn(w as u32, h as u32, |x, y| {
        let v = data[y as usize * w + x as usize].clamp(0.0, 1.0);
        Luma([(v * 255.0).round() as u8])
    }))
}

/// Use `mask` as alpha, optionally compositing onto a solid color.
pub fn apply_mask(rgb: &RgbImage, mask: &GrayImage, background: BackgroundColor) -> DynamicImage {
    match background.rgb() {
        None => DynamicImage::ImageRgba8(RgbaImage::from_fn(rgb.width(), rgb.height(), |x, y| {
            let p = rgb.get_pixel(x, y);
            Rgba([p[0], p[1], p[2], mask.get_pixel(x, y)[0]])
        })),
        Some(color) => DynamicImage::ImageRgb8(RgbImage::from_fn(rgb.width(), rgb.height(), |x, y| {
            let p = rgb.get_pixel(x, y);
            let alpha = mask.get_pixel(x, y)[0] as f32 / 255.0;
            let mix =
                |c: usize| (p[c] as f32 * alpha + color[c] as f32 * (1.0 - alpha)).round() as u8;
            Rgb([mix(0), mix(1), mix(2)])
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn half_mask() -> (RgbImage, GrayImage) {
        let rgb = RgbImage::from_pixel(2, 1, Rgb([10, 20, 30]));
        let mut mask = GrayImage::new(2, 1);
        mask.put_pixel(0, 0, Luma([255]));
        mask.put_pixel(1, 0, Luma([0]));
        (rgb, mask)
    }

    #[test]
    fn test_no_color_keeps_alpha() {
        let (rgb, mask) = half_mask();
        let out = apply_mask(&rgb, &mask, BackgroundColor::None).to_rgba8();
        assert_eq!(out.get_pixel(0, 0), &Rgba([10, 20, 30, 255]));
        assert_eq!(out.get_pixel(1, 0)[3], 0);
    }

    #[test]
    fn test_color_composites_to_rgb() {
        let (rgb, mask) = half_mask();
        let out = apply_mask(&rgb, &mask, BackgroundColor::Green);
        assert!(!out.color().has_alpha());
        let out = out.to_rgb8();
        assert_eq!(out.get_pixel(0, 0), &Rgb([10, 20, 30]));
        assert_eq!(out.get_pixel(1, 0), &Rgb([0, 255, 0]));
    }

    #[test]
    fn test_mask_from_output_clips() {
        let mask = mask_from_output(&[1, 1, 1, 3], &[-0.5, 0.5, 1.5]).unwrap();
        assert_eq!(mask.get_pixel(0, 0)[0], 0);
        assert_eq!(mask.get_pixel(1, 0)[0], 128);
        assert_eq!(mask.get_pixel(2, 0)[0], 255);
    }

    #[test]
    fn test_missing_model_reports_unavailable() {
        let remover = BackgroundRemover::new(PathBuf::from("/nonexistent/birefnet.onnx"), 512);
        let err = remover.probe(&JobOptions::default()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unavailable);
        assert!(!remover.is_loaded());
    }
}
