//! GFPGAN face restoration via ONNX Runtime.
//!
//! Faces are located with the SCRFD detector. Each face is aligned onto the
//! 512×512 FFHQ landmark template, restored by GFPGAN and pasted back with a
//! feathered edge onto a Lanczos upscale (`upscale ×`) of the source,
//! blended by `weight`. Images without a detected face pass through
//! unchanged.

use std::path::PathBuf;

use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};

use crate::config::FaceRestoreConfig;
use crate::error::StageError;
use crate::job::{JobOptions, StageConfig};
use crate::types::{PixelBuffer, StageKind, StageResult};

use super::align::{paste_back, warp_crop, Similarity};
use super::detect::{FaceBox, FaceDetector};
use super::onnx::{nchw_dims, to_nchw, LazySession};
use super::{config_mismatch, StageAdapter};

/// GFPGAN's fixed input resolution.
const INPUT_SIZE: u32 = 512;

/// FFHQ landmark positions in the 512×512 crop, in detector landmark order.
const FACE_TEMPLATE: [(f32, f32); 5] = [
    (192.981_38, 239.947_08),
    (318.902_77, 240.193_6),
    (256.634_16, 314.019_35),
    (201.261_17, 371.410_43),
    (313.089_05, 371.151_18),
];

/// Crop pixels over which a pasted face fades into the base.
const FEATHER: f32 = 24.0;

const NORM_MEAN: f32 = 0.5;
const NORM_STD: f32 = 0.5;

/// Face restoration adapter. Inference is serialized by the session locks.
pub struct FaceRestorer {
    detector: FaceDetector,
    session: LazySession,
    upscale: u32,
    weight: f32,
}

impl FaceRestorer {
    pub fn new(model_path: PathBuf, detector_path: PathBuf, config: &FaceRestoreConfig) -> Self {
        Self {
            detector: FaceDetector::new(detector_path, config.detection_threshold),
            session: LazySession::new(StageKind::FaceRestore, model_path),
            upscale: config.upscale.max(1),
            weight: config.weight.clamp(0.0, 1.0),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.session.is_loaded()
    }

    /// Run GFPGAN on one aligned 512×512 crop.
    fn restore_crop(&self, crop: &RgbImage) -> Result<RgbImage, StageError> {
        let tensor = to_nchw(crop, NORM_MEAN, NORM_STD);
        let (shape, data) = self.session.infer(&tensor, "output")?;
        denormalize(&shape, &data).ok_or_else(|| {
            StageError::execution(
                StageKind::FaceRestore,
                format!("unexpected output shape {shape:?}"),
            )
        })
    }
}

impl StageAdapter for FaceRestorer {
    fn kind(&self) -> StageKind {
        StageKind::FaceRestore
    }

    fn probe(&self, _options: &JobOptions) -> Result<(), StageError> {
        self.session.probe()?;
        self.detector.probe()
    }

    fn apply(&self, image: PixelBuffer, config: &StageConfig<'_>) -> StageResult {
        if !matches!(config, StageConfig::FaceRestore) {
            return config_mismatch(StageKind::FaceRestore, config);
        }
        let faces = match self.detector.detect(&image.image().to_rgb8()) {
            Ok(faces) => faces,
            Err(e) => return StageResult::Failed(e),
        };
        restore_faces(image.into_image(), &faces, self.upscale, self.weight, |crop| {
            self.restore_crop(crop)
        })
        .map(PixelBuffer::new)
        .into()
    }

    fn release(&self) {
        self.session.unload();
        self.detector.unload();
    }
}

/// Restore every face in `image` with `restore` and paste the results onto
/// an `upscale ×` base. Returns `image` untouched when `faces` is empty.
fn restore_faces<F>(
    image: DynamicImage,
    faces: &[FaceBox],
    upscale: u32,
    weight: f32,
    mut restore: F,
) -> Result<DynamicImage, StageError>
where
    F: FnMut(&RgbImage) -> Result<RgbImage, StageError>,
{
    if faces.is_empty() {
        tracing::debug!("No face detected; face restoration passes through");
        return Ok(image);
    }

    let source = image.to_rgb8();
    let (out_w, out_h) = (image.width() * upscale, image.height() * upscale);
    let mut base = image
        .resize_exact(out_w, out_h, FilterType::Lanczos3)
        .to_rgba8();

    for face in faces {
        let Some(to_crop) = Similarity::estimate(&face.landmarks, &FACE_TEMPLATE) else {
            tracing::debug!("Skipping face with degenerate landmarks at ({}, {})", face.x1, face.y1);
            continue;
        };
        let Some(crop) = warp_crop(&source, &to_crop, INPUT_SIZE) else {
            continue;
        };
        let restored = restore(&crop)?;
        paste_back(&mut base, &restored, &to_crop, upscale as f32, weight, FEATHER);
    }

    let restored = DynamicImage::ImageRgba8(base);
    Ok(if image.color().has_alpha() {
        restored
    } else {
        DynamicImage::ImageRgb8(restored.to_rgb8())
    })
}

/// Map a `[1, 3, H, W]` tensor in [-1, 1] back to 8-bit RGB.
fn denormalize(shape: &[i64], data: &[f32]) -> Option<RgbImage> {
    let (channels, h, w) = nchw_dims(shape)?;
    if channels != 3 || data.len() < 3 * h * w {
        return None;
    }
    let plane = h * w;
    Some(RgbImage::from_fn(w as u32, h as u32, |x, y| {
        let idx = y as usize * w + x as usize;
        let px = |c: usize| {
            let v = (data[c * plane + idx] * NORM_STD + NORM_MEAN) * 255.0;
            v.round().clamp(0.0, 255.0) as u8
        };
        Rgb([px(0), px(1), px(2)])
    }))
}
