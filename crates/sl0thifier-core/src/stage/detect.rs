//! SCRFD face detection via ONNX Runtime.
//!
//! The detector sees a 640×640 letterboxed frame and predicts, per anchor and
//! stride, a face score, box distances and five landmarks (eyes, nose, mouth
//! corners). Boxes are mapped back to source coordinates and reduced with
//! non-maximum suppression.

use std::path::PathBuf;

use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};

use crate::error::StageError;
use crate::types::StageKind;

use super::onnx::{to_nchw, LazySession};

/// Detector input resolution.
pub const DETECTOR_INPUT_SIZE: u32 = 640;

/// Boxes overlapping a stronger detection by more than this are dropped.
const NMS_THRESHOLD: f32 = 0.4;

/// SCRFD normalizes with mean 127.5 and std 128.
const NORM_MEAN: f32 = 0.5;
const NORM_STD: f32 = 128.0 / 255.0;

/// A detected face in source coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    /// Left eye, right eye, nose, left mouth corner, right mouth corner
    pub landmarks: [(f32, f32); 5],
}

impl FaceBox {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Intersection over union.
    pub fn iou(&self, other: &FaceBox) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = w * h;
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// Aspect-preserving fit of the source into the square detector frame.
#[derive(Debug, Clone, Copy)]
pub struct Letterbox {
    scale: f32,
    offset_x: f32,
    offset_y: f32,
    width: u32,
    height: u32,
}

impl Letterbox {
    pub fn new(width: u32, height: u32, target: u32) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = ((width as f32 * scale) as u32).clamp(1, target);
        let new_h = ((height as f32 * scale) as u32).clamp(1, target);
        Self {
            scale,
            offset_x: ((target - new_w) / 2) as f32,
            offset_y: ((target - new_h) / 2) as f32,
            width,
            height,
        }
    }

    /// Detector frame coordinates to source coordinates.
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x) / self.scale,
            (y - self.offset_y) / self.scale,
        )
    }

    fn frame(&self, image: &RgbImage, target: u32) -> RgbImage {
        let new_w = ((self.width as f32 * self.scale) as u32).clamp(1, target);
        let new_h = ((self.height as f32 * self.scale) as u32).clamp(1, target);
        let resized = DynamicImage::ImageRgb8(image.clone())
            .resize_exact(new_w, new_h, FilterType::Triangle)
            .to_rgb8();
        let mut padded = RgbImage::from_pixel(target, target, Rgb([0, 0, 0]));
        image::imageops::replace(
            &mut padded,
            &resized,
            self.offset_x as i64,
            self.offset_y as i64,
        );
        padded
    }
}

/// SCRFD detector. Inference is serialized by the session lock.
pub struct FaceDetector {
    session: LazySession,
    threshold: f32,
}

impl FaceDetector {
    pub fn new(model_path: PathBuf, threshold: f32) -> Self {
        Self {
            session: LazySession::new(StageKind::FaceRestore, model_path),
            threshold,
        }
    }

    pub fn probe(&self) -> Result<(), StageError> {
        self.session.probe()
    }

    pub fn unload(&self) {
        self.session.unload();
    }

    /// Faces in `image`, strongest first.
    pub fn detect(&self, image: &RgbImage) -> Result<Vec<FaceBox>, StageError> {
        let letterbox = Letterbox::new(image.width(), image.height(), DETECTOR_INPUT_SIZE);
        let frame = letterbox.frame(image, DETECTOR_INPUT_SIZE);
        let outputs = self
            .session
            .infer_all(&to_nchw(&frame, NORM_MEAN, NORM_STD))?;

        let faces = nms(decode(&outputs, &letterbox, self.threshold)?);
        tracing::debug!("Detected {} face(s)", faces.len());
        Ok(faces)
    }
}

/// Turn raw SCRFD outputs into candidate boxes above `threshold`.
///
/// Outputs are grouped as scores, then box distances, then landmarks, one
/// tensor per stride.
pub fn decode(
    outputs: &[(Vec<i64>, Vec<f32>)],
    letterbox: &Letterbox,
    threshold: f32,
) -> Result<Vec<FaceBox>, StageError> {
    let (strides, anchors): (&[u32], usize) = match outputs.len() {
        9 => (&[8, 16, 32], 2),
        15 => (&[8, 16, 32, 64, 128], 1),
        n => {
            return Err(StageError::execution(
                StageKind::FaceRestore,
                format!("detector has {n} outputs; expected a landmark model with 9 or 15"),
            ))
        }
    };
    let levels = strides.len();

    let mut faces = Vec::new();
    for (level, &stride) in strides.iter().enumerate() {
        let scores = &outputs[level].1;
        let boxes = &outputs[level + levels].1;
        let points = &outputs[level + 2 * levels].1;
        let step = stride as f32;
        let cells = DETECTOR_INPUT_SIZE / stride;

        let centers = (0..cells)
            .flat_map(|y| (0..cells).map(move |x| (x as f32 * step, y as f32 * step)))
            .flat_map(|center| std::iter::repeat(center).take(anchors));

        for (i, (cx, cy)) in centers.enumerate() {
            let Some(&score) = scores.get(i) else {
                break;
            };
            if score < threshold {
                continue;
            }
            let (Some(d), Some(k)) = (boxes.get(i * 4..i * 4 + 4), points.get(i * 10..i * 10 + 10))
            else {
                continue;
            };

            let (x1, y1) = letterbox.to_source(cx - d[0] * step, cy - d[1] * step);
            let (x2, y2) = letterbox.to_source(cx + d[2] * step, cy + d[3] * step);
            let mut landmarks = [(0.0, 0.0); 5];
            for (j, landmark) in landmarks.iter_mut().enumerate() {
                *landmark = letterbox.to_source(cx + k[j * 2] * step, cy + k[j * 2 + 1] * step);
            }

            let (w, h) = (letterbox.width as f32, letterbox.height as f32);
            faces.push(FaceBox {
                x1: x1.clamp(0.0, w),
                y1: y1.clamp(0.0, h),
                x2: x2.clamp(0.0, w),
                y2: y2.clamp(0.0, h),
                confidence: score,
                landmarks,
            });
        }
    }
    Ok(faces)
}

/// Greedy non-maximum suppression, strongest first.
pub fn nms(mut boxes: Vec<FaceBox>) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut keep: Vec<FaceBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if keep.iter().all(|kept| kept.iou(&candidate) <= NMS_THRESHOLD) {
            keep.push(candidate);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> FaceBox {
        FaceBox {
            x1,
            y1,
            x2,
            y2,
            confidence,
            landmarks: [(0.0, 0.0); 5],
        }
    }

    /// Nine empty outputs sized for a 640 frame, two anchors per cell.
    fn empty_outputs() -> Vec<(Vec<i64>, Vec<f32>)> {
        let mut outputs = Vec::new();
        for width in [1usize, 4, 10] {
            for stride in [8u32, 16, 32] {
                let n = ((DETECTOR_INPUT_SIZE / stride).pow(2) * 2) as usize;
                outputs.push((vec![n as i64, width as i64], vec![0.0; n * width]));
            }
        }
        outputs
    }

    #[test]
    fn test_iou() {
        let a = face(0.0, 0.0, 10.0, 10.0, 0.9);
        let b = face(5.0, 5.0, 15.0, 15.0, 0.8);
        assert!((a.iou(&b) - 25.0 / 175.0).abs() < 1e-4);
        assert_eq!(a.iou(&face(20.0, 20.0, 30.0, 30.0, 0.5)), 0.0);
    }

    #[test]
    fn test_nms_keeps_strongest_of_overlapping() {
        let kept = nms(vec![
            face(0.0, 0.0, 10.0, 10.0, 0.7),
            face(1.0, 1.0, 11.0, 11.0, 0.9),
            face(50.0, 50.0, 60.0, 60.0, 0.6),
        ]);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.6);
    }

    #[test]
    fn test_letterbox_maps_back_to_source() {
        // 1280×640 fits as 640×320, centered vertically.
        let letterbox = Letterbox::new(1280, 640, 640);
        assert_eq!(letterbox.to_source(0.0, 160.0), (0.0, 0.0));
        assert_eq!(letterbox.to_source(320.0, 320.0), (640.0, 320.0));
    }

    #[test]
    fn test_decode_single_anchor() {
        let mut outputs = empty_outputs();
        // Stride 8, cell (x=10, y=5), first anchor: index (5 * 80 + 10) * 2.
        let i = (5 * 80 + 10) * 2;
        outputs[0].1[i] = 0.95;
        outputs[3].1[i * 4..i * 4 + 4].copy_from_slice(&[1.0, 1.0, 2.0, 2.0]);
        outputs[6].1[i * 10..i * 10 + 2].copy_from_slice(&[0.5, -0.5]);

        let letterbox = Letterbox::new(640, 640, 640);
        let faces = decode(&outputs, &letterbox, 0.5).unwrap();
        assert_eq!(faces.len(), 1);
        let f = &faces[0];
        // Center (80, 40), distances scaled by the stride.
        assert_eq!((f.x1, f.y1, f.x2, f.y2), (72.0, 32.0, 96.0, 56.0));
        assert_eq!(f.landmarks[0], (84.0, 36.0));
        assert_eq!(f.landmarks[1], (80.0, 40.0));
    }

    #[test]
    fn test_decode_below_threshold_finds_nothing() {
        let mut outputs = empty_outputs();
        outputs[1].1[0] = 0.3;
        let faces = decode(&outputs, &Letterbox::new(640, 640, 640), 0.5).unwrap();
        assert!(faces.is_empty());
    }

    #[test]
    fn test_decode_rejects_model_without_landmarks() {
        let outputs = empty_outputs()[..6].to_vec();
        let err = decode(&outputs, &Letterbox::new(640, 640, 640), 0.5).unwrap_err();
        assert!(err.to_string().contains("landmark"));
    }
}
