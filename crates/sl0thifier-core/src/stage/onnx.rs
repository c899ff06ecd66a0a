//! Lazily loaded ONNX Runtime sessions shared by the model-backed stages.

use std::path::PathBuf;
use std::sync::Mutex;

use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::Value;

use crate::error::StageError;
use crate::types::StageKind;

/// A session opened on first use and held until [`LazySession::unload`].
///
/// Uses a `Mutex` because `Session::run` requires `&mut self`; this also
/// serializes inference across concurrent jobs.
pub(crate) struct LazySession {
    stage: StageKind,
    model_path: PathBuf,
    session: Mutex<Option<Session>>,
}

impl LazySession {
    pub fn new(stage: StageKind, model_path: PathBuf) -> Self {
        Self {
            stage,
            model_path,
            session: Mutex::new(None),
        }
    }

    /// Unavailable unless the model file exists.
    pub fn probe(&self) -> Result<(), StageError> {
        if self.model_path.is_file() {
            Ok(())
        } else {
            Err(StageError::unavailable(
                self.stage,
                format!("model not found at {}", self.model_path.display()),
            ))
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.session.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    pub fn unload(&self) {
        if let Ok(mut guard) = self.session.lock() {
            if guard.take().is_some() {
                tracing::info!("Unloaded {} model", self.stage);
            }
        }
    }

    /// Run a single-input inference, returning the first output matching
    /// `output_name` (or the first output when the name is absent).
    pub fn infer(
        &self,
        tensor: &Array4<f32>,
        output_name: &str,
    ) -> Result<(Vec<i64>, Vec<f32>), StageError> {
        let mut outputs = self.run(tensor)?;
        let index = outputs
            .iter()
            .position(|(name, _, _)| name == output_name)
            .unwrap_or(0);
        if outputs.is_empty() {
            return Err(self.error("Model produced no outputs".to_string()));
        }
        let (_, shape, data) = outputs.swap_remove(index);
        Ok((shape, data))
    }

    /// Run a single-input inference, returning every output in model order.
    pub fn infer_all(&self, tensor: &Array4<f32>) -> Result<Vec<(Vec<i64>, Vec<f32>)>, StageError> {
        Ok(self
            .run(tensor)?
            .into_iter()
            .map(|(_, shape, data)| (shape, data))
            .collect())
    }

    fn run(&self, tensor: &Array4<f32>) -> Result<Vec<(String, Vec<i64>, Vec<f32>)>, StageError> {
        let mut guard = self
            .session
            .lock()
            .map_err(|e| self.error(format!("Session lock poisoned: {e}")))?;

        if guard.is_none() {
            *guard = Some(self.load()?);
        }
        let Some(session) = guard.as_mut() else {
            return Err(self.error("Session missing after load".to_string()));
        };

        let input_name = session
            .inputs()
            .first()
            .map(|i| i.name().to_string())
            .unwrap_or_else(|| "input".to_string());

        let shape: Vec<i64> = tensor.shape().iter().map(|&d| d as i64).collect();
        let flat_data: Vec<f32> = tensor.iter().copied().collect();
        let input_value = Value::from_array((shape, flat_data))
            .map_err(|e| self.error(format!("Failed to create input tensor: {e}")))?;

        let inputs = ort::inputs![input_name.as_str() => input_value];
        let outputs = session
            .run(inputs)
            .map_err(|e| self.error(format!("ONNX inference failed: {e}")))?;

        outputs
            .iter()
            .map(|(name, value)| {
                let (shape, data) = value
                    .try_extract_tensor::<f32>()
                    .map_err(|e| self.error(format!("Failed to extract output {name}: {e}")))?;
                Ok((name.to_string(), shape.iter().copied().collect(), data.to_vec()))
            })
            .collect()
    }

    /// A model that cannot be opened counts as unavailable, like a missing file.
    fn load(&self) -> Result<Session, StageError> {
        self.probe()?;
        tracing::info!("Loading {} model from {:?}", self.stage, self.model_path);
        let start = std::time::Instant::now();

        let session = Session::builder()
            .map_err(|e| self.unavailable(format!("Failed to create ONNX session builder: {e}")))?
            .commit_from_file(&self.model_path)
            .map_err(|e| self.unavailable(format!("Failed to load ONNX model: {e}")))?;

        tracing::info!("{} model loaded in {:?}", self.stage, start.elapsed());
        Ok(session)
    }

    fn error(&self, message: String) -> StageError {
        StageError::execution(self.stage, message)
    }

    fn unavailable(&self, message: String) -> StageError {
        StageError::unavailable(self.stage, message)
    }
}

/// Convert an RGB image to an NCHW tensor with `(x / 255 - mean) / std`.
pub(crate) fn to_nchw(image: &RgbImage, mean: f32, std: f32) -> Array4<f32> {
    let (w, h) = image.dimensions();
    Array4::from_shape_fn((1, 3, h as usize, w as usize), |(_, c, y, x)| {
        let v = image.get_pixel(x as u32, y as u32)[c] as f32;
        (v / 255.0 - mean) / std
    })
}

/// Read the `[1, C, H, W]` layout out of a flat output buffer.
pub(crate) fn nchw_dims(shape: &[i64]) -> Option<(usize, usize, usize)> {
    match shape {
        [1, c, h, w] if *c > 0 && *h > 0 && *w > 0 => Some((*c as usize, *h as usize, *w as usize)),
        [c, h, w] if *c > 0 && *h > 0 && *w > 0 => Some((*c as usize, *h as usize, *w as usize)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_to_nchw_layout_and_normalization() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 0, 255]));

        let t = to_nchw(&img, 0.5, 0.5);
        assert_eq!(t.shape(), &[1, 3, 1, 2]);
        assert_eq!(t[[0, 0, 0, 0]], 1.0);
        assert_eq!(t[[0, 0, 0, 1]], -1.0);
        assert_eq!(t[[0, 2, 0, 1]], 1.0);

        let raw = to_nchw(&img, 0.0, 1.0);
        assert_eq!(raw[[0, 0, 0, 0]], 1.0);
        assert_eq!(raw[[0, 1, 0, 0]], 0.0);
    }

    #[test]
    fn test_nchw_dims() {
        assert_eq!(nchw_dims(&[1, 1, 512, 512]), Some((1, 512, 512)));
        assert_eq!(nchw_dims(&[3, 4, 5]), Some((3, 4, 5)));
        assert_eq!(nchw_dims(&[2, 3, 4, 5]), None);
    }

    #[test]
    fn test_missing_model_is_unavailable() {
        let session = LazySession::new(
            StageKind::RemoveBackground,
            PathBuf::from("/nonexistent/birefnet.onnx"),
        );
        let err = session.probe().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unavailable);
        assert!(!session.is_loaded());
    }

    #[test]
    fn test_unloadable_model_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("truncated.onnx");
        std::fs::write(&path, b"not a protobuf").unwrap();

        let session = LazySession::new(StageKind::RemoveBackground, path);
        assert!(session.probe().is_ok());

        let err = session
            .infer(&Array4::zeros((1, 3, 2, 2)), "output")
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unavailable);
        assert!(!session.is_loaded());
    }
}
