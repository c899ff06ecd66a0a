//! Image decoding with content-based format detection and dimension limits.

use std::path::Path;

use image::GenericImageView;

use crate::config::LimitsConfig;
use crate::error::InputError;
use crate::types::PixelBuffer;

use super::validate::Validator;

/// Validates and decodes source files into pixel buffers.
pub struct ImageDecoder {
    limits: LimitsConfig,
    validator: Validator,
}

impl ImageDecoder {
    /// Create a new decoder with the given limits.
    pub fn new(limits: LimitsConfig) -> Self {
        Self {
            validator: Validator::new(limits.clone()),
            limits,
        }
    }

    /// Validate, read and decode a file.
    ///
    /// Synchronous; callers run it on a blocking worker.
    pub fn decode(&self, path: &Path) -> Result<PixelBuffer, InputError> {
        self.validator.validate(path)?;

        let bytes = std::fs::read(path).map_err(|e| InputError::Decode {
            path: path.to_path_buf(),
            message: format!("Cannot read file: {e}"),
        })?;
        self.decode_bytes(bytes, path)
    }

    /// Decode an in-memory file. `path` is used for error messages only.
    pub fn decode_bytes(&self, bytes: Vec<u8>, path: &Path) -> Result<PixelBuffer, InputError> {
        let reader = image::ImageReader::new(std::io::Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| InputError::Decode {
                path: path.to_path_buf(),
                message: format!("Cannot detect image format: {e}"),
            })?;
        let image = reader.decode().map_err(|e| InputError::Decode {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let (width, height) = image.dimensions();
        if width > self.limits.max_image_dimension || height > self.limits.max_image_dimension {
            return Err(InputError::ImageTooLarge {
                path: path.to_path_buf(),
                width,
                height,
                max_dim: self.limits.max_image_dimension,
            });
        }

        Ok(PixelBuffer::new(image))
    }
}
