//! Cheap checks run before a source file is decoded.

use std::io::Read;
use std::path::Path;

use image::ImageFormat;

use crate::config::LimitsConfig;
use crate::error::InputError;

/// Bytes needed to recognize every accepted container.
const SNIFF_LEN: u64 = 12;

/// Rejects missing, oversized and non-image files before decoding.
pub struct Validator {
    limits: LimitsConfig,
}

impl Validator {
    pub fn new(limits: LimitsConfig) -> Self {
        Self { limits }
    }

    /// Check existence, the size limit and the container signature.
    ///
    /// Returns the format the signature identifies.
    pub fn validate(&self, path: &Path) -> Result<ImageFormat, InputError> {
        let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => InputError::FileNotFound(path.to_path_buf()),
            _ => decode_error(path, format!("Cannot read metadata: {e}")),
        })?;

        let limit_bytes = self.limits.max_file_size_mb.saturating_mul(1024 * 1024);
        if metadata.len() > limit_bytes {
            return Err(InputError::FileTooLarge {
                path: path.to_path_buf(),
                size_mb: metadata.len().div_ceil(1024 * 1024),
                max_mb: self.limits.max_file_size_mb,
            });
        }

        let mut head = Vec::with_capacity(SNIFF_LEN as usize);
        std::fs::File::open(path)
            .and_then(|file| file.take(SNIFF_LEN).read_to_end(&mut head))
            .map_err(|e| decode_error(path, format!("Cannot open file: {e}")))?;

        sniff_format(&head).ok_or_else(|| {
            decode_error(
                path,
                "Not a PNG, JPEG or WebP file (unrecognized signature)".to_string(),
            )
        })
    }
}

/// Identify PNG, JPEG or WebP from the first bytes of a file.
pub fn sniff_format(head: &[u8]) -> Option<ImageFormat> {
    match head {
        [0x89, b'P', b'N', b'G', ..] => Some(ImageFormat::Png),
        [0xFF, 0xD8, 0xFF, ..] => Some(ImageFormat::Jpeg),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(ImageFormat::WebP),
        _ => None,
    }
}

fn decode_error(path: &Path, message: String) -> InputError {
    InputError::Decode {
        path: path.to_path_buf(),
        message,
    }
}
