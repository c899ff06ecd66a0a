//! Output writer: persists enhanced images under the batch naming convention.
//!
//! Files land at `<output_dir>/<stem>_sl0thified_<width>x<height>.<ext>`.
//! Encoding goes through a temporary file in the same directory which is
//! renamed into place, so a failed or interrupted write leaves no partial
//! image behind.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};

use crate::error::OutputError;
use crate::job::Job;
use crate::types::PixelBuffer;

/// Encoded output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Png,
    WebP,
    Jpeg,
}

impl OutputFormat {
    /// Parse format from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "png" => Some(Self::Png),
            "webp" => Some(Self::WebP),
            "jpeg" | "jpg" => Some(Self::Jpeg),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::WebP => "webp",
            Self::Jpeg => "jpg",
        }
    }

    fn image_format(&self) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::WebP => ImageFormat::WebP,
            Self::Jpeg => ImageFormat::Jpeg,
        }
    }

    /// JPEG carries no alpha channel.
    fn supports_alpha(&self) -> bool {
        !matches!(self, Self::Jpeg)
    }
}

/// Output file name for a source at a target size.
pub fn output_file_name(source: &Path, width: u32, height: u32, format: OutputFormat) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "image".to_string());
    format!(
        "{stem}_sl0thified_{width}x{height}.{}",
        format.extension()
    )
}

/// Writes final pixel buffers for jobs.
#[derive(Debug, Clone)]
pub struct ImageWriter {
    format: OutputFormat,
}

impl ImageWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Where the result for `job` will be written.
    pub fn output_path(&self, job: &Job) -> PathBuf {
        let (width, height) = job.target_size();
        job.output_dir()
            .join(output_file_name(job.source(), width, height, self.format))
    }

    /// Encode and persist `image` for `job`, returning the written path.
    pub fn write(&self, image: &PixelBuffer, job: &Job) -> Result<PathBuf, OutputError> {
        let dir = job.output_dir();
        std::fs::create_dir_all(dir).map_err(|source| OutputError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = self.output_path(job);
        let encodable = self.encodable(image.image());

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|source| {
            OutputError::Write {
                path: path.clone(),
                source,
            }
        })?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            encodable
                .write_to(&mut writer, self.format.image_format())
                .map_err(|e| OutputError::Encode {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
            writer.flush().map_err(|source| OutputError::Write {
                path: path.clone(),
                source,
            })?;
        }
        tmp.persist(&path).map_err(|e| OutputError::Write {
            path: path.clone(),
            source: e.error,
        })?;

        tracing::debug!("Wrote {:?}", path);
        Ok(path)
    }

    /// Normalize to 8-bit RGB or RGBA as the format allows.
    fn encodable(&self, image: &DynamicImage) -> DynamicImage {
        if image.color().has_alpha() && self.format.supports_alpha() {
            DynamicImage::ImageRgba8(image.to_rgba8())
        } else {
            DynamicImage::ImageRgb8(image.to_rgb8())
        }
    }
}

impl Default for ImageWriter {
    fn default() -> Self {
        Self::new(OutputFormat::Png)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobOptions;
    use image::RgbaImage;

    fn job(dir: &Path, source: &str) -> Job {
        let options = JobOptions {
            width: 64,
            height: 32,
            output_dir: Some(dir.to_path_buf()),
            ..Default::default()
        };
        Job::new(PathBuf::from(source), &options).unwrap()
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(OutputFormat::parse("PNG"), Some(OutputFormat::Png));
        assert_eq!(OutputFormat::parse("jpg"), Some(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::parse("webp"), Some(OutputFormat::WebP));
        assert_eq!(OutputFormat::parse("gif"), None);
    }

    #[test]
    fn test_output_file_name() {
        assert_eq!(
            output_file_name(Path::new("in/cat.photo.jpeg"), 512, 256, OutputFormat::Png),
            "cat.photo_sl0thified_512x256.png"
        );
    }

    #[test]
    fn test_write_png_keeps_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("nested/out");
        let job = job(&out_dir, "/photos/dog.jpg");
        let buffer = PixelBuffer::new(DynamicImage::ImageRgba8(RgbaImage::new(64, 32)));

        let path = ImageWriter::default().write(&buffer, &job).unwrap();
        assert_eq!(path, out_dir.join("dog_sl0thified_64x32.png"));

        let written = image::open(&path).unwrap();
        assert_eq!((written.width(), written.height()), (64, 32));
        assert!(written.color().has_alpha());

        // Only the final file remains.
        assert_eq!(std::fs::read_dir(&out_dir).unwrap().count(), 1);
    }

    #[test]
    fn test_write_jpeg_drops_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(dir.path(), "a.png");
        let buffer = PixelBuffer::new(DynamicImage::ImageRgba8(RgbaImage::new(64, 32)));

        let path = ImageWriter::new(OutputFormat::Jpeg)
            .write(&buffer, &job)
            .unwrap();
        assert!(path.to_string_lossy().ends_with("a_sl0thified_64x32.jpg"));
        assert!(!image::open(&path).unwrap().color().has_alpha());
    }

    #[test]
    fn test_unwritable_directory_is_output_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let job = job(&blocker.join("sub"), "a.png");

        let err = ImageWriter::default()
            .write(&PixelBuffer::new(DynamicImage::new_rgb8(2, 2)), &job)
            .unwrap_err();
        assert!(matches!(err, OutputError::CreateDir { .. }));
    }
}
