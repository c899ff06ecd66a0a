//! Sub-configuration structs with their defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory where models and the upscaler binary live
    pub model_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("~/.sl0thifier/models"),
        }
    }
}

/// Discovery and concurrency settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Number of images processed concurrently (0 = one per core)
    pub parallel_workers: usize,

    /// Supported input extensions
    pub supported_formats: Vec<String>,

    /// Descend into subdirectories when the input is a directory
    pub recursive: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            parallel_workers: 0,
            supported_formats: vec![
                "png".to_string(),
                "jpg".to_string(),
                "jpeg".to_string(),
                "webp".to_string(),
            ],
            recursive: false,
        }
    }
}

/// Limits that protect against problematic inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum file size in megabytes
    pub max_file_size_mb: u64,

    /// Maximum source dimension (width or height)
    pub max_image_dimension: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: 100,
            max_image_dimension: 10000,
        }
    }
}

/// GFPGAN face restoration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceRestoreConfig {
    /// ONNX model, relative to `general.model_dir` unless absolute
    pub model: PathBuf,

    /// SCRFD face detector (with 5-point landmarks) used to find faces
    pub detector: PathBuf,

    /// Minimum detector confidence for a face to be restored
    pub detection_threshold: f32,

    /// Fixed upscale factor applied by the restorer
    pub upscale: u32,

    /// Blend weight of the restored image over the original (0.0 - 1.0)
    pub weight: f32,
}

impl Default for FaceRestoreConfig {
    fn default() -> Self {
        Self {
            model: PathBuf::from("gfpgan/GFPGANv1.4.onnx"),
            detector: PathBuf::from("scrfd/det_10g.onnx"),
            detection_threshold: 0.5,
            upscale: 2,
            weight: 1.0,
        }
    }
}

/// Real-ESRGAN NCNN executable settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpscaleConfig {
    /// Executable path (defaults to `<model_dir>/realesrgan/realesrgan-ncnn-vulkan`)
    pub binary: Option<PathBuf>,

    /// Model directory (defaults to `<model_dir>/realesrgan/models`)
    pub models_dir: Option<PathBuf>,

    /// Scale factor passed to the executable
    pub scale: u32,

    /// Bounded wait for one invocation, in milliseconds
    pub timeout_ms: u64,

    /// Relaunch attempts after a crash or timeout
    pub retry_attempts: u32,

    /// Base backoff between relaunches, in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for UpscaleConfig {
    fn default() -> Self {
        Self {
            binary: None,
            models_dir: None,
            scale: 4,
            timeout_ms: 300_000,
            retry_attempts: 1,
            retry_delay_ms: 500,
        }
    }
}

impl UpscaleConfig {
    /// Platform-specific executable name.
    pub fn default_binary_name() -> &'static str {
        if cfg!(windows) {
            "realesrgan-ncnn-vulkan.exe"
        } else {
            "realesrgan-ncnn-vulkan"
        }
    }

    /// Models shipped with the Real-ESRGAN release archive.
    pub fn bundled_models() -> &'static [&'static str] {
        &["realesrgan-x4plus", "realesrgan-x4plus-anime"]
    }
}

/// BiRefNet background segmentation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// ONNX model, relative to `general.model_dir` unless absolute
    pub model: PathBuf,

    /// Square input resolution the model was exported with
    pub input_size: u32,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            model: PathBuf::from("birefnet/birefnet.onnx"),
            input_size: 512,
        }
    }
}

/// Output file settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Encoded format: "png", "webp" or "jpeg"
    pub format: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: "png".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
