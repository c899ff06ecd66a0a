//! Job templates and the immutable per-image job.
//!
//! A [`JobOptions`] is the batch-wide template supplied by configuration or the
//! CLI. [`Job::new`] validates it and binds it to one source image; a job that
//! exists is always within range.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::JobError;
use crate::types::{BackgroundColor, StageKind};

/// Inclusive range for the CLAHE clip limit.
pub const CLIP_LIMIT_RANGE: (f32, f32) = (0.1, 5.0);

/// Inclusive range for the CLAHE tile grid size.
pub const TILE_SIZE_RANGE: (u32, u32) = (2, 16);

/// Batch-wide job template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    /// Final output width in pixels
    pub width: u32,

    /// Final output height in pixels
    pub height: u32,

    /// Real-ESRGAN model name (e.g. "realesrgan-x4plus")
    pub model_name: String,

    /// CLAHE clip limit
    pub clip_limit: f32,

    /// CLAHE tile grid size (tiles per side)
    pub tile_size: u32,

    /// Run the background removal stage
    pub remove_background: bool,

    /// Color composited behind the subject after background removal
    pub background_color: BackgroundColor,

    /// Run the face restoration stage
    pub restore_faces: bool,

    /// Where results are written. Defaults to `./sl0thified_<w>-<h>`.
    pub output_dir: Option<PathBuf>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            model_name: "realesrgan-x4plus".to_string(),
            clip_limit: 1.0,
            tile_size: 4,
            remove_background: false,
            background_color: BackgroundColor::None,
            restore_faces: true,
            output_dir: None,
        }
    }
}

impl JobOptions {
    /// Check every option against its documented range.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.width == 0 || self.height == 0 {
            return Err(JobError::ZeroTargetSize {
                width: self.width,
                height: self.height,
            });
        }
        let (min, max) = CLIP_LIMIT_RANGE;
        // Also rejects NaN.
        if !(min..=max).contains(&self.clip_limit) {
            return Err(JobError::ClipLimitOutOfRange {
                value: self.clip_limit,
                min,
                max,
            });
        }
        let (min, max) = TILE_SIZE_RANGE;
        if !(min..=max).contains(&self.tile_size) {
            return Err(JobError::TileSizeOutOfRange {
                value: self.tile_size,
                min,
                max,
            });
        }
        if self.model_name.trim().is_empty() {
            return Err(JobError::EmptyModelName);
        }
        Ok(())
    }

    /// Whether a stage belongs in the pipeline these options describe.
    pub fn includes(&self, stage: StageKind) -> bool {
        match stage {
            StageKind::FaceRestore => self.restore_faces,
            StageKind::RemoveBackground => self.remove_background,
            StageKind::Upscale | StageKind::EnhanceContrast | StageKind::Resize => true,
        }
    }

    /// Output directory, falling back to `sl0thified_<w>-<h>` under the cwd.
    pub fn resolved_output_dir(&self) -> PathBuf {
        match &self.output_dir {
            Some(dir) => dir.clone(),
            None => default_output_dir(self.width, self.height),
        }
    }
}

/// Default output directory name for a target size.
pub fn default_output_dir(width: u32, height: u32) -> PathBuf {
    let name = format!("sl0thified_{width}-{height}");
    std::env::current_dir()
        .map(|cwd| cwd.join(&name))
        .unwrap_or_else(|_| PathBuf::from(name))
}

/// One requested enhancement run for a single source image.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    source: PathBuf,
    options: JobOptions,
    output_dir: PathBuf,
}

impl Job {
    /// Bind validated options to a source image.
    pub fn new(source: PathBuf, options: &JobOptions) -> Result<Self, JobError> {
        options.validate()?;
        Ok(Self {
            source,
            output_dir: options.resolved_output_dir(),
            options: options.clone(),
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.options.width, self.options.height)
    }

    pub fn model_name(&self) -> &str {
        &self.options.model_name
    }

    pub fn clip_limit(&self) -> f32 {
        self.options.clip_limit
    }

    pub fn tile_size(&self) -> u32 {
        self.options.tile_size
    }

    pub fn remove_background(&self) -> bool {
        self.options.remove_background
    }

    pub fn background_color(&self) -> BackgroundColor {
        self.options.background_color
    }

    pub fn restore_faces(&self) -> bool {
        self.options.restore_faces
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    /// Whether a stage belongs in this job's pipeline.
    pub fn includes(&self, stage: StageKind) -> bool {
        self.options.includes(stage)
    }

    /// The slice of this job's options a given stage consumes.
    pub fn stage_config(&self, stage: StageKind) -> StageConfig<'_> {
        match stage {
            StageKind::FaceRestore => StageConfig::FaceRestore,
            StageKind::Upscale => StageConfig::Upscale {
                model_name: &self.options.model_name,
            },
            StageKind::EnhanceContrast => StageConfig::EnhanceContrast {
                clip_limit: self.options.clip_limit,
                tile_size: self.options.tile_size,
            },
            StageKind::RemoveBackground => StageConfig::RemoveBackground {
                background: self.options.background_color,
            },
            StageKind::Resize => StageConfig::Resize {
                width: self.options.width,
                height: self.options.height,
            },
        }
    }
}

/// Stage-specific configuration drawn from a job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StageConfig<'a> {
    FaceRestore,
    Upscale { model_name: &'a str },
    EnhanceContrast { clip_limit: f32, tile_size: u32 },
    RemoveBackground { background: BackgroundColor },
    Resize { width: u32, height: u32 },
}

impl StageConfig<'_> {
    /// The stage this configuration belongs to.
    pub fn stage(&self) -> StageKind {
        match self {
            StageConfig::FaceRestore => StageKind::FaceRestore,
            StageConfig::Upscale { .. } => StageKind::Upscale,
            StageConfig::EnhanceContrast { .. } => StageKind::EnhanceContrast,
            StageConfig::RemoveBackground { .. } => StageKind::RemoveBackground,
            StageConfig::Resize { .. } => StageKind::Resize,
        }
    }
}
