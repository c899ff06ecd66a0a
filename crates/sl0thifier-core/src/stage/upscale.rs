//! Real-ESRGAN super-resolution through the `realesrgan-ncnn-vulkan` executable.
//!
//! Each call writes the input to a scratch directory, runs the executable with
//! a bounded wait and reads the result back. The process handle is not
//! reentrant (one GPU context per invocation), so calls are serialized by an
//! internal lock. Crashes and timeouts are retried with exponential backoff;
//! the child is killed on every exit path.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use image::{DynamicImage, ImageFormat};

use crate::config::UpscaleConfig;
use crate::error::StageError;
use crate::job::{JobOptions, StageConfig};
use crate::types::{PixelBuffer, StageKind, StageResult};

use super::retry;
use super::{config_mismatch, StageAdapter};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Bytes of stderr kept in failure messages.
const STDERR_TAIL: usize = 512;

/// Subprocess-backed upscaler.
pub struct RealEsrganUpscaler {
    binary: PathBuf,
    models_dir: PathBuf,
    scale: u32,
    timeout: Duration,
    retry_attempts: u32,
    retry_delay_ms: u64,
    lock: Mutex<()>,
}

impl RealEsrganUpscaler {
    pub fn new(binary: PathBuf, models_dir: PathBuf, config: &UpscaleConfig) -> Self {
        Self {
            binary,
            models_dir,
            scale: config.scale,
            timeout: Duration::from_millis(config.timeout_ms),
            retry_attempts: config.retry_attempts,
            retry_delay_ms: config.retry_delay_ms,
            lock: Mutex::new(()),
        }
    }

    fn upscale(&self, image: &DynamicImage, model_name: &str) -> Result<DynamicImage, StageError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| StageError::execution(StageKind::Upscale, format!("lock poisoned: {e}")))?;

        let mut last_error = None;
        for attempt in 0..=self.retry_attempts {
            if attempt > 0 {
                let delay = retry::backoff_duration(attempt - 1, self.retry_delay_ms);
                tracing::debug!(
                    "Retry {attempt}/{} for upscaler after {delay:?}",
                    self.retry_attempts
                );
                std::thread::sleep(delay);
            }

            match self.run_once(image, model_name) {
                Ok(output) => return Ok(output),
                Err(e) => {
                    tracing::warn!("Upscaler attempt {} failed: {e}", attempt + 1);
                    let retryable = retry::is_retryable(&e);
                    last_error = Some(e);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            StageError::execution(StageKind::Upscale, "upscaler did not run")
        }))
    }

    fn run_once(&self, image: &DynamicImage, model_name: &str) -> Result<DynamicImage, StageError> {
        let scratch = tempfile::tempdir()
            .map_err(|e| exec_error(format!("cannot create scratch directory: {e}")))?;
        let input = scratch.path().join("input.png");
        let output = scratch.path().join("output.png");
        let stderr_path = scratch.path().join("stderr.log");

        let encodable = if image.color().has_alpha() {
            DynamicImage::ImageRgba8(image.to_rgba8())
        } else {
            DynamicImage::ImageRgb8(image.to_rgb8())
        };
        encodable
            .save_with_format(&input, ImageFormat::Png)
            .map_err(|e| exec_error(format!("cannot write scratch input: {e}")))?;

        let stderr = File::create(&stderr_path)
            .map_err(|e| exec_error(format!("cannot create stderr log: {e}")))?;

        let child = Command::new(&self.binary)
            .arg("-i")
            .arg(&input)
            .arg("-o")
            .arg(&output)
            .arg("-s")
            .arg(self.scale.to_string())
            .arg("-n")
            .arg(model_name)
            .arg("-m")
            .arg(&self.models_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    StageError::unavailable(
                        StageKind::Upscale,
                        format!("cannot launch {}: {e}", self.binary.display()),
                    )
                }
                _ => exec_error(format!("cannot launch {}: {e}", self.binary.display())),
            })?;

        let mut guard = ChildGuard(Some(child));
        let status = guard.wait_with_timeout(self.timeout)?;

        if !status.success() {
            return Err(exec_error(format!(
                "exited with {status}: {}",
                stderr_tail(&stderr_path)
            )));
        }
        if !output.is_file() {
            return Err(exec_error("produced no output image".to_string()));
        }

        let upscaled = image::open(&output)
            .map_err(|e| exec_error(format!("cannot read upscaled image: {e}")))?;

        let expected = (image.width() * self.scale, image.height() * self.scale);
        if (upscaled.width(), upscaled.height()) != expected {
            return Err(exec_error(format!(
                "expected {}x{} output, got {}x{}",
                expected.0,
                expected.1,
                upscaled.width(),
                upscaled.height()
            )));
        }
        Ok(upscaled)
    }
}

impl StageAdapter for RealEsrganUpscaler {
    fn kind(&self) -> StageKind {
        StageKind::Upscale
    }

    fn probe(&self, options: &JobOptions) -> Result<(), StageError> {
        if !self.binary.is_file() {
            return Err(StageError::unavailable(
                StageKind::Upscale,
                format!("executable not found at {}", self.binary.display()),
            ));
        }
        for ext in ["param", "bin"] {
            let file = self.models_dir.join(format!("{}.{ext}", options.model_name));
            if !file.is_file() {
                return Err(StageError::unavailable(
                    StageKind::Upscale,
                    format!(
                        "model '{}' missing {}",
                        options.model_name,
                        file.display()
                    ),
                ));
            }
        }
        Ok(())
    }

    fn apply(&self, image: PixelBuffer, config: &StageConfig<'_>) -> StageResult {
        let StageConfig::Upscale { model_name } = *config else {
            return config_mismatch(StageKind::Upscale, config);
        };
        self.upscale(image.image(), model_name)
            .map(PixelBuffer::new)
            .into()
    }
}

/// Kills the child if it is still running when dropped.
struct ChildGuard(Option<Child>);

impl ChildGuard {
    fn wait_with_timeout(&mut self, timeout: Duration) -> Result<ExitStatus, StageError> {
        let Some(child) = self.0.as_mut() else {
            return Err(exec_error("process handle missing".to_string()));
        };
        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    self.0 = None;
                    return Ok(status);
                }
                Ok(None) if start.elapsed() >= timeout => {
                    // Drop kills and reaps.
                    return Err(StageError::Timeout {
                        stage: StageKind::Upscale,
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(e) => return Err(exec_error(format!("cannot wait for upscaler: {e}"))),
            }
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.0.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn exec_error(message: String) -> StageError {
    StageError::execution(StageKind::Upscale, message)
}

fn stderr_tail(path: &Path) -> String {
    let text = std::fs::read_to_string(path).unwrap_or_default();
    let text = text.trim();
    let start = text
        .char_indices()
        .rev()
        .nth(STDERR_TAIL)
        .map(|(i, _)| i)
        .unwrap_or(0);
    text[start..].to_string()
}

/// Models installed in `dir`: stems present as both `.param` and `.bin`.
///
/// Falls back to the models shipped with the release archive when the
/// directory is missing or empty.
pub fn available_models(dir: &Path) -> Vec<String> {
    let stems = |ext: &str| -> Vec<String> {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.extension().and_then(|x| x.to_str()) == Some(ext))
                    .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    };

    let bins = stems("bin");
    let mut models: Vec<String> = stems("param")
        .into_iter()
        .filter(|stem| bins.contains(stem))
        .collect();
    models.sort();

    if models.is_empty() {
        UpscaleConfig::bundled_models()
            .iter()
            .map(|m| m.to_string())
            .collect()
    } else {
        models
    }
}
