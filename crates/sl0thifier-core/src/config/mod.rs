//! Configuration management for sl0thifier.
//!
//! Configuration is loaded from the platform config directory with defaults
//! for every field. The `[job]` table is the batch-wide job template; CLI flags
//! override it per run.

mod types;
mod validate;

pub use types::*;

use crate::error::ConfigError;
use crate::job::JobOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Discovery and concurrency settings
    pub processing: ProcessingConfig,

    /// Input limits
    pub limits: LimitsConfig,

    /// Default job template
    pub job: JobOptions,

    /// Face restoration backend
    pub face_restore: FaceRestoreConfig,

    /// Real-ESRGAN backend
    pub upscale: UpscaleConfig,

    /// Background segmentation backend
    pub background: BackgroundConfig,

    /// Output file settings
    pub output: OutputConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default configuration if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path.
    ///
    /// Uses platform-appropriate directories:
    /// - macOS: ~/Library/Application Support/com.sl0thm4n.sl0thifier/config.toml
    /// - Linux: ~/.config/sl0thifier/config.toml
    /// - Windows: C:\Users\<User>\AppData\Roaming\sl0thm4n\sl0thifier\config\config.toml
    ///
    /// Falls back to ~/.sl0thifier/config.toml if directory detection fails.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "sl0thm4n", "sl0thifier")
            .map(|dirs| dirs.config_dir().to_path_buf().join("config.toml"))
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".sl0thifier").join("config.toml")
            })
    }

    /// Get the resolved model directory path (with ~ expansion).
    pub fn model_dir(&self) -> PathBuf {
        expand(&self.general.model_dir)
    }

    /// Resolve a model path: absolute paths (after ~ expansion) are kept,
    /// relative ones are joined onto the model directory.
    pub fn resolve_model_path(&self, path: &Path) -> PathBuf {
        let expanded = expand(path);
        if expanded.is_absolute() {
            expanded
        } else {
            self.model_dir().join(expanded)
        }
    }

    /// Path of the Real-ESRGAN executable.
    pub fn upscaler_binary(&self) -> PathBuf {
        match &self.upscale.binary {
            Some(path) => self.resolve_model_path(path),
            None => self
                .model_dir()
                .join("realesrgan")
                .join(UpscaleConfig::default_binary_name()),
        }
    }

    /// Directory holding Real-ESRGAN `.param`/`.bin` model pairs.
    pub fn upscaler_models_dir(&self) -> PathBuf {
        match &self.upscale.models_dir {
            Some(path) => self.resolve_model_path(path),
            None => self.model_dir().join("realesrgan").join("models"),
        }
    }

    /// Worker count, resolving 0 to the host's available parallelism.
    pub fn parallel_workers(&self) -> usize {
        resolve_workers(self.processing.parallel_workers)
    }

    /// Serialize the config to a pretty TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

/// Resolve a requested worker count; 0 means "one per available core".
pub fn resolve_workers(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn expand(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    let expanded = shellexpand::tilde(&path_str);
    PathBuf::from(expanded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.processing.parallel_workers, 0);
        assert!(!config.processing.recursive);
        assert_eq!(config.upscale.scale, 4);
        assert_eq!(config.job.width, 512);
    }

    #[test]
    fn test_config_to_toml() {
        let config = Config::default();
        let toml = config.to_toml().unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[job]"));
        assert!(toml.contains("[upscale]"));
    }

    #[test]
    fn test_parallel_workers_auto_is_positive() {
        let config = Config::default();
        assert!(config.parallel_workers() >= 1);
        assert_eq!(resolve_workers(3), 3);
    }

    #[test]
    fn test_relative_model_paths_join_model_dir() {
        let mut config = Config::default();
        config.general.model_dir = PathBuf::from("/opt/models");
        assert_eq!(
            config.resolve_model_path(Path::new("birefnet/birefnet.onnx")),
            PathBuf::from("/opt/models/birefnet/birefnet.onnx")
        );
        assert_eq!(
            config.resolve_model_path(Path::new("/elsewhere/model.onnx")),
            PathBuf::from("/elsewhere/model.onnx")
        );
        assert_eq!(
            config.upscaler_models_dir(),
            PathBuf::from("/opt/models/realesrgan/models")
        );
    }

    #[test]
    fn test_load_from_file_applies_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[processing]
parallel_workers = 2

[job]
width = 1024
height = 1024
clip_limit = 2.0
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.processing.parallel_workers, 2);
        assert_eq!(config.job.width, 1024);
        assert_eq!(config.job.tile_size, 4);
    }

    #[test]
    fn test_load_from_rejects_invalid_job() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[job]\nclip_limit = 6.0\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("clip_limit"));
    }
}
