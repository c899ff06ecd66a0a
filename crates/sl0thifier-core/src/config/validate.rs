//! Configuration validation with range checks.

use crate::error::ConfigError;
use crate::output::OutputFormat;

use super::Config;

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        self.job
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("job: {e}")))?;

        if self.processing.supported_formats.is_empty() {
            return Err(ConfigError::ValidationError(
                "processing.supported_formats must not be empty".into(),
            ));
        }
        if self.limits.max_file_size_mb == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_file_size_mb must be > 0".into(),
            ));
        }
        if self.limits.max_image_dimension == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_image_dimension must be > 0".into(),
            ));
        }
        if !(1..=4).contains(&self.face_restore.upscale) {
            return Err(ConfigError::ValidationError(
                "face_restore.upscale must be between 1 and 4".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.face_restore.weight) {
            return Err(ConfigError::ValidationError(
                "face_restore.weight must be between 0.0 and 1.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.face_restore.detection_threshold) {
            return Err(ConfigError::ValidationError(
                "face_restore.detection_threshold must be between 0.0 and 1.0".into(),
            ));
        }
        if !(2..=4).contains(&self.upscale.scale) {
            return Err(ConfigError::ValidationError(
                "upscale.scale must be between 2 and 4".into(),
            ));
        }
        if self.upscale.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "upscale.timeout_ms must be > 0".into(),
            ));
        }
        if self.background.input_size == 0 {
            return Err(ConfigError::ValidationError(
                "background.input_size must be > 0".into(),
            ));
        }
        if OutputFormat::parse(&self.output.format).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "output.format must be png, webp or jpeg (got {:?})",
                self.output.format
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_passes_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_clip_limit() {
        let mut config = Config::default();
        config.job.clip_limit = 6.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("clip_limit"));
    }

    #[test]
    fn test_validate_rejects_bad_upscale_scale() {
        let mut config = Config::default();
        config.upscale.scale = 8;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("upscale.scale"));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = Config::default();
        config.upscale.timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("timeout_ms"));
    }

    #[test]
    fn test_validate_rejects_face_weight() {
        let mut config = Config::default();
        config.face_restore.weight = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("face_restore.weight"));

        config.face_restore.weight = 1.0;
        config.face_restore.detection_threshold = -0.1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("detection_threshold"));
    }

    #[test]
    fn test_validate_rejects_unknown_output_format() {
        let mut config = Config::default();
        config.output.format = "gif".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("output.format"));
    }
}
