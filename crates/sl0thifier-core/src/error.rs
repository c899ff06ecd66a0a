//! Error types for the sl0thifier pipeline.
//!
//! Errors are organized by layer: configuration, job construction, stage
//! execution and batch orchestration. Stage errors carry the stage that raised
//! them so summaries can say exactly where an image fell over.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::types::StageKind;

/// Top-level error type for sl0thifier operations.
#[derive(Error, Debug)]
pub enum Sl0thError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A job template or job failed validation
    #[error("Invalid job: {0}")]
    Job(#[from] JobError),

    /// Batch-level failures (nothing was processed)
    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// A job option is outside its documented range.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    #[error("target size must be positive (got {width}x{height})")]
    ZeroTargetSize { width: u32, height: u32 },

    #[error("clip_limit must be between {min} and {max} (got {value})")]
    ClipLimitOutOfRange { value: f32, min: f32, max: f32 },

    #[error("tile_size must be between {min} and {max} (got {value})")]
    TileSizeOutOfRange { value: u32, min: u32, max: u32 },

    #[error("model_name must not be empty")]
    EmptyModelName,
}

/// Coarse classification of a per-image or per-stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Backing binary or model missing on this host
    Unavailable,
    /// Corrupt or unsupported image
    InvalidInput,
    /// The capability raised (or timed out) during inference
    Execution,
    /// The enhanced image could not be persisted
    Output,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::Execution => "execution error",
            ErrorKind::Output => "output error",
        };
        f.write_str(label)
    }
}

/// Errors raised by a stage adapter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    /// Backing binary/model missing on this host
    #[error("{stage} unavailable: {message}")]
    Unavailable { stage: StageKind, message: String },

    /// The image handed to the stage cannot be processed
    #[error("Invalid input for {stage}: {message}")]
    InvalidInput { stage: StageKind, message: String },

    /// The capability failed during inference
    #[error("{stage} failed: {message}")]
    Execution { stage: StageKind, message: String },

    /// The capability exceeded its bounded wait
    #[error("Timeout in {stage} stage after {timeout_ms}ms")]
    Timeout { stage: StageKind, timeout_ms: u64 },
}

impl StageError {
    pub fn unavailable(stage: StageKind, message: impl Into<String>) -> Self {
        Self::Unavailable {
            stage,
            message: message.into(),
        }
    }

    pub fn invalid_input(stage: StageKind, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            stage,
            message: message.into(),
        }
    }

    pub fn execution(stage: StageKind, message: impl Into<String>) -> Self {
        Self::Execution {
            stage,
            message: message.into(),
        }
    }

    /// The stage that raised this error.
    pub fn stage(&self) -> StageKind {
        match self {
            StageError::Unavailable { stage, .. }
            | StageError::InvalidInput { stage, .. }
            | StageError::Execution { stage, .. }
            | StageError::Timeout { stage, .. } => *stage,
        }
    }

    /// The error text without the stage prefix.
    pub fn message(&self) -> String {
        match self {
            StageError::Unavailable { message, .. }
            | StageError::InvalidInput { message, .. }
            | StageError::Execution { message, .. } => message.clone(),
            StageError::Timeout { timeout_ms, .. } => format!("timed out after {timeout_ms}ms"),
        }
    }

    /// Taxonomy bucket. Timeouts count as execution errors.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::Unavailable { .. } => ErrorKind::Unavailable,
            StageError::InvalidInput { .. } => ErrorKind::InvalidInput,
            StageError::Execution { .. } | StageError::Timeout { .. } => ErrorKind::Execution,
        }
    }
}

/// A source file that cannot be turned into a pixel buffer.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("File too large: {path} ({size_mb}MB > {max_mb}MB)")]
    FileTooLarge {
        path: PathBuf,
        size_mb: u64,
        max_mb: u64,
    },

    #[error("Image too large: {path} ({width}x{height} > {max_dim})")]
    ImageTooLarge {
        path: PathBuf,
        width: u32,
        height: u32,
        max_dim: u32,
    },

    #[error("Decode error for {path}: {message}")]
    Decode { path: PathBuf, message: String },
}

/// The enhanced image could not be persisted.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Cannot create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode {path}: {message}")]
    Encode { path: PathBuf, message: String },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another source in the same batch maps to this output file
    #[error("Output {path} is already written by {claimed_by}")]
    Collision { path: PathBuf, claimed_by: PathBuf },
}

/// Errors that abort a whole batch before any job runs.
#[derive(Error, Debug)]
pub enum BatchError {
    /// The job template failed validation
    #[error(transparent)]
    InvalidOptions(#[from] JobError),

    /// A mandatory stage cannot run on this host
    #[error("Mandatory stage {stage} is unavailable: {message}")]
    StageUnavailable { stage: StageKind, message: String },

    /// Input path does not exist
    #[error("Input not found: {0}")]
    InputNotFound(PathBuf),

    /// The output directory could not be prepared
    #[error("Cannot create output directory {path}: {message}")]
    OutputDir { path: PathBuf, message: String },
}

/// Convenience type alias for sl0thifier results.
pub type Result<T> = std::result::Result<T, Sl0thError>;
