//! Pipeline orchestration.
//!
//! - **discovery**: Find supported images in a file or directory
//! - **validate**: Size and signature checks before decoding
//! - **decode**: Load a source file into a pixel buffer
//! - **registry**: Probe and order the stages a batch runs
//! - **executor**: Thread one job through its stages and persist it
//! - **batch**: Bounded parallel dispatch over a whole input set
//! - **cancel**: Batch-wide cancellation flag

pub mod batch;
pub mod cancel;
pub mod decode;
pub mod discovery;
pub mod executor;
pub mod registry;
pub mod validate;

// Re-exports for convenient access
pub use batch::{BatchCoordinator, BatchReport};
pub use cancel::CancellationToken;
pub use decode::ImageDecoder;
pub use discovery::{DiscoveredFile, FileDiscovery};
pub use executor::{Interrupted, PipelineExecutor};
pub use registry::{PlannedStage, StageRegistry};
pub use validate::Validator;
