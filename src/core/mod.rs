// Public modules
pub mod app;
pub mod config;
pub mod engine;
pub mod error;
pub mod permissions;
pub mod pipeline;
pub mod render;
pub mod roles;
pub mod stage;
pub mod step;
pub mod tasks;

// Shared with the CLI and integration tests
pub mod local_files;
pub mod slugify;

// Re-export common types for convenience
pub use config::PipelineConfig;
pub use engine::{Backend, GeneratedFile};
pub use error::{Error, ErrorCode, Result};
pub use pipeline::{compile, CompiledPipeline};
