//! runforge: tracked, sequential data pipelines with artifact lineage.
//!
//! Each pipeline stage is recorded as a run in a metadata store. Stage
//! outputs are committed as immutable artifacts owned by that run and tagged
//! with a logical name. Downstream stages resolve their inputs by logical
//! name, picking the newest finished run that produced it.

pub mod artifacts;
pub mod cli;
pub mod context;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod resolver;
pub mod stage;
pub mod staging;
pub mod tracking;

// Re-export commonly used error types
pub use error::{ArtifactError, FetchError, ResolveError, StageError, TrackingError};
pub use pipeline::{ConfigError, PipelineError};
