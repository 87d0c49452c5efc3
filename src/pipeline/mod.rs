//! Pipeline configuration and orchestration.
//!
//! A pipeline is an ordered list of stages run under one experiment. Each
//! stage becomes one run in the metadata store; a stage that consumes input
//! finds it by logical name through the resolver rather than by holding a
//! reference to the producing run.
//!
//! # Example
//!
//! ```rust,ignore
//! use runforge::pipeline::{PipelineConfig, PipelineOrchestrator};
//!
//! let config = PipelineConfig::load(Path::new("pipeline.yaml")).await?;
//! let orchestrator = PipelineOrchestrator::open(config).await?;
//!
//! let report = orchestrator.run().await;
//! for record in report.into_result()? {
//!     println!("{} -> {}", record.stage_id, record.run.run_id);
//! }
//! ```

pub mod config;
pub mod orchestrator;

pub use config::{
    ConfigError, MainConfig, PipelineConfig, StageConfig, StageKind, StageParameters,
    StorageConfig, DEFAULT_FILE_URL,
};
pub use orchestrator::{PipelineError, PipelineOrchestrator, PipelineReport, PipelineState};
