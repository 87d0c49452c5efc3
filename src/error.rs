//! Error types for runforge operations.
//!
//! Defines the error taxonomy for every subsystem:
//! - Run metadata tracking (runs, experiments, tags)
//! - Artifact commits and reads
//! - Streaming fetches into the staging area
//! - Logical artifact resolution
//! - Stage execution
//!
//! Errors are surfaced to the orchestrator unchanged; nothing here is retried.

use thiserror::Error;

use crate::tracking::RunStatus;

/// Errors raised by the run metadata store.
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("Metadata store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Run '{0}' not found")]
    RunNotFound(String),

    #[error("Experiment '{0}' not found")]
    ExperimentNotFound(String),

    #[error("Experiment '{0}' already exists")]
    ExperimentExists(String),

    #[error("Run '{run_id}' is {status} and can no longer be modified")]
    InvalidState { run_id: String, status: RunStatus },

    #[error("Query failed: {0}")]
    Query(sqlx::Error),

    #[error("Corrupt run record: {0}")]
    Corrupt(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<sqlx::Error> for TrackingError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => TrackingError::StoreUnavailable(err.to_string()),
            other => TrackingError::Query(other),
        }
    }
}

/// Errors raised by the artifact store.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Failed to upload artifact '{name}': {source}")]
    Upload {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact '{name}' already exists for run '{run_id}'")]
    AlreadyExists { run_id: String, name: String },

    #[error("Artifact not found at {0}")]
    NotFound(String),

    #[error("Invalid artifact name '{0}': must be a plain file name")]
    InvalidName(String),

    #[error("Invalid artifact URI '{0}'")]
    InvalidUri(String),

    #[error("Artifact store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while streaming a remote resource into the staging area.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to fetch '{locator}': {reason}")]
    Fetch { locator: String, reason: String },

    #[error("Source '{locator}' returned HTTP {status}")]
    HttpStatus { locator: String, status: u16 },

    #[error("Failed to write '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported source locator: {0}")]
    UnsupportedLocator(String),
}

/// Errors raised when a logical artifact name cannot be resolved.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("No finished run in experiment '{experiment_id}' produced artifact '{logical_name}'")]
    ArtifactNotFound {
        experiment_id: String,
        logical_name: String,
    },

    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),
}

/// Errors raised while executing a single pipeline stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Resolution error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Transform failed: {0}")]
    Transform(String),

    #[error("Stage '{0}' requires an input artifact but none was configured")]
    MissingInput(String),

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
