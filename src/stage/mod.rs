//! Pipeline stages.
//!
//! A [`Stage`] is the pluggable unit of work: it optionally consumes one
//! resolved input artifact and writes its outputs into a staging directory.
//! Everything around it (run creation, input resolution, staging lifetime,
//! artifact commit, tagging, finalization) is handled by [`StageRunner`].

pub mod download;
pub mod projection;
pub mod runner;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::artifacts::ArtifactStore;
use crate::error::StageError;
use crate::resolver::ResolvedArtifact;

pub use download::DownloadStage;
pub use projection::ProjectionStage;
pub use runner::{StageFailure, StageRecord, StageRunner};

/// Named parameters every stage invocation accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageParams {
    /// Logical name to resolve as input, if the stage takes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_artifact: Option<String>,
    /// Logical name (and file name) of the primary output.
    pub artifact_name: String,
    pub artifact_type: String,
    #[serde(default)]
    pub artifact_description: String,
}

impl StageParams {
    pub fn new(artifact_name: impl Into<String>, artifact_type: impl Into<String>) -> Self {
        Self {
            input_artifact: None,
            artifact_name: artifact_name.into(),
            artifact_type: artifact_type.into(),
            artifact_description: String::new(),
        }
    }

    pub fn with_input(mut self, input_artifact: impl Into<String>) -> Self {
        self.input_artifact = Some(input_artifact.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.artifact_description = description.into();
        self
    }
}

/// What a stage sees while producing.
pub struct StageInput<'a> {
    pub params: &'a StageParams,
    /// Resolved input artifact, present iff the stage requires one.
    pub input: Option<&'a ResolvedArtifact>,
    /// Read access to committed artifacts.
    pub artifacts: &'a ArtifactStore,
    /// Exclusive staging directory, removed after the stage returns.
    pub staging_dir: &'a Path,
}

/// A file a stage wrote into its staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifact {
    pub name: String,
    pub path: PathBuf,
}

impl StagedArtifact {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Outputs declared by a stage.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub artifacts: Vec<StagedArtifact>,
    /// Extra tags derived by the stage itself.
    pub tags: BTreeMap<String, String>,
}

impl StageOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_artifact(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.artifacts.push(StagedArtifact::new(name, path));
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// A pluggable pipeline step.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Short kind name used in logs.
    fn kind(&self) -> &'static str;

    /// Whether the stage must be given a resolved input artifact.
    fn requires_input(&self) -> bool;

    /// Writes the stage's outputs into `ctx.staging_dir`.
    ///
    /// The output must include an artifact named `ctx.params.artifact_name`.
    async fn produce(&self, ctx: StageInput<'_>) -> Result<StageOutput, StageError>;
}
