//! Run and experiment records.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TrackingError;

/// Well-known tag keys written by pipeline stages.
pub mod tags {
    /// Human-readable stage name of the run.
    pub const RUN_NAME: &str = "runName";
    /// Logical artifact name downstream stages resolve on.
    pub const ARTIFACT_NAME: &str = "artifactName";
    /// Classifier of the produced artifact (e.g. "raw_data").
    pub const ARTIFACT_TYPE: &str = "artifactType";
    /// Free-text description of the produced artifact.
    pub const ARTIFACT_DESCRIPTION: &str = "artifactDescription";
    /// Source locator the artifact was downloaded from.
    pub const ARTIFACT_ORIGINAL_URL: &str = "artifactOriginalUrl";
    /// SHA-256 of the primary artifact's bytes.
    pub const ARTIFACT_SHA256: &str = "artifactSha256";
    /// Logical name of the artifact this run consumed.
    pub const INPUT_ARTIFACT: &str = "inputArtifact";
}

/// Lifecycle status of a run.
///
/// Only `Running` runs accept tag writes. Every other status is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
    Killed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Finished => "FINISHED",
            RunStatus::Failed => "FAILED",
            RunStatus::Killed => "KILLED",
        }
    }

    /// Whether the run has been finalized and is now read-only.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = TrackingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(RunStatus::Running),
            "FINISHED" => Ok(RunStatus::Finished),
            "FAILED" => Ok(RunStatus::Failed),
            "KILLED" => Ok(RunStatus::Killed),
            other => Err(TrackingError::Corrupt(format!("unknown run status '{}'", other))),
        }
    }
}

/// A named grouping of runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// One recorded invocation of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    /// Opaque identifier, immutable once assigned.
    pub run_id: String,
    pub experiment_id: String,
    /// Milliseconds since the Unix epoch. Used for ordering only.
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub status: RunStatus,
    pub tags: BTreeMap<String, String>,
    /// Base URI under which every artifact of this run lives.
    pub artifact_uri_root: String,
}

impl Run {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Logical artifact name this run registered, if any.
    pub fn artifact_name(&self) -> Option<&str> {
        self.tag(tags::ARTIFACT_NAME)
    }

    pub fn run_name(&self) -> Option<&str> {
        self.tag(tags::RUN_NAME)
    }

    pub fn is_finalized(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        millis_to_datetime(self.start_time)
    }
}

pub(crate) fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
