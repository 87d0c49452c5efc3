//! Pipeline configuration.
//!
//! Configuration is a YAML document naming the experiment, the storage
//! locations and the ordered list of stages. Storage settings and the
//! experiment name can be overridden from the environment:
//!
//! - `RUNFORGE_EXPERIMENT_NAME`
//! - `RUNFORGE_TRACKING_DB`
//! - `RUNFORGE_ARTIFACT_ROOT`
//! - `RUNFORGE_STAGING_DIR`
//! - `RUNFORGE_CHUNK_SIZE`

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifacts::validate_name;
use crate::fetch::DEFAULT_CHUNK_SIZE;
use crate::stage::StageParams;

/// Source of the iris dataset used by the default pipeline.
pub const DEFAULT_FILE_URL: &str =
    "https://raw.githubusercontent.com/scikit-learn/scikit-learn/main/sklearn/datasets/data/iris.csv";

const DEFAULT_EXPERIMENT_NAME: &str = "iris_pipeline";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// The configuration document could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub main: MainConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default = "default_stages")]
    pub stages: Vec<StageConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainConfig {
    /// Groups all runs of one pipeline.
    pub experiment_name: String,
}

/// Where runs, artifacts and staging directories live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub tracking_db: PathBuf,
    pub artifact_root: PathBuf,
    /// Parent for staging directories; the system temp dir when unset.
    pub staging_dir: Option<PathBuf>,
    /// Chunk size in bytes for fetches and artifact copies.
    pub chunk_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::under(Path::new("runforge"))
    }
}

impl StorageConfig {
    /// Tracking database and artifact root both under `root`.
    pub fn under(root: &Path) -> Self {
        Self {
            tracking_db: root.join("tracking.db"),
            artifact_root: root.join("artifacts"),
            staging_dir: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Download,
    Projection,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageKind::Download => write!(f, "download"),
            StageKind::Projection => write!(f, "projection"),
        }
    }
}

/// One configured stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Stage identifier, recorded as the run name.
    pub id: String,
    pub kind: StageKind,
    pub parameters: StageParameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageParameters {
    /// Source locator for download stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(flatten)]
    pub params: StageParams,
}

impl StageConfig {
    pub fn download(id: impl Into<String>, file_url: impl Into<String>, params: StageParams) -> Self {
        Self {
            id: id.into(),
            kind: StageKind::Download,
            parameters: StageParameters {
                file_url: Some(file_url.into()),
                params,
            },
        }
    }

    pub fn projection(id: impl Into<String>, params: StageParams) -> Self {
        Self {
            id: id.into(),
            kind: StageKind::Projection,
            parameters: StageParameters {
                file_url: None,
                params,
            },
        }
    }
}

fn default_stages() -> Vec<StageConfig> {
    vec![
        StageConfig::download(
            "download_data",
            DEFAULT_FILE_URL,
            StageParams::new("iris.csv", "raw_data").with_description("Input data"),
        ),
        StageConfig::projection(
            "process_data",
            StageParams::new("clean_data.csv", "processed_data")
                .with_input("iris.csv")
                .with_description("Cleaned data"),
        ),
    ]
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            main: MainConfig {
                experiment_name: DEFAULT_EXPERIMENT_NAME.to_string(),
            },
            storage: StorageConfig::default(),
            stages: default_stages(),
        }
    }
}

impl PipelineConfig {
    /// Creates the default two-stage configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Reads a YAML file, applies environment overrides and validates.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path).await?;
        let config = Self::from_yaml(&text)?.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration back to YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Applies `RUNFORGE_*` environment overrides.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("RUNFORGE_EXPERIMENT_NAME") {
            self.main.experiment_name = val;
        }

        if let Some(val) = lookup("RUNFORGE_TRACKING_DB") {
            self.storage.tracking_db = PathBuf::from(val);
        }

        if let Some(val) = lookup("RUNFORGE_ARTIFACT_ROOT") {
            self.storage.artifact_root = PathBuf::from(val);
        }

        if let Some(val) = lookup("RUNFORGE_STAGING_DIR") {
            self.storage.staging_dir = Some(PathBuf::from(val));
        }

        if let Some(val) = lookup("RUNFORGE_CHUNK_SIZE") {
            self.storage.chunk_size = parse_env_value(&val, "RUNFORGE_CHUNK_SIZE")?;
        }

        Ok(self)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.main.experiment_name.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "experiment_name must not be empty".to_string(),
            ));
        }

        if self.storage.chunk_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "chunk_size must be greater than 0".to_string(),
            ));
        }

        if self.stages.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "at least one stage must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for (index, stage) in self.stages.iter().enumerate() {
            if stage.id.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "stage #{} has an empty id",
                    index + 1
                )));
            }
            if !seen.insert(stage.id.as_str()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "duplicate stage id '{}'",
                    stage.id
                )));
            }

            let params = &stage.parameters.params;
            if params.artifact_name.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "stage '{}': artifact_name must not be empty",
                    stage.id
                )));
            }
            if validate_name(&params.artifact_name).is_err() {
                return Err(ConfigError::ValidationFailed(format!(
                    "stage '{}': artifact_name '{}' must be a plain file name",
                    stage.id, params.artifact_name
                )));
            }
            if params.artifact_type.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "stage '{}': artifact_type must not be empty",
                    stage.id
                )));
            }

            match stage.kind {
                StageKind::Download => {
                    let url = stage.parameters.file_url.as_deref().unwrap_or("");
                    if url.trim().is_empty() {
                        return Err(ConfigError::ValidationFailed(format!(
                            "stage '{}': download stages need a file_url",
                            stage.id
                        )));
                    }
                }
                StageKind::Projection => {
                    if index == 0 && params.input_artifact.is_none() {
                        return Err(ConfigError::ValidationFailed(format!(
                            "stage '{}': first stage has no predecessor to take input from",
                            stage.id
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    pub fn with_experiment_name(mut self, name: impl Into<String>) -> Self {
        self.main.experiment_name = name.into();
        self
    }

    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_stages(mut self, stages: Vec<StageConfig>) -> Self {
        self.stages = stages;
        self
    }

    /// Points every download stage at `url`.
    pub fn with_file_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        for stage in &mut self.stages {
            if stage.kind == StageKind::Download {
                stage.parameters.file_url = Some(url.clone());
            }
        }
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
