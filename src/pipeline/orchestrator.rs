//! Pipeline orchestrator.
//!
//! Runs the configured stages strictly in order under one experiment:
//!
//! ```text
//! Init -> Resolving -> Running(1) -> Committed(1) -> Running(2) -> ... -> Done
//! ```
//!
//! `Failed` is reachable from `Resolving` and from any `Running` state. A
//! failed stage halts the pipeline; nothing is retried and the failed run
//! stays in the metadata store.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::context::TrackingContext;
use crate::error::{ArtifactError, ResolveError, StageError, TrackingError};
use crate::stage::{DownloadStage, ProjectionStage, Stage, StageParams, StageRecord, StageRunner};

use super::config::{ConfigError, PipelineConfig, StageConfig, StageKind};

/// Errors that can occur during pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Metadata store error outside of any stage.
    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),

    /// Artifact store error outside of any stage.
    #[error("Artifact store error: {0}")]
    Artifact(#[from] ArtifactError),

    /// A stage failed; the pipeline was halted.
    #[error("Stage '{stage}' failed on artifact '{artifact}': {source}")]
    StageFailed {
        stage: String,
        artifact: String,
        run_id: Option<String>,
        #[source]
        source: StageError,
    },

    /// No stages to execute.
    #[error("No stages to execute")]
    NoStages,
}

/// Orchestrator state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    /// Resolving or creating the named experiment.
    Resolving { experiment: String },
    Running { stage: String },
    Committed { stage: String },
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Init => write!(f, "init"),
            PipelineState::Resolving { experiment } => write!(f, "resolving({})", experiment),
            PipelineState::Running { stage } => write!(f, "{}.running", stage),
            PipelineState::Committed { stage } => write!(f, "{}.committed", stage),
            PipelineState::Done => write!(f, "done"),
            PipelineState::Failed => write!(f, "failed"),
        }
    }
}

/// Result of one pipeline execution.
#[derive(Debug)]
pub struct PipelineReport {
    pub experiment_name: String,
    pub experiment_id: Option<String>,
    /// Every state visited, in order. Ends in `Done` or `Failed`.
    pub states: Vec<PipelineState>,
    /// Records of the stages that finished.
    pub stages: Vec<StageRecord>,
    pub error: Option<PipelineError>,
    pub duration: Duration,
}

impl PipelineReport {
    fn new(experiment_name: &str) -> Self {
        Self {
            experiment_name: experiment_name.to_string(),
            experiment_id: None,
            states: Vec::new(),
            stages: Vec::new(),
            error: None,
            duration: Duration::ZERO,
        }
    }

    pub fn final_state(&self) -> Option<&PipelineState> {
        self.states.last()
    }

    pub fn is_success(&self) -> bool {
        self.final_state() == Some(&PipelineState::Done)
    }

    /// Returns the stage records, or the error that halted the pipeline.
    pub fn into_result(self) -> Result<Vec<StageRecord>, PipelineError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.stages),
        }
    }

    fn transition(&mut self, state: PipelineState) {
        tracing::info!(experiment = %self.experiment_name, state = %state, "Pipeline state");
        self.states.push(state);
    }

    fn fail(&mut self, error: PipelineError) {
        tracing::error!(experiment = %self.experiment_name, error = %error, "Pipeline failed");
        self.error = Some(error);
        self.transition(PipelineState::Failed);
    }
}

/// Sequences stage invocations under one experiment.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    runner: StageRunner,
}

impl PipelineOrchestrator {
    /// Creates an orchestrator over an already opened context.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError` if the configuration is invalid.
    pub fn new(config: PipelineConfig, ctx: TrackingContext) -> Result<Self, PipelineError> {
        check_config(&config)?;
        Ok(Self::from_parts(config, ctx))
    }

    /// Validates `config` and opens the stores it names.
    pub async fn open(config: PipelineConfig) -> Result<Self, PipelineError> {
        check_config(&config)?;
        let ctx = TrackingContext::open(&config.storage).await?;
        Ok(Self::from_parts(config, ctx))
    }

    fn from_parts(config: PipelineConfig, ctx: TrackingContext) -> Self {
        Self {
            config,
            runner: StageRunner::new(ctx),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn context(&self) -> &TrackingContext {
        self.runner.context()
    }

    /// Marks the run of an interrupted stage `KILLED`.
    ///
    /// Call after dropping a [`run`](Self::run) future; returns the killed
    /// run id, or `None` if no stage was in flight.
    pub async fn kill_active(&self) -> Result<Option<String>, TrackingError> {
        self.runner.kill_active().await
    }

    /// Runs every configured stage in order.
    ///
    /// Never panics on stage failure; the returned report carries the
    /// halting error, if any.
    pub async fn run(&self) -> PipelineReport {
        let start = Instant::now();
        let name = &self.config.main.experiment_name;
        let mut report = PipelineReport::new(name);
        report.transition(PipelineState::Init);

        report.transition(PipelineState::Resolving {
            experiment: name.clone(),
        });
        let experiment = match self.context().store.get_or_create_experiment(name).await {
            Ok(experiment) => experiment,
            Err(e) => {
                report.fail(e.into());
                report.duration = start.elapsed();
                return report;
            }
        };
        report.experiment_id = Some(experiment.experiment_id.clone());

        let mut previous_output: Option<&str> = None;
        for stage_config in &self.config.stages {
            let stage = self.build_stage(stage_config);
            let params = thread_input(stage_config, stage.as_ref(), previous_output);

            report.transition(PipelineState::Running {
                stage: stage_config.id.clone(),
            });

            match self
                .runner
                .run(&experiment.experiment_id, &stage_config.id, stage.as_ref(), &params)
                .await
            {
                Ok(record) => {
                    report.transition(PipelineState::Committed {
                        stage: stage_config.id.clone(),
                    });
                    report.stages.push(record);
                }
                Err(failure) => {
                    let artifact = match &failure.error {
                        StageError::Resolve(ResolveError::ArtifactNotFound { logical_name, .. }) => {
                            logical_name.clone()
                        }
                        StageError::MissingInput(_) => {
                            params.input_artifact.clone().unwrap_or_default()
                        }
                        _ => params.artifact_name.clone(),
                    };
                    report.fail(PipelineError::StageFailed {
                        stage: stage_config.id.clone(),
                        artifact,
                        run_id: failure.run_id,
                        source: failure.error,
                    });
                    report.duration = start.elapsed();
                    return report;
                }
            }

            previous_output = Some(&stage_config.parameters.params.artifact_name);
        }

        report.transition(PipelineState::Done);
        report.duration = start.elapsed();
        tracing::info!(
            experiment = %name,
            stages = report.stages.len(),
            duration_ms = report.duration.as_millis() as u64,
            "Pipeline complete"
        );
        report
    }

    fn build_stage(&self, config: &StageConfig) -> Box<dyn Stage> {
        match config.kind {
            StageKind::Download => Box::new(DownloadStage::new(
                config.parameters.file_url.clone().unwrap_or_default(),
                self.context().fetcher.clone(),
            )),
            StageKind::Projection => Box::new(ProjectionStage::new()),
        }
    }
}

fn check_config(config: &PipelineConfig) -> Result<(), PipelineError> {
    if config.stages.is_empty() {
        return Err(PipelineError::NoStages);
    }
    config.validate()?;
    Ok(())
}

/// Fills in a missing input name from the previous stage's output.
fn thread_input(
    config: &StageConfig,
    stage: &dyn Stage,
    previous_output: Option<&str>,
) -> StageParams {
    let mut params = config.parameters.params.clone();
    if stage.requires_input() && params.input_artifact.is_none() {
        params.input_artifact = previous_output.map(str::to_string);
    }
    params
}
