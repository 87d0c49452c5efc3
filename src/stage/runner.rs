//! Run lifecycle around one stage invocation.
//!
//! Order of operations for a stage:
//!
//! 1. create a `RUNNING` run and tag it with the stage id
//! 2. resolve the input artifact, if the stage takes one
//! 3. produce outputs into a fresh staging directory
//! 4. commit every staged file to the artifact store
//! 5. attach the artifact and lineage tags
//! 6. mark the run `FINISHED`
//!
//! Any failure marks the run `FAILED` and leaves it in the store. Artifact
//! tags are only written once every commit has succeeded, so a failed run
//! never claims an artifact it does not own. If the stage future is dropped
//! mid-flight, the run stays registered as active until
//! [`StageRunner::kill_active`] marks it `KILLED`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use super::{Stage, StageInput, StageOutput, StageParams};
use crate::artifacts::{validate_name, CommittedArtifact};
use crate::context::TrackingContext;
use crate::error::{StageError, TrackingError};
use crate::resolver::ResolvedArtifact;
use crate::tracking::{tags, Run};

/// A stage failure, with the run it happened in when one was created.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct StageFailure {
    pub run_id: Option<String>,
    #[source]
    pub error: StageError,
}

impl StageFailure {
    fn before_run(error: StageError) -> Self {
        Self {
            run_id: None,
            error,
        }
    }
}

/// Outcome of a successful stage invocation.
#[derive(Debug, Clone)]
pub struct StageRecord {
    pub stage_id: String,
    /// The finalized run, tags included.
    pub run: Run,
    pub input: Option<ResolvedArtifact>,
    pub artifacts: Vec<CommittedArtifact>,
}

impl StageRecord {
    /// The committed artifact registered under the logical output name.
    pub fn primary_artifact(&self) -> Option<&CommittedArtifact> {
        let name = self.run.artifact_name()?;
        self.artifacts.iter().find(|a| a.name == name)
    }
}

/// Id of the run currently executing, shared between runner clones.
#[derive(Debug, Clone, Default)]
struct ActiveRun(Arc<Mutex<Option<String>>>);

impl ActiveRun {
    fn set(&self, run_id: &str) {
        *self.lock() = Some(run_id.to_string());
    }

    fn clear(&self) {
        self.lock().take();
    }

    fn take(&self) -> Option<String> {
        self.lock().take()
    }

    fn current(&self) -> Option<String> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Executes stages against a tracking context.
#[derive(Debug, Clone)]
pub struct StageRunner {
    ctx: TrackingContext,
    active: ActiveRun,
}

impl StageRunner {
    pub fn new(ctx: TrackingContext) -> Self {
        Self {
            ctx,
            active: ActiveRun::default(),
        }
    }

    pub fn context(&self) -> &TrackingContext {
        &self.ctx
    }

    /// Run id of the stage in flight, if any.
    pub fn active_run(&self) -> Option<String> {
        self.active.current()
    }

    /// Marks the in-flight run `KILLED`, returning its id.
    ///
    /// Meant for after the stage future was dropped (interrupt), when no
    /// other exit path will finalize the run.
    pub async fn kill_active(&self) -> Result<Option<String>, TrackingError> {
        let Some(run_id) = self.active.take() else {
            return Ok(None);
        };
        self.ctx.store.kill_run(&run_id).await?;
        tracing::warn!(run_id = %run_id, "Killed interrupted run");
        Ok(Some(run_id))
    }

    /// Runs `stage` as a new run of `experiment_id`.
    pub async fn run(
        &self,
        experiment_id: &str,
        stage_id: &str,
        stage: &dyn Stage,
        params: &StageParams,
    ) -> Result<StageRecord, StageFailure> {
        if stage.requires_input() && params.input_artifact.is_none() {
            return Err(StageFailure::before_run(StageError::MissingInput(
                stage_id.to_string(),
            )));
        }
        // Stages write straight to `<staging>/<artifact_name>`.
        validate_name(&params.artifact_name)
            .map_err(|e| StageFailure::before_run(e.into()))?;

        let run = self
            .ctx
            .store
            .create_run(experiment_id)
            .await
            .map_err(|e| StageFailure::before_run(e.into()))?;

        tracing::info!(
            stage = stage_id,
            kind = stage.kind(),
            run_id = %run.run_id,
            "Starting stage"
        );
        self.active.set(&run.run_id);

        let result = self.execute(&run, stage_id, stage, params).await;
        self.active.clear();
        match result {
            Ok(record) => {
                tracing::info!(
                    stage = stage_id,
                    run_id = %run.run_id,
                    artifacts = record.artifacts.len(),
                    "Stage finished"
                );
                Ok(record)
            }
            Err(error) => {
                tracing::error!(stage = stage_id, run_id = %run.run_id, error = %error, "Stage failed");
                if let Err(e) = self.ctx.store.fail_run(&run.run_id).await {
                    tracing::warn!(run_id = %run.run_id, error = %e, "Failed to mark run as failed");
                }
                Err(StageFailure {
                    run_id: Some(run.run_id),
                    error,
                })
            }
        }
    }

    async fn execute(
        &self,
        run: &Run,
        stage_id: &str,
        stage: &dyn Stage,
        params: &StageParams,
    ) -> Result<StageRecord, StageError> {
        let store = &self.ctx.store;
        store.set_tag(&run.run_id, tags::RUN_NAME, stage_id).await?;

        // Resolved once and reused for the whole stage.
        let input = match (&params.input_artifact, stage.requires_input()) {
            (Some(name), true) => Some(
                self.ctx
                    .resolver()
                    .resolve(&run.experiment_id, name)
                    .await?,
            ),
            _ => None,
        };

        let artifacts = &self.ctx.artifacts;
        let (output, committed) = self
            .ctx
            .staging
            .with_staging_dir(|dir| {
                let input = input.as_ref();
                async move {
                    let output = stage
                        .produce(StageInput {
                            params,
                            input,
                            artifacts,
                            staging_dir: &dir,
                        })
                        .await?;
                    let committed = commit_outputs(self, run, params, &output).await?;
                    Ok::<_, StageError>((output, committed))
                }
            })
            .await?;

        let mut run_tags = output.tags;
        run_tags.insert(tags::ARTIFACT_NAME.into(), params.artifact_name.clone());
        run_tags.insert(tags::ARTIFACT_TYPE.into(), params.artifact_type.clone());
        run_tags.insert(
            tags::ARTIFACT_DESCRIPTION.into(),
            params.artifact_description.clone(),
        );
        if let Some(input) = &input {
            run_tags.insert(tags::INPUT_ARTIFACT.into(), input.logical_name.clone());
        }
        if let Some(primary) = committed.iter().find(|a| a.name == params.artifact_name) {
            run_tags.insert(tags::ARTIFACT_SHA256.into(), primary.sha256.clone());
        }

        store.set_tags(&run.run_id, &run_tags).await?;
        store.finish_run(&run.run_id).await?;

        Ok(StageRecord {
            stage_id: stage_id.to_string(),
            run: store.get_run(&run.run_id).await?,
            input,
            artifacts: committed,
        })
    }
}

async fn commit_outputs(
    runner: &StageRunner,
    run: &Run,
    params: &StageParams,
    output: &StageOutput,
) -> Result<Vec<CommittedArtifact>, StageError> {
    if !output
        .artifacts
        .iter()
        .any(|a| a.name == params.artifact_name)
    {
        return Err(StageError::Transform(format!(
            "stage did not produce its declared artifact '{}'",
            params.artifact_name
        )));
    }

    let mut committed = Vec::with_capacity(output.artifacts.len());
    for staged in &output.artifacts {
        let artifact = runner
            .ctx
            .artifacts
            .put_file(run, &staged.name, &staged.path)
            .await?;
        committed.push(artifact);
    }
    Ok(committed)
}

/// Tags a stage run would carry, for display.
pub fn lineage_tags(run: &Run) -> BTreeMap<&str, &str> {
    [
        tags::RUN_NAME,
        tags::ARTIFACT_NAME,
        tags::ARTIFACT_TYPE,
        tags::INPUT_ARTIFACT,
    ]
    .into_iter()
    .filter_map(|key| run.tag(key).map(|value| (key, value)))
    .collect()
}
