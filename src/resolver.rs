//! Logical artifact name resolution.
//!
//! A consuming stage never holds a reference to the run that produced its
//! input. It asks for a logical name, and the resolver looks up the newest
//! finished run in the experiment whose `artifactName` tag matches.

use crate::artifacts::{ArtifactStore, ArtifactUri};
use crate::error::ResolveError;
use crate::tracking::{tags, MetadataStore, Run, RunFilter, RunOrder, RunStatus};

/// The concrete artifact a logical name resolved to.
#[derive(Debug, Clone)]
pub struct ResolvedArtifact {
    pub logical_name: String,
    /// Producing run, as read at resolution time.
    pub run: Run,
    pub uri: ArtifactUri,
}

/// Resolves logical artifact names against the run metadata store.
#[derive(Debug, Clone)]
pub struct Resolver {
    store: MetadataStore,
    artifacts: ArtifactStore,
}

impl Resolver {
    pub fn new(store: MetadataStore, artifacts: ArtifactStore) -> Self {
        Self { store, artifacts }
    }

    /// Returns the artifact of the most recent finished run tagged with
    /// `logical_name`.
    ///
    /// Runs are ordered by start time, newest first, with ties broken on
    /// run id so repeated calls against the same store state agree. Runs
    /// still `RUNNING`, or ended as `FAILED`/`KILLED`, are never returned.
    pub async fn resolve(
        &self,
        experiment_id: &str,
        logical_name: &str,
    ) -> Result<ResolvedArtifact, ResolveError> {
        let filter = RunFilter::new()
            .with_tag(tags::ARTIFACT_NAME, logical_name)
            .with_status(RunStatus::Finished)
            .with_limit(1);

        let mut cursor = self
            .store
            .search(experiment_id, &filter, RunOrder::StartTimeDesc)
            .await?;

        let run = match cursor.next() {
            Some(run) => run?,
            None => {
                tracing::warn!(experiment_id, logical_name, "No run produced artifact");
                return Err(ResolveError::ArtifactNotFound {
                    experiment_id: experiment_id.to_string(),
                    logical_name: logical_name.to_string(),
                });
            }
        };

        let uri = self.artifacts.resolve_uri(&run, logical_name)?;

        tracing::info!(
            experiment_id,
            logical_name,
            run_id = %run.run_id,
            uri = %uri,
            "Resolved artifact"
        );

        Ok(ResolvedArtifact {
            logical_name: logical_name.to_string(),
            run,
            uri,
        })
    }
}
