//! Explicit handles to the shared stores.
//!
//! Nothing in the crate holds a global client. A [`TrackingContext`] is
//! opened once from configuration and passed to every component that needs
//! the metadata store, the artifact store or the staging area.

use crate::artifacts::ArtifactStore;
use crate::fetch::StreamingFetcher;
use crate::pipeline::{PipelineError, StorageConfig};
use crate::resolver::Resolver;
use crate::staging::StagingArea;
use crate::tracking::MetadataStore;

#[derive(Debug, Clone)]
pub struct TrackingContext {
    pub store: MetadataStore,
    pub artifacts: ArtifactStore,
    pub staging: StagingArea,
    pub fetcher: StreamingFetcher,
}

impl TrackingContext {
    pub fn new(
        store: MetadataStore,
        artifacts: ArtifactStore,
        staging: StagingArea,
        fetcher: StreamingFetcher,
    ) -> Self {
        Self {
            store,
            artifacts,
            staging,
            fetcher,
        }
    }

    /// Opens both stores described by `config`.
    pub async fn open(config: &StorageConfig) -> Result<Self, PipelineError> {
        let artifacts = ArtifactStore::open(&config.artifact_root)
            .await?
            .with_chunk_size(config.chunk_size);
        let store = MetadataStore::open(&config.tracking_db, artifacts.root_uri()?).await?;

        let staging = match &config.staging_dir {
            Some(dir) => StagingArea::in_dir(dir),
            None => StagingArea::new(),
        };
        let fetcher = StreamingFetcher::new().with_chunk_size(config.chunk_size);

        tracing::debug!(
            tracking_db = %config.tracking_db.display(),
            artifact_root = %artifacts.root().display(),
            "Opened tracking context"
        );

        Ok(Self::new(store, artifacts, staging, fetcher))
    }

    pub fn resolver(&self) -> Resolver {
        Resolver::new(self.store.clone(), self.artifacts.clone())
    }
}
