//! Download stage: streams a source into the store as a raw artifact.

use async_trait::async_trait;

use super::{Stage, StageInput, StageOutput};
use crate::error::StageError;
use crate::fetch::{source_basename, StreamingFetcher};
use crate::tracking::tags;

/// Fetches one URL (or local path) and registers it under the stage's
/// output name.
#[derive(Debug, Clone)]
pub struct DownloadStage {
    url: String,
    fetcher: StreamingFetcher,
}

impl DownloadStage {
    pub fn new(url: impl Into<String>, fetcher: StreamingFetcher) -> Self {
        Self {
            url: url.into(),
            fetcher,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Stage for DownloadStage {
    fn kind(&self) -> &'static str {
        "download"
    }

    fn requires_input(&self) -> bool {
        false
    }

    async fn produce(&self, ctx: StageInput<'_>) -> Result<StageOutput, StageError> {
        if self.url.trim().is_empty() {
            return Err(StageError::InvalidParameter {
                name: "file_url".into(),
                reason: "must not be empty".into(),
            });
        }

        let name = &ctx.params.artifact_name;
        let dest = ctx.staging_dir.join(name);
        tracing::info!(
            source = source_basename(&self.url).as_deref().unwrap_or("<unnamed>"),
            artifact = %name,
            "Downloading"
        );

        self.fetcher.fetch(&self.url, &dest).await?;

        Ok(StageOutput::new()
            .with_artifact(name, dest)
            .with_tag(tags::ARTIFACT_ORIGINAL_URL, &self.url))
    }
}
