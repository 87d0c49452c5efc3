//! Chunked, bounded-memory transfer of a source into a local file.

use std::path::Path;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use super::source::{ByteSource, ChunkStream, FileSource, HttpSource, LocatorKind};
use crate::error::FetchError;

/// Default read and write granularity.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Summary of a completed transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub bytes_written: u64,
    pub writes: u64,
    /// Largest single write issued, never above the chunk size.
    pub largest_write: usize,
}

/// Streams a locator into a destination file, one chunk at a time.
#[derive(Debug, Clone)]
pub struct StreamingFetcher {
    http: HttpSource,
    file: FileSource,
    chunk_size: usize,
}

impl Default for StreamingFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingFetcher {
    pub fn new() -> Self {
        Self {
            http: HttpSource::new(),
            file: FileSource,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_http(mut self, http: HttpSource) -> Self {
        self.http = http;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Fetches `locator` into `dest`, dispatching on the locator scheme.
    pub async fn fetch(&self, locator: &str, dest: &Path) -> Result<FetchReport, FetchError> {
        match LocatorKind::of(locator)? {
            LocatorKind::Http => self.fetch_from(&self.http, locator, dest).await,
            LocatorKind::File => self.fetch_from(&self.file, locator, dest).await,
        }
    }

    /// Fetches `locator` from an explicit source into `dest`.
    pub async fn fetch_from(
        &self,
        source: &dyn ByteSource,
        locator: &str,
        dest: &Path,
    ) -> Result<FetchReport, FetchError> {
        tracing::info!(locator = %locator, dest = %dest.display(), "Fetching source");
        let stream = source.open(locator, self.chunk_size).await?;
        let report = write_stream(stream, dest, self.chunk_size).await?;
        tracing::info!(
            locator = %locator,
            bytes = report.bytes_written,
            writes = report.writes,
            "Fetch complete"
        );
        Ok(report)
    }
}

/// Drains `stream` into `dest`, splitting oversized chunks so no single
/// write exceeds `chunk_size`. The file is flushed and synced before return.
pub async fn write_stream(
    mut stream: ChunkStream,
    dest: &Path,
    chunk_size: usize,
) -> Result<FetchReport, FetchError> {
    let write_err = |source: std::io::Error| FetchError::Write {
        path: dest.display().to_string(),
        source,
    };

    let chunk_size = chunk_size.max(1);
    let mut file = tokio::fs::File::create(dest).await.map_err(write_err)?;
    let mut report = FetchReport::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        for piece in chunk.chunks(chunk_size) {
            file.write_all(piece).await.map_err(write_err)?;
            report.bytes_written += piece.len() as u64;
            report.writes += 1;
            report.largest_write = report.largest_write.max(piece.len());
        }
    }

    file.flush().await.map_err(write_err)?;
    file.sync_all().await.map_err(write_err)?;
    Ok(report)
}
