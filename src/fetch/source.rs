//! Byte sources the streaming fetcher can read from.

use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use reqwest::{Client, Url};
use tokio::io::AsyncReadExt;

use crate::error::FetchError;

/// A stream of chunks read from a source.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, FetchError>> + Send>>;

/// Something that can be opened for streamed reading.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Opens `locator`. Implementations should yield chunks no larger than
    /// `chunk_size` where they control the read size.
    async fn open(&self, locator: &str, chunk_size: usize) -> Result<ChunkStream, FetchError>;
}

/// HTTP(S) source backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
}

impl Default for HttpSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Time allowed to establish a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest pause tolerated between two reads of a response. Resets after
/// every successful read, so large bodies are not cut short.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

impl HttpSource {
    pub fn new() -> Self {
        Self::with_timeouts(DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
    }

    /// A stalled body surfaces as [`FetchError::Fetch`] once `read` elapses
    /// without progress.
    pub fn with_timeouts(connect: Duration, read: Duration) -> Self {
        Self {
            client: Client::builder()
                .user_agent(concat!("runforge/", env!("CARGO_PKG_VERSION")))
                .connect_timeout(connect)
                .read_timeout(read)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ByteSource for HttpSource {
    async fn open(&self, locator: &str, _chunk_size: usize) -> Result<ChunkStream, FetchError> {
        let response = self
            .client
            .get(locator)
            .send()
            .await
            .map_err(|e| FetchError::Fetch {
                locator: locator.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus {
                locator: locator.to_string(),
                status: response.status().as_u16(),
            });
        }

        let locator = locator.to_string();
        let stream = async_stream::stream! {
            let mut response = response;
            loop {
                match response.chunk().await {
                    Ok(Some(chunk)) => yield Ok::<Bytes, FetchError>(chunk),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(FetchError::Fetch {
                            locator: locator.clone(),
                            reason: e.to_string(),
                        });
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Local file source for `file://` URLs and plain paths.
#[derive(Debug, Clone, Default)]
pub struct FileSource;

#[async_trait]
impl ByteSource for FileSource {
    async fn open(&self, locator: &str, chunk_size: usize) -> Result<ChunkStream, FetchError> {
        let path = local_path(locator)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| FetchError::Fetch {
                locator: locator.to_string(),
                reason: e.to_string(),
            })?;

        let locator = locator.to_string();
        let chunk_size = chunk_size.max(1);
        let stream = async_stream::stream! {
            let mut file = file;
            let mut buf = vec![0u8; chunk_size];
            loop {
                match file.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => yield Ok::<Bytes, FetchError>(Bytes::copy_from_slice(&buf[..n])),
                    Err(e) => {
                        yield Err(FetchError::Fetch {
                            locator: locator.clone(),
                            reason: e.to_string(),
                        });
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// How a locator should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorKind {
    Http,
    File,
}

impl LocatorKind {
    pub fn of(locator: &str) -> Result<Self, FetchError> {
        match Url::parse(locator) {
            Ok(url) => match url.scheme() {
                "http" | "https" => Ok(LocatorKind::Http),
                "file" => Ok(LocatorKind::File),
                // Windows drive letters parse as a one-letter scheme.
                s if s.len() == 1 => Ok(LocatorKind::File),
                _ => Err(FetchError::UnsupportedLocator(locator.to_string())),
            },
            Err(_) => Ok(LocatorKind::File),
        }
    }
}

/// Base file name of a locator, without query string or fragment.
pub fn source_basename(locator: &str) -> Option<String> {
    let trimmed = locator.split(['?', '#']).next().unwrap_or(locator);
    trimmed
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

fn local_path(locator: &str) -> Result<PathBuf, FetchError> {
    if locator.starts_with("file:") {
        let url = Url::parse(locator)
            .map_err(|_| FetchError::UnsupportedLocator(locator.to_string()))?;
        return url
            .to_file_path()
            .map_err(|_| FetchError::UnsupportedLocator(locator.to_string()));
    }
    Ok(PathBuf::from(locator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_source_basename_strips_query() {
        assert_eq!(
            source_basename("https://example.com/data/iris.csv?raw=true").as_deref(),
            Some("iris.csv")
        );
        assert_eq!(
            source_basename("file:///tmp/fixtures/iris.csv").as_deref(),
            Some("iris.csv")
        );
        assert_eq!(source_basename("https://example.com/"), None);
    }

    #[test]
    fn test_locator_kind() {
        assert_eq!(LocatorKind::of("https://x/y.csv").unwrap(), LocatorKind::Http);
        assert_eq!(LocatorKind::of("http://x/y.csv").unwrap(), LocatorKind::Http);
        assert_eq!(LocatorKind::of("file:///tmp/y.csv").unwrap(), LocatorKind::File);
        assert_eq!(LocatorKind::of("/tmp/y.csv").unwrap(), LocatorKind::File);
        assert_eq!(LocatorKind::of("data/y.csv").unwrap(), LocatorKind::File);
        assert!(matches!(
            LocatorKind::of("ftp://x/y.csv"),
            Err(FetchError::UnsupportedLocator(_))
        ));
    }

    #[tokio::test]
    async fn test_file_source_reads_in_bounded_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, vec![1u8; 10_000]).unwrap();
        let locator = Url::from_file_path(&path).unwrap().to_string();

        let mut stream = FileSource.open(&locator, 4096).await.unwrap();
        let mut sizes = Vec::new();
        while let Some(chunk) = stream.next().await {
            sizes.push(chunk.unwrap().len());
        }

        assert_eq!(sizes.iter().sum::<usize>(), 10_000);
        assert!(sizes.iter().all(|&n| n <= 4096));
    }

    #[tokio::test]
    async fn test_file_source_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.csv");
        let result = FileSource.open(missing.to_str().unwrap(), 8192).await;
        assert!(matches!(result, Err(FetchError::Fetch { .. })));
    }

    #[tokio::test]
    async fn test_stalled_http_body_times_out() {
        use tokio::io::AsyncWriteExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nabc")
                .await
                .unwrap();
            // Hold the connection open without sending the rest.
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let source = HttpSource::with_timeouts(Duration::from_secs(5), Duration::from_millis(200));
        let locator = format!("http://{}/iris.csv", addr);

        let outcome = tokio::time::timeout(Duration::from_secs(10), async {
            match source.open(&locator, 1024).await {
                Err(e) => Err(e),
                Ok(mut stream) => {
                    while let Some(chunk) = stream.next().await {
                        chunk?;
                    }
                    Ok::<(), FetchError>(())
                }
            }
        })
        .await
        .expect("read timeout did not fire");

        assert!(matches!(outcome, Err(FetchError::Fetch { .. })));
    }
}
