//! Run-scoped artifact storage on the local filesystem.
//!
//! Each artifact is an immutable blob addressed by (run, file name). Bytes
//! are streamed into a hidden partial file next to the final location and
//! only linked into place after every byte has been written and synced, so
//! readers never observe a half-written artifact.

use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use crate::error::ArtifactError;
use crate::tracking::Run;

use super::uri::ArtifactUri;

/// Default copy buffer size when streaming into the store.
pub const DEFAULT_COPY_CHUNK: usize = 8 * 1024;

/// Result of a successful commit.
#[derive(Debug, Clone, Serialize)]
pub struct CommittedArtifact {
    pub name: String,
    pub uri: ArtifactUri,
    pub size_bytes: u64,
    /// Hex-encoded SHA-256 of the committed bytes.
    pub sha256: String,
}

/// Listing entry for a committed artifact.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactInfo {
    pub name: String,
    pub uri: ArtifactUri,
    pub size_bytes: u64,
}

/// Storage for run artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    chunk_size: usize,
}

impl ArtifactStore {
    /// Opens the store rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| {
            ArtifactError::StoreUnavailable(format!(
                "Failed to create artifact root {}: {}",
                root.display(),
                e
            ))
        })?;
        let root = fs::canonicalize(&root)
            .await
            .map_err(|e| ArtifactError::StoreUnavailable(e.to_string()))?;

        Ok(Self {
            root,
            chunk_size: DEFAULT_COPY_CHUNK,
        })
    }

    /// Sets the copy buffer size used by [`put`](Self::put).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn root_uri(&self) -> Result<ArtifactUri, ArtifactError> {
        ArtifactUri::from_path(&self.root)
    }

    /// Location of artifact `name` under `run`. Performs no I/O.
    pub fn resolve_uri(&self, run: &Run, name: &str) -> Result<ArtifactUri, ArtifactError> {
        validate_name(name)?;
        Ok(ArtifactUri::parse(&run.artifact_uri_root)?.join(name))
    }

    /// Streams `reader` into the store as artifact `name` of `run`.
    ///
    /// On failure no artifact becomes visible at the resolved URI. The
    /// store does not retry.
    pub async fn put<R>(
        &self,
        run: &Run,
        name: &str,
        mut reader: R,
    ) -> Result<CommittedArtifact, ArtifactError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let uri = self.resolve_uri(run, name)?;
        let final_path = self.local_path(&uri)?;
        let run_dir = final_path
            .parent()
            .ok_or_else(|| ArtifactError::InvalidUri(uri.to_string()))?
            .to_path_buf();

        fs::create_dir_all(&run_dir)
            .await
            .map_err(|e| upload_error(name, e))?;

        if fs::try_exists(&final_path)
            .await
            .map_err(|e| upload_error(name, e))?
        {
            return Err(already_exists(run, name));
        }

        let partial = PartialFile::new(
            run_dir.join(format!(".{}.{}.partial", name, Uuid::new_v4().simple())),
        );

        let (size_bytes, sha256) = self
            .write_partial(&mut reader, partial.path())
            .await
            .map_err(|e| upload_error(name, e))?;

        // Linking fails if the name was taken meanwhile; the partial is
        // dropped either way.
        fs::hard_link(partial.path(), &final_path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => already_exists(run, name),
                _ => upload_error(name, e),
            })?;
        drop(partial);

        tracing::info!(
            run_id = %run.run_id,
            artifact = name,
            size_bytes,
            sha256 = %sha256,
            "Committed artifact"
        );

        Ok(CommittedArtifact {
            name: name.to_string(),
            uri,
            size_bytes,
            sha256,
        })
    }

    /// Commits a local file as artifact `name` of `run`.
    pub async fn put_file(
        &self,
        run: &Run,
        name: &str,
        path: &Path,
    ) -> Result<CommittedArtifact, ArtifactError> {
        let file = fs::File::open(path)
            .await
            .map_err(|e| upload_error(name, e))?;
        self.put(run, name, file).await
    }

    /// Opens a committed artifact for streamed reading.
    pub async fn reader(&self, uri: &ArtifactUri) -> Result<fs::File, ArtifactError> {
        let path = self.local_path(uri)?;
        fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ArtifactError::NotFound(uri.to_string())
            } else {
                ArtifactError::Io(e)
            }
        })
    }

    pub async fn exists(&self, uri: &ArtifactUri) -> bool {
        match self.local_path(uri) {
            Ok(path) => fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Lists the committed artifacts of a run, sorted by name.
    pub async fn list(&self, run: &Run) -> Result<Vec<ArtifactInfo>, ArtifactError> {
        let run_root = ArtifactUri::parse(&run.artifact_uri_root)?;
        let dir = self.local_path(&run_root)?;

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut artifacts = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            // Partial uploads are hidden.
            if name.starts_with('.') {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            artifacts.push(ArtifactInfo {
                uri: run_root.join(&name),
                name,
                size_bytes: metadata.len(),
            });
        }

        artifacts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(artifacts)
    }

    /// Maps a URI to its path, refusing anything outside the store root.
    fn local_path(&self, uri: &ArtifactUri) -> Result<PathBuf, ArtifactError> {
        let path = uri.to_path()?;
        if !path.starts_with(&self.root) {
            return Err(ArtifactError::InvalidUri(uri.to_string()));
        }
        Ok(path)
    }

    async fn write_partial<R>(&self, reader: &mut R, path: &Path) -> std::io::Result<(u64, String)>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;

        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; self.chunk_size];
        let mut size: u64 = 0;

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n]).await?;
            size += n as u64;
        }

        file.flush().await?;
        file.sync_all().await?;

        Ok((size, hex::encode(hasher.finalize())))
    }
}

fn upload_error(name: &str, source: std::io::Error) -> ArtifactError {
    ArtifactError::Upload {
        name: name.to_string(),
        source,
    }
}

fn already_exists(run: &Run, name: &str) -> ArtifactError {
    ArtifactError::AlreadyExists {
        run_id: run.run_id.clone(),
        name: name.to_string(),
    }
}

/// Checks that `name` is a plain file name with no path components.
pub fn validate_name(name: &str) -> Result<(), ArtifactError> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
        || Path::new(name).is_absolute();
    if invalid {
        return Err(ArtifactError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Partial upload, removed on drop. A committed artifact is a second link
/// to the same inode, so removing the partial never touches it.
struct PartialFile {
    path: PathBuf,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove partial upload");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    use crate::tracking::RunStatus;

    fn run_under(store: &ArtifactStore, run_id: &str) -> Run {
        let root = store.root_uri().unwrap().join("exp").join(run_id).join("artifacts");
        Run {
            run_id: run_id.to_string(),
            experiment_id: "exp".to_string(),
            start_time: 1,
            end_time: None,
            status: RunStatus::Running,
            tags: BTreeMap::new(),
            artifact_uri_root: root.to_string(),
        }
    }

    /// Yields `remaining` bytes, then fails.
    struct FailingReader {
        remaining: usize,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.remaining == 0 {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "injected failure",
                )));
            }
            let n = self.remaining.min(buf.remaining());
            buf.put_slice(&vec![7u8; n]);
            self.remaining -= n;
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_put_then_stream_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap().with_chunk_size(16);
        let run = run_under(&store, "run1");

        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let committed = store.put(&run, "iris.csv", data.as_slice()).await.unwrap();

        assert_eq!(committed.size_bytes, 1000);
        assert_eq!(committed.uri, store.resolve_uri(&run, "iris.csv").unwrap());
        assert_eq!(committed.sha256, hex::encode(Sha256::digest(&data)));

        let mut file = store.reader(&committed.uri).await.unwrap();
        let mut read_back = Vec::new();
        file.read_to_end(&mut read_back).await.unwrap();
        assert_eq!(read_back, data);
    }

    #[tokio::test]
    async fn test_artifacts_are_immutable() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        let run = run_under(&store, "run1");

        store.put(&run, "a.csv", &b"first"[..]).await.unwrap();
        let err = store.put(&run, "a.csv", &b"second"[..]).await.unwrap_err();
        assert!(matches!(err, ArtifactError::AlreadyExists { .. }));

        let other = run_under(&store, "run2");
        store.put(&other, "a.csv", &b"second"[..]).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_puts_of_same_name_commit_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap().with_chunk_size(4);
        let run = run_under(&store, "run1");

        let (a, b) = tokio::join!(
            store.put(&run, "a.csv", &b"aaaaaaaaaaaaaaaa"[..]),
            store.put(&run, "a.csv", &b"bbbbbbbbbbbbbbbb"[..]),
        );
        let (winner, loser) = match (a, b) {
            (Ok(w), Err(l)) => (w, l),
            (Err(l), Ok(w)) => (w, l),
            other => panic!("expected exactly one commit, got {:?}", other),
        };
        assert!(matches!(loser, ArtifactError::AlreadyExists { .. }));

        let mut read_back = Vec::new();
        store
            .reader(&winner.uri)
            .await
            .unwrap()
            .read_to_end(&mut read_back)
            .await
            .unwrap();
        assert_eq!(hex::encode(Sha256::digest(&read_back)), winner.sha256);

        // Only the committed file remains; both partials are gone.
        let names: Vec<_> = store.list(&run).await.unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["a.csv"]);
        let entries = std::fs::read_dir(winner.uri.to_path().unwrap().parent().unwrap())
            .unwrap()
            .count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_nothing_visible() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap().with_chunk_size(64);
        let run = run_under(&store, "run1");

        let err = store
            .put(&run, "big.bin", FailingReader { remaining: 10_000 })
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::Upload { .. }));

        let uri = store.resolve_uri(&run, "big.bin").unwrap();
        assert!(!store.exists(&uri).await);
        assert!(matches!(
            store.reader(&uri).await,
            Err(ArtifactError::NotFound(_))
        ));

        let leftovers = std::fs::read_dir(uri.to_path().unwrap().parent().unwrap())
            .unwrap()
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_list_skips_partials() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        let run = run_under(&store, "run1");

        assert!(store.list(&run).await.unwrap().is_empty());

        store.put(&run, "b.svg", &b"<svg/>"[..]).await.unwrap();
        store.put(&run, "a.csv", &b"x,y\n"[..]).await.unwrap();
        let run_dir = store
            .resolve_uri(&run, "a.csv")
            .unwrap()
            .to_path()
            .unwrap()
            .parent()
            .unwrap()
            .to_path_buf();
        std::fs::write(run_dir.join(".c.csv.abc.partial"), b"half").unwrap();

        let listed = store.list(&run).await.unwrap();
        let names: Vec<&str> = listed.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["a.csv", "b.svg"]);
        assert_eq!(listed[0].size_bytes, 4);
    }

    #[tokio::test]
    async fn test_rejects_bad_names_and_foreign_uris() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path().join("store")).await.unwrap();
        let run = run_under(&store, "run1");

        for name in ["", "../escape", "a/b", ".hidden", "/tmp/abs.csv"] {
            assert!(matches!(
                store.resolve_uri(&run, name),
                Err(ArtifactError::InvalidName(_))
            ));
        }

        let foreign = ArtifactUri::from_path(dir.path().join("elsewhere.csv")).unwrap();
        assert!(matches!(
            store.reader(&foreign).await,
            Err(ArtifactError::InvalidUri(_))
        ));
    }
}
