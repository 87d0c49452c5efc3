//! Artifact locations.

use std::fmt;
use std::path::{Path, PathBuf};

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::ArtifactError;

/// Location of an artifact, or of a directory of artifacts.
///
/// Always a `file://` URL carrying an absolute path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactUri(Url);

impl ArtifactUri {
    /// Builds a URI from an absolute filesystem path.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        let path = path.as_ref();
        Url::from_file_path(path)
            .map(Self)
            .map_err(|_| ArtifactError::InvalidUri(path.display().to_string()))
    }

    /// Parses a `file://` URI string.
    pub fn parse(uri: &str) -> Result<Self, ArtifactError> {
        let url = Url::parse(uri).map_err(|_| ArtifactError::InvalidUri(uri.to_string()))?;
        if url.scheme() != "file" {
            return Err(ArtifactError::InvalidUri(uri.to_string()));
        }
        Ok(Self(url))
    }

    /// Appends one path segment.
    pub fn join(&self, segment: &str) -> Self {
        let mut url = self.0.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(segment);
        }
        Self(url)
    }

    /// Last path segment, i.e. the artifact file name.
    pub fn file_name(&self) -> Option<String> {
        self.to_path()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
    }

    pub fn to_path(&self) -> Result<PathBuf, ArtifactError> {
        self.0
            .to_file_path()
            .map_err(|_| ArtifactError::InvalidUri(self.0.to_string()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ArtifactUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl TryFrom<String> for ArtifactUri {
    type Error = ArtifactError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ArtifactUri> for String {
    fn from(uri: ArtifactUri) -> Self {
        uri.0.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_and_back_to_path() {
        let dir = tempfile::tempdir().unwrap();
        let root = ArtifactUri::from_path(dir.path()).unwrap();
        let uri = root.join("exp").join("run").join("iris.csv");

        assert_eq!(
            uri.to_path().unwrap(),
            dir.path().join("exp").join("run").join("iris.csv")
        );
        assert_eq!(uri.file_name().as_deref(), Some("iris.csv"));
        assert!(uri.as_str().starts_with("file://"));
    }

    #[test]
    fn test_rejects_relative_paths_and_other_schemes() {
        assert!(ArtifactUri::from_path("relative/dir").is_err());
        assert!(ArtifactUri::parse("https://example.com/iris.csv").is_err());
        assert!(ArtifactUri::parse("not a uri").is_err());
    }

    #[test]
    fn test_parse_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let uri = ArtifactUri::from_path(dir.path().join("a.csv")).unwrap();
        let parsed = ArtifactUri::parse(uri.as_str()).unwrap();
        assert_eq!(parsed, uri);
    }
}
