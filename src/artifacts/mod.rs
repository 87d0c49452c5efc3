//! Artifact storage.
//!
//! Artifacts are immutable blobs owned by exactly one run and addressed by
//! (run, file name). The store commits atomically and serves reads as
//! streams, never buffering a whole artifact in memory.

pub mod store;
pub mod uri;

pub use store::{validate_name, ArtifactInfo, ArtifactStore, CommittedArtifact, DEFAULT_COPY_CHUNK};
pub use uri::ArtifactUri;
