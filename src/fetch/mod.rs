//! Streaming fetch of remote or local sources into a staging directory.

mod fetcher;
mod source;

pub use fetcher::{write_stream, FetchReport, StreamingFetcher, DEFAULT_CHUNK_SIZE};
pub use source::{
    source_basename, ByteSource, ChunkStream, FileSource, HttpSource, LocatorKind,
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT,
};
