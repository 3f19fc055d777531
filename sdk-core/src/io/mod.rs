//! Chunked transfer engine: disjoint-range sources/destinations driven by
//! a bounded-parallelism worker pool, plus the staged-block upload path.

pub mod block;
pub mod chunked;
pub mod http_source;

pub use block::{Block, BlockList, StorageDestination};
pub use chunked::{ChunkMetadata, ChunkedIoManager, ChunkedIoTracker};
pub use http_source::HttpSource;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::ChunkedIoError;

/// A local or remote source for managed file IO. Implementations should
/// return [`ChunkedIoError::Recoverable`] for failures that `recover` can
/// fix (e.g. a signed URL expiring).
#[async_trait]
pub trait Source: Send + Sync {
    async fn get_size(&self) -> Result<u64, ChunkedIoError>;
    async fn read_chunk(&self, offset: u64, length: u64) -> Result<Bytes, ChunkedIoError>;

    /// Re-obtains whatever resource (e.g. a signed URL) is needed to
    /// continue. Returns `false` if recovery is not possible, which
    /// promotes the triggering error to fatal.
    async fn recover(&self) -> bool {
        false
    }
}

/// A local or remote destination for managed file IO.
#[async_trait]
pub trait Destination: Send + Sync {
    async fn write_chunk(&self, offset: u64, data: Bytes) -> Result<(), ChunkedIoError>;

    async fn recover(&self) -> bool {
        false
    }
}
