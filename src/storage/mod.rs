//! Storage abstractions consumed by the replication engine.
//!
//! The engine only ever *reads* from storage: log entries for batch
//! assembly and snapshots for far-behind followers. Durability and
//! compaction live with the implementer.

#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncRead;

use crate::proto::Entry;
use crate::Result;

/// Read access to the leader's durable log.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
pub trait RaftLog: Send + Sync + 'static {
    /// Retrieves a log entry by index.
    ///
    /// # Returns
    /// - `Ok(Some(entry))` if the entry exists
    /// - `Ok(None)` if the index is absent - typically compacted away below
    ///   the latest snapshot; the caller falls back to snapshot shipping
    /// - `Err(_)` only for unrecoverable storage errors
    ///
    /// # Safety Invariants
    /// - MUST be thread-safe; concurrent replicators read independently
    /// - MUST NOT modify any state
    fn entry(
        &self,
        index: u64,
    ) -> Result<Option<Entry>>;
}

/// A readable snapshot payload, streamed to the follower exactly once.
pub type SnapshotSource = Box<dyn AsyncRead + Send + Unpin>;

/// Metadata describing one stored snapshot.
///
/// A snapshot summarizes all log entries with index `<= index`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Store-assigned identifier, unique per snapshot
    pub id: String,
    /// Index of the last log entry included in the snapshot
    pub index: u64,
    /// Term of the entry at `index`
    pub term: u64,
    /// Encoded cluster membership captured with the snapshot
    pub peers: Bytes,
    /// Payload size in bytes
    pub size: u64,
}

/// Persistent storage of completed snapshots.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait SnapshotStore: Send + Sync + 'static {
    /// Lists stored snapshots, newest first.
    fn list(&self) -> Result<Vec<SnapshotMeta>>;

    /// Opens a snapshot for streaming.
    ///
    /// The returned source yields the full payload exactly once; dropping it
    /// releases any underlying resources.
    async fn open(
        &self,
        id: &str,
    ) -> Result<(SnapshotMeta, SnapshotSource)>;
}
