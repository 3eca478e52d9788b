//! Network abstraction layer between the replication engine and the RPC
//! transport.
//!
//! The engine issues three kinds of traffic per peer: synchronous
//! AppendEntries RPCs, snapshot installation with a streamed payload, and a
//! pipelined AppendEntries session for in-sync followers. Timeouts on
//! individual RPCs are the transport's responsibility.

#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::context::PeerInfo;
use crate::proto::AppendEntriesRequest;
use crate::proto::AppendEntriesResponse;
use crate::proto::InstallSnapshotRequest;
use crate::proto::InstallSnapshotResponse;
use crate::storage::SnapshotSource;
use crate::Result;

/// One pipelined round trip: the request as submitted, the follower's
/// response, and the submission timestamp for latency accounting.
#[derive(Debug)]
pub struct PipelineEnvelope {
    pub request: AppendEntriesRequest,
    pub response: AppendEntriesResponse,
    pub submitted_at: Instant,
}

/// The two halves of an open AppendEntries pipeline.
///
/// The sink accepts submissions; the consumer yields one
/// [`PipelineEnvelope`] per submission, **strictly in submission order**.
/// The consumer channel closing signals that the transport side is gone.
pub struct PipelineHandle {
    pub sink: Box<dyn PipelineSink>,
    pub consumer: mpsc::Receiver<PipelineEnvelope>,
}

/// Submission side of an AppendEntries pipeline.
#[async_trait]
pub trait PipelineSink: Send + 'static {
    /// Queues a request without waiting for the follower's response.
    ///
    /// Returns an error only when the pipeline can no longer accept work
    /// (transport failure or closed session); the caller then abandons
    /// pipeline mode.
    async fn submit(
        &mut self,
        request: AppendEntriesRequest,
    ) -> Result<()>;

    /// Terminates the pipeline and drains outstanding acknowledgments.
    async fn close(&mut self) -> Result<()>;
}

/// Peer-to-peer RPC transport.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Encodes a node address into the opaque form carried in `leader_id`
    /// fields.
    fn encode_peer(
        &self,
        address: &str,
    ) -> Bytes;

    /// Synchronous AppendEntries RPC.
    async fn append_entries(
        &self,
        peer: &PeerInfo,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse>;

    /// Ships a snapshot, consuming `source` to completion on the wire.
    async fn install_snapshot(
        &self,
        peer: &PeerInfo,
        request: InstallSnapshotRequest,
        source: SnapshotSource,
    ) -> Result<InstallSnapshotResponse>;

    /// Opens a pipelined AppendEntries session.
    ///
    /// `buffer` bounds how many responses the consumer channel may hold
    /// before the transport applies backpressure.
    async fn open_pipeline(
        &self,
        peer: &PeerInfo,
        buffer: usize,
    ) -> Result<PipelineHandle>;
}
