//! Shared context handed to every per-peer replication task.

use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::alias::LOF;
use crate::alias::SOF;
use crate::alias::TROF;
use crate::config::ReplicationConfig;
use crate::TypeConfig;

/// Identity of one cluster peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: u32,
    pub address: String,
}

impl PeerInfo {
    pub fn new(
        id: u32,
        address: impl Into<String>,
    ) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }
}

impl fmt::Display for PeerInfo {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}({})", self.id, self.address)
    }
}

/// Leader-side volatile state the host node keeps current and every
/// replicator samples on each round.
///
/// All cells are plain atomics: the host is the single writer, replicators
/// are concurrent readers.
#[derive(Debug, Default)]
pub struct LeaderVolatile {
    last_log_index: AtomicU64,
    commit_index: AtomicU64,
    last_snapshot_index: AtomicU64,
    last_snapshot_term: AtomicU64,
}

impl LeaderVolatile {
    pub fn last_log_index(&self) -> u64 {
        self.last_log_index.load(Ordering::Acquire)
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index.load(Ordering::Acquire)
    }

    pub fn last_snapshot_index(&self) -> u64 {
        self.last_snapshot_index.load(Ordering::Acquire)
    }

    pub fn last_snapshot_term(&self) -> u64 {
        self.last_snapshot_term.load(Ordering::Acquire)
    }

    pub fn set_last_log_index(
        &self,
        index: u64,
    ) {
        self.last_log_index.store(index, Ordering::Release);
    }

    pub fn set_commit_index(
        &self,
        index: u64,
    ) {
        self.commit_index.store(index, Ordering::Release);
    }

    pub fn set_last_snapshot(
        &self,
        index: u64,
        term: u64,
    ) {
        self.last_snapshot_index.store(index, Ordering::Release);
        self.last_snapshot_term.store(term, Ordering::Release);
    }
}

/// Everything a replicator needs from its surroundings: storage handles,
/// the transport, configuration and the host's volatile indices.
pub struct ReplicationContext<T>
where
    T: TypeConfig,
{
    pub node_id: u32,
    /// This node's own address, encoded into `leader_id` request fields
    pub local_addr: String,
    pub raft_log: Arc<LOF<T>>,
    pub snapshots: Arc<SOF<T>>,
    pub transport: Arc<TROF<T>>,
    pub config: Arc<ReplicationConfig>,
    pub volatile: Arc<LeaderVolatile>,
}

impl<T> fmt::Debug for ReplicationContext<T>
where
    T: TypeConfig,
{
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ReplicationContext")
            .field("node_id", &self.node_id)
            .field("local_addr", &self.local_addr)
            .finish()
    }
}
