//! Wire messages exchanged between a leader and its followers.
//!
//! The message layout matches the replication section of the gRPC protocol:
//! prost-encoded structs so the same types serve in-process tests and any
//! transport implementation that puts them on the wire.

mod replication_ext;

#[cfg(test)]
mod replication_ext_test;

/// A single record in the replicated log.
///
/// Indices are strictly increasing from 1; index 0 is the sentinel
/// "no previous entry".
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Entry {
    #[prost(uint64, tag = "1")]
    pub index: u64,
    #[prost(uint64, tag = "2")]
    pub term: u64,
    #[prost(enumeration = "EntryType", tag = "3")]
    pub entry_type: i32,
    #[prost(bytes = "bytes", tag = "4")]
    pub payload: ::prost::bytes::Bytes,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum EntryType {
    /// Application command applied to the finite-state machine
    Command = 0,
    /// Leader assertion entry carrying no payload
    Noop = 1,
    /// Cluster membership configuration
    Configuration = 2,
    /// Synchronization point for readers
    Barrier = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppendEntriesRequest {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    /// Transport-encoded address of the leader
    #[prost(bytes = "bytes", tag = "2")]
    pub leader_id: ::prost::bytes::Bytes,
    #[prost(uint64, tag = "3")]
    pub prev_log_index: u64,
    #[prost(uint64, tag = "4")]
    pub prev_log_term: u64,
    #[prost(message, repeated, tag = "5")]
    pub entries: ::prost::alloc::vec::Vec<Entry>,
    #[prost(uint64, tag = "6")]
    pub leader_commit_index: u64,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct AppendEntriesResponse {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    /// The follower's last log index, consulted on rejection to accelerate
    /// probing for the divergence point
    #[prost(uint64, tag = "2")]
    pub last_log: u64,
    #[prost(bool, tag = "3")]
    pub success: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InstallSnapshotRequest {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(bytes = "bytes", tag = "2")]
    pub leader_id: ::prost::bytes::Bytes,
    /// Index of the last log entry summarized by the snapshot
    #[prost(uint64, tag = "3")]
    pub last_log_index: u64,
    #[prost(uint64, tag = "4")]
    pub last_log_term: u64,
    /// Encoded cluster membership captured with the snapshot
    #[prost(bytes = "bytes", tag = "5")]
    pub peers: ::prost::bytes::Bytes,
    /// Number of payload bytes that follow the request on the wire
    #[prost(uint64, tag = "6")]
    pub size: u64,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct InstallSnapshotResponse {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(bool, tag = "2")]
    pub success: bool,
}
