//! Error hierarchy for the replication engine, categorized by the layer the
//! failure originates from.

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Peer communication failures (RPC transport, pipeline plumbing)
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Log store failures
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Snapshot store failures
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// Configuration validation failures
    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Peer cannot be reached at the transport level
    #[error("Peer({0}) unreachable: {1}")]
    Unreachable(u32, String),

    /// RPC transmission failed after reaching the peer
    #[error("Failed to send {request_type} request: {message}")]
    RequestSendFailure {
        request_type: &'static str,
        message: String,
    },

    /// The pipeline's transport side has gone away
    #[error("Append entries pipeline closed")]
    PipelineClosed,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Disk I/O failures during log reads
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Log storage subsystem failures
    #[error("Log storage failure: {0}")]
    LogStorage(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// The snapshot store holds nothing to ship
    #[error("No snapshots available")]
    NoSnapshots,

    /// Listing stored snapshots failed
    #[error("Failed to list snapshots: {0}")]
    ListFailed(String),

    /// Opening a snapshot for streaming failed
    #[error("Failed to open snapshot {id}: {message}")]
    OpenFailed { id: String, message: String },
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        StorageError::IoError(e).into()
    }
}
