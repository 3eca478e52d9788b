//! Type-level wiring of the pluggable components.
//!
//! A single `TypeConfig` implementation names the concrete storage,
//! transport and inflight-tracking types a deployment uses, so the engine's
//! generics stay readable through the `alias` shorthands.

use crate::network::Transport;
use crate::replication::InflightTracker;
use crate::storage::RaftLog;
use crate::storage::SnapshotStore;

pub trait TypeConfig: Send + Sync + Sized + 'static {
    type Log: RaftLog;
    type Snapshots: SnapshotStore;
    type Transport: Transport;
    type Inflight: InflightTracker;
}

pub mod alias {
    use super::TypeConfig;

    /// RaftLog of T
    pub type LOF<T> = <T as TypeConfig>::Log;
    /// SnapshotStore of T
    pub type SOF<T> = <T as TypeConfig>::Snapshots;
    /// Transport of T
    pub type TROF<T> = <T as TypeConfig>::Transport;
    /// InflightTracker of T
    pub type IOF<T> = <T as TypeConfig>::Inflight;
}
