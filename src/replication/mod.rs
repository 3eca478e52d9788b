//! Leader-side log replication (Raft §5.3, §7).
//!
//! One [`FollowerReplicator`] runs per peer while this node is leader. It
//! owns three long-lived tasks:
//! - the **control loop** alternating between standard catch-up rounds and
//!   a high-throughput pipeline mode,
//! - the **heartbeater**, which pings the peer independently of replication
//!   so slow log I/O can never cause an election timeout,
//! - while pipelining, a **decoder** consuming responses in submission
//!   order.
//!
//! Only one task mutates `next_index`/`match_index` at a time: the catch-up
//! sender and snapshot shipper inside the control loop, or the decoder
//! during pipeline mode (which hands the indices back when the pipeline
//! ends). The heartbeater never touches them.

mod heartbeat;
mod pipeline;
mod progress;
mod replicator;

pub use progress::*;
pub use replicator::*;

pub(crate) use heartbeat::*;
pub(crate) use pipeline::*;

#[cfg(test)]
mod replicator_test;

#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;
use tokio::sync::mpsc;
use tracing::trace;

/// Per-peer acknowledgment register kept by the surrounding node.
///
/// The replicator reports every acknowledged range through
/// [`commit_range`](InflightTracker::commit_range); the node aggregates the
/// per-peer state to advance the cluster commit index.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
pub trait InflightTracker: Send + Sync + 'static {
    /// Records that the follower has durably acknowledged every entry in
    /// `[lo, hi]`. An inverted range (`lo > hi`) records nothing.
    fn commit_range(
        &self,
        lo: u64,
        hi: u64,
    );
}

/// Non-blocking step-down notification: a send that would block is dropped,
/// so redundant signals coalesce on the single buffered slot.
pub(crate) fn signal_step_down(
    step_down_tx: &mpsc::Sender<u64>,
    observed_term: u64,
) {
    if step_down_tx.try_send(observed_term).is_err() {
        trace!(observed_term, "step-down already signalled");
    }
}
