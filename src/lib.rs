//! # repl-engine
//!
//! Leader-side log replication engine for Raft clusters.
//!
//! This crate implements the subsystem a Raft leader runs per follower to
//! bring the peer's log up to date, keep it there, and detect loss of
//! leadership:
//!
//! - **Catch-up replication** - batched AppendEntries with probing on
//!   rejection and exponential backoff on transport failures
//! - **Pipelined replication** - once a follower is in sync, AppendEntries
//!   requests are issued without awaiting each response; a dedicated decoder
//!   advances indices in submission order
//! - **Snapshot shipping** - followers whose required entries have been
//!   compacted away receive the latest snapshot instead
//! - **Async heartbeats** - an independent ticker keeps followers from
//!   starting elections even when replication is blocked on disk I/O
//! - **Leadership verification** - callers enqueue verify futures that are
//!   answered by the next round-trip's outcome
//!
//! Storage, networking, and the surrounding node (election, commit-index
//! advancement, state machine) are **your responsibility**; this crate talks
//! to them through the [`RaftLog`], [`SnapshotStore`], [`Transport`] and
//! [`InflightTracker`] traits wired together by a [`TypeConfig`].
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────┐
//! │   Your node (election, commit, FSM)   │
//! ├───────────────────────────────────────┤
//! │   repl-engine (per-follower tasks)    │  ← You are here
//! ├───────────────────────────────────────┤
//! │   Your log store │ Your transport     │  ← You implement
//! └───────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use repl_engine::{FollowerReplicator, PeerInfo};
//!
//! let handle = FollowerReplicator::<MyTypes>::spawn(
//!     PeerInfo::new(2, "10.0.0.2:9001"),
//!     current_term,
//!     ctx.clone(),
//!     inflight.clone(),
//!     step_down_tx.clone(),
//!     shutdown_rx.clone(),
//! );
//!
//! // New entries appended? Wake the replicator.
//! handle.trigger();
//!
//! // Still leader from this peer's point of view?
//! let verified = handle.verify_leadership().await.unwrap_or(false);
//!
//! // Stepping down: best-effort drain up to index 42, then tear down.
//! handle.stop(42).await;
//! ```

mod constants;
mod context;
mod errors;
mod network;
mod replication;
mod storage;
mod timer;
mod type_config;

pub mod config;
pub mod metrics;
pub mod proto;

pub use config::*;
pub use context::*;
pub use errors::*;
pub use network::*;
pub use replication::*;
pub use storage::*;
pub use type_config::*;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

#[cfg(any(test, feature = "test-utils"))]
pub use test_utils::*;
