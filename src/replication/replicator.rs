//! Per-follower replication: control loop, catch-up sender and snapshot
//! shipper.

use std::cmp;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::signal_step_down;
use super::Heartbeater;
use super::ReplicationProgress;
use crate::alias::IOF;
use crate::constants::FAILURE_WAIT;
use crate::context::PeerInfo;
use crate::context::ReplicationContext;
use crate::metrics;
use crate::network::Transport;
use crate::proto::AppendEntriesRequest;
use crate::proto::InstallSnapshotRequest;
use crate::replication::InflightTracker;
use crate::storage::RaftLog;
use crate::storage::SnapshotStore;
use crate::timer::backoff;
use crate::timer::random_timeout;
use crate::Error;
use crate::Result;
use crate::SnapshotError;
use crate::TypeConfig;

/// Why batch assembly could not produce a request.
#[derive(Debug)]
pub(crate) enum BatchError {
    /// The log no longer holds this index; the follower needs a snapshot
    NotFound(u64),
    /// Any other storage failure; the current round is abandoned
    Storage(Error),
}

/// Leader-side replication state for a single follower.
///
/// Owned by its control-loop task; external interaction goes through the
/// [`ReplicatorHandle`] returned by [`spawn`](Self::spawn).
pub struct FollowerReplicator<T>
where
    T: TypeConfig,
{
    pub(crate) peer: PeerInfo,
    /// Leader term this replicator was created under; immutable for its
    /// whole lifetime
    pub(crate) current_term: u64,
    /// Next log index to send to this follower; never below 1
    pub(crate) next_index: u64,
    /// Highest log index known replicated on this follower
    pub(crate) match_index: u64,
    /// Consecutive failure counter driving exponential backoff
    pub(crate) failures: u64,
    /// Set when the last round both succeeded and fully caught up
    pub(crate) allow_pipeline: bool,

    pub(crate) ctx: Arc<ReplicationContext<T>>,
    pub(crate) inflight: Arc<IOF<T>>,
    pub(crate) progress: Arc<ReplicationProgress>,

    pub(crate) stop_rx: mpsc::Receiver<u64>,
    pub(crate) trigger: Arc<Notify>,
    pub(crate) heartbeat_notify: Arc<Notify>,
    pub(crate) step_down_tx: mpsc::Sender<u64>,
    pub(crate) shutdown: watch::Receiver<()>,
}

/// Handle the host node keeps per follower while it is leader.
pub struct ReplicatorHandle {
    peer: PeerInfo,
    progress: Arc<ReplicationProgress>,
    trigger: Arc<Notify>,
    heartbeat_notify: Arc<Notify>,
    stop_tx: mpsc::Sender<u64>,
    task: JoinHandle<()>,
}

impl ReplicatorHandle {
    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    /// Wakes the replicator because new log entries are available.
    /// Edge-triggered; redundant wakes coalesce.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Highest log index known replicated on this follower.
    pub fn match_index(&self) -> u64 {
        self.progress.match_index()
    }

    /// Timestamp of the last successful response from this peer.
    pub fn last_contact(&self) -> Option<Instant> {
        self.progress.last_contact()
    }

    /// Enqueues a leadership-verify continuation and accelerates the next
    /// heartbeat probe. The receiver resolves with the next round-trip's
    /// verdict.
    pub fn verify_leadership(&self) -> oneshot::Receiver<bool> {
        let rx = self.progress.enqueue_verify();
        self.heartbeat_notify.notify_one();
        rx
    }

    /// Tears the replicator down. With `drain_index > 0` the replicator
    /// first makes a best effort to replicate up to that index.
    pub async fn stop(
        self,
        drain_index: u64,
    ) {
        // The task may already be gone after a step-down; both outcomes
        // leave nothing to wait for except the join below.
        let _ = self.stop_tx.send(drain_index).await;
        drop(self.stop_tx);
        let _ = self.task.await;
    }
}

impl<T> FollowerReplicator<T>
where
    T: TypeConfig,
{
    /// Spawns the replication control loop and its heartbeater for one
    /// follower.
    ///
    /// `next_index` starts at the leader's `last_log_index + 1`; the first
    /// round probes backwards from there if the follower is behind.
    pub fn spawn(
        peer: PeerInfo,
        current_term: u64,
        ctx: Arc<ReplicationContext<T>>,
        inflight: Arc<IOF<T>>,
        step_down_tx: mpsc::Sender<u64>,
        shutdown: watch::Receiver<()>,
    ) -> ReplicatorHandle {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let trigger = Arc::new(Notify::new());
        let heartbeat_notify = Arc::new(Notify::new());
        let progress = Arc::new(ReplicationProgress::new(peer.id));

        let replicator = FollowerReplicator {
            peer: peer.clone(),
            current_term,
            next_index: ctx.volatile.last_log_index() + 1,
            match_index: 0,
            failures: 0,
            allow_pipeline: false,
            ctx,
            inflight,
            progress: progress.clone(),
            stop_rx,
            trigger: trigger.clone(),
            heartbeat_notify: heartbeat_notify.clone(),
            step_down_tx,
            shutdown,
        };

        let task = tokio::spawn(replicator.run());

        ReplicatorHandle {
            peer,
            progress,
            trigger,
            heartbeat_notify,
            stop_tx,
            task,
        }
    }

    /// Long-running control loop: standard catch-up rounds, promoted to
    /// pipeline mode while healthy, demoted back on any pipeline exit.
    pub(crate) async fn run(mut self) {
        // Heartbeats run async of replication so that a slow disk can not
        // delay them; the sender half dropping on return stops the task.
        let (_hb_stop_tx, hb_stop_rx) = watch::channel(());
        let heartbeater = Heartbeater::new(
            self.peer.clone(),
            self.current_term,
            self.ctx.clone(),
            self.progress.clone(),
            self.heartbeat_notify.clone(),
        );
        tokio::spawn(heartbeater.run(hb_stop_rx));

        info!(peer = %self.peer, term = self.current_term, "starting replication");

        loop {
            let mut should_stop = false;

            // STANDARD mode
            while !should_stop {
                tokio::select! {
                    maybe_drain = self.stop_rx.recv() => {
                        if let Some(drain_index) = maybe_drain {
                            if drain_index > 0 {
                                debug!(peer = %self.peer, drain_index, "draining before stop");
                                self.replicate_to(drain_index).await;
                            }
                        }
                        info!(peer = %self.peer, "stopping replication");
                        return;
                    }
                    _ = self.trigger.notified() => {
                        let last_index = self.ctx.volatile.last_log_index();
                        should_stop = self.replicate_to(last_index).await;
                    }
                    _ = sleep(random_timeout(self.ctx.config.commit_timeout())) => {
                        let last_index = self.ctx.volatile.last_log_index();
                        should_stop = self.replicate_to(last_index).await;
                    }
                }

                if !should_stop && self.allow_pipeline {
                    break;
                }
            }

            if should_stop {
                info!(peer = %self.peer, "stopping replication");
                return;
            }

            // PIPELINE mode. Disabled until the next fully-caught-up round
            // re-enables it; pipeline errors fall back to standard mode,
            // which can handle the complex cases.
            self.allow_pipeline = false;
            match self.pipeline_replicate().await {
                Ok(true) => {
                    info!(peer = %self.peer, "stopping replication");
                    return;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(peer = %self.peer, error = ?e, "failed to start pipeline replication");
                }
            }
        }
    }

    /// Replicates log entries up to `last_index`, batching by
    /// `max_append_entries` and probing backwards on rejection.
    ///
    /// Returns `true` when the replicator must stop (a newer term was
    /// observed). Transport and storage failures return `false` after
    /// recording the failure; the next wake retries with backoff.
    pub(crate) async fn replicate_to(
        &mut self,
        last_index: u64,
    ) -> bool {
        loop {
            // Prevent an excessive retry rate on errors
            if self.failures > 0 {
                let wait = backoff(FAILURE_WAIT, self.failures);
                tokio::select! {
                    _ = sleep(wait) => {}
                    _ = self.shutdown.changed() => {}
                }
            }

            let (request, batch_end) = match self.assemble_request(self.next_index, last_index) {
                Ok(assembled) => assembled,
                Err(BatchError::NotFound(index)) => {
                    debug!(peer = %self.peer, index, "log entry compacted away, shipping snapshot");
                    match self.send_latest_snapshot().await {
                        Ok(true) => return true,
                        Ok(false) => {
                            if self.next_index <= last_index {
                                continue;
                            }
                            return false;
                        }
                        Err(e) => {
                            error!(peer = %self.peer, error = ?e, "failed to send snapshot");
                            return false;
                        }
                    }
                }
                Err(BatchError::Storage(e)) => {
                    error!(peer = %self.peer, error = ?e, "failed to read log for replication");
                    return false;
                }
            };

            let request_term = request.term;
            let entry_count = request.entries.len();
            let started = tokio::time::Instant::now();
            let response = match self.ctx.transport.append_entries(&self.peer, request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(peer = %self.peer, error = ?e, "failed to send AppendEntries");
                    self.failures += 1;
                    return false;
                }
            };
            metrics::observe_rpc_duration(
                &metrics::APPEND_ENTRIES_RPC_DURATION_METRIC,
                self.peer.id,
                started,
            );
            metrics::count_replicated_entries(self.peer.id, entry_count);

            // A newer term means we are no longer leader
            if response.term > request_term {
                warn!(peer = %self.peer, response_term = response.term, "peer has newer term, stopping replication");
                self.progress.notify_verifiers(false);
                signal_step_down(&self.step_down_tx, response.term);
                return true;
            }

            self.progress.touch_last_contact();

            if response.success {
                self.inflight.commit_range(self.next_index, batch_end);

                self.set_match_index(batch_end);
                self.next_index = batch_end + 1;

                self.failures = 0;
                self.progress.notify_verifiers(true);

                // In sync now; the control loop may promote to pipelining
                self.allow_pipeline = true;
            } else {
                self.next_index = cmp::max(cmp::min(self.next_index - 1, response.last_log + 1), 1);
                self.set_match_index(self.next_index - 1);
                self.failures += 1;
                warn!(peer = %self.peer, next_index = self.next_index, "AppendEntries rejected, sending older logs");
            }

            if self.next_index > last_index {
                return false;
            }
        }
    }

    /// Builds one AppendEntries request starting at `from_index`, bounded
    /// by `max_append_entries` and `last_index`.
    ///
    /// Returns the request together with the index of its last entry (or
    /// `from_index - 1`-adjacent bound when the batch is empty).
    pub(crate) fn assemble_request(
        &self,
        from_index: u64,
        last_index: u64,
    ) -> std::result::Result<(AppendEntriesRequest, u64), BatchError> {
        // Previous entry resolution. Guard for the first index, since there
        // is no 0 log entry; guard against the previous index being covered
        // by the latest snapshot as well.
        let (prev_log_index, prev_log_term) = if from_index == 1 {
            (0, 0)
        } else if from_index - 1 == self.ctx.volatile.last_snapshot_index() {
            (
                self.ctx.volatile.last_snapshot_index(),
                self.ctx.volatile.last_snapshot_term(),
            )
        } else {
            match self.ctx.raft_log.entry(from_index - 1) {
                Ok(Some(entry)) => (entry.index, entry.term),
                Ok(None) => return Err(BatchError::NotFound(from_index - 1)),
                Err(e) => return Err(BatchError::Storage(e)),
            }
        };

        let batch_end = cmp::min(
            from_index + self.ctx.config.max_append_entries - 1,
            last_index,
        );

        let mut entries = Vec::with_capacity(self.ctx.config.max_append_entries as usize);
        for index in from_index..=batch_end {
            match self.ctx.raft_log.entry(index) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => return Err(BatchError::NotFound(index)),
                Err(e) => return Err(BatchError::Storage(e)),
            }
        }

        let request = AppendEntriesRequest {
            term: self.current_term,
            leader_id: self.ctx.transport.encode_peer(&self.ctx.local_addr),
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit_index: self.ctx.volatile.commit_index(),
        };

        Ok((request, batch_end))
    }

    /// Ships the most recent snapshot to a follower whose required log
    /// entries are no longer available.
    ///
    /// Returns `Ok(true)` when the replicator must stop (newer term),
    /// `Ok(false)` to continue, and `Err` for recoverable store or
    /// transport failures.
    pub(crate) async fn send_latest_snapshot(&mut self) -> Result<bool> {
        let snapshots = match self.ctx.snapshots.list() {
            Ok(snapshots) => snapshots,
            Err(e) => {
                error!(peer = %self.peer, error = ?e, "failed to list snapshots");
                return Err(e);
            }
        };

        let newest = snapshots.first().ok_or(SnapshotError::NoSnapshots)?;

        let (meta, source) = match self.ctx.snapshots.open(&newest.id).await {
            Ok(opened) => opened,
            Err(e) => {
                error!(peer = %self.peer, snapshot_id = %newest.id, error = ?e, "failed to open snapshot");
                return Err(e);
            }
        };

        let request = InstallSnapshotRequest {
            term: self.current_term,
            leader_id: self.ctx.transport.encode_peer(&self.ctx.local_addr),
            last_log_index: meta.index,
            last_log_term: meta.term,
            peers: meta.peers.clone(),
            size: meta.size,
        };

        let request_term = request.term;
        let started = tokio::time::Instant::now();
        let response = match self
            .ctx
            .transport
            .install_snapshot(&self.peer, request, source)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(peer = %self.peer, snapshot_id = %meta.id, error = ?e, "failed to install snapshot");
                self.failures += 1;
                return Err(e);
            }
        };
        metrics::observe_rpc_duration(
            &metrics::INSTALL_SNAPSHOT_RPC_DURATION_METRIC,
            self.peer.id,
            started,
        );

        if response.term > request_term {
            warn!(peer = %self.peer, response_term = response.term, "peer has newer term, stopping replication");
            self.progress.notify_verifiers(false);
            signal_step_down(&self.step_down_tx, response.term);
            return Ok(true);
        }

        self.progress.touch_last_contact();

        if response.success {
            self.inflight.commit_range(self.match_index + 1, meta.index);

            self.set_match_index(meta.index);
            self.next_index = self.match_index + 1;

            self.failures = 0;
            self.progress.notify_verifiers(true);
        } else {
            self.failures += 1;
            warn!(peer = %self.peer, snapshot_id = %meta.id, "InstallSnapshot rejected");
        }

        Ok(false)
    }

    /// Stores a new `match_index` and mirrors it for external observers.
    pub(crate) fn set_match_index(
        &mut self,
        index: u64,
    ) {
        self.match_index = index;
        self.progress.store_match_index(index);
    }
}
