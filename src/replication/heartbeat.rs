//! Asynchronous per-follower heartbeats.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::debug;
use tracing::warn;

use super::ReplicationProgress;
use crate::constants::FAILURE_WAIT;
use crate::context::PeerInfo;
use crate::context::ReplicationContext;
use crate::metrics;
use crate::network::Transport;
use crate::proto::AppendEntriesRequest;
use crate::timer::backoff;
use crate::timer::random_timeout;
use crate::TypeConfig;

/// Periodically sends the empty AppendEntries form to one follower so it
/// never times out, independently of the replication path - which may be
/// blocked on disk I/O for long stretches.
///
/// The heartbeater never consults the log, never mutates the replication
/// indices and never signals step-down; its sole job is keeping
/// `last_contact` fresh and answering verify waiters.
pub(crate) struct Heartbeater<T>
where
    T: TypeConfig,
{
    peer: PeerInfo,
    current_term: u64,
    ctx: Arc<ReplicationContext<T>>,
    progress: Arc<ReplicationProgress>,
    notify: Arc<Notify>,
}

impl<T> Heartbeater<T>
where
    T: TypeConfig,
{
    pub(crate) fn new(
        peer: PeerInfo,
        current_term: u64,
        ctx: Arc<ReplicationContext<T>>,
        progress: Arc<ReplicationProgress>,
        notify: Arc<Notify>,
    ) -> Self {
        Self {
            peer,
            current_term,
            ctx,
            progress,
            notify,
        }
    }

    pub(crate) async fn run(
        self,
        mut stop_rx: watch::Receiver<()>,
    ) {
        let request = AppendEntriesRequest::heartbeat(
            self.current_term,
            self.ctx.transport.encode_peer(&self.ctx.local_addr),
        );
        let interval = self.ctx.config.heartbeat_interval();
        let mut failures: u64 = 0;

        debug!(peer = %self.peer, "heartbeater started");

        loop {
            // Wait for the next interval or a forced probe (verify path)
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = sleep(random_timeout(interval)) => {}
                _ = stop_rx.changed() => {
                    debug!(peer = %self.peer, "heartbeater stopped");
                    return;
                }
            }

            let started = tokio::time::Instant::now();
            match self.ctx.transport.append_entries(&self.peer, request.clone()).await {
                Err(e) => {
                    warn!(peer = %self.peer, error = ?e, "failed to heartbeat");
                    failures += 1;
                    tokio::select! {
                        _ = sleep(backoff(FAILURE_WAIT, failures)) => {}
                        _ = stop_rx.changed() => {
                            debug!(peer = %self.peer, "heartbeater stopped");
                            return;
                        }
                    }
                }
                Ok(response) => {
                    self.progress.touch_last_contact();
                    failures = 0;
                    metrics::observe_rpc_duration(
                        &metrics::HEARTBEAT_RPC_DURATION_METRIC,
                        self.peer.id,
                        started,
                    );
                    self.progress.notify_verifiers(response.success);
                }
            }
        }
    }
}
