//! Pipelined replication for in-sync followers.
//!
//! The sender issues AppendEntries without awaiting each response; a
//! dedicated decoder task consumes responses in submission order and is the
//! sole mutator of the replication indices while the pipeline is open. Any
//! non-success tears the pipeline down and the control loop falls back to
//! standard replication.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::signal_step_down;
use super::BatchError;
use super::FollowerReplicator;
use super::ReplicationProgress;
use crate::alias::IOF;
use crate::context::PeerInfo;
use crate::metrics;
use crate::network::PipelineEnvelope;
use crate::network::PipelineSink;
use crate::network::Transport;
use crate::replication::InflightTracker;
use crate::timer::random_timeout;
use crate::Result;
use crate::TypeConfig;

/// Replication indices owned by exactly one task at a time.
///
/// The control loop hands them to the decoder when a pipeline opens and
/// adopts whatever the decoder hands back when it ends, so standard mode
/// resumes from the last successfully decoded position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PipelineIndices {
    pub(crate) next_index: u64,
    pub(crate) match_index: u64,
}

/// State the decoder task needs besides the indices it owns.
pub(crate) struct DecoderShared<T>
where
    T: TypeConfig,
{
    pub(crate) peer: PeerInfo,
    pub(crate) inflight: Arc<IOF<T>>,
    pub(crate) progress: Arc<ReplicationProgress>,
    pub(crate) step_down_tx: mpsc::Sender<u64>,
}

impl<T> FollowerReplicator<T>
where
    T: TypeConfig,
{
    /// Runs pipeline mode until the decoder aborts, a stop arrives, or a
    /// send fails.
    ///
    /// Returns `Ok(true)` when a stop signal was consumed (the control loop
    /// must exit), `Ok(false)` to fall back to standard mode, and `Err`
    /// when the pipeline could not be opened at all.
    pub(crate) async fn pipeline_replicate(&mut self) -> Result<bool> {
        let pipeline = self
            .ctx
            .transport
            .open_pipeline(&self.peer, self.ctx.config.pipeline_buffer)
            .await?;
        let mut sink = pipeline.sink;

        info!(peer = %self.peer, "pipelining replication");

        let (decoder_stop_tx, decoder_stop_rx) = watch::channel(());
        let shared = DecoderShared::<T> {
            peer: self.peer.clone(),
            inflight: self.inflight.clone(),
            progress: self.progress.clone(),
            step_down_tx: self.step_down_tx.clone(),
        };
        let entry_indices = PipelineIndices {
            next_index: self.next_index,
            match_index: self.match_index,
        };
        let mut decoder = tokio::spawn(decode_responses::<T>(
            pipeline.consumer,
            decoder_stop_rx,
            entry_indices,
            shared,
        ));

        // Pipeline sends start at the last good next_index; only the local
        // cursor advances here, the decoder owns the real indices.
        let mut cursor_next = self.next_index;
        let mut stopped = false;
        let mut decoded: Option<PipelineIndices> = None;

        loop {
            tokio::select! {
                joined = &mut decoder => {
                    decoded = Some(joined.unwrap_or(entry_indices));
                    break;
                }
                maybe_drain = self.stop_rx.recv() => {
                    if let Some(drain_index) = maybe_drain {
                        if drain_index > 0 {
                            debug!(peer = %self.peer, drain_index, "draining pipeline before stop");
                            self.pipeline_send(sink.as_mut(), &mut cursor_next, drain_index).await;
                        }
                    }
                    stopped = true;
                    break;
                }
                _ = self.trigger.notified() => {
                    let last_index = self.ctx.volatile.last_log_index();
                    if self.pipeline_send(sink.as_mut(), &mut cursor_next, last_index).await {
                        break;
                    }
                }
                _ = sleep(random_timeout(self.ctx.config.commit_timeout())) => {
                    let last_index = self.ctx.volatile.last_log_index();
                    if self.pipeline_send(sink.as_mut(), &mut cursor_next, last_index).await {
                        break;
                    }
                }
            }
        }

        // Teardown: stop the decoder, close the transport side, then wait
        // for the decoder to hand the indices back.
        drop(decoder_stop_tx);
        if let Err(e) = sink.close().await {
            debug!(peer = %self.peer, error = ?e, "error closing pipeline");
        }

        let adopted = match decoded {
            Some(indices) => indices,
            None => {
                let mut shutdown = self.shutdown.clone();
                tokio::select! {
                    joined = decoder => joined.unwrap_or(entry_indices),
                    _ = shutdown.changed() => entry_indices,
                }
            }
        };

        self.next_index = adopted.next_index;
        self.set_match_index(adopted.match_index);

        info!(peer = %self.peer, "aborting pipeline replication");
        Ok(stopped)
    }

    /// Submits one batch over the pipeline without awaiting the response.
    ///
    /// Returns `true` when pipeline mode must end: the required entries are
    /// gone (standard mode will ship a snapshot), the log read failed, or
    /// the submission itself failed.
    pub(crate) async fn pipeline_send(
        &self,
        sink: &mut dyn PipelineSink,
        cursor_next: &mut u64,
        last_index: u64,
    ) -> bool {
        let (request, batch_end) = match self.assemble_request(*cursor_next, last_index) {
            Ok(assembled) => assembled,
            Err(BatchError::NotFound(index)) => {
                debug!(peer = %self.peer, index, "log entry compacted away, leaving pipeline mode");
                return true;
            }
            Err(BatchError::Storage(e)) => {
                error!(peer = %self.peer, error = ?e, "failed to read log for pipeline");
                return true;
            }
        };

        if let Err(e) = sink.submit(request).await {
            warn!(peer = %self.peer, error = ?e, "failed to pipeline AppendEntries");
            return true;
        }

        // Advance past this batch to prevent overlapping sends
        *cursor_next = batch_end + 1;
        false
    }
}

/// Decodes pipelined responses in submission order.
///
/// Sole mutator of the replication indices while running; returns them to
/// the sender on exit. Exits on a newer term, on any rejected response, on
/// the stop signal, or when the consumer stream ends.
pub(crate) async fn decode_responses<T>(
    mut consumer: mpsc::Receiver<PipelineEnvelope>,
    mut stop_rx: watch::Receiver<()>,
    mut indices: PipelineIndices,
    shared: DecoderShared<T>,
) -> PipelineIndices
where
    T: TypeConfig,
{
    loop {
        tokio::select! {
            maybe_envelope = consumer.recv() => {
                let Some(envelope) = maybe_envelope else {
                    return indices;
                };

                metrics::observe_rpc_duration(
                    &metrics::APPEND_ENTRIES_RPC_DURATION_METRIC,
                    shared.peer.id,
                    envelope.submitted_at,
                );
                metrics::count_replicated_entries(shared.peer.id, envelope.request.entries.len());

                if envelope.response.term > envelope.request.term {
                    warn!(peer = %shared.peer, response_term = envelope.response.term, "peer has newer term, stopping replication");
                    shared.progress.notify_verifiers(false);
                    signal_step_down(&shared.step_down_tx, envelope.response.term);
                    return indices;
                }

                shared.progress.touch_last_contact();

                // Abort the pipeline on any non-success; standard mode can
                // recover from the more complex situations
                if !envelope.response.success {
                    warn!(peer = %shared.peer, "pipelined AppendEntries rejected, aborting pipeline");
                    return indices;
                }

                if let (Some(first), Some(last)) =
                    (envelope.request.entries.first(), envelope.request.entries.last())
                {
                    shared.inflight.commit_range(first.index, last.index);
                    indices.match_index = last.index;
                    indices.next_index = last.index + 1;
                    shared.progress.store_match_index(last.index);
                }

                shared.progress.notify_verifiers(true);
            }
            _ = stop_rx.changed() => {
                return indices;
            }
        }
    }
}
