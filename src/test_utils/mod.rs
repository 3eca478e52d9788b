//! Shared test helpers: in-memory storage fakes, a scriptable transport
//! and a pre-wired replication fixture.

mod entry_builder;

pub use entry_builder::*;

use std::collections::BTreeMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::sync::Notify;
use tokio::time::timeout;

use crate::config::ReplicationConfig;
use crate::context::LeaderVolatile;
use crate::context::PeerInfo;
use crate::context::ReplicationContext;
use crate::network::PipelineEnvelope;
use crate::network::PipelineHandle;
use crate::network::PipelineSink;
use crate::network::Transport;
use crate::proto::AppendEntriesRequest;
use crate::proto::AppendEntriesResponse;
use crate::proto::Entry;
use crate::proto::InstallSnapshotRequest;
use crate::proto::InstallSnapshotResponse;
use crate::replication::FollowerReplicator;
use crate::replication::InflightTracker;
use crate::replication::ReplicationProgress;
use crate::storage::RaftLog;
use crate::storage::SnapshotMeta;
use crate::storage::SnapshotSource;
use crate::storage::SnapshotStore;
use crate::NetworkError;
use crate::Result;
use crate::TypeConfig;

/// In-memory log store for tests.
#[derive(Debug, Default)]
pub struct MemLog {
    entries: RwLock<BTreeMap<u64, Entry>>,
}

impl MemLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(
        &self,
        entries: impl IntoIterator<Item = Entry>,
    ) {
        let mut map = self.entries.write();
        for entry in entries {
            map.insert(entry.index, entry);
        }
    }

    /// Drops every entry with index `<= cutoff`, simulating compaction.
    pub fn truncate_up_to(
        &self,
        cutoff: u64,
    ) {
        self.entries.write().retain(|&index, _| index > cutoff);
    }
}

impl RaftLog for MemLog {
    fn entry(
        &self,
        index: u64,
    ) -> Result<Option<Entry>> {
        Ok(self.entries.read().get(&index).cloned())
    }
}

/// In-memory snapshot store; snapshots are kept newest-first.
#[derive(Debug, Default)]
pub struct MemSnapshotStore {
    snapshots: RwLock<Vec<(SnapshotMeta, Bytes)>>,
}

impl MemSnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &self,
        meta: SnapshotMeta,
        payload: Bytes,
    ) {
        self.snapshots.write().insert(0, (meta, payload));
    }
}

#[async_trait]
impl SnapshotStore for MemSnapshotStore {
    fn list(&self) -> Result<Vec<SnapshotMeta>> {
        Ok(self.snapshots.read().iter().map(|(meta, _)| meta.clone()).collect())
    }

    async fn open(
        &self,
        id: &str,
    ) -> Result<(SnapshotMeta, SnapshotSource)> {
        let snapshots = self.snapshots.read();
        let (meta, payload) = snapshots
            .iter()
            .find(|(meta, _)| meta.id == id)
            .ok_or_else(|| crate::SnapshotError::OpenFailed {
                id: id.to_string(),
                message: "not found".to_string(),
            })?;
        let source: SnapshotSource = Box::new(std::io::Cursor::new(payload.to_vec()));
        Ok((meta.clone(), source))
    }
}

/// Records every acknowledged range for later assertion.
#[derive(Debug, Default)]
pub struct RecordingInflight {
    ranges: Mutex<Vec<(u64, u64)>>,
}

impl RecordingInflight {
    pub fn ranges(&self) -> Vec<(u64, u64)> {
        self.ranges.lock().clone()
    }
}

impl InflightTracker for RecordingInflight {
    fn commit_range(
        &self,
        lo: u64,
        hi: u64,
    ) {
        if lo <= hi {
            self.ranges.lock().push((lo, hi));
        }
    }
}

type AppendResponder = Box<dyn FnMut(&AppendEntriesRequest) -> Result<AppendEntriesResponse> + Send>;
type InstallResponder =
    Box<dyn FnMut(&InstallSnapshotRequest) -> Result<InstallSnapshotResponse> + Send>;

/// Scriptable transport double.
///
/// Replication-shaped AppendEntries requests go through the append
/// responder, the heartbeat form (see
/// [`AppendEntriesRequest::is_heartbeat`]) through the heartbeat responder,
/// so replication scenarios and the concurrent heartbeater don't trip over
/// each other's scripts. Pipelined submissions share the append responder
/// and are answered immediately, in submission order.
pub struct StubTransport {
    append_responder: Arc<Mutex<AppendResponder>>,
    heartbeat_responder: Arc<Mutex<AppendResponder>>,
    install_responder: Mutex<InstallResponder>,
    append_requests: Arc<Mutex<Vec<AppendEntriesRequest>>>,
    heartbeat_requests: Arc<Mutex<Vec<AppendEntriesRequest>>>,
    install_requests: Mutex<Vec<InstallSnapshotRequest>>,
    pipelines_opened: AtomicUsize,
}

impl Default for StubTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl StubTransport {
    /// A transport whose follower accepts everything.
    pub fn new() -> Self {
        Self {
            append_responder: Arc::new(Mutex::new(Box::new(|request| {
                let last = request.entries.last().map_or(request.prev_log_index, |e| e.index);
                Ok(AppendEntriesResponse::success(request.term, last))
            }))),
            heartbeat_responder: Arc::new(Mutex::new(Box::new(|request| {
                Ok(AppendEntriesResponse::success(request.term, 0))
            }))),
            install_responder: Mutex::new(Box::new(|request| {
                Ok(InstallSnapshotResponse::success(request.term))
            })),
            append_requests: Arc::new(Mutex::new(Vec::new())),
            heartbeat_requests: Arc::new(Mutex::new(Vec::new())),
            install_requests: Mutex::new(Vec::new()),
            pipelines_opened: AtomicUsize::new(0),
        }
    }

    pub fn set_append_responder(
        &self,
        responder: impl FnMut(&AppendEntriesRequest) -> Result<AppendEntriesResponse> + Send + 'static,
    ) {
        *self.append_responder.lock() = Box::new(responder);
    }

    pub fn set_heartbeat_responder(
        &self,
        responder: impl FnMut(&AppendEntriesRequest) -> Result<AppendEntriesResponse> + Send + 'static,
    ) {
        *self.heartbeat_responder.lock() = Box::new(responder);
    }

    pub fn set_install_responder(
        &self,
        responder: impl FnMut(&InstallSnapshotRequest) -> Result<InstallSnapshotResponse> + Send + 'static,
    ) {
        *self.install_responder.lock() = Box::new(responder);
    }

    /// Replication-shaped requests seen so far (direct and pipelined).
    pub fn append_requests(&self) -> Vec<AppendEntriesRequest> {
        self.append_requests.lock().clone()
    }

    pub fn heartbeat_requests(&self) -> Vec<AppendEntriesRequest> {
        self.heartbeat_requests.lock().clone()
    }

    pub fn install_requests(&self) -> Vec<InstallSnapshotRequest> {
        self.install_requests.lock().clone()
    }

    pub fn pipelines_opened(&self) -> usize {
        self.pipelines_opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for StubTransport {
    fn encode_peer(
        &self,
        address: &str,
    ) -> Bytes {
        Bytes::copy_from_slice(address.as_bytes())
    }

    async fn append_entries(
        &self,
        _peer: &PeerInfo,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        if request.is_heartbeat() {
            self.heartbeat_requests.lock().push(request.clone());
            (*self.heartbeat_responder.lock())(&request)
        } else {
            self.append_requests.lock().push(request.clone());
            (*self.append_responder.lock())(&request)
        }
    }

    async fn install_snapshot(
        &self,
        _peer: &PeerInfo,
        request: InstallSnapshotRequest,
        _source: SnapshotSource,
    ) -> Result<InstallSnapshotResponse> {
        self.install_requests.lock().push(request.clone());
        (*self.install_responder.lock())(&request)
    }

    async fn open_pipeline(
        &self,
        _peer: &PeerInfo,
        buffer: usize,
    ) -> Result<PipelineHandle> {
        self.pipelines_opened.fetch_add(1, Ordering::SeqCst);
        let (envelope_tx, envelope_rx) = mpsc::channel(buffer);
        let sink = StubPipelineSink {
            responder: self.append_responder.clone(),
            submitted: self.append_requests.clone(),
            envelope_tx: Some(envelope_tx),
        };
        Ok(PipelineHandle {
            sink: Box::new(sink),
            consumer: envelope_rx,
        })
    }
}

struct StubPipelineSink {
    responder: Arc<Mutex<AppendResponder>>,
    submitted: Arc<Mutex<Vec<AppendEntriesRequest>>>,
    envelope_tx: Option<mpsc::Sender<PipelineEnvelope>>,
}

#[async_trait]
impl PipelineSink for StubPipelineSink {
    async fn submit(
        &mut self,
        request: AppendEntriesRequest,
    ) -> Result<()> {
        let tx = self.envelope_tx.as_ref().ok_or(NetworkError::PipelineClosed)?;
        let response = (*self.responder.lock())(&request)?;
        self.submitted.lock().push(request.clone());
        let envelope = PipelineEnvelope {
            request,
            response,
            submitted_at: tokio::time::Instant::now(),
        };
        tx.send(envelope).await.map_err(|_| NetworkError::PipelineClosed)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.envelope_tx.take();
        Ok(())
    }
}

/// Type wiring for the in-memory fakes.
pub struct TestTypes;

impl TypeConfig for TestTypes {
    type Log = MemLog;
    type Snapshots = MemSnapshotStore;
    type Transport = StubTransport;
    type Inflight = RecordingInflight;
}

/// A fully wired replication environment over the in-memory fakes.
pub struct TestFixture {
    pub log: Arc<MemLog>,
    pub snapshots: Arc<MemSnapshotStore>,
    pub transport: Arc<StubTransport>,
    pub inflight: Arc<RecordingInflight>,
    pub volatile: Arc<LeaderVolatile>,
    pub ctx: Arc<ReplicationContext<TestTypes>>,
    pub step_down_tx: mpsc::Sender<u64>,
    pub step_down_rx: mpsc::Receiver<u64>,
    pub shutdown_tx: watch::Sender<()>,
    pub shutdown_rx: watch::Receiver<()>,
}

impl TestFixture {
    pub fn new(config: ReplicationConfig) -> Self {
        let log = Arc::new(MemLog::new());
        let snapshots = Arc::new(MemSnapshotStore::new());
        let transport = Arc::new(StubTransport::new());
        let inflight = Arc::new(RecordingInflight::default());
        let volatile = Arc::new(LeaderVolatile::default());
        let ctx = Arc::new(ReplicationContext::<TestTypes> {
            node_id: 1,
            local_addr: "127.0.0.1:9001".to_string(),
            raft_log: log.clone(),
            snapshots: snapshots.clone(),
            transport: transport.clone(),
            config: Arc::new(config),
            volatile: volatile.clone(),
        });
        let (step_down_tx, step_down_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(());

        Self {
            log,
            snapshots,
            transport,
            inflight,
            volatile,
            ctx,
            step_down_tx,
            step_down_rx,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Builds a replicator for direct method-level testing, handing back
    /// the stop sender its control loop would otherwise own.
    pub fn make_replicator(
        &self,
        peer: PeerInfo,
        current_term: u64,
    ) -> (FollowerReplicator<TestTypes>, mpsc::Sender<u64>) {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let progress = Arc::new(ReplicationProgress::new(peer.id));
        let replicator = FollowerReplicator {
            peer,
            current_term,
            next_index: self.volatile.last_log_index() + 1,
            match_index: 0,
            failures: 0,
            allow_pipeline: false,
            ctx: self.ctx.clone(),
            inflight: self.inflight.clone(),
            progress,
            stop_rx,
            trigger: Arc::new(Notify::new()),
            heartbeat_notify: Arc::new(Notify::new()),
            step_down_tx: self.step_down_tx.clone(),
            shutdown: self.shutdown_rx.clone(),
        };
        (replicator, stop_tx)
    }
}

/// Minimal follower simulation answering AppendEntries like a real node:
/// term check, prev-entry consistency check, conflict truncation, append.
pub struct SimFollower {
    term: u64,
    log: BTreeMap<u64, u64>, // index -> term
}

impl SimFollower {
    pub fn new(term: u64) -> Self {
        Self {
            term,
            log: BTreeMap::new(),
        }
    }

    pub fn with_log(
        term: u64,
        entries: &[(u64, u64)],
    ) -> Self {
        Self {
            term,
            log: entries.iter().copied().collect(),
        }
    }

    pub fn last_index(&self) -> u64 {
        self.log.keys().next_back().copied().unwrap_or(0)
    }

    pub fn entry_term(
        &self,
        index: u64,
    ) -> Option<u64> {
        self.log.get(&index).copied()
    }

    pub fn handle_append(
        &mut self,
        request: &AppendEntriesRequest,
    ) -> AppendEntriesResponse {
        if request.term < self.term {
            return AppendEntriesResponse::rejected(self.term, self.last_index());
        }
        self.term = request.term;

        let prev_ok = request.prev_log_index == 0
            || self.log.get(&request.prev_log_index) == Some(&request.prev_log_term);
        if !prev_ok {
            return AppendEntriesResponse::rejected(self.term, self.last_index());
        }

        for entry in &request.entries {
            if self.log.get(&entry.index).is_some_and(|term| *term != entry.term) {
                // Conflict: drop this entry and everything after it
                self.log.split_off(&entry.index);
            }
            self.log.insert(entry.index, entry.term);
        }
        AppendEntriesResponse::success(self.term, self.last_index())
    }
}

/// Routes the transport's append responder through a [`SimFollower`],
/// returning a handle for later inspection.
pub fn drive_with_follower(
    transport: &StubTransport,
    follower: SimFollower,
) -> Arc<Mutex<SimFollower>> {
    let follower = Arc::new(Mutex::new(follower));
    let handle = follower.clone();
    transport.set_append_responder(move |request| Ok(handle.lock().handle_append(request)));
    follower
}

/// Fast test configuration: small batches, tight timers.
pub fn test_config() -> ReplicationConfig {
    ReplicationConfig {
        max_append_entries: 10,
        commit_timeout_ms: 10,
        heartbeat_timeout_ms: 100,
        pipeline_buffer: 16,
    }
}

/// Polls `condition` until it holds or the deadline passes.
pub async fn wait_for(
    what: &str,
    condition: impl Fn() -> bool,
) {
    let deadline = Duration::from_secs(3);
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    if timeout(deadline, poll).await.is_err() {
        panic!("timed out after {deadline:?} waiting for: {what}");
    }
}
