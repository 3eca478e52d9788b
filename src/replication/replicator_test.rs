use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::sync::Notify;
use tracing_test::traced_test;

use super::FollowerReplicator;
use super::ReplicationProgress;
use crate::config::ReplicationConfig;
use crate::context::LeaderVolatile;
use crate::context::PeerInfo;
use crate::context::ReplicationContext;
use crate::proto::AppendEntriesResponse;
use crate::proto::InstallSnapshotResponse;
use crate::storage::MockRaftLog;
use crate::storage::SnapshotMeta;
use crate::test_utils::command_entries;
use crate::test_utils::drive_with_follower;
use crate::test_utils::EntryBuilder;
use crate::test_utils::test_config;
use crate::test_utils::wait_for;
use crate::test_utils::MemSnapshotStore;
use crate::test_utils::RecordingInflight;
use crate::test_utils::SimFollower;
use crate::test_utils::StubTransport;
use crate::test_utils::TestFixture;
use crate::NetworkError;
use crate::StorageError;
use crate::TypeConfig;

fn peer() -> PeerInfo {
    PeerInfo::new(2, "127.0.0.1:9002")
}

/// A follower starting from an empty log is probed down to index 1 and
/// then caught up in one batch.
#[tokio::test]
async fn test_fresh_follower_catch_up() {
    let fixture = TestFixture::new(test_config());
    fixture.log.extend(command_entries(1..=5, 1));
    fixture.volatile.set_last_log_index(5);
    let follower = drive_with_follower(&fixture.transport, SimFollower::new(1));

    let handle = FollowerReplicator::spawn(
        peer(),
        1,
        fixture.ctx.clone(),
        fixture.inflight.clone(),
        fixture.step_down_tx.clone(),
        fixture.shutdown_rx.clone(),
    );

    handle.trigger();

    wait_for("follower caught up", || handle.match_index() == 5).await;
    // A fully caught-up round enables pipelining
    wait_for("pipeline promoted", || fixture.transport.pipelines_opened() >= 1).await;

    assert_eq!(follower.lock().last_index(), 5);
    assert!(fixture.inflight.ranges().contains(&(1, 5)));
    assert!(handle.last_contact().is_some());

    handle.stop(0).await;
}

/// A follower holding conflicting entries converges via the `last_log`
/// rejection hint and ends up with the leader's log.
#[tokio::test]
async fn test_stale_follower_log_is_overwritten() {
    let fixture = TestFixture::new(test_config());
    let builder = EntryBuilder::new(1, 1);
    let (builder, e1) = builder.command(b"set x=1");
    let (builder, e2) = builder.command(b"set y=2");
    let (builder, e3) = builder.at_term(3).noop();
    let (_, e4) = builder.command(b"set z=3");
    fixture.log.extend([e1, e2, e3, e4]);
    fixture.volatile.set_last_log_index(4);
    let follower =
        drive_with_follower(&fixture.transport, SimFollower::with_log(1, &[(1, 1), (2, 1), (3, 2)]));

    let (mut replicator, _stop_tx) = fixture.make_replicator(peer(), 3);
    assert_eq!(replicator.next_index, 5);

    let should_stop = replicator.replicate_to(4).await;

    assert!(!should_stop);
    assert_eq!(replicator.match_index, 4);
    assert_eq!(replicator.next_index, 5);
    assert_eq!(replicator.failures, 0);

    let follower = follower.lock();
    assert_eq!(follower.last_index(), 4);
    assert_eq!(follower.entry_term(3), Some(3));
    assert_eq!(follower.entry_term(4), Some(3));
}

/// When the entry before `next_index` has been compacted away, the newest
/// snapshot is shipped and replication resumes right behind it.
#[tokio::test]
async fn test_compacted_log_falls_back_to_snapshot() {
    let fixture = TestFixture::new(test_config());
    fixture.log.extend(command_entries(1..=120, 5));
    fixture.log.truncate_up_to(100);
    fixture.volatile.set_last_log_index(120);
    fixture.volatile.set_last_snapshot(100, 5);
    fixture.snapshots.add(
        SnapshotMeta {
            id: "snap-100".to_string(),
            index: 100,
            term: 5,
            peers: Bytes::new(),
            size: 4,
        },
        Bytes::from_static(b"data"),
    );

    let (mut replicator, _stop_tx) = fixture.make_replicator(peer(), 5);
    replicator.next_index = 50;
    replicator.match_index = 49;

    let should_stop = replicator.replicate_to(120).await;

    assert!(!should_stop);

    let installs = fixture.transport.install_requests();
    assert_eq!(installs.len(), 1);
    assert_eq!(installs[0].last_log_index, 100);
    assert_eq!(installs[0].last_log_term, 5);
    assert_eq!(installs[0].size, 4);
    assert!(fixture.inflight.ranges().contains(&(50, 100)));

    // The first post-snapshot batch anchors on the snapshot coordinates
    let appends = fixture.transport.append_requests();
    assert_eq!(appends[0].prev_log_index, 100);
    assert_eq!(appends[0].prev_log_term, 5);

    assert_eq!(replicator.match_index, 120);
    assert_eq!(replicator.next_index, 121);
    assert_eq!(replicator.failures, 0);
}

/// An InstallSnapshot rejection only counts a failure; no index moves.
#[tokio::test]
async fn test_rejected_snapshot_preserves_indices() {
    let fixture = TestFixture::new(test_config());
    fixture.volatile.set_last_snapshot(100, 5);
    fixture.snapshots.add(
        SnapshotMeta {
            id: "snap-100".to_string(),
            index: 100,
            term: 5,
            peers: Bytes::new(),
            size: 4,
        },
        Bytes::from_static(b"data"),
    );
    fixture
        .transport
        .set_install_responder(|request| Ok(InstallSnapshotResponse::rejected(request.term)));

    let (mut replicator, _stop_tx) = fixture.make_replicator(peer(), 5);
    replicator.next_index = 50;
    replicator.match_index = 49;

    let result = replicator.send_latest_snapshot().await;

    assert!(matches!(result, Ok(false)));
    assert_eq!(replicator.failures, 1);
    assert_eq!(replicator.next_index, 50);
    assert_eq!(replicator.match_index, 49);
}

/// A higher term in the InstallSnapshot response stops the replicator.
#[tokio::test]
async fn test_snapshot_response_with_newer_term_stops_replication() {
    let mut fixture = TestFixture::new(test_config());
    fixture.snapshots.add(
        SnapshotMeta {
            id: "snap-10".to_string(),
            index: 10,
            term: 2,
            peers: Bytes::new(),
            size: 1,
        },
        Bytes::from_static(b"x"),
    );
    fixture.transport.set_install_responder(|_| {
        Ok(InstallSnapshotResponse {
            term: 6,
            success: false,
        })
    });

    let (mut replicator, _stop_tx) = fixture.make_replicator(peer(), 5);
    let waiter = replicator.progress.enqueue_verify();

    let result = replicator.send_latest_snapshot().await;

    assert!(matches!(result, Ok(true)));
    assert!(!waiter.await.expect("continuation completed"));
    assert_eq!(fixture.step_down_rx.recv().await, Some(6));
}

/// Without any snapshot to fall back to, a compacted log aborts the round
/// but keeps the replicator alive.
#[tokio::test]
async fn test_missing_snapshot_is_recoverable() {
    let fixture = TestFixture::new(test_config());

    let (mut replicator, _stop_tx) = fixture.make_replicator(peer(), 1);
    replicator.next_index = 50;

    let should_stop = replicator.replicate_to(60).await;

    assert!(!should_stop);
    assert_eq!(replicator.next_index, 50);
    assert_eq!(replicator.failures, 0);
}

/// Transport failures count towards backoff and leave the indices alone.
#[tokio::test]
async fn test_transport_error_increments_failures() {
    let fixture = TestFixture::new(test_config());
    fixture.log.extend(command_entries(1..=3, 1));
    fixture.volatile.set_last_log_index(3);
    fixture
        .transport
        .set_append_responder(|_| Err(NetworkError::Unreachable(2, "connection refused".to_string()).into()));

    let (mut replicator, _stop_tx) = fixture.make_replicator(peer(), 1);

    assert!(!replicator.replicate_to(3).await);
    assert_eq!(replicator.failures, 1);
    assert_eq!(replicator.next_index, 4);
    assert_eq!(replicator.match_index, 0);

    // The next round pays the backoff and fails again
    assert!(!replicator.replicate_to(3).await);
    assert_eq!(replicator.failures, 2);
}

/// A higher term in an AppendEntries response notifies verify waiters with
/// `false`, delivers exactly one step-down signal, and stops the loop.
#[traced_test]
#[tokio::test]
async fn test_step_down_on_higher_term() {
    let mut fixture = TestFixture::new(test_config());
    fixture.log.extend(command_entries(1..=2, 1));
    fixture.volatile.set_last_log_index(2);
    fixture
        .transport
        .set_append_responder(|_| Ok(AppendEntriesResponse::rejected(9, 0)));

    let (mut replicator, _stop_tx) = fixture.make_replicator(peer(), 1);
    let waiter = replicator.progress.enqueue_verify();

    let should_stop = replicator.replicate_to(2).await;

    assert!(should_stop);
    assert!(!waiter.await.expect("continuation completed"));
    assert_eq!(fixture.step_down_rx.recv().await, Some(9));
    assert!(fixture.step_down_rx.try_recv().is_err(), "step-down must be signalled exactly once");
    assert!(logs_contain("peer has newer term"));
}

/// Rejections drive `next_index` backwards but never below 1.
#[tokio::test]
async fn test_rejection_probe_clamps_at_index_one() {
    let fixture = TestFixture::new(test_config());
    fixture.log.extend(command_entries(1..=2, 1));
    fixture.volatile.set_last_log_index(2);

    let rejections = Arc::new(AtomicUsize::new(0));
    let seen = rejections.clone();
    fixture.transport.set_append_responder(move |request| {
        if seen.fetch_add(1, Ordering::SeqCst) < 3 {
            Ok(AppendEntriesResponse::rejected(request.term, 0))
        } else {
            // Terminate the probe loop through a newer term
            Ok(AppendEntriesResponse::rejected(request.term + 1, 0))
        }
    });

    let (mut replicator, _stop_tx) = fixture.make_replicator(peer(), 1);

    let should_stop = replicator.replicate_to(2).await;

    assert!(should_stop);
    assert_eq!(replicator.next_index, 1);
    assert_eq!(replicator.match_index, 0);
}

/// A caught-up follower still receives the empty append of a commit tick:
/// indices hold, verify waiters resolve, pipelining stays enabled.
#[tokio::test]
async fn test_caught_up_round_sends_empty_append() {
    let fixture = TestFixture::new(test_config());
    fixture.log.extend(command_entries(1..=5, 1));
    fixture.volatile.set_last_log_index(5);
    drive_with_follower(
        &fixture.transport,
        SimFollower::with_log(1, &[(1, 1), (2, 1), (3, 1), (4, 1), (5, 1)]),
    );

    let (mut replicator, _stop_tx) = fixture.make_replicator(peer(), 1);
    replicator.match_index = 5;
    let waiter = replicator.progress.enqueue_verify();

    let should_stop = replicator.replicate_to(5).await;

    assert!(!should_stop);
    assert_eq!(replicator.match_index, 5);
    assert_eq!(replicator.next_index, 6);
    assert!(replicator.allow_pipeline);
    assert!(waiter.await.expect("continuation completed"));

    let appends = fixture.transport.append_requests();
    assert_eq!(appends.len(), 1);
    assert!(appends[0].entries.is_empty());
    assert_eq!(appends[0].prev_log_index, 5);
}

struct MockStoreTypes;

impl TypeConfig for MockStoreTypes {
    type Log = MockRaftLog;
    type Snapshots = MemSnapshotStore;
    type Transport = StubTransport;
    type Inflight = RecordingInflight;
}

/// A log read error that is not "absent entry" aborts the round without
/// touching the indices and without shipping a snapshot.
#[tokio::test]
async fn test_log_read_error_aborts_round() {
    let mut log = MockRaftLog::new();
    log.expect_entry()
        .returning(|_| Err(StorageError::LogStorage("corrupted segment".to_string()).into()));

    let volatile = Arc::new(LeaderVolatile::default());
    volatile.set_last_log_index(5);
    let transport = Arc::new(StubTransport::new());
    let ctx = Arc::new(ReplicationContext::<MockStoreTypes> {
        node_id: 1,
        local_addr: "127.0.0.1:9001".to_string(),
        raft_log: Arc::new(log),
        snapshots: Arc::new(MemSnapshotStore::new()),
        transport: transport.clone(),
        config: Arc::new(test_config()),
        volatile,
    });

    let (step_down_tx, _step_down_rx) = mpsc::channel(1);
    let (_stop_tx, stop_rx) = mpsc::channel(1);
    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    let mut replicator = FollowerReplicator::<MockStoreTypes> {
        peer: peer(),
        current_term: 1,
        next_index: 6,
        match_index: 0,
        failures: 0,
        allow_pipeline: false,
        ctx,
        inflight: Arc::new(RecordingInflight::default()),
        progress: Arc::new(ReplicationProgress::new(2)),
        stop_rx,
        trigger: Arc::new(Notify::new()),
        heartbeat_notify: Arc::new(Notify::new()),
        step_down_tx,
        shutdown: shutdown_rx,
    };

    let should_stop = replicator.replicate_to(5).await;

    assert!(!should_stop);
    assert_eq!(replicator.next_index, 6);
    assert_eq!(replicator.failures, 0);
    assert!(transport.append_requests().is_empty());
    assert!(transport.install_requests().is_empty());
}

/// Stopping with a drain index performs one final best-effort catch-up up
/// to that index before the task exits.
#[tokio::test]
async fn test_stop_drains_up_to_requested_index() {
    let config = ReplicationConfig {
        max_append_entries: 10,
        // Keep the periodic tick out of the way; only the drain replicates
        commit_timeout_ms: 5_000,
        heartbeat_timeout_ms: 1_000,
        pipeline_buffer: 16,
    };
    let mut fixture = TestFixture::new(config);

    let handle = FollowerReplicator::spawn(
        peer(),
        1,
        fixture.ctx.clone(),
        fixture.inflight.clone(),
        fixture.step_down_tx.clone(),
        fixture.shutdown_rx.clone(),
    );

    fixture.log.extend(command_entries(1..=42, 1));
    fixture.volatile.set_last_log_index(42);

    handle.stop(42).await;

    let shipped: Vec<u64> = fixture
        .transport
        .append_requests()
        .iter()
        .flat_map(|request| request.entries.iter().map(|entry| entry.index))
        .collect();
    for index in 1..=42 {
        assert!(shipped.contains(&index), "index {index} was not drained");
    }
    assert!(fixture.inflight.ranges().contains(&(1, 10)));
    assert!(fixture.inflight.ranges().contains(&(41, 42)));
    assert!(fixture.step_down_rx.try_recv().is_err());
}

/// Verify requests enqueued through the handle are answered by the next
/// accelerated heartbeat probe.
#[tokio::test]
async fn test_verify_leadership_through_handle() {
    let fixture = TestFixture::new(test_config());

    let handle = FollowerReplicator::spawn(
        peer(),
        1,
        fixture.ctx.clone(),
        fixture.inflight.clone(),
        fixture.step_down_tx.clone(),
        fixture.shutdown_rx.clone(),
    );

    let waiter = handle.verify_leadership();
    assert!(waiter.await.expect("continuation completed"));
    assert!(handle.last_contact().is_some());

    handle.stop(0).await;
}

/// The whole replicator task terminates once a peer reports a newer term.
#[tokio::test]
async fn test_replicator_task_exits_on_newer_term() {
    let mut fixture = TestFixture::new(test_config());
    fixture.log.extend(command_entries(1..=3, 1));
    fixture.volatile.set_last_log_index(3);
    fixture
        .transport
        .set_append_responder(|_| Ok(AppendEntriesResponse::rejected(9, 0)));

    let handle = FollowerReplicator::spawn(
        peer(),
        1,
        fixture.ctx.clone(),
        fixture.inflight.clone(),
        fixture.step_down_tx.clone(),
        fixture.shutdown_rx.clone(),
    );

    handle.trigger();

    assert_eq!(fixture.step_down_rx.recv().await, Some(9));
    assert!(fixture.step_down_rx.try_recv().is_err());

    // The task is already gone; stop() must still return cleanly.
    handle.stop(0).await;
}
