//! Shared per-peer progress visible outside the replication tasks.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Instant;

use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::sync::oneshot;

/// Observable side of one follower's replication state.
///
/// The replication tasks write; the surrounding node reads `match_index`
/// for quorum math and `last_contact` for liveness checks.
#[derive(Debug)]
pub struct ReplicationProgress {
    peer_id: u32,
    match_index: AtomicU64,
    last_contact: RwLock<Option<Instant>>,
    verify_waiters: Mutex<Vec<oneshot::Sender<bool>>>,
}

impl ReplicationProgress {
    pub fn new(peer_id: u32) -> Self {
        Self {
            peer_id,
            match_index: AtomicU64::new(0),
            last_contact: RwLock::new(None),
            verify_waiters: Mutex::new(Vec::new()),
        }
    }

    pub fn peer_id(&self) -> u32 {
        self.peer_id
    }

    /// Highest log index known to be replicated on this follower.
    pub fn match_index(&self) -> u64 {
        self.match_index.load(Ordering::Acquire)
    }

    /// Timestamp of the last successful RPC response from this peer, or
    /// `None` before the first contact.
    pub fn last_contact(&self) -> Option<Instant> {
        *self.last_contact.read()
    }

    pub(crate) fn store_match_index(
        &self,
        index: u64,
    ) {
        self.match_index.store(index, Ordering::Release);
    }

    pub(crate) fn touch_last_contact(&self) {
        *self.last_contact.write() = Some(Instant::now());
    }

    /// Enqueues a leadership-verify continuation.
    ///
    /// The returned receiver resolves with the next round-trip's verdict:
    /// `true` while the peer still accepts this node's term, `false` once a
    /// newer term has been observed.
    pub(crate) fn enqueue_verify(&self) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.verify_waiters.lock().push(tx);
        rx
    }

    /// Completes every pending verify continuation with `leader`.
    ///
    /// The queue is swapped out under the lock and the continuations are
    /// invoked outside it; holders of the queue mutex must never call into
    /// waiter code.
    pub(crate) fn notify_verifiers(
        &self,
        leader: bool,
    ) {
        let drained = {
            let mut waiters = self.verify_waiters.lock();
            std::mem::take(&mut *waiters)
        };

        for waiter in drained {
            // The caller may have dropped its receiver; nothing to do then.
            let _ = waiter.send(leader);
        }
    }
}
