use bytes::Bytes;

use super::AppendEntriesRequest;
use super::AppendEntriesResponse;
use super::Entry;
use super::EntryType;
use super::InstallSnapshotResponse;

impl AppendEntriesRequest {
    /// Build the empty form used by the heartbeater: only `term` and
    /// `leader_id` are set, everything else stays zero.
    pub fn heartbeat(
        term: u64,
        leader_id: Bytes,
    ) -> Self {
        Self {
            term,
            leader_id,
            ..Default::default()
        }
    }

    /// Check whether this request is the empty heartbeat form
    pub fn is_heartbeat(&self) -> bool {
        self.prev_log_index == 0
            && self.prev_log_term == 0
            && self.leader_commit_index == 0
            && self.entries.is_empty()
    }
}

impl AppendEntriesResponse {
    /// Generate a successful response
    pub fn success(
        term: u64,
        last_log: u64,
    ) -> Self {
        Self {
            term,
            last_log,
            success: true,
        }
    }

    /// Generate a rejection (log consistency check failed or stale term)
    pub fn rejected(
        term: u64,
        last_log: u64,
    ) -> Self {
        Self {
            term,
            last_log,
            success: false,
        }
    }
}

impl InstallSnapshotResponse {
    pub fn success(term: u64) -> Self {
        Self {
            term,
            success: true,
        }
    }

    pub fn rejected(term: u64) -> Self {
        Self {
            term,
            success: false,
        }
    }
}

impl Entry {
    /// Build a command entry carrying an opaque payload
    pub fn command(
        index: u64,
        term: u64,
        payload: Bytes,
    ) -> Self {
        Self {
            index,
            term,
            entry_type: EntryType::Command as i32,
            payload,
        }
    }

    /// Build a payload-less leader assertion entry
    pub fn noop(
        index: u64,
        term: u64,
    ) -> Self {
        Self {
            index,
            term,
            entry_type: EntryType::Noop as i32,
            payload: Bytes::new(),
        }
    }
}
