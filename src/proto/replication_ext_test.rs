use bytes::Bytes;

use super::AppendEntriesRequest;
use super::AppendEntriesResponse;
use super::Entry;
use super::EntryType;

#[test]
fn test_heartbeat_request_is_empty_form() {
    let request = AppendEntriesRequest::heartbeat(7, Bytes::from_static(b"leader-1"));

    assert!(request.is_heartbeat());
    assert_eq!(request.term, 7);
    assert_eq!(request.prev_log_index, 0);
    assert_eq!(request.prev_log_term, 0);
    assert_eq!(request.leader_commit_index, 0);
    assert!(request.entries.is_empty());
}

#[test]
fn test_request_with_entries_is_not_heartbeat() {
    let mut request = AppendEntriesRequest::heartbeat(7, Bytes::from_static(b"leader-1"));
    request.entries.push(Entry::noop(1, 7));

    assert!(!request.is_heartbeat());
}

#[test]
fn test_response_constructors() {
    let ok = AppendEntriesResponse::success(3, 42);
    assert!(ok.success);
    assert_eq!(ok.last_log, 42);

    let rejected = AppendEntriesResponse::rejected(4, 41);
    assert!(!rejected.success);
    assert_eq!(rejected.term, 4);
}

#[test]
fn test_entry_builders_set_type() {
    let command = Entry::command(5, 2, Bytes::from_static(b"set x=1"));
    assert_eq!(command.entry_type, EntryType::Command as i32);
    assert_eq!(command.index, 5);

    let noop = Entry::noop(6, 2);
    assert_eq!(noop.entry_type, EntryType::Noop as i32);
    assert!(noop.payload.is_empty());
}
