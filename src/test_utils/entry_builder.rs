use bytes::Bytes;

use crate::proto::Entry;

/// Builds consecutive log entries for tests.
pub struct EntryBuilder {
    index: u64,
    term: u64,
}

impl EntryBuilder {
    pub fn new(
        start_index: u64,
        term: u64,
    ) -> Self {
        Self {
            index: start_index,
            term,
        }
    }

    /// Switches the term for subsequently built entries.
    pub fn at_term(
        mut self,
        term: u64,
    ) -> Self {
        self.term = term;
        self
    }

    pub fn command(
        mut self,
        data: &[u8],
    ) -> (Self, Entry) {
        let entry = Entry::command(self.index, self.term, Bytes::copy_from_slice(data));
        self.index += 1;
        (self, entry)
    }

    pub fn noop(mut self) -> (Self, Entry) {
        let entry = Entry::noop(self.index, self.term);
        self.index += 1;
        (self, entry)
    }
}

/// Generates command entries for every index in `range`, all at `term`.
pub fn command_entries(
    range: std::ops::RangeInclusive<u64>,
    term: u64,
) -> Vec<Entry> {
    range
        .map(|index| Entry::command(index, term, Bytes::from(format!("cmd-{index}"))))
        .collect()
}
