use hashbrown::HashMap as Map;

use crate::paxos::message::{LogIndex, QueueOperation};
use crate::ReplicaId;

/// A decided log entry, remembering which replica decided it so exactly
/// one replica answers the originating client at execution time.
#[derive(Clone, Debug)]
pub struct Entry {
    pub operation: QueueOperation,
    pub decider: ReplicaId,
}

/// One replica's view of the agreed operation sequence. Decisions land
/// at arbitrary indices; execution hands entries out strictly in index
/// order, stalling at the first undecided index.
#[derive(Debug, Default)]
pub struct Log {
    entries: Map<LogIndex, Entry>,
    frontier: LogIndex,
}

impl Log {
    pub fn new() -> Self {
        Log::default()
    }

    /// Records a decision. Returns false if the index was already
    /// decided; a decided entry is never overwritten.
    pub fn record(&mut self, index: LogIndex, operation: QueueOperation, decider: ReplicaId) -> bool {
        if self.entries.contains_key(&index) {
            return false;
        }
        self.entries.insert(index, Entry { operation, decider });
        true
    }

    pub fn is_decided(&self, index: LogIndex) -> bool {
        self.entries.contains_key(&index)
    }

    /// Whether `operation` was already decided at some index.
    pub fn contains(&self, operation: &QueueOperation) -> bool {
        self.entries.values().any(|entry| entry.operation == *operation)
    }

    /// Whether `operation` also appears at an index before `index`. A
    /// decision that raced into two slots executes only at the first.
    pub fn decided_before(&self, index: LogIndex, operation: &QueueOperation) -> bool {
        self.entries
            .iter()
            .any(|(earlier, entry)| *earlier < index && entry.operation == *operation)
    }

    /// Next entry due for execution, if the frontier index is decided.
    pub fn next_ready(&mut self) -> Option<(LogIndex, Entry)> {
        let entry = self.entries.get(&self.frontier)?.clone();
        let index = self.frontier;
        self.frontier += 1;
        Some((index, entry))
    }

    /// First index that has not been executed yet.
    pub fn frontier(&self) -> LogIndex {
        self.frontier
    }

    /// The decided operations by index, for end-of-run verification.
    pub fn operations(&self) -> Map<LogIndex, QueueOperation> {
        self.entries
            .iter()
            .map(|(index, entry)| (*index, entry.operation.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(invocation: u64) -> QueueOperation {
        QueueOperation::enqueue(0, invocation, invocation as i64)
    }

    #[test]
    fn execution_stalls_at_a_gap() {
        let mut log = Log::new();
        log.record(1, op(1), 0);
        assert!(log.next_ready().is_none());
        assert_eq!(log.frontier(), 0);

        log.record(0, op(0), 0);
        assert_eq!(log.next_ready().map(|(index, _)| index), Some(0));
        assert_eq!(log.next_ready().map(|(index, _)| index), Some(1));
        assert!(log.next_ready().is_none());
        assert_eq!(log.frontier(), 2);
    }

    #[test]
    fn duplicate_decisions_detected_across_indices() {
        let mut log = Log::new();
        log.record(0, op(1), 0);
        log.record(2, op(1), 1);
        assert!(log.contains(&op(1)));
        assert!(!log.contains(&op(2)));
        assert!(!log.decided_before(0, &op(1)));
        assert!(log.decided_before(2, &op(1)));
    }

    #[test]
    fn decided_entries_are_immutable() {
        let mut log = Log::new();
        assert!(log.record(0, op(1), 2));
        assert!(!log.record(0, op(9), 4));
        let (_, entry) = log.next_ready().unwrap();
        assert_eq!(entry.operation, op(1));
        assert_eq!(entry.decider, 2);
    }
}
