use crate::channel::Bag;
use crate::ReplicaId;

/// Version stamp for a register value, ordered by counter first and
/// writer id second. The writer id is the id of the coordinator that
/// minted the stamp, so concurrent coordinators can never produce equal
/// timestamps for distinct writes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub counter: u64,
    pub writer: usize,
}

impl Timestamp {
    /// The stamp for the next write after `self`, minted by `writer`.
    pub fn increment(self, writer: usize) -> Self {
        Timestamp {
            counter: self.counter + 1,
            writer,
        }
    }
}

/// Protocol messages exchanged between an ABD coordinator and the
/// replicas. Queries and updates carry the coordinator's response bag so
/// replicas can reply without any per-replica response channel, plus an
/// operation sequence tag echoed in replies so the coordinator can
/// discard replies left over from earlier operations.
#[derive(Clone, Debug)]
pub enum Message {
    /// Request for a replica's current (value, timestamp) of `register`.
    Query {
        op: u64,
        register: String,
        reply: Bag<Message>,
    },

    /// A replica's current view of a register.
    QueryReply {
        op: u64,
        sender: ReplicaId,
        value: Option<String>,
        timestamp: Timestamp,
    },

    /// Request to adopt (value, timestamp) for `register` if newer.
    Update {
        op: u64,
        register: String,
        value: Option<String>,
        timestamp: Timestamp,
        reply: Bag<Message>,
    },

    /// Unconditional acknowledgment of an update.
    UpdateAck { op: u64, sender: ReplicaId },

    /// Shut the replica down.
    Stop,
}
