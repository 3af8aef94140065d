use crate::channel::Sender;
use crate::message::Reply;
use crate::{ClientId, ReplicaId};

/// Round number ordering competing leadership attempts. Rounds are
/// proposer-unique: replica `i` only starts rounds `r` with
/// `r mod N == i`, so an accept quorum for a round can only ever back a
/// single proposer's value.
pub type Round = u64;

/// Position in the agreed sequence of decided operations.
pub type LogIndex = usize;

/// Identity of a queue operation: which client issued it, and which of
/// that client's invocations it is.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct OpId {
    pub client: ClientId,
    pub invocation: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
    Enqueue(i64),
    Dequeue,
}

/// The payload agreed on by consensus. Two operations are equal iff
/// both their identity and their kind match.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueueOperation {
    pub id: OpId,
    pub kind: OpKind,
}

impl QueueOperation {
    pub fn enqueue(client: ClientId, invocation: u64, value: i64) -> Self {
        QueueOperation {
            id: OpId { client, invocation },
            kind: OpKind::Enqueue(value),
        }
    }

    pub fn dequeue(client: ClientId, invocation: u64) -> Self {
        QueueOperation {
            id: OpId { client, invocation },
            kind: OpKind::Dequeue,
        }
    }
}

/// A queue-service client request, as seen by a session gateway.
#[derive(Clone, Debug)]
pub enum Request {
    Submit(QueueOperation),
    Stop,
}

/// Protocol messages exchanged between replicas. Client submissions are
/// broadcast to every replica by the gateway and carry the session's
/// reply handle so the deciding replica can deliver dequeue results.
#[derive(Clone, Debug)]
pub enum Message {
    /// A client operation, broadcast by the gateway to all replicas.
    Submit {
        operation: QueueOperation,
        reply: Sender<Reply>,
    },

    /// Proposer starting a fresh round for an index.
    Prepare {
        round: Round,
        index: LogIndex,
        sender: ReplicaId,
    },

    /// Acceptor's promise not to honor lower rounds, carrying its
    /// previously accepted (round, value) for the index, if any.
    Promise {
        round: Round,
        index: LogIndex,
        sender: ReplicaId,
        accepted: Option<(Round, QueueOperation)>,
    },

    /// Leader proposing a value for an index.
    Propose {
        round: Round,
        index: LogIndex,
        operation: QueueOperation,
        sender: ReplicaId,
    },

    /// Acceptor's acceptance of a proposal.
    Accept {
        round: Round,
        index: LogIndex,
        operation: QueueOperation,
        sender: ReplicaId,
    },

    /// Decision broadcast once a quorum accepted.
    Decide {
        round: Round,
        index: LogIndex,
        operation: QueueOperation,
        sender: ReplicaId,
    },

    /// Timed self-message arming the backstop election.
    Election,

    /// Shut the replica down.
    Stop,
}
