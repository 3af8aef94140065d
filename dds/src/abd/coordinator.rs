use log::{debug, trace};

use crate::abd::message::{Message, Timestamp};
use crate::channel::Bag;
use crate::quorum;
use crate::shared;
use crate::ClientId;

/// Per-session coordinator running the two-phase ABD protocol against
/// the replica group. The session's client id doubles as the writer id
/// embedded in new timestamps, which keeps stamps minted by concurrent
/// coordinators distinct.
pub struct Coordinator {
    writer: ClientId,
    quorum: usize,
    shared: shared::Shared<Bag<Message>>,
    responses: Bag<Message>,
    op: u64,
}

impl Coordinator {
    pub fn new(writer: ClientId, shared: shared::Shared<Bag<Message>>) -> Self {
        let quorum = quorum::majority(shared.read().count());
        Coordinator {
            writer,
            quorum,
            shared,
            responses: Bag::new(),
            op: 0,
        }
    }

    /// Linearizable write: query a quorum for the highest timestamp,
    /// then update a quorum with the incremented stamp.
    pub fn write(&mut self, register: &str, value: String) {
        debug!("coordinator {} writing {}={}", self.writer, register, value);
        let (_, max) = self.query(register);
        let stamp = max.increment(self.writer);
        self.update(register, Some(value), stamp);
        debug!("coordinator {} write complete at {:?}", self.writer, stamp);
    }

    /// Linearizable read: query a quorum, then write the winning
    /// (value, timestamp) back to a quorum before returning it.
    pub fn read(&mut self, register: &str) -> Option<String> {
        debug!("coordinator {} reading {}", self.writer, register);
        let (value, stamp) = self.query(register);
        self.update(register, value.clone(), stamp);
        debug!("coordinator {} read {}={:?} at {:?}", self.writer, register, value, stamp);
        value
    }

    /// Query phase: broadcast and return the quorum reply carrying the
    /// maximum timestamp.
    fn query(&mut self, register: &str) -> (Option<String>, Timestamp) {
        let op = self.next_op();
        self.shared.read().broadcast(Message::Query {
            op,
            register: register.to_owned(),
            reply: self.responses.clone(),
        });
        let replies = quorum::collect(&self.responses, self.quorum, |message| match message {
            | Message::QueryReply { op: tag, sender, value, timestamp } if tag == op => {
                Some((sender, (value, timestamp)))
            }
            | stale => {
                trace!("coordinator {} discarding {:?}", self.writer, stale);
                None
            }
        });
        replies
            .into_iter()
            .max_by_key(|(_, timestamp)| *timestamp)
            .expect("[INTERNAL ERROR]: empty quorum")
    }

    /// Update phase: broadcast the (value, timestamp) pair and wait for
    /// a quorum of acknowledgments.
    fn update(&mut self, register: &str, value: Option<String>, timestamp: Timestamp) {
        let op = self.next_op();
        self.shared.read().broadcast(Message::Update {
            op,
            register: register.to_owned(),
            value,
            timestamp,
            reply: self.responses.clone(),
        });
        quorum::collect(&self.responses, self.quorum, |message| match message {
            | Message::UpdateAck { op: tag, sender } if tag == op => Some((sender, ())),
            | stale => {
                trace!("coordinator {} discarding {:?}", self.writer, stale);
                None
            }
        });
    }

    fn next_op(&mut self) -> u64 {
        self.op += 1;
        self.op
    }
}
