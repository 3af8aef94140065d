use hashbrown::HashMap as Map;
use log::{debug, trace};

use crate::abd::message::{Message, Timestamp};
use crate::channel::Bag;
use crate::ReplicaId;

/// Final per-replica state returned on shutdown, for verification.
#[derive(Clone, Debug)]
pub struct Report {
    pub id: ReplicaId,
    pub store: Map<String, (Option<String>, Timestamp)>,
}

/// One ABD replica: a per-register (value, timestamp) store driven by
/// query and update messages from coordinators.
pub struct Replica {
    id: ReplicaId,
    mailbox: Bag<Message>,
    store: Map<String, (Option<String>, Timestamp)>,
}

impl Replica {
    pub fn new(id: ReplicaId, mailbox: Bag<Message>) -> Self {
        debug!("replica {} initialized", id);
        Replica {
            id,
            mailbox,
            store: Map::default(),
        }
    }

    /// Handles messages until a stop request arrives.
    pub fn run(mut self) -> Report {
        loop {
            let message = self.mailbox.recv();
            trace!("replica {} receiving {:?}", self.id, message);
            match message {
            | Message::Query { op, register, reply } => self.respond_query(op, &register, &reply),
            | Message::Update { op, register, value, timestamp, reply } => {
                self.respond_update(op, register, value, timestamp, &reply)
            }
            | Message::Stop => break,
            | unexpected => debug!("replica {} dropping {:?}", self.id, unexpected),
            }
        }
        debug!("replica {} stopping", self.id);
        Report {
            id: self.id,
            store: self.store,
        }
    }

    /// Replies with the current (value, timestamp) for the register,
    /// defaulting to an unwritten view.
    fn respond_query(&self, op: u64, register: &str, reply: &Bag<Message>) {
        let (value, timestamp) = self
            .store
            .get(register)
            .cloned()
            .unwrap_or((None, Timestamp::default()));
        trace!("replica {} replying {}={:?} at {:?}", self.id, register, value, timestamp);
        reply.send(Message::QueryReply {
            op,
            sender: self.id,
            value,
            timestamp,
        });
    }

    /// Adopts the update iff its timestamp is strictly newer than the
    /// stored one, then acknowledges unconditionally.
    fn respond_update(
        &mut self,
        op: u64,
        register: String,
        value: Option<String>,
        timestamp: Timestamp,
        reply: &Bag<Message>,
    ) {
        let current = self
            .store
            .get(&register)
            .map(|(_, timestamp)| *timestamp)
            .unwrap_or_default();
        if timestamp > current {
            debug!("replica {} adopting {}={:?} at {:?}", self.id, register, value, timestamp);
            self.store.insert(register, (value, timestamp));
        } else {
            trace!(
                "replica {} ignoring update at {:?} (stored {:?})",
                self.id, timestamp, current
            );
        }
        reply.send(Message::UpdateAck { op, sender: self.id });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica() -> (Replica, Bag<Message>) {
        let replies = Bag::new();
        (Replica::new(0, Bag::new()), replies)
    }

    #[test]
    fn query_of_unwritten_register_defaults() {
        let (replica, replies) = replica();
        replica.respond_query(1, "x", &replies);
        match replies.try_recv() {
        | Some(Message::QueryReply { op, sender, value, timestamp }) => {
            assert_eq!(op, 1);
            assert_eq!(sender, 0);
            assert_eq!(value, None);
            assert_eq!(timestamp, Timestamp::default());
        }
        | other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn accepted_timestamps_are_monotone() {
        let (mut replica, replies) = replica();
        let stamps = [
            Timestamp { counter: 1, writer: 0 },
            Timestamp { counter: 3, writer: 1 },
            Timestamp { counter: 2, writer: 4 }, // stale, must be ignored
            Timestamp { counter: 3, writer: 0 }, // stale, must be ignored
            Timestamp { counter: 3, writer: 2 },
        ];
        let mut last = Timestamp::default();
        for (round, stamp) in stamps.iter().enumerate() {
            replica.respond_update(
                round as u64,
                "x".to_owned(),
                Some(round.to_string()),
                *stamp,
                &replies,
            );
            let stored = replica.store["x"].1;
            assert!(stored >= last, "timestamp went backwards: {:?} after {:?}", stored, last);
            last = stored;
        }
        assert_eq!(last, Timestamp { counter: 3, writer: 2 });
        // Every update is acknowledged, adopted or not.
        assert_eq!(replies.len(), stamps.len());
    }

    #[test]
    fn stale_update_keeps_current_value() {
        let (mut replica, replies) = replica();
        let newer = Timestamp { counter: 5, writer: 1 };
        replica.respond_update(0, "x".to_owned(), Some("new".to_owned()), newer, &replies);
        let older = Timestamp { counter: 4, writer: 9 };
        replica.respond_update(1, "x".to_owned(), Some("old".to_owned()), older, &replies);
        assert_eq!(replica.store["x"].0.as_deref(), Some("new"));
    }
}
