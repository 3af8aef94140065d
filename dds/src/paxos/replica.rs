use std::collections::VecDeque;
use std::thread;
use std::time;

use hashbrown::HashMap as Map;
use hashbrown::HashSet as Set;
use log::{debug, trace};
use rand::Rng;

use crate::channel::{Bag, Sender};
use crate::message::Reply;
use crate::paxos::log::Log;
use crate::paxos::message::{LogIndex, Message, OpKind, QueueOperation, Round};
use crate::quorum;
use crate::shared;
use crate::{ClientId, ReplicaId};

/// The one replica allowed to run backstop elections, so a silent
/// round-robin leader cannot stall the system without triggering
/// concurrent competing elections everywhere.
const BACKSTOP: ReplicaId = 0;

/// Delay before an armed backstop election fires.
const ELECTION_DELAY: time::Duration = time::Duration::from_millis(50);

/// Final per-replica state returned on shutdown, for verification.
#[derive(Clone, Debug)]
pub struct Report {
    pub id: ReplicaId,
    pub log: Map<LogIndex, QueueOperation>,
    pub queue: Vec<i64>,
}

/// One Multi-Paxos replica: acceptor and proposer state machine per log
/// index, plus the deterministic executor driving the local queue.
pub struct Replica {
    id: ReplicaId,
    count: usize,
    quorum: usize,
    shared: shared::Shared<Bag<Message>>,

    // Acceptor state, per log index.
    promised: Map<LogIndex, Round>,
    accepted: Map<LogIndex, (Round, QueueOperation)>,

    // Proposer state. `round` is the last round this replica started;
    // `seen` tracks the highest round observed anywhere so a fresh
    // attempt can outbid every promise already given.
    round: Round,
    seen: Round,
    leading: bool,
    next_index: LogIndex,
    promises: Map<LogIndex, Set<ReplicaId>>,
    accepts: Map<LogIndex, Set<ReplicaId>>,
    carried: Map<LogIndex, (Round, QueueOperation)>,
    election_armed: bool,

    // Client tracking: pending operations per client in invocation
    // order, the highest prefix of decided invocations per client,
    // reply handles learned from broadcast submissions, and dequeue
    // results waiting for a handle to arrive.
    pending: Map<ClientId, VecDeque<QueueOperation>>,
    completed: Map<ClientId, u64>,
    decided_ahead: Map<ClientId, Set<u64>>,
    clients: Map<ClientId, Sender<Reply>>,
    deferred: Vec<(ClientId, Option<i64>)>,

    // Execution state.
    log: Log,
    queue: VecDeque<i64>,
}

impl Replica {
    pub fn new(id: ReplicaId, count: usize, shared: shared::Shared<Bag<Message>>) -> Self {
        debug!("replica {} initialized ({} replicas)", id, count);
        Replica {
            id,
            count,
            quorum: quorum::majority(count),
            shared,
            promised: Map::default(),
            accepted: Map::default(),
            round: 0,
            seen: 0,
            leading: false,
            next_index: 0,
            promises: Map::default(),
            accepts: Map::default(),
            carried: Map::default(),
            election_armed: false,
            pending: Map::default(),
            completed: Map::default(),
            decided_ahead: Map::default(),
            clients: Map::default(),
            deferred: Vec::new(),
            log: Log::new(),
            queue: VecDeque::new(),
        }
    }

    /// Handles messages from the given mailbox until a stop request
    /// arrives, then reports final state.
    pub fn run(mut self, mailbox: Bag<Message>) -> Report {
        loop {
            let message = mailbox.recv();
            trace!("replica {} receiving {:?}", self.id, message);
            match message {
            | Message::Submit { operation, reply } => self.respond_submit(operation, reply),
            | Message::Prepare { round, index, sender } => self.respond_prepare(round, index, sender),
            | Message::Promise { round, index, sender, accepted } => {
                self.respond_promise(round, index, sender, accepted)
            }
            | Message::Propose { round, index, operation, sender } => {
                self.respond_propose(round, index, operation, sender)
            }
            | Message::Accept { round, index, operation, sender } => {
                self.respond_accept(round, index, operation, sender)
            }
            | Message::Decide { index, operation, sender, .. } => {
                self.respond_decide(index, operation, sender)
            }
            | Message::Election => self.respond_election(),
            | Message::Stop => break,
            }
            // The designated backstop keeps an election armed whenever
            // work is pending and nobody here is leading; every other
            // liveness path can silently die to an outpromised round.
            if self.id == BACKSTOP && !self.leading && self.has_pending() {
                self.arm_election();
            }
        }
        debug!("replica {} stopping", self.id);
        Report {
            id: self.id,
            log: self.log.operations(),
            queue: self.queue.into_iter().collect(),
        }
    }

    /// Queues a client operation and makes sure some replica will
    /// eventually propose it: propose now if leading, start a round if
    /// the round-robin hint names this replica, otherwise let the
    /// designated backstop arm a delayed election.
    fn respond_submit(&mut self, operation: QueueOperation, reply: Sender<Reply>) {
        let client = operation.id.client;
        self.clients.insert(client, reply);
        self.flush_deferred(client);

        // Broadcast submissions can overtake each other in the bag, so
        // insertion restores the client's invocation order; submissions
        // of invocations already decided are dropped.
        let completed = self.completed.get(&client).copied().unwrap_or(0);
        if operation.id.invocation <= completed {
            trace!("replica {} dropping already-decided {:?}", self.id, operation);
            return;
        }
        let queue = self.pending.entry(client).or_default();
        if !queue.iter().any(|pending| pending.id == operation.id) {
            debug!("replica {} queued {:?}", self.id, operation);
            let position = queue
                .iter()
                .position(|pending| pending.id.invocation > operation.id.invocation)
                .unwrap_or(queue.len());
            queue.insert(position, operation);
        }

        if self.leading {
            self.try_propose();
        } else if (self.highest() + 1) % self.count as Round == self.id as Round {
            self.start_round();
        }
    }

    /// Acceptor half of phase 1: promise iff the round outbids every
    /// promise given for this index; lower rounds are silently ignored.
    fn respond_prepare(&mut self, round: Round, index: LogIndex, sender: ReplicaId) {
        self.seen = self.seen.max(round);
        let promised = self.promised.get(&index).copied().unwrap_or(0);
        if round > promised {
            self.promised.insert(index, round);
            let accepted = self.accepted.get(&index).cloned();
            trace!("replica {} promising round {} for index {}", self.id, round, index);
            self.shared.read().send(
                sender,
                Message::Promise { round, index, sender: self.id, accepted },
            );
        } else {
            trace!(
                "replica {} ignoring prepare for round {} (promised {})",
                self.id, round, promised
            );
        }
    }

    /// Proposer half of phase 1: count promises for the current round;
    /// a quorum makes this replica leader for the index.
    fn respond_promise(
        &mut self,
        round: Round,
        index: LogIndex,
        sender: ReplicaId,
        accepted: Option<(Round, QueueOperation)>,
    ) {
        self.seen = self.seen.max(round);
        if round != self.round {
            trace!("replica {} ignoring promise for stale round {}", self.id, round);
            return;
        }
        if let Some((accepted_round, operation)) = accepted {
            let newer = match self.carried.get(&index) {
            | Some((carried_round, _)) => accepted_round > *carried_round,
            | None => true,
            };
            if newer {
                debug!("replica {} carrying {:?} from round {}", self.id, operation, accepted_round);
                self.carried.insert(index, (accepted_round, operation));
            }
        }
        let reached = {
            let promises = self.promises.entry(index).or_default();
            promises.insert(sender);
            promises.len() >= self.quorum
        };
        if reached && !self.leading {
            debug!("replica {} leading round {} for index {}", self.id, round, index);
            self.leading = true;
            self.try_propose();
        }
    }

    /// Acceptor half of phase 2: accept iff no higher round was promised
    /// for this index since.
    fn respond_propose(
        &mut self,
        round: Round,
        index: LogIndex,
        operation: QueueOperation,
        sender: ReplicaId,
    ) {
        self.seen = self.seen.max(round);
        let promised = self.promised.get(&index).copied().unwrap_or(0);
        if round >= promised {
            trace!("replica {} accepting {:?} at index {} round {}", self.id, operation, index, round);
            self.accepted.insert(index, (round, operation.clone()));
            self.shared.read().send(
                sender,
                Message::Accept { round, index, operation, sender: self.id },
            );
        } else {
            trace!(
                "replica {} ignoring proposal for round {} (promised {})",
                self.id, round, promised
            );
        }
    }

    /// Proposer half of phase 2: count accepts for the current round; a
    /// quorum decides the index. Afterwards a fair coin picks between
    /// stepping down and immediately running for the next index.
    fn respond_accept(
        &mut self,
        round: Round,
        index: LogIndex,
        operation: QueueOperation,
        sender: ReplicaId,
    ) {
        if round != self.round || !self.leading {
            trace!("replica {} ignoring accept (round {}, leading {})", self.id, round, self.leading);
            return;
        }
        let reached = {
            let accepts = self.accepts.entry(index).or_default();
            accepts.insert(sender);
            accepts.len() >= self.quorum
        };
        if !reached {
            return;
        }

        debug!("replica {} deciding index {} with {:?}", self.id, index, operation);
        self.broadcast_peers(Message::Decide {
            round,
            index,
            operation: operation.clone(),
            sender: self.id,
        });
        self.respond_decide(index, operation, self.id);

        self.promises.remove(&index);
        self.accepts.remove(&index);
        self.carried.remove(&index);
        self.leading = false;
        if rand::thread_rng().gen_bool(0.5) {
            debug!("replica {} stepping down", self.id);
        } else if self.has_pending() {
            debug!("replica {} continuing for index {}", self.id, self.next_index);
            self.start_round();
        }
    }

    /// Stores the decision (idempotently), clears the decided invocation
    /// from that client's pending queue, and executes up to the first
    /// undecided index.
    fn respond_decide(&mut self, index: LogIndex, operation: QueueOperation, sender: ReplicaId) {
        if self.log.record(index, operation.clone(), sender) {
            debug!("replica {} recorded {:?} at index {}", self.id, operation, index);
        }

        // Advance the client's prefix of decided invocations and drop
        // every pending operation the prefix now covers.
        let client = operation.id.client;
        let completed = self.completed.entry(client).or_insert(0);
        if operation.id.invocation == *completed + 1 {
            *completed += 1;
            if let Some(ahead) = self.decided_ahead.get_mut(&client) {
                while ahead.remove(&(*completed + 1)) {
                    *completed += 1;
                }
            }
        } else if operation.id.invocation > *completed {
            self.decided_ahead.entry(client).or_default().insert(operation.id.invocation);
        }
        let completed = self.completed[&client];
        if let Some(queue) = self.pending.get_mut(&client) {
            queue.retain(|pending| {
                pending.id != operation.id && pending.id.invocation > completed
            });
        }

        if index >= self.next_index {
            self.next_index = index + 1;
        }
        self.execute();
    }

    /// Fires the delayed backstop election: if the system is still
    /// leaderless with pending work, outbid every observed round. The
    /// run loop re-arms immediately, so an attempt that is silently
    /// outpromised gets retried.
    fn respond_election(&mut self) {
        self.election_armed = false;
        if !self.leading && self.has_pending() {
            debug!("replica {} running backstop election", self.id);
            self.start_round();
        }
    }

    /// Starts a fresh round for the next undecided index by broadcasting
    /// a prepare. Rounds are proposer-unique: the next one strictly
    /// above everything observed that this replica owns.
    fn start_round(&mut self) {
        self.round = self.next_owned_round();
        self.seen = self.seen.max(self.round);
        self.leading = false;
        let index = self.next_index;
        debug!("replica {} starting round {} for index {}", self.id, self.round, index);
        let mut promises = Set::default();
        promises.insert(self.id);
        self.promises.insert(index, promises);
        self.accepts.remove(&index);
        self.carried.remove(&index);
        self.broadcast_peers(Message::Prepare {
            round: self.round,
            index,
            sender: self.id,
        });
    }

    /// Proposes for the next index: a value carried from the promise
    /// quorum takes precedence over pending client operations.
    fn try_propose(&mut self) {
        if !self.leading {
            return;
        }
        let index = self.next_index;
        if self.log.is_decided(index) || self.accepts.contains_key(&index) {
            return;
        }
        // The promise quorum must cover the index actually proposed at.
        // If decisions moved the frontier since the prepare went out,
        // run a fresh round for the new frontier instead.
        let covered = self
            .promises
            .get(&index)
            .map(|promises| promises.len() >= self.quorum)
            .unwrap_or(false);
        if !covered {
            self.leading = false;
            self.start_round();
            return;
        }
        let operation = match self.carried.get(&index) {
        | Some((_, operation)) => operation.clone(),
        | None => match self.choose_pending() {
            Some(operation) => operation,
            None => return,
        },
        };
        debug!("replica {} proposing {:?} for index {} round {}", self.id, operation, index, self.round);
        let mut accepts = Set::default();
        accepts.insert(self.id);
        self.accepts.insert(index, accepts);
        self.broadcast_peers(Message::Propose {
            round: self.round,
            index,
            operation,
            sender: self.id,
        });
    }

    /// Oldest proposable operation of the lowest client id, so competing
    /// leaders tend to drain the same work in the same order. A client's
    /// operation is proposable only when it is the next invocation after
    /// the decided prefix; a submission that overtook its predecessors
    /// in the bag waits for them.
    fn choose_pending(&self) -> Option<QueueOperation> {
        self.pending
            .iter()
            .flat_map(|(client, operations)| {
                operations.front().map(|operation| (*client, operation))
            })
            .filter(|(client, operation)| {
                let completed = self.completed.get(client).copied().unwrap_or(0);
                operation.id.invocation == completed + 1 && !self.log.contains(operation)
            })
            .min_by_key(|(client, _)| *client)
            .map(|(_, operation)| operation.clone())
    }

    /// Executes decided entries strictly in index order. The replica
    /// that decided an index answers the dequeueing client.
    fn execute(&mut self) {
        while let Some((index, entry)) = self.log.next_ready() {
            if self.log.decided_before(index, &entry.operation) {
                trace!("replica {} skipping duplicate {:?} at index {}", self.id, entry.operation, index);
                continue;
            }
            debug!("replica {} executing {:?} at index {}", self.id, entry.operation, index);
            match entry.operation.kind {
            | OpKind::Enqueue(value) => self.queue.push_back(value),
            | OpKind::Dequeue => {
                let result = self.queue.pop_front();
                if entry.decider == self.id {
                    self.respond_client(entry.operation.id.client, result);
                }
            }
            }
        }
    }

    /// Delivers a dequeue result, deferring it if the client's broadcast
    /// submission has not been drawn from this replica's mailbox yet.
    fn respond_client(&mut self, client: ClientId, result: Option<i64>) {
        match self.clients.get(&client) {
        | Some(reply) => {
            debug!("replica {} sending dequeue result {:?} to client {}", self.id, result, client);
            reply.try_send(Reply::Dequeued { value: result });
        }
        | None => {
            debug!("replica {} deferring dequeue result for client {}", self.id, client);
            self.deferred.push((client, result));
        }
        }
    }

    fn flush_deferred(&mut self, client: ClientId) {
        let deferred = std::mem::take(&mut self.deferred);
        for (owner, result) in deferred {
            if owner == client {
                self.respond_client(owner, result);
            } else {
                self.deferred.push((owner, result));
            }
        }
    }

    /// Arms a one-shot timer that posts an election message back into
    /// this replica's own mailbox.
    fn arm_election(&mut self) {
        if self.election_armed {
            return;
        }
        self.election_armed = true;
        trace!("replica {} arming backstop election", self.id);
        let shared = self.shared.clone();
        let id = self.id;
        thread::spawn(move || {
            thread::sleep(ELECTION_DELAY);
            shared.read().send(id, Message::Election);
        });
    }

    fn broadcast_peers(&self, message: Message) {
        let id = self.id;
        self.shared
            .read()
            .narrowcast((0..self.count).filter(move |peer| *peer != id), message);
    }

    fn has_pending(&self) -> bool {
        self.pending.values().any(|operations| !operations.is_empty())
    }

    fn highest(&self) -> Round {
        self.round.max(self.seen)
    }

    /// Smallest round above everything observed that this replica owns
    /// under the round-robin assignment.
    fn next_owned_round(&self) -> Round {
        let count = self.count as Round;
        let id = self.id as Round;
        let base = self.highest() + 1;
        base + (count + id - base % count) % count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel;
    use crate::paxos::message::OpId;

    fn cluster(count: usize) -> (Vec<Bag<Message>>, shared::Shared<Bag<Message>>) {
        let mailboxes: Vec<Bag<Message>> = (0..count).map(|_| Bag::new()).collect();
        let shared = shared::Shared::new(mailboxes.clone());
        (mailboxes, shared)
    }

    fn op(invocation: u64) -> QueueOperation {
        QueueOperation::enqueue(3, invocation, invocation as i64 * 10)
    }

    #[test]
    fn acceptor_promises_only_strictly_higher_rounds() {
        let (mailboxes, shared) = cluster(3);
        let mut replica = Replica::new(1, 3, shared);

        replica.respond_prepare(3, 0, 0);
        match mailboxes[0].try_recv() {
        | Some(Message::Promise { round: 3, index: 0, sender: 1, accepted: None }) => (),
        | other => panic!("unexpected message {:?}", other),
        }

        // Equal and lower rounds are ignored without any reply.
        replica.respond_prepare(3, 0, 2);
        replica.respond_prepare(2, 0, 2);
        assert!(mailboxes[2].is_empty());
        assert_eq!(replica.promised[&0], 3);
    }

    #[test]
    fn acceptor_accepts_at_or_above_promised_round() {
        let (mailboxes, shared) = cluster(3);
        let mut replica = Replica::new(1, 3, shared);
        replica.respond_prepare(3, 0, 0);
        mailboxes[0].try_recv();

        // A proposal below the promised round is ignored.
        replica.respond_propose(2, 0, op(1), 2);
        assert!(mailboxes[2].is_empty());
        assert!(replica.accepted.get(&0).is_none());

        // A proposal at the promised round is accepted and acknowledged.
        replica.respond_propose(3, 0, op(1), 0);
        assert_eq!(replica.accepted[&0], (3, op(1)));
        match mailboxes[0].try_recv() {
        | Some(Message::Accept { round: 3, index: 0, operation, sender: 1 }) => {
            assert_eq!(operation, op(1))
        }
        | other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn promise_carrying_accepted_value_is_replayed_in_later_rounds() {
        let (mailboxes, shared) = cluster(3);
        let mut replica = Replica::new(1, 3, shared);
        replica.respond_prepare(1, 0, 0);
        mailboxes[0].try_recv();
        replica.respond_propose(1, 0, op(7), 0);
        mailboxes[0].try_recv();

        // A later prepare learns what this acceptor already accepted.
        replica.respond_prepare(5, 0, 2);
        match mailboxes[2].try_recv() {
        | Some(Message::Promise { round: 5, accepted: Some((1, operation)), .. }) => {
            assert_eq!(operation, op(7))
        }
        | other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn promise_quorum_elects_and_reproposes_highest_carried_value() {
        let (mailboxes, shared) = cluster(5);
        let mut replica = Replica::new(0, 5, shared);
        // Queue a fresh operation the leader would otherwise pick.
        replica.pending.entry(9).or_default().push_back(op(99));

        replica.start_round();
        let round = replica.round;
        for mailbox in &mailboxes {
            while mailbox.try_recv().is_some() {}
        }

        // Two promises complete the quorum of three (self included); the
        // value accepted at the higher round must win over both the
        // lower-round value and the pending client operation.
        replica.respond_promise(round, 0, 1, Some((1, op(1))));
        assert!(!replica.leading);
        replica.respond_promise(round, 0, 2, Some((2, op(2))));
        assert!(replica.leading);

        let mut proposed = None;
        for mailbox in &mailboxes[1..] {
            if let Some(Message::Propose { operation, index: 0, .. }) = mailbox.try_recv() {
                proposed = Some(operation);
            }
        }
        assert_eq!(proposed, Some(op(2)));
    }

    #[test]
    fn stale_round_promises_are_ignored() {
        let (_mailboxes, shared) = cluster(3);
        let mut replica = Replica::new(1, 3, shared);
        replica.start_round();
        replica.respond_promise(replica.round - 1, 0, 0, None);
        assert!(!replica.leading);
    }

    #[test]
    fn decide_is_idempotent_and_executes_in_index_order() {
        let (_mailboxes, shared) = cluster(3);
        let mut replica = Replica::new(1, 3, shared);

        // A gap stalls execution.
        replica.respond_decide(1, op(2), 0);
        assert!(replica.queue.is_empty());

        replica.respond_decide(0, op(1), 0);
        assert_eq!(replica.queue, [10, 20]);

        // Duplicate decisions change nothing.
        replica.respond_decide(0, op(9), 0);
        assert_eq!(replica.log.operations()[&0], op(1));
        assert_eq!(replica.queue, [10, 20]);
    }

    #[test]
    fn decide_clears_exactly_the_decided_invocation() {
        let (_mailboxes, shared) = cluster(3);
        let mut replica = Replica::new(1, 3, shared);
        let (reply, _replies) = channel::fifo();
        replica.respond_submit(op(1), reply.clone());
        replica.respond_submit(op(2), reply);
        assert_eq!(replica.pending[&3].len(), 2);

        replica.respond_decide(0, op(1), 0);
        assert_eq!(replica.pending[&3].len(), 1);
        assert_eq!(replica.choose_pending(), Some(op(2)));
    }

    #[test]
    fn out_of_order_submissions_wait_for_their_predecessors() {
        let (_mailboxes, shared) = cluster(3);
        let mut replica = Replica::new(1, 3, shared);
        let (reply, _replies) = channel::fifo();

        // The second invocation overtook the first in the bag: it must
        // neither be proposable nor jump the queue.
        replica.respond_submit(op(2), reply.clone());
        assert_eq!(replica.choose_pending(), None);

        replica.respond_submit(op(1), reply);
        assert_eq!(replica.pending[&3].front(), Some(&op(1)));
        assert_eq!(replica.choose_pending(), Some(op(1)));

        replica.respond_decide(0, op(1), 0);
        assert_eq!(replica.choose_pending(), Some(op(2)));
    }

    #[test]
    fn deciding_replica_answers_the_dequeueing_client() {
        let (_mailboxes, shared) = cluster(3);
        let mut replica = Replica::new(1, 3, shared);
        let (reply, replies) = channel::fifo();
        let dequeue = QueueOperation {
            id: OpId { client: 3, invocation: 2 },
            kind: OpKind::Dequeue,
        };
        replica.respond_submit(op(1), reply.clone());
        replica.respond_submit(dequeue.clone(), reply);

        replica.respond_decide(0, op(1), 0);
        // Decided by a different replica: no response from this one.
        replica.respond_decide(1, dequeue.clone(), 0);
        assert!(replies.is_empty());

        let dequeue = QueueOperation {
            id: OpId { client: 3, invocation: 3 },
            kind: OpKind::Dequeue,
        };
        // Decided by this replica: the result goes back to the client.
        replica.respond_decide(2, dequeue, 1);
        assert_eq!(replies.recv(), Some(Reply::Dequeued { value: None }));
    }

    #[test]
    fn dequeue_result_is_deferred_until_the_submission_arrives() {
        let (_mailboxes, shared) = cluster(3);
        let mut replica = Replica::new(1, 3, shared);
        let dequeue = QueueOperation {
            id: OpId { client: 7, invocation: 1 },
            kind: OpKind::Dequeue,
        };

        // The decision overtook the broadcast submission in the bag.
        replica.respond_decide(0, dequeue.clone(), 1);
        assert_eq!(replica.deferred.len(), 1);

        let (reply, replies) = channel::fifo();
        replica.respond_submit(dequeue, reply);
        assert_eq!(replies.recv(), Some(Reply::Dequeued { value: None }));
        assert!(replica.deferred.is_empty());
    }

    #[test]
    fn rounds_are_proposer_unique() {
        let (_mailboxes, shared) = cluster(3);
        for id in 0..3 {
            let mut replica = Replica::new(id, 3, shared.clone());
            for _ in 0..4 {
                replica.start_round();
                assert_eq!(replica.round % 3, id as Round);
            }
        }
    }

    #[test]
    fn fresh_rounds_outbid_observed_ones() {
        let (mailboxes, shared) = cluster(3);
        let mut replica = Replica::new(0, 3, shared);
        replica.respond_prepare(31, 0, 1);
        mailboxes[1].try_recv();
        replica.start_round();
        assert!(replica.round > 31);
        assert_eq!(replica.round % 3, 0);
    }
}
