//! # Summary
//!
//! The Multi-Paxos replicated-log engine: index-by-index agreement on a
//! single log of queue operations, executed deterministically so all
//! correct replicas reach identical queue state. Leadership is only a
//! round-robin hint; it is earned per index by a quorum of promises, and
//! a designated replica arms a delayed backstop election so some replica
//! eventually proposes even if the hinted leader stays silent.

/// Queue operations and protocol messages.
pub mod message;

/// Decided-entry log with a contiguous execution frontier.
pub mod log;

/// Combined acceptor/proposer state machine and executor.
pub mod replica;

use std::thread;

use ::log::trace;

use crate::channel::{self, Bag, Sender};
use crate::message::Reply;
use crate::session;
use crate::shared;
use crate::ClientId;

pub use crate::paxos::message::{Message, OpId, OpKind, QueueOperation, Request};
pub use crate::paxos::replica::Report;

/// A running group of Multi-Paxos replicas plus its client sessions.
pub struct Cluster {
    shared: shared::Shared<Bag<Message>>,
    registry: session::Registry<Request>,
    replicas: Vec<thread::JoinHandle<Report>>,
}

impl Cluster {
    /// Spawns `count` replica threads.
    pub fn new(count: usize) -> Self {
        let mailboxes: Vec<Bag<Message>> = (0..count).map(|_| Bag::new()).collect();
        let shared = shared::Shared::new(mailboxes.clone());
        let replicas = mailboxes
            .into_iter()
            .enumerate()
            .map(|(id, mailbox)| {
                let shared = shared.clone();
                thread::spawn(move || replica::Replica::new(id, count, shared).run(mailbox))
            })
            .collect();
        Cluster {
            shared,
            registry: session::Registry::new(),
            replicas,
        }
    }

    /// Registers a client session and returns the channel the client
    /// pushes requests on. Submissions are broadcast to every replica;
    /// dequeue results arrive through `replies`.
    pub fn connect(&self, client: ClientId, replies: Sender<Reply>) -> Sender<Request> {
        let (requests_tx, requests_rx) = channel::fifo();
        self.registry.register(client, requests_tx.clone());

        let registry = self.registry.clone();
        let shared = self.shared.clone();
        let gateway = thread::spawn(move || {
            while let Some(request) = requests_rx.recv() {
                match request {
                | Request::Submit(operation) => {
                    trace!("gateway broadcasting {:?} from client {}", operation, client);
                    shared.read().broadcast(Message::Submit {
                        operation,
                        reply: replies.clone(),
                    });
                }
                | Request::Stop => {
                    if registry.stop(Request::Stop) {
                        shared.read().broadcast(Message::Stop);
                    }
                    break;
                }
                }
            }
        });
        self.registry.adopt(gateway);
        requests_tx
    }

    /// Waits for every gateway and replica thread to finish and returns
    /// each replica's final log and queue.
    pub fn join(self) -> Vec<Report> {
        self.registry.join();
        self.replicas
            .into_iter()
            .map(|replica| replica.join().expect("[INTERNAL ERROR]: replica panicked"))
            .collect()
    }
}
