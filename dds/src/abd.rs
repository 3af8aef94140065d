//! # Summary
//!
//! The ABD atomic-register protocol: linearizable read/write over N
//! replicas tolerating a minority of unresponsive ones, at a fixed cost
//! of two round trips per client operation. Replica-to-replica traffic
//! travels through unordered bag mailboxes; each connected client gets a
//! gateway thread running its own protocol coordinator.

/// Protocol messages and timestamps.
pub mod message;

/// Per-register versioned store.
pub mod replica;

/// Two-phase read/write driver.
pub mod coordinator;

use std::thread;

use crate::channel::{self, Bag, Sender};
use crate::message::{Reply, Request};
use crate::session;
use crate::shared;
use crate::ClientId;

pub use crate::abd::message::{Message, Timestamp};
pub use crate::abd::replica::Report;

/// A running group of ABD replicas plus its client sessions.
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
            .map(|(id, mailbox)| thread::spawn(move || replica::Replica::new(id, mailbox).run()))
            .collect();
        Cluster {
            shared,
            registry: session::Registry::new(),
            replicas,
        }
    }

    /// Registers a client session and returns the channel the client
    /// pushes requests on. Replies are delivered through `replies`.
    pub fn connect(&self, client: ClientId, replies: Sender<Reply>) -> Sender<Request> {
        let (requests_tx, requests_rx) = channel::fifo();
        self.registry.register(client, requests_tx.clone());

        let registry = self.registry.clone();
        let shared = self.shared.clone();
        let gateway = thread::spawn(move || {
            let mut coordinator = coordinator::Coordinator::new(client, shared.clone());
            while let Some(request) = requests_rx.recv() {
                match request {
                | Request::Write { register, value } => {
                    coordinator.write(&register, value);
                    replies.try_send(Reply::WriteAck);
                }
                | Request::Read { register } => {
                    let value = coordinator.read(&register);
                    replies.try_send(Reply::Value { register, value });
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
    /// each replica's final store.
    pub fn join(self) -> Vec<Report> {
        self.registry.join();
        self.replicas
            .into_iter()
            .map(|replica| replica.join().expect("[INTERNAL ERROR]: replica panicked"))
            .collect()
    }
}
