//! # Summary
//!
//! The two storage-backed replication baselines. Randomized broadcast
//! forwards each client request to a uniformly random replica, which
//! applies writes locally, fans unacknowledged updates out to its peers,
//! and acks the client immediately: fast and weakly consistent. Chain
//! replication pipelines writes head-to-tail over ordered mailboxes,
//! with only the tail acknowledging the client, and serves reads from
//! the tail. Neither involves any quorum math.

use std::thread;

use hashbrown::HashMap as Map;
use log::{debug, trace, warn};
use rand::Rng;

use crate::channel::{self, Receiver, Sender};
use crate::message::{Reply, Request};
use crate::session;
use crate::shared;
use crate::storage::{MemoryStorage, Storage};
use crate::{ClientId, ReplicaId};

/// Which baseline a cluster runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Discipline {
    Broadcast,
    Chain,
}

/// Messages exchanged between the gateway and replicas, and along the
/// chain. Updates carry the client's reply handle only in the chain
/// variant, where the tail acknowledges on behalf of the whole chain.
#[derive(Clone, Debug)]
pub enum Message {
    Write {
        register: String,
        value: String,
        reply: Sender<Reply>,
    },
    Read {
        register: String,
        reply: Sender<Reply>,
    },
    Update {
        register: String,
        value: String,
        reply: Option<Sender<Reply>>,
    },
    Stop,
}

/// Final per-replica state returned on shutdown, for verification.
#[derive(Clone, Debug)]
pub struct Report {
    pub id: ReplicaId,
    pub store: Map<String, String>,
}

struct Replica {
    id: ReplicaId,
    count: usize,
    discipline: Discipline,
    shared: shared::Shared<Sender<Message>>,
    storage: MemoryStorage,
}

impl Replica {
    fn new(
        id: ReplicaId,
        count: usize,
        discipline: Discipline,
        shared: shared::Shared<Sender<Message>>,
    ) -> Self {
        debug!("replica {} initialized ({:?})", id, discipline);
        Replica {
            id,
            count,
            discipline,
            shared,
            storage: MemoryStorage::new(),
        }
    }

    fn is_head(&self) -> bool {
        self.id == 0
    }

    fn is_tail(&self) -> bool {
        self.id == self.count - 1
    }

    fn run(mut self, mailbox: Receiver<Message>) -> Report {
        while let Some(message) = mailbox.recv() {
            trace!("replica {} receiving {:?}", self.id, message);
            match message {
            | Message::Write { register, value, reply } => self.respond_write(register, value, reply),
            | Message::Read { register, reply } => self.respond_read(register, reply),
            | Message::Update { register, value, reply } => self.respond_update(register, value, reply),
            | Message::Stop => break,
            }
        }
        debug!("replica {} stopping", self.id);
        Report {
            id: self.id,
            store: self.storage.snapshot(),
        }
    }

    fn respond_write(&mut self, register: String, value: String, reply: Sender<Reply>) {
        match self.discipline {
        | Discipline::Broadcast => {
            debug!("replica {} writing {}={}", self.id, register, value);
            self.storage.write(&register, value.clone());
            let id = self.id;
            self.shared.read().narrowcast(
                (0..self.count).filter(move |peer| *peer != id),
                Message::Update { register, value, reply: None },
            );
            reply.try_send(Reply::WriteAck);
        }
        | Discipline::Chain => {
            if !self.is_head() {
                warn!("replica {} dropping misrouted write", self.id);
                return;
            }
            debug!("head writing {}={}", register, value);
            self.storage.write(&register, value.clone());
            if self.is_tail() {
                reply.try_send(Reply::WriteAck);
            } else {
                self.shared.read().send(
                    self.id + 1,
                    Message::Update { register, value, reply: Some(reply) },
                );
            }
        }
        }
    }

    fn respond_read(&mut self, register: String, reply: Sender<Reply>) {
        if self.discipline == Discipline::Chain && !self.is_tail() {
            warn!("replica {} dropping misrouted read", self.id);
            return;
        }
        let value = self.storage.read(&register);
        trace!("replica {} read {}={:?}", self.id, register, value);
        reply.try_send(Reply::Value { register, value });
    }

    fn respond_update(&mut self, register: String, value: String, reply: Option<Sender<Reply>>) {
        self.storage.write(&register, value.clone());
        match self.discipline {
        | Discipline::Broadcast => (),
        | Discipline::Chain => {
            if self.is_tail() {
                if let Some(reply) = reply {
                    debug!("tail acknowledging write of {}", register);
                    reply.try_send(Reply::WriteAck);
                }
            } else {
                self.shared.read().send(
                    self.id + 1,
                    Message::Update { register, value, reply },
                );
            }
        }
        }
    }
}

/// A running group of storage-backed replicas plus its client sessions.
pub struct Cluster {
    shared: shared::Shared<Sender<Message>>,
    registry: session::Registry<Request>,
    replicas: Vec<thread::JoinHandle<Report>>,
    discipline: Discipline,
    count: usize,
}

impl Cluster {
    /// Spawns `count` replica threads running the given discipline.
    /// Both variants use ordered mailboxes; the chain requires them.
    pub fn new(count: usize, discipline: Discipline) -> Self {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..count).map(|_| channel::fifo()).unzip();
        let shared = shared::Shared::new(senders);
        let replicas = receivers
            .into_iter()
            .enumerate()
            .map(|(id, mailbox)| {
                let shared = shared.clone();
                thread::spawn(move || {
                    Replica::new(id, count, discipline, shared).run(mailbox)
                })
            })
            .collect();
        Cluster {
            shared,
            registry: session::Registry::new(),
            replicas,
            discipline,
            count,
        }
    }

    /// Registers a client session and returns the channel the client
    /// pushes requests on. Writes route to a random replica or the
    /// head, reads to a random replica or the tail.
    pub fn connect(&self, client: ClientId, replies: Sender<Reply>) -> Sender<Request> {
        let (requests_tx, requests_rx) = channel::fifo();
        self.registry.register(client, requests_tx.clone());

        let registry = self.registry.clone();
        let shared = self.shared.clone();
        let discipline = self.discipline;
        let count = self.count;
        let gateway = thread::spawn(move || {
            while let Some(request) = requests_rx.recv() {
                if request.is_stop() {
                    if registry.stop(Request::Stop) {
                        shared.read().broadcast(Message::Stop);
                    }
                    break;
                }
                let target = match (&request, discipline) {
                | (Request::Write { .. }, Discipline::Chain) => 0,
                | (Request::Read { .. }, Discipline::Chain) => count - 1,
                | (_, _) => rand::thread_rng().gen_range(0..count),
                };
                trace!("gateway forwarding {:?} from client {} to replica {}", request, client, target);
                match request {
                | Request::Write { register, value } => shared.read().send(
                    target,
                    Message::Write { register, value, reply: replies.clone() },
                ),
                | Request::Read { register } => shared.read().send(
                    target,
                    Message::Read { register, reply: replies.clone() },
                ),
                | Request::Stop => (),
                }
            }
        });
        self.registry.adopt(gateway);
        requests_tx
    }

    /// Waits for every gateway and replica thread to finish and returns
    /// each replica's final storage map.
    pub fn join(self) -> Vec<Report> {
        self.registry.join();
        self.replicas
            .into_iter()
            .map(|replica| replica.join().expect("[INTERNAL ERROR]: replica panicked"))
            .collect()
    }
}
