//! # Summary
//!
//! This module implements a central hub for replica-bound message
//! forwarding. We wrap the central `State` type with `Arc<RwLock<T>>`
//! to share the mailbox table between concurrently running threads.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::channel::Outbound;
use crate::ReplicaId;

/// Thread-safe wrapper around the `State` forwarding hub.
#[derive(Debug)]
pub struct Shared<O: Outbound>(Arc<RwLock<State<O>>>);

impl<O: Outbound> Shared<O> {
    /// Initializes a forwarding hub over the provided replica mailboxes.
    pub fn new(mailboxes: Vec<O>) -> Self {
        Shared(Arc::new(RwLock::new(State { mailboxes })))
    }

    /// Acquires a read lock on the underlying state.
    pub fn read(&self) -> RwLockReadGuard<State<O>> {
        self.0.read()
    }

    /// Acquires a write lock on the underlying state.
    pub fn write(&self) -> RwLockWriteGuard<State<O>> {
        self.0.write()
    }
}

impl<O: Outbound> Clone for Shared<O> {
    fn clone(&self) -> Self {
        Shared(Arc::clone(&self.0))
    }
}

/// Table of replica mailboxes, indexed by replica id.
#[derive(Debug)]
pub struct State<O: Outbound> {
    mailboxes: Vec<O>,
}

impl<O: Outbound> State<O> {
    /// Number of replicas addressed by this hub.
    pub fn count(&self) -> usize {
        self.mailboxes.len()
    }

    /// Forwards a message to the mailbox of replica `id`.
    pub fn send(&self, id: ReplicaId, message: O::Message) {
        self.mailboxes
            .get(id)
            .expect("[INTERNAL ERROR]: unknown replica id")
            .post(message);
    }
}

impl<O: Outbound> State<O>
where
    O::Message: Clone,
{
    /// Forwards a message to every replica mailbox.
    pub fn broadcast(&self, message: O::Message) {
        for mailbox in &self.mailboxes {
            mailbox.post(message.clone());
        }
    }

    /// Forwards a message to the provided list of replicas.
    pub fn narrowcast<I>(&self, ids: I, message: O::Message)
    where
        I: IntoIterator<Item = ReplicaId>,
    {
        for id in ids.into_iter() {
            self.send(id, message.clone());
        }
    }
}
