//! # Summary
//!
//! This module abstracts over the two mailbox disciplines in the system.
//!
//! The ordered channel is a thin wrapper around `crossbeam_channel`:
//! unbounded, so sends never block, while receives block on an empty
//! channel. It carries all client traffic and the chain pipeline.
//!
//! The unordered channel is a multiset guarded by a lock: receiving
//! removes a uniformly random element, so delivery order says nothing
//! about send order. It models network reordering and carries all
//! replica-to-replica traffic in the quorum protocols.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rand::Rng;

/// Ordered transmission channel. All clones send to the same receiving end.
pub struct Sender<T>(crossbeam_channel::Sender<T>);

/// Ordered receiving channel.
pub struct Receiver<T>(crossbeam_channel::Receiver<T>);

/// Create a new pair of linked ordered channels.
pub fn fifo<T>() -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (Sender(tx), Receiver(rx))
}

impl<T> Sender<T> {
    /// Force a message through the channel.
    /// Panics if the receiving end has been dropped.
    pub fn send(&self, message: T) {
        self.0.send(message).ok()
            .expect("[INTERNAL ERROR]: receiver dropped");
    }

    /// Attempt to send a message through the channel.
    /// Does nothing if the receiving end has been dropped.
    pub fn try_send(&self, message: T) {
        self.0.send(message).ok();
    }
}

impl<T> Receiver<T> {
    /// Block until a message arrives. Returns `None` once every
    /// sending end has been dropped and the channel is drained.
    pub fn recv(&self) -> Option<T> {
        self.0.recv().ok()
    }

    /// Take a message if one is immediately available.
    pub fn try_recv(&self) -> Option<T> {
        self.0.try_recv().ok()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Sender(self.0.clone())
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Sender")
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Receiver")
    }
}

/// Unordered multiset channel. Clones are handles to the same multiset,
/// usable for both sending and receiving.
pub struct Bag<T>(Arc<Inner<T>>);

struct Inner<T> {
    items: Mutex<Vec<T>>,
    available: Condvar,
}

impl<T> Bag<T> {
    pub fn new() -> Self {
        Bag(Arc::new(Inner {
            items: Mutex::new(Vec::new()),
            available: Condvar::new(),
        }))
    }

    /// Add a message to the multiset. Never blocks.
    pub fn send(&self, message: T) {
        let mut items = self.0.items.lock();
        items.push(message);
        self.0.available.notify_one();
    }

    /// Block until the multiset is non-empty, then remove and return
    /// one uniformly chosen element.
    pub fn recv(&self) -> T {
        let mut items = self.0.items.lock();
        while items.is_empty() {
            self.0.available.wait(&mut items);
        }
        let index = rand::thread_rng().gen_range(0..items.len());
        items.swap_remove(index)
    }

    /// Remove and return one uniformly chosen element, if any is present.
    pub fn try_recv(&self) -> Option<T> {
        let mut items = self.0.items.lock();
        if items.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..items.len());
        Some(items.swap_remove(index))
    }

    pub fn is_empty(&self) -> bool {
        self.0.items.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.items.lock().len()
    }
}

impl<T> Default for Bag<T> {
    fn default() -> Self {
        Bag::new()
    }
}

impl<T> Clone for Bag<T> {
    fn clone(&self) -> Self {
        Bag(Arc::clone(&self.0))
    }
}

impl<T> fmt::Debug for Bag<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Bag")
    }
}

/// Sending side of a replica mailbox. The forwarding hub is generic over
/// this trait so the chain pipeline can run over ordered mailboxes while
/// the quorum protocols run over unordered ones.
pub trait Outbound: Clone + Send + 'static {
    type Message;
    fn post(&self, message: Self::Message);
}

impl<T: Send + 'static> Outbound for Sender<T> {
    type Message = T;
    fn post(&self, message: T) {
        // A stopped replica has dropped its receiving end; messages
        // addressed to it after shutdown are dropped on the floor.
        self.try_send(message);
    }
}

impl<T: Send + 'static> Outbound for Bag<T> {
    type Message = T;
    fn post(&self, message: T) {
        self.send(message);
    }
}
