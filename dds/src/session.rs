//! # Summary
//!
//! This module tracks the clients connected to a cluster. Each session
//! binds a client identity to an inbound/outbound channel pair and gets
//! its own gateway thread, which blocks on the inbound channel instead
//! of polling. Sessions live until shutdown; a stop request latches the
//! registry and is re-injected into every other session's inbound
//! channel so all gateway loops terminate.

use std::sync::Arc;
use std::thread;

use log::info;
use parking_lot::RwLock;

use crate::channel::Sender;
use crate::ClientId;

/// Registry of connected client sessions, shared by every gateway thread
/// of a cluster.
#[derive(Debug)]
pub struct Registry<Q>(Arc<RwLock<Inner<Q>>>);

#[derive(Debug)]
struct Inner<Q> {
    sessions: Vec<Session<Q>>,
    gateways: Vec<thread::JoinHandle<()>>,
    stopped: bool,
}

#[derive(Debug)]
struct Session<Q> {
    client: ClientId,
    requests: Sender<Q>,
}

impl<Q> Registry<Q> {
    pub fn new() -> Self {
        Registry(Arc::new(RwLock::new(Inner {
            sessions: Vec::new(),
            gateways: Vec::new(),
            stopped: false,
        })))
    }
}

impl<Q: Clone> Registry<Q> {
    /// Registers a session's inbound channel under the client's identity.
    pub fn register(&self, client: ClientId, requests: Sender<Q>) {
        info!("connection established with client {}", client);
        self.0.write().sessions.push(Session { client, requests });
    }

    /// Stores a gateway thread handle for `join`.
    pub fn adopt(&self, gateway: thread::JoinHandle<()>) {
        self.0.write().gateways.push(gateway);
    }

    /// Latches shutdown and re-injects `stop` into every session's
    /// inbound channel. Returns true only for the call that performed
    /// the shutdown; the system is not restartable afterwards.
    pub fn stop(&self, stop: Q) -> bool {
        let mut inner = self.0.write();
        if inner.stopped {
            return false;
        }
        inner.stopped = true;
        for session in &inner.sessions {
            session.requests.try_send(stop.clone());
        }
        true
    }

    /// Waits for every gateway thread to finish.
    pub fn join(&self) {
        let gateways = std::mem::take(&mut self.0.write().gateways);
        for gateway in gateways {
            gateway.join().expect("[INTERNAL ERROR]: gateway panicked");
        }
    }
}

impl<Q> Clone for Registry<Q> {
    fn clone(&self) -> Self {
        Registry(Arc::clone(&self.0))
    }
}

impl<Q> Default for Registry<Q> {
    fn default() -> Self {
        Registry::new()
    }
}
