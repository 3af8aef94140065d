//! # Summary
//!
//! A teaching substrate for replicated-data-store consistency
//! algorithms. Three replication disciplines run over a common
//! asynchronous-messaging fabric of in-memory mailboxes:
//!
//! - [`chain`]: randomized broadcast and chain replication over a
//!   trivial single-key storage backend, the weakly consistent
//!   baselines.
//! - [`abd`]: the ABD atomic-register protocol, giving linearizable
//!   read/write despite unordered delivery and minority failure.
//! - [`paxos`]: a Multi-Paxos replicated log driving a queue, giving
//!   total-order agreement despite competing leaders.
//!
//! Every replica, session gateway, and client runs on its own OS
//! thread; the only coordination across them is message passing.

/// Ordered and unordered mailboxes.
pub mod channel;

/// Client-facing request/reply schema.
pub mod message;

/// Majority math and quorum reply collection.
pub mod quorum;

/// Single-key storage backend.
pub mod storage;

/// Randomized-broadcast and chain replication.
pub mod chain;

/// ABD atomic registers.
pub mod abd;

/// Multi-Paxos replicated queue.
pub mod paxos;

/// Forwarding hub over replica mailboxes.
pub mod shared;

mod session;

pub use crate::message::{Reply, Request};

/// Unique replica identity within one cluster.
pub type ReplicaId = usize;

/// Unique client identity within one cluster.
pub type ClientId = usize;
