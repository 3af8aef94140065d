//! # Summary
//!
//! Majority math and the broadcast-and-collect primitive the ABD
//! coordinator is built on. Collection blocks on the coordinator's
//! response bag with no timeout: a minority of silent replicas is
//! tolerated, a majority hang stalls the operation indefinitely.

use hashbrown::HashSet as Set;
use log::trace;

use crate::channel::Bag;
use crate::ReplicaId;

/// Minimal replica subset whose agreement suffices for safe progress.
pub fn majority(count: usize) -> usize {
    count / 2 + 1
}

/// Blocks on `responses` until `quorum` correctly-typed replies from
/// distinct replicas have accumulated, and returns their payloads.
///
/// `admit` inspects one received message: `Some((sender, payload))`
/// accepts it, `None` discards it. Wrong-typed messages and late replies
/// from earlier operations are discarded this way, as are duplicate
/// replies from a replica that already counted towards the quorum.
pub fn collect<M, T, F>(responses: &Bag<M>, quorum: usize, mut admit: F) -> Vec<T>
where
    F: FnMut(M) -> Option<(ReplicaId, T)>,
{
    let mut replied: Set<ReplicaId> = Set::default();
    let mut payloads = Vec::with_capacity(quorum);
    while payloads.len() < quorum {
        match admit(responses.recv()) {
        | Some((sender, payload)) => {
            if replied.insert(sender) {
                payloads.push(payload);
            } else {
                trace!("discarding duplicate reply from replica {}", sender);
            }
        }
        | None => trace!("discarding stale or unexpected reply"),
        }
    }
    payloads
}
