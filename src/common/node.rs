//! Struct and implementation of the Node entry in the Kademlia routing table
use std::{
    fmt::{self, Debug, Formatter},
    hash::{Hash, Hasher},
    net::SocketAddrV4,
    time::{Duration, Instant},
};

use crate::common::Id;

/// The age of a node's last_seen time before it is considered stale.
pub const STALE_TIME: Duration = Duration::from_secs(15 * 60);

#[derive(Clone)]
/// Node entry in Kademlia routing table
pub struct Node {
    pub(crate) id: Id,
    pub(crate) address: SocketAddrV4,
    pub(crate) last_seen: Instant,
}

impl Debug for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("last_seen", &self.last_seen.elapsed().as_secs())
            .finish()
    }
}

impl Node {
    /// Creates a new Node from an id and socket address.
    pub fn new(id: Id, address: SocketAddrV4) -> Node {
        Node {
            id,
            address,
            last_seen: Instant::now(),
        }
    }

    /// Creates a node with random Id for testing purposes.
    pub fn random() -> Node {
        Node::new(Id::random(), SocketAddrV4::new(0.into(), 0))
    }

    #[cfg(test)]
    pub(crate) fn unique(i: usize) -> Node {
        Node::new(Id::random(), SocketAddrV4::new((i as u32).into(), i as u16))
    }

    // === Getters ===

    /// Returns the id of this node
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Returns the address of this node
    pub fn address(&self) -> SocketAddrV4 {
        self.address
    }

    /// Returns the last time this node was observed.
    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Node is last seen more than a threshold ago.
    pub fn is_stale(&self) -> bool {
        self.last_seen.elapsed() > STALE_TIME
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}
