//! Kademlia routing table with per-bucket replacement caches.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::slice::Iter;

use lru::LruCache;
use tracing::trace;

use crate::common::{ClosestNodes, Id, Node};

/// K = the default maximum size of a k-bucket.
pub const MAX_BUCKET_SIZE_K: usize = 20;

#[derive(Debug)]
/// Kademlia routing table
///
/// Buckets are indexed by the length of the prefix a node shares with the local [Id],
/// so every node has exactly one bucket it can live in.
pub struct RoutingTable {
    id: Id,
    k: usize,
    buckets: BTreeMap<u8, KBucket>,
    /// Owner id => preferred contact for content of that owner.
    connections: HashMap<String, Node>,
}

impl RoutingTable {
    /// Create a new [RoutingTable] with a given id and the default bucket size.
    pub fn new(id: Id) -> Self {
        Self::with_k(id, MAX_BUCKET_SIZE_K)
    }

    /// Create a new [RoutingTable] with a given id and bucket size `k`.
    pub fn with_k(id: Id, k: usize) -> Self {
        RoutingTable {
            id,
            k: k.max(1),
            buckets: BTreeMap::new(),
            connections: HashMap::new(),
        }
    }

    // === Getters ===

    /// Returns the [Id] of this node, where the distance is measured from.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Returns the maximum size of each bucket.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Returns the map of shared prefix lengths (depths) and their [KBucket]
    pub fn buckets(&self) -> &BTreeMap<u8, KBucket> {
        &self.buckets
    }

    // === Public Methods ===

    /// Insert or refresh a node, returns `true` if it is in the live set afterwards.
    ///
    /// If the node's bucket is full, the node is kept in that bucket's
    /// replacement cache instead.
    pub fn insert(&mut self, node: Node) -> bool {
        if node.id == self.id {
            // Do not add self to the routing_table
            return false;
        }

        let depth = self.id.shared_prefix_len(&node.id);
        let k = self.k;

        self.buckets
            .entry(depth)
            .or_insert_with(|| KBucket::new(depth, k))
            .insert(node)
    }

    /// Remove an unresponsive node from this routing table.
    ///
    /// The most recently seen node from the bucket's replacement cache takes its place.
    /// Returns `true` if the node was in a live set.
    pub fn remove(&mut self, node_id: &Id) -> bool {
        let depth = self.id.shared_prefix_len(node_id);

        match self.buckets.get_mut(&depth) {
            Some(bucket) => bucket.remove(node_id),
            None => false,
        }
    }

    /// Returns `true` if the node is in a live set of this table.
    pub fn contains(&self, node_id: &Id) -> bool {
        let depth = self.id.shared_prefix_len(node_id);

        self.buckets
            .get(&depth)
            .map(|bucket| bucket.contains(node_id))
            .unwrap_or(false)
    }

    /// Return up to `n` nodes, sorted by ascending XOR distance to the target.
    pub fn closest(&self, target: &Id, n: usize) -> Vec<Node> {
        let mut closest = ClosestNodes::new(*target);

        for node in self.nodes() {
            closest.add(node.clone());
        }

        closest.truncate(n);
        closest.into_iter().collect()
    }

    /// Returns `true` if this routing table is empty.
    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(|bucket| bucket.is_empty())
    }

    /// Return the number of nodes in the live sets of this routing table.
    pub fn size(&self) -> usize {
        self.buckets
            .values()
            .fold(0, |acc, bucket| acc + bucket.nodes.len())
    }

    /// Returns an iterator over the live nodes in this routing table.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.buckets.values().flat_map(|bucket| bucket.iter())
    }

    /// Turn this routing table to a list of bootstrapping nodes.
    pub fn to_bootstrap(&self) -> Vec<String> {
        self.nodes()
            .filter(|n| !n.is_stale())
            .map(|n| n.address().to_string())
            .collect()
    }

    // === Connections ===

    /// Remember the preferred contact for content owned by `owner_id`.
    pub fn insert_connection(&mut self, owner_id: impl Into<String>, node: Node) {
        let owner_id = owner_id.into();
        trace!(?owner_id, ?node, "Insert connection");

        self.connections.insert(owner_id, node);
    }

    /// Returns the preferred contact for content owned by `owner_id`, if known.
    pub fn connection(&self, owner_id: &str) -> Option<&Node> {
        self.connections.get(owner_id)
    }

    /// Forget the preferred contact of `owner_id`.
    pub fn remove_connection(&mut self, owner_id: &str) -> Option<Node> {
        self.connections.remove(owner_id)
    }
}

/// Kbuckets are similar to LRU caches that evict unresponsive nodes,
/// without dropping any responsive nodes in the process.
#[derive(Debug)]
pub struct KBucket {
    depth: u8,
    k: usize,
    /// Nodes in the k-bucket, sorted by the least recently seen.
    nodes: Vec<Node>,
    /// Nodes waiting for a slot in [Self::nodes], evicting the least recently seen.
    replacement_cache: LruCache<Id, Node>,
}

impl KBucket {
    pub fn new(depth: u8, k: usize) -> Self {
        KBucket {
            depth,
            k,
            nodes: Vec::with_capacity(k),
            replacement_cache: LruCache::new(NonZeroUsize::new(k).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    // === Getters ===

    /// The length of the prefix nodes in this bucket share with the local [Id].
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Number of nodes in the replacement cache.
    pub fn cached_len(&self) -> usize {
        self.replacement_cache.len()
    }

    // === Public Methods ===

    /// Insert or refresh a node, returns `true` if it is in the live set afterwards.
    pub fn insert(&mut self, incoming: Node) -> bool {
        if let Some(index) = self.iter().position(|n| n.id == incoming.id) {
            // Move it to the end, updating its address and last_seen.
            self.nodes.remove(index);
            self.nodes.push(incoming);

            true
        } else if self.nodes.len() < self.k {
            self.replacement_cache.pop(&incoming.id);
            self.nodes.push(incoming);

            true
        } else {
            // Full, so keep it as a replacement. Re-observing a cached node
            // makes it the most recently seen.
            self.replacement_cache.put(incoming.id, incoming);

            false
        }
    }

    /// Remove a node from this bucket, promoting the most recently seen node in the
    /// replacement cache into the freed slot.
    ///
    /// Returns `true` if the node was in the live set.
    pub fn remove(&mut self, node_id: &Id) -> bool {
        let Some(index) = self.iter().position(|n| &n.id == node_id) else {
            self.replacement_cache.pop(node_id);
            return false;
        };

        self.nodes.remove(index);

        let most_recent = self.replacement_cache.iter().next().map(|(id, _)| *id);

        if let Some(replacement) = most_recent.and_then(|id| self.replacement_cache.pop(&id)) {
            trace!(removed = ?node_id, ?replacement, "Promote replacement node");
            self.nodes.push(replacement);
        }

        true
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn iter(&self) -> Iter<'_, Node> {
        self.nodes.iter()
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.iter().any(|node| &node.id == id)
    }

    #[cfg(test)]
    fn cache_contains(&self, id: &Id) -> bool {
        self.replacement_cache.contains(id)
    }
}

#[cfg(test)]
mod test {
    use std::net::SocketAddrV4;
    use std::str::FromStr;

    use super::*;

    #[test]
    fn table_is_empty() {
        let mut table = RoutingTable::new(Id::random());
        assert!(table.is_empty());

        table.insert(Node::random());
        assert!(!table.is_empty());
    }

    #[test]
    fn to_vec() {
        let mut table = RoutingTable::new(Id::random());

        let mut expected_nodes: Vec<Node> = vec![];

        for i in 0..MAX_BUCKET_SIZE_K {
            expected_nodes.push(Node::unique(i));
        }

        for node in &expected_nodes {
            table.insert(node.clone());
        }

        let mut sorted_table = table.nodes().cloned().collect::<Vec<_>>();
        sorted_table.sort_by(|a, b| a.id().cmp(b.id()));

        let mut sorted_expected = expected_nodes.to_vec();
        sorted_expected.sort_by(|a, b| a.id().cmp(b.id()));

        assert_eq!(sorted_table, sorted_expected);
    }

    #[test]
    fn contains() {
        let mut table = RoutingTable::new(Id::random());

        let node = Node::random();

        assert!(!table.contains(node.id()));

        table.insert(node.clone());
        assert!(table.contains(node.id()));
    }

    #[test]
    fn remove() {
        let mut table = RoutingTable::new(Id::random());

        let node = Node::random();

        table.insert(node.clone());
        assert!(table.contains(node.id()));

        assert!(table.remove(node.id()));
        assert!(!table.contains(node.id()));
        assert!(!table.remove(node.id()));
    }

    #[test]
    fn buckets_are_sets() {
        let mut table = RoutingTable::new(Id::random());

        let node1 = Node::random();
        let node2 = Node::new(*node1.id(), node1.address());

        table.insert(node1);
        table.insert(node2);

        assert_eq!(table.size(), 1);
    }

    #[test]
    fn should_not_add_self() {
        let mut table = RoutingTable::new(Id::random());
        let node = Node::new(*table.id(), SocketAddrV4::new(0.into(), 0));

        assert!(!table.insert(node));
        assert!(table.is_empty())
    }

    #[test]
    fn bucket_is_chosen_by_shared_prefix() {
        let local = Id::from([0; 20]);
        let mut table = RoutingTable::new(local);

        let mut far = [0; 20];
        far[0] = 0b1000_0000;
        let mut near = [0; 20];
        near[1] = 0b0000_0001;

        table.insert(Node::new(far.into(), SocketAddrV4::new(0.into(), 1)));
        table.insert(Node::new(near.into(), SocketAddrV4::new(0.into(), 2)));

        let depths = table.buckets().keys().copied().collect::<Vec<_>>();
        assert_eq!(depths, vec![0, 15]);
        assert!(table.buckets().values().all(|b| b.len() == 1));
    }

    #[test]
    fn full_bucket_fills_replacement_cache() {
        let mut bucket = KBucket::new(0, 3);

        for i in 0..3 {
            assert!(bucket.insert(Node::random()), "Failed to add node {i}");
        }

        for _ in 0..5 {
            assert!(!bucket.insert(Node::random()));
        }

        assert_eq!(bucket.len(), 3);
        assert_eq!(bucket.cached_len(), 3);
    }

    #[test]
    fn remove_promotes_most_recently_seen_replacement() {
        let mut bucket = KBucket::new(0, 2);

        let live = [Node::random(), Node::random()];
        for node in &live {
            bucket.insert(node.clone());
        }

        let older = Node::random();
        let newer = Node::random();
        bucket.insert(older.clone());
        bucket.insert(newer.clone());

        assert!(bucket.remove(live[0].id()));

        assert_eq!(bucket.len(), 2);
        assert!(bucket.contains(newer.id()));
        assert!(!bucket.cache_contains(newer.id()));
        assert!(bucket.cache_contains(older.id()));

        // Re-observing a cached node makes it the most recent.
        let extra = Node::random();
        bucket.insert(extra.clone());
        bucket.insert(older.clone());

        assert!(bucket.remove(live[1].id()));
        assert!(bucket.contains(older.id()));
        assert!(bucket.cache_contains(extra.id()));
    }

    #[test]
    fn remove_without_replacement_shrinks() {
        let mut bucket = KBucket::new(0, 2);

        let node = Node::random();
        bucket.insert(node.clone());
        bucket.insert(Node::random());

        assert!(bucket.remove(node.id()));
        assert_eq!(bucket.len(), 1);
    }

    #[test]
    fn remove_cached_node() {
        let mut bucket = KBucket::new(0, 1);

        bucket.insert(Node::random());
        let cached = Node::random();
        bucket.insert(cached.clone());

        assert!(!bucket.remove(cached.id()));
        assert_eq!(bucket.cached_len(), 0);
        assert_eq!(bucket.len(), 1);
    }

    #[test]
    fn should_update_existing_node() {
        let mut bucket = KBucket::new(0, MAX_BUCKET_SIZE_K);

        let node1 = Node::random();
        let node2 = Node::new(*node1.id(), SocketAddrV4::new(*node1.address().ip(), 1));

        bucket.insert(node1.clone());
        bucket.insert(Node::random());

        assert_ne!(bucket.nodes[1].id(), node1.id());

        bucket.insert(node2.clone());

        assert_eq!(bucket.nodes.len(), 2);
        assert_eq!(bucket.nodes[1].id(), node1.id());
        assert_eq!(bucket.nodes[1].address(), node2.address());
    }

    #[test]
    fn connections() {
        let mut table = RoutingTable::new(Id::random());
        let node = Node::random();

        assert!(table.connection("alice").is_none());

        table.insert_connection("alice", node.clone());
        assert_eq!(table.connection("alice"), Some(&node));

        assert_eq!(table.remove_connection("alice"), Some(node));
        assert!(table.connection("alice").is_none());
    }

    #[test]
    fn closest() {
        let ids = [
            "fb449c17f6c34fadea26a5a83e1952e815e001ea",
            "e63b72f95aacee40ad087f83afb475645739f669",
            "58c65677e3833cb0f15733a6363cc4cb1352f90a",
            "fd042ff1404b495720ad8345404ff5f25acd02a8",
            "dbed34a2c8db568fe59c10adcca9e81825b3dcfd",
            "079d40b746b5721f59972ebde423429739844914",
            "094f1d2fb4b95ba2c3250b014a9f06d13cd9eb9a",
            "98805a55523458c56d59339266bdcecc82370ecd",
            "0a1d6cce47c60f2c7357e9fec2910192de6eb336",
            "fb689ce0e18c2c22f316976d3ae524aed4137773",
            "0d01c32b4cf386b0b784b718b999d0e9dac07876",
            "9465e80d80f707b222c4ae6ee81c02b62f607629",
            "6cdc012328cc7a3a9a5b967e93387686e19c9f75",
            "99719dfc220b145e2aac71d6b3e276731d85be1c",
            "94d2037bbc534a5f1d672ce3e3350576c2b78ed1",
            "b48d0aeb94cd3766f23d2ac098bbccf01485dc20",
        ];

        let local_id = Id::from_str("ba3042eb2d373b19e7c411ce6826e31b37be0b2e").unwrap();
        let mut table = RoutingTable::new(local_id);

        for (i, str) in ids.iter().enumerate() {
            let id = Id::from_str(str).unwrap();
            table.insert(Node::new(id, SocketAddrV4::new((i as u32).into(), i as u16)));
        }

        let target = Id::from_str("d1406a3d3a8354d566f21dba8bd06c537cde2a20").unwrap();
        let closest = table.closest(&target, 4);

        let closest_ids: Vec<String> = closest.iter().map(|n| n.id().to_string()).collect();

        assert_eq!(
            closest_ids,
            vec![
                "dbed34a2c8db568fe59c10adcca9e81825b3dcfd",
                "fb449c17f6c34fadea26a5a83e1952e815e001ea",
                "fb689ce0e18c2c22f316976d3ae524aed4137773",
                "fd042ff1404b495720ad8345404ff5f25acd02a8",
            ]
        );

        let all = table.closest(&target, 100);
        assert_eq!(all.len(), ids.len());
        assert!(all
            .windows(2)
            .all(|pair| pair[0].id().xor(&target) < pair[1].id().xor(&target)));
    }
}
