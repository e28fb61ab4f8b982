use std::vec::IntoIter;

use crate::common::{Id, Node};

#[derive(Debug, Clone)]
/// Nodes sorted by ascending XOR distance to a target, without duplicates.
pub struct ClosestNodes {
    target: Id,
    nodes: Vec<Node>,
}

impl ClosestNodes {
    pub fn new(target: Id) -> Self {
        Self {
            target,
            nodes: Vec::with_capacity(200),
        }
    }

    // === Getters ===

    pub fn target(&self) -> Id {
        self.target
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // === Public Methods ===

    /// Insert a node at its position, ignoring it if its Id is already present.
    pub fn add(&mut self, node: Node) {
        let seek = node.id.xor(&self.target);

        // Equal Ids have equal distances, so a duplicate always lands on `Ok`.
        if let Err(pos) = self
            .nodes
            .binary_search_by(|probe| probe.id.xor(&self.target).cmp(&seek))
        {
            self.nodes.insert(pos, node)
        }
    }

    /// Keep only the `n` closest nodes.
    pub fn truncate(&mut self, n: usize) {
        self.nodes.truncate(n)
    }
}

impl IntoIterator for ClosestNodes {
    type Item = Node;
    type IntoIter = IntoIter<Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.into_iter()
    }
}

impl<'a> IntoIterator for &'a ClosestNodes {
    type Item = &'a Node;
    type IntoIter = std::slice::Iter<'a, Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add() {
        let target = Id::random();

        let mut closest_nodes = ClosestNodes::new(target);

        for _ in 0..10 {
            let node = Node::random();
            closest_nodes.add(node.clone());
            closest_nodes.add(node);
        }

        assert_eq!(closest_nodes.nodes().len(), 10);

        let distances = closest_nodes
            .nodes()
            .iter()
            .map(|n| n.id.xor(&target))
            .collect::<Vec<_>>();

        let mut sorted = distances.clone();
        sorted.sort();

        assert_eq!(sorted, distances);
    }

    #[test]
    fn truncate() {
        let target = Id::random();
        let mut closest_nodes = ClosestNodes::new(target);

        for _ in 0..10 {
            closest_nodes.add(Node::random());
        }

        let first = closest_nodes.nodes()[0].clone();
        closest_nodes.truncate(3);

        assert_eq!(closest_nodes.len(), 3);
        assert_eq!(closest_nodes.nodes()[0], first);
    }
}
