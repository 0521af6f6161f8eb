use hyperjoin_common::bitset::{
    bits_set_in, find_lowest_bit_set, is_single_bit_set, NodeMap,
};

/// A node (relation) in the join hypergraph.
///
/// The edges that touch a node are split into simple edges (one node on
/// each side) and complex edges (all others), because all simple edges can
/// often be discarded at once by testing the set of interesting nodes
/// against the `simple_neighborhood` bitmap.
///
/// Edges are stored as if they were directed, even though the hypergraph is
/// fundamentally undirected: a (u, v) edge is duplicated internally as
/// (v, u), and the copy posted in a node's edge list is the one where the
/// node itself is on the left side. This removes a branch from every edge
/// test in the enumeration hot loops.
#[derive(Clone, Debug, Default)]
pub struct Node {
    pub complex_edges: Vec<usize>,
    pub simple_edges: Vec<usize>,

    /// All nodes on the "right" side of an edge in `simple_edges`.
    pub simple_neighborhood: NodeMap,
}

/// The endpoints (hypernodes) of a hyperedge. `left` and `right` may not
/// overlap, and both must have at least one bit set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Hyperedge {
    pub left: NodeMap,
    pub right: NodeMap,
}

/// An undirected join hypergraph. At most 63 nodes are supported, one bit
/// per node in a [`NodeMap`].
#[derive(Clone, Debug, Default)]
pub struct Hypergraph {
    pub nodes: Vec<Node>,
    /// Each logical edge k is stored twice, at indexes 2k and 2k+1, with
    /// sides swapped. Callers refer to the logical edge by k.
    pub edges: Vec<Hyperedge>,
}

impl Hypergraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a node with empty adjacency lists.
    pub fn add_node(&mut self) {
        self.nodes.push(Node::default());
    }

    /// Appends the logical edge (left, right), storing both directed
    /// copies and updating the endpoint adjacency lists.
    pub fn add_edge(&mut self, left: NodeMap, right: NodeMap) {
        assert!(left != 0);
        assert!(right != 0);
        assert_eq!(left & right, 0);
        self.edges.push(Hyperedge { left, right });
        self.edges.push(Hyperedge { left: right, right: left });

        let left_first_idx = self.edges.len() - 2;
        let right_first_idx = self.edges.len() - 1;
        self.attach_edge(left_first_idx, right_first_idx, left, right);
    }

    /// Replaces the endpoints of an existing logical edge in place. Used by
    /// graph simplification when widening an edge to force a join order.
    /// `edge_first_idx` is the index of the edge's first directed copy
    /// (i.e. 2k for logical edge k).
    pub fn modify_edge(&mut self, edge_first_idx: usize, new_left: NodeMap, new_right: NodeMap) {
        assert_eq!(edge_first_idx % 2, 0);
        assert!(new_left != 0);
        assert!(new_right != 0);
        assert_eq!(new_left & new_right, 0);

        self.detach_edge(edge_first_idx);
        self.edges[edge_first_idx] = Hyperedge { left: new_left, right: new_right };
        self.edges[edge_first_idx + 1] = Hyperedge { left: new_right, right: new_left };
        self.attach_edge(edge_first_idx, edge_first_idx + 1, new_left, new_right);
    }

    fn attach_edge(
        &mut self,
        left_first_idx: usize,
        right_first_idx: usize,
        left: NodeMap,
        right: NodeMap,
    ) {
        if is_single_bit_set(left) && is_single_bit_set(right) {
            let left_node = find_lowest_bit_set(left);
            let right_node = find_lowest_bit_set(right);

            self.nodes[left_node].simple_neighborhood |= right;
            self.nodes[right_node].simple_neighborhood |= left;
            self.nodes[left_node].simple_edges.push(left_first_idx);
            self.nodes[right_node].simple_edges.push(right_first_idx);
        } else {
            for left_node in bits_set_in(left) {
                debug_assert!(left_node < self.nodes.len());
                self.nodes[left_node].complex_edges.push(left_first_idx);
            }
            for right_node in bits_set_in(right) {
                debug_assert!(right_node < self.nodes.len());
                self.nodes[right_node].complex_edges.push(right_first_idx);
            }
        }
    }

    fn detach_edge(&mut self, edge_first_idx: usize) {
        let old = self.edges[edge_first_idx];
        if is_single_bit_set(old.left) && is_single_bit_set(old.right) {
            let left_node = find_lowest_bit_set(old.left);
            let right_node = find_lowest_bit_set(old.right);
            self.nodes[left_node]
                .simple_edges
                .retain(|&e| e != edge_first_idx);
            self.nodes[right_node]
                .simple_edges
                .retain(|&e| e != edge_first_idx + 1);
            self.rebuild_simple_neighborhood(left_node);
            self.rebuild_simple_neighborhood(right_node);
        } else {
            for node in bits_set_in(old.left | old.right) {
                self.nodes[node]
                    .complex_edges
                    .retain(|&e| e != edge_first_idx && e != edge_first_idx + 1);
            }
        }
    }

    fn rebuild_simple_neighborhood(&mut self, node_idx: usize) {
        let mut neighborhood = 0;
        for &edge_idx in &self.nodes[node_idx].simple_edges {
            neighborhood |= self.edges[edge_idx].right;
        }
        self.nodes[node_idx].simple_neighborhood = neighborhood;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_edge_updates_both_endpoints() {
        let mut g = Hypergraph::new();
        g.add_node();
        g.add_node();
        g.add_edge(0b01, 0b10);

        assert_eq!(g.edges.len(), 2);
        assert_eq!(g.edges[0], Hyperedge { left: 0b01, right: 0b10 });
        assert_eq!(g.edges[1], Hyperedge { left: 0b10, right: 0b01 });
        assert_eq!(g.nodes[0].simple_neighborhood, 0b10);
        assert_eq!(g.nodes[1].simple_neighborhood, 0b01);
        assert_eq!(g.nodes[0].simple_edges, vec![0]);
        assert_eq!(g.nodes[1].simple_edges, vec![1]);
        assert!(g.nodes[0].complex_edges.is_empty());
    }

    #[test]
    fn complex_edge_is_posted_on_every_member_node() {
        let mut g = Hypergraph::new();
        for _ in 0..3 {
            g.add_node();
        }
        g.add_edge(0b011, 0b100);

        assert_eq!(g.nodes[0].complex_edges, vec![0]);
        assert_eq!(g.nodes[1].complex_edges, vec![0]);
        assert_eq!(g.nodes[2].complex_edges, vec![1]);
        assert_eq!(g.nodes[0].simple_neighborhood, 0);
        assert!(g.nodes[0].simple_edges.is_empty());
    }

    #[test]
    fn modify_edge_moves_simple_edge_to_complex_lists() {
        // Star: t1-t2, t1-t3, t1-t4; then widen t1-t2 to {t1,t4}-t2.
        let mut g = Hypergraph::new();
        for _ in 0..4 {
            g.add_node();
        }
        g.add_edge(0b1, 0b10);
        g.add_edge(0b1, 0b100);
        g.add_edge(0b1, 0b1000);

        g.modify_edge(0, 0b1001, 0b10);

        assert_eq!(g.edges[0], Hyperedge { left: 0b1001, right: 0b10 });
        assert_eq!(g.edges[1], Hyperedge { left: 0b10, right: 0b1001 });
        assert_eq!(g.nodes[0].simple_neighborhood, 0b1100);
        assert_eq!(g.nodes[1].simple_neighborhood, 0b0000);
        let mut simple = g.nodes[0].simple_edges.clone();
        simple.sort_unstable();
        assert_eq!(simple, vec![2, 4]);
        assert_eq!(g.nodes[0].complex_edges, vec![0]);
        assert!(g.nodes[1].simple_edges.is_empty());
        assert_eq!(g.nodes[1].complex_edges, vec![1]);
        assert_eq!(g.nodes[3].complex_edges, vec![0]);
    }
}
