//! A fast online cycle finder, based on Pearce et al: "Online Cycle
//! Detection and Difference Propagation for Pointer Analysis" (section
//! 3.2). It keeps a DAG in memory, built up incrementally, and can reject
//! (or merely test) edges that would create cycles. The amortized cost of
//! checking Θ(E) insertions is O(V).
//!
//! The algorithm keeps the vertices topologically sorted with respect to
//! the edges added so far. When inserting a new edge, only the vertices
//! stored between the two endpoints can need to move; a DFS over that
//! window both finds them and detects contradictions (cycles).
//!
//! When used from graph simplification, the vertices of this graph are
//! hyperedges (joins) of the join hypergraph, not its nodes, and the edges
//! are happens-before relations between joins.

/// Incremental topological DAG with cycle detection.
#[derive(Clone, Debug)]
pub struct OnlineCycleFinder {
    /// Vertices in topological order. Called i2n in the paper.
    order: Vec<usize>,

    /// For each vertex, its position in `order`. Called n2i in the paper.
    position_of_node: Vec<usize>,

    /// Whether each vertex was seen during the current search.
    visited: Vec<bool>,

    /// Scratch space for `move_all_marked`.
    to_shift: Vec<usize>,

    /// Added edges, keyed by from-vertex.
    edges: Vec<Vec<usize>>,
}

impl OnlineCycleFinder {
    pub fn new(num_vertices: usize) -> Self {
        Self {
            order: (0..num_vertices).collect(),
            position_of_node: (0..num_vertices).collect(),
            visited: vec![false; num_vertices],
            to_shift: Vec::new(),
            edges: vec![Vec::new(); num_vertices],
        }
    }

    /// Returns true iff adding the edge a → b would create a cycle.
    ///
    /// May reorder the internal topological order (consistently) even when
    /// it returns false.
    pub fn edge_would_create_cycle(&mut self, a_idx: usize, b_idx: usize) -> bool {
        debug_assert!(a_idx < self.order.len());
        debug_assert!(b_idx < self.order.len());
        if a_idx == b_idx {
            return true;
        }
        let pos_of_a = self.position_of_node[a_idx];
        let pos_of_b = self.position_of_node[b_idx];
        if pos_of_a < pos_of_b {
            // Already in the desired order; nothing to check.
            return false;
        }

        // B currently comes first, the opposite of what we want. See if B
        // may move to A's right by running a DFS from B. The DFS finds
        // everything that must stay after B (marking it visited), and
        // discovers whether A is reachable from B (a cycle). Vertices
        // after A are unaffected by the move and are cut off early.
        self.visited.fill(false);
        if self.depth_first_search(b_idx, pos_of_a + 1, a_idx) {
            return true;
        }

        // Everything seen during the DFS still needs to stay after B, so
        // it moves right together with B.
        self.move_all_marked(pos_of_b, pos_of_a + 1);
        false
    }

    /// Adds the edge a → b (a must come before b). Returns true iff this
    /// would create a cycle (in which case nothing is added).
    pub fn add_edge(&mut self, a_idx: usize, b_idx: usize) -> bool {
        if self.edge_would_create_cycle(a_idx, b_idx) {
            return true;
        }
        self.edges[a_idx].push(b_idx);
        false
    }

    /// Removes the edge a → b, which must have been added earlier.
    pub fn delete_edge(&mut self, a_idx: usize, b_idx: usize) {
        let edges = &mut self.edges[a_idx];
        let pos = edges
            .iter()
            .position(|&dest| dest == b_idx)
            .expect("deleting an edge that was never added");
        edges.swap_remove(pos);
    }

    /// A topological order respecting the added edges. Beyond that the
    /// order is arbitrary, and may change across
    /// [`edge_would_create_cycle`] calls.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    fn depth_first_search(
        &mut self,
        node_idx: usize,
        upper_bound: usize,
        node_idx_to_avoid: usize,
    ) -> bool {
        if node_idx == node_idx_to_avoid {
            // This vertex reaches A, so it must stay left of A; but the
            // search started from B, which needs to be right of B. Adding
            // A before B would thus be contradictory.
            return true;
        }
        if self.visited[node_idx] {
            return false;
        }
        if self.position_of_node[node_idx] >= upper_bound {
            // Comes after A already; moving B cannot affect it (and it
            // cannot reach A either).
            return false;
        }

        self.visited[node_idx] = true;
        // The edge list can grow only between searches, so indexing by
        // position is fine here.
        for i in 0..self.edges[node_idx].len() {
            let dest_node_idx = self.edges[node_idx][i];
            debug_assert!(
                self.position_of_node[dest_node_idx] > self.position_of_node[node_idx]
            );
            if self.depth_first_search(dest_node_idx, upper_bound, node_idx_to_avoid) {
                return true;
            }
        }
        false
    }

    fn move_all_marked(&mut self, start_pos: usize, new_pos: usize) {
        self.to_shift.clear();

        for i in start_pos..new_pos {
            let node_idx = self.order[i];
            if self.visited[node_idx] {
                // Needs to move right, after the window.
                self.to_shift.push(node_idx);
            } else {
                // Not involved; keep its relative position.
                self.place(node_idx, i - self.to_shift.len());
            }
        }

        for i in 0..self.to_shift.len() {
            let node_idx = self.to_shift[i];
            self.place(node_idx, new_pos + i - self.to_shift.len());
        }
    }

    fn place(&mut self, node_idx: usize, index_in_order: usize) {
        self.order[index_in_order] = node_idx;
        self.position_of_node[node_idx] = index_in_order;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_edges() {
        let mut cycles = OnlineCycleFinder::new(10);
        assert!(cycles.add_edge(5, 5));
        assert!(cycles.edge_would_create_cycle(5, 5));
    }

    #[test]
    fn simple() {
        let mut cycles = OnlineCycleFinder::new(10);
        assert!(!cycles.edge_would_create_cycle(3, 5));
        assert!(!cycles.edge_would_create_cycle(5, 3));
        assert!(!cycles.add_edge(3, 5));
        assert!(cycles.edge_would_create_cycle(5, 3));
    }

    #[test]
    fn inverse_order_is_fine() {
        let mut cycles = OnlineCycleFinder::new(10);
        assert!(!cycles.add_edge(5, 3));
        assert!(cycles.edge_would_create_cycle(3, 5));
    }

    #[test]
    fn transitive() {
        let mut cycles = OnlineCycleFinder::new(10);
        assert!(!cycles.add_edge(1, 3));
        assert!(!cycles.add_edge(3, 5));
        assert!(!cycles.add_edge(5, 6));
        assert!(!cycles.add_edge(5, 9));
        assert!(!cycles.edge_would_create_cycle(7, 1));
        assert!(cycles.edge_would_create_cycle(6, 1));
        assert!(cycles.edge_would_create_cycle(9, 1));
        assert!(!cycles.edge_would_create_cycle(1, 7));
        assert!(!cycles.edge_would_create_cycle(1, 5));
    }

    #[test]
    fn order_respects_added_edges() {
        let mut cycles = OnlineCycleFinder::new(6);
        assert!(!cycles.add_edge(4, 2));
        assert!(!cycles.add_edge(2, 0));
        assert!(!cycles.add_edge(5, 4));
        let order = cycles.order();
        let pos = |v: usize| order.iter().position(|&x| x == v).unwrap();
        assert!(pos(4) < pos(2));
        assert!(pos(2) < pos(0));
        assert!(pos(5) < pos(4));
    }

    #[test]
    fn delete_edge_reopens_order() {
        let mut cycles = OnlineCycleFinder::new(4);
        assert!(!cycles.add_edge(0, 1));
        assert!(cycles.edge_would_create_cycle(1, 0));
        cycles.delete_edge(0, 1);
        assert!(!cycles.edge_would_create_cycle(1, 0));
        assert!(!cycles.add_edge(1, 0));
    }
}
