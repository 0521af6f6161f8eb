use hyperjoin_common::bitset::{table_bitmap, NodeMap};
use hyperjoin_hypergraph::Receiver;
use rustc_hash::FxHashSet;

use crate::make_graph::{passes_conflict_rules, JoinHypergraph};
use crate::relational_expression::ExprArena;

/// A minimal DPhyp receiver: tracks which subgraphs it has seen (the
/// algorithm needs that for connectedness testing), counts csg-cmp pairs,
/// and aborts once a limit is reached.
///
/// Used for cheaply testing whether a graph's subgraph-pair count is
/// below a limit (see graph simplification), and from tests.
pub struct TrivialReceiver<'a> {
    seen_subgraphs: FxHashSet<NodeMap>,
    graph: &'a JoinHypergraph,
    exprs: &'a ExprArena,
    /// `None` means unlimited.
    subgraph_pair_limit: Option<usize>,

    pub seen_nodes: usize,
    pub seen_subgraph_pairs: usize,
}

impl<'a> TrivialReceiver<'a> {
    pub fn new(
        graph: &'a JoinHypergraph,
        exprs: &'a ExprArena,
        subgraph_pair_limit: Option<usize>,
    ) -> Self {
        Self {
            seen_subgraphs: FxHashSet::default(),
            graph,
            exprs,
            subgraph_pair_limit,
            seen_nodes: 0,
            seen_subgraph_pairs: 0,
        }
    }
}

impl Receiver for TrivialReceiver<'_> {
    fn found_single_node(&mut self, node_idx: usize) -> bool {
        self.seen_nodes += 1;
        self.seen_subgraphs.insert(table_bitmap(node_idx));
        false
    }

    fn found_subgraph_pair(&mut self, left: NodeMap, right: NodeMap, edge_idx: usize) -> bool {
        let edge = &self.graph.edges[edge_idx];
        if !passes_conflict_rules(left | right, self.exprs, edge.expr) {
            return false;
        }
        self.seen_subgraph_pairs += 1;
        if let Some(limit) = self.subgraph_pair_limit {
            if self.seen_subgraph_pairs > limit {
                return true;
            }
        }
        debug_assert!(left != 0);
        debug_assert!(right != 0);
        debug_assert_eq!(left & right, 0);
        self.seen_subgraphs.insert(left | right);
        false
    }

    fn has_seen(&self, subgraph: NodeMap) -> bool {
        self.seen_subgraphs.contains(&subgraph)
    }
}
