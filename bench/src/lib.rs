//! Shared graph builders for the hyperjoin microbenchmarks.

use hyperjoin_common::bitset::{table_bitmap, NodeMap};
use hyperjoin_hypergraph::{Hypergraph, Receiver};
use hyperjoin_planner::make_graph::JoinGraphNode;
use hyperjoin_planner::{
    ExprArena, JoinHypergraph, JoinPredicate, RelExprType, RelationalExpression,
};
use rustc_hash::FxHashSet;

/// Deterministic pseudo-random sequence; benchmarks must not vary between
/// runs or platforms.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next_u64(&mut self) -> u64 {
        // Knuth's MMIX constants.
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 16
    }

    pub fn rows(&mut self) -> f64 {
        (self.next_u64() % 10_000 + 1) as f64
    }

    pub fn selectivity(&mut self) -> f64 {
        (self.next_u64() % 1000 + 1) as f64 / 1000.0
    }
}

pub fn chain_graph(num_nodes: usize) -> Hypergraph {
    let mut g = Hypergraph::new();
    for _ in 0..num_nodes {
        g.add_node();
    }
    for i in 0..num_nodes - 1 {
        g.add_edge(table_bitmap(i), table_bitmap(i + 1));
    }
    g
}

pub fn star_graph(num_nodes: usize) -> Hypergraph {
    let mut g = Hypergraph::new();
    for _ in 0..num_nodes {
        g.add_node();
    }
    for i in 1..num_nodes {
        g.add_edge(table_bitmap(0), table_bitmap(i));
    }
    g
}

pub fn clique_graph(num_nodes: usize) -> Hypergraph {
    let mut g = Hypergraph::new();
    for _ in 0..num_nodes {
        g.add_node();
    }
    for i in 0..num_nodes {
        for j in i + 1..num_nodes {
            g.add_edge(table_bitmap(i), table_bitmap(j));
        }
    }
    g
}

/// A star-shaped [`JoinHypergraph`] with pseudo-random cardinalities and
/// selectivities, for the simplification benchmarks.
pub fn star_join(num_nodes: usize, lcg: &mut Lcg) -> (JoinHypergraph, ExprArena) {
    let mut exprs = ExprArena::new();
    let mut graph = JoinHypergraph::new(num_nodes);
    for i in 0..num_nodes {
        graph.graph.add_node();
        graph.nodes.push(JoinGraphNode {
            table: i,
            alias: format!("t{}", i + 1),
            row_estimate: lcg.rows(),
        });
        graph.table_num_to_node_num[i] = Some(i);
    }
    for i in 1..num_nodes {
        let left = 0b1;
        let right = table_bitmap(i);
        let expr = exprs.push(RelationalExpression {
            type_: RelExprType::InnerJoin,
            left: None,
            right: None,
            table: None,
            join_conditions: Vec::new(),
            equijoin_conditions: Vec::new(),
            conflict_rules: Vec::new(),
            tables_in_subtree: left | right,
        });
        graph.edges.push(JoinPredicate {
            expr,
            selectivity: lcg.selectivity(),
            functional_dependencies: 0,
            source_multiple_equalities: Vec::new(),
        });
        graph.graph.add_edge(left, right);
    }
    (graph, exprs)
}

/// A counting receiver without payload lookups, so the enumeration itself
/// dominates the measurement.
#[derive(Default)]
pub struct CountingReceiver {
    seen: FxHashSet<NodeMap>,
    pub pairs: usize,
}

impl Receiver for CountingReceiver {
    fn found_single_node(&mut self, node_idx: usize) -> bool {
        self.seen.insert(table_bitmap(node_idx));
        false
    }

    fn found_subgraph_pair(&mut self, left: NodeMap, right: NodeMap, _edge_idx: usize) -> bool {
        self.pairs += 1;
        self.seen.insert(left | right);
        false
    }

    fn has_seen(&self, subgraph: NodeMap) -> bool {
        self.seen.contains(&subgraph)
    }
}
