//! The costing receiver: the DPhyp callback that selects access paths by
//! cost. It receives subplans, costs them with the hash-join cost model,
//! and keeps the cheapest path per joined table subset; at the end it is
//! left with a root path giving the lowest total cost for the whole query
//! block (before ORDER BY etc.).
//!
//! Only one path per subset is retained. Other dimensions (initial cost
//! for LIMIT, parameterized paths) would require keeping a dominance
//! frontier per subset instead; the ordering state is tracked on each
//! path so the orchestrator can still elide provably redundant sorts.

use hyperjoin_common::bitset::{bits_set_in, is_subset, overlaps, table_bitmap, NodeMap};
use hyperjoin_hypergraph::Receiver;
use hyperjoin_orders::LogicalOrderings;
use rustc_hash::FxHashMap;

use crate::access_path::{AccessPath, AccessPathKind, PathArena, PathId};
use crate::cost::{
    find_output_rows_for_join, APPLY_ONE_FILTER_COST, HASH_BUILD_ONE_ROW_COST,
    HASH_PROBE_ONE_ROW_COST, HASH_RETURN_ONE_ROW_COST, TABLE_SCAN_COST_PER_ROW,
};
use crate::make_graph::{generate_expression_label, passes_conflict_rules, JoinHypergraph};
use crate::query::{QueryBlock, TableKind, TableStatsRefresher};
use crate::trace::OptimizerTrace;

pub struct CostingReceiver<'a> {
    query: &'a QueryBlock,
    graph: &'a JoinHypergraph,
    orderings: &'a LogicalOrderings,
    stats: Option<&'a dyn TableStatsRefresher>,
    paths: PathArena,

    /// For each connected subset of the hypergraph, the cheapest access
    /// path producing it. Doubles as the connectivity oracle for DPhyp.
    access_paths: FxHashMap<NodeMap, PathId>,

    /// Abort the enumeration when the map outgrows this; the orchestrator
    /// falls back to graph simplification. `None` means unlimited.
    access_path_limit: Option<usize>,

    trace: OptimizerTrace,
}

impl<'a> CostingReceiver<'a> {
    pub fn new(
        query: &'a QueryBlock,
        graph: &'a JoinHypergraph,
        orderings: &'a LogicalOrderings,
        stats: Option<&'a dyn TableStatsRefresher>,
        access_path_limit: Option<usize>,
        trace_enabled: bool,
    ) -> Self {
        Self {
            query,
            graph,
            orderings,
            stats,
            paths: PathArena::new(),
            access_paths: FxHashMap::default(),
            access_path_limit,
            trace: if trace_enabled {
                OptimizerTrace::enabled()
            } else {
                OptimizerTrace::disabled()
            },
        }
    }

    /// The best path covering every node, available once the enumeration
    /// has run to completion.
    pub fn root(&self) -> Option<PathId> {
        self.access_paths.get(&self.graph.all_nodes()).copied()
    }

    pub fn num_access_paths(&self) -> usize {
        self.access_paths.len()
    }

    /// Tears the receiver apart into the arena, the chosen root, and the
    /// accumulated trace.
    pub fn into_parts(self) -> (PathArena, Option<PathId>, OptimizerTrace) {
        let root = self.root();
        (self.paths, root, self.trace)
    }

    fn print_set(&self, x: NodeMap) -> String {
        let mut ret = String::from("{");
        for (i, node_idx) in bits_set_in(x).enumerate() {
            if i != 0 {
                ret.push(',');
            }
            ret.push_str(&self.graph.nodes[node_idx].alias);
        }
        ret.push('}');
        ret
    }

    fn propose_hash_join(
        &mut self,
        left: NodeMap,
        right: NodeMap,
        left_path_id: PathId,
        right_path_id: PathId,
        edge_idx: usize,
    ) {
        let edge = &self.graph.edges[edge_idx];
        let expr = self.query.exprs.get(edge.expr);
        let left_path = self.paths.get(left_path_id).clone();
        let right_path = self.paths.get(right_path_id).clone();

        let num_output_rows = find_output_rows_for_join(
            left_path.num_output_rows,
            right_path.num_output_rows,
            expr.type_,
            edge.selectivity,
        );

        let mut cost = left_path.cost + right_path.cost;
        cost += right_path.num_output_rows * HASH_BUILD_ONE_ROW_COST;
        cost += left_path.num_output_rows * HASH_PROBE_ONE_ROW_COST;
        cost += num_output_rows * HASH_RETURN_ONE_ROW_COST;

        // Residual (non-equijoin) conditions are evaluated on every
        // emitted row. Not exact when their selectivities are far from
        // 1.0 (the count should be taken before them), but close enough.
        cost += num_output_rows * expr.join_conditions.len() as f64 * APPLY_ONE_FILTER_COST;

        let mut join_path = AccessPath::new(AccessPathKind::HashJoin {
            outer: left_path_id,
            inner: right_path_id,
            join_predicate: edge_idx,
        });
        join_path.num_output_rows_before_filter = num_output_rows;
        join_path.cost_before_filter = cost;
        join_path.num_output_rows = num_output_rows;
        join_path.cost = cost;

        // The hash join streams the probe (outer) side, so its ordering
        // carries over; the newly active FDs may improve it.
        join_path.active_fds =
            left_path.active_fds | right_path.active_fds | edge.functional_dependencies;

        self.apply_delayed_predicates_after_join(left, right, &left_path, &right_path, &mut join_path);

        join_path.ordering_state = self
            .orderings
            .apply_fds(left_path.ordering_state, join_path.active_fds);

        if self.trace.is_enabled() {
            self.trace.append(format!(
                "Found sets {} and {}, connected by condition {} [rows={:.0}, cost={:.1}]\n",
                self.print_set(left),
                self.print_set(right),
                generate_expression_label(&self.query.exprs, &self.query.conditions, edge.expr),
                join_path.num_output_rows,
                join_path.cost
            ));
            for pred_idx in bits_set_in(join_path.filter_predicates) {
                self.trace.append(format!(
                    " - applied (delayed) predicate {}\n",
                    self.query
                        .conditions
                        .get(self.graph.predicates[pred_idx].condition)
                        .label
                ));
            }
        }

        match self.access_paths.get(&(left | right)) {
            None => {
                if self.trace.is_enabled() {
                    self.trace.append(" - first alternative for this join, keeping\n");
                }
                let id = self.paths.add(join_path);
                self.access_paths.insert(left | right, id);
            }
            Some(&existing_id) => {
                let existing_cost = self.paths.get(existing_id).cost;
                if existing_cost > join_path.cost {
                    if self.trace.is_enabled() {
                        self.trace.append(format!(
                            " - cheaper than old cost {existing_cost:.1}, keeping\n"
                        ));
                    }
                    *self.paths.get_mut(existing_id) = join_path;
                } else if self.trace.is_enabled() {
                    self.trace.append(format!(
                        " - more expensive than old cost {existing_cost:.1}, discarding\n"
                    ));
                }
            }
        }
    }

    /// Of all delayed predicates, applies those whose eligibility set is
    /// now complete, and carries the rest onward. A predicate is delayed
    /// at this join iff it was delayed on exactly one side (XOR); one
    /// delayed on both sides either completes here or stays delayed.
    fn apply_delayed_predicates_after_join(
        &mut self,
        left: NodeMap,
        right: NodeMap,
        left_path: &AccessPath,
        right_path: &AccessPath,
        join_path: &mut AccessPath,
    ) {
        join_path.filter_predicates = 0;
        join_path.delayed_predicates =
            left_path.delayed_predicates ^ right_path.delayed_predicates;
        let ready_tables = left | right;
        for pred_idx in bits_set_in(left_path.delayed_predicates & right_path.delayed_predicates)
        {
            let predicate = &self.graph.predicates[pred_idx];
            if is_subset(predicate.total_eligibility_set, ready_tables) {
                join_path.filter_predicates |= 1u64 << pred_idx;
                join_path.cost += join_path.num_output_rows * APPLY_ONE_FILTER_COST;
                join_path.num_output_rows *= predicate.selectivity;
                join_path.active_fds |= predicate.functional_dependencies;
            } else {
                join_path.delayed_predicates |= 1u64 << pred_idx;
            }
        }
    }
}

impl Receiver for CostingReceiver<'_> {
    /// Called for each table in the query block before any subsets
    /// containing it. Table scan is the only base access method; virtual
    /// tables get a materialization step on top.
    fn found_single_node(&mut self, node_idx: usize) -> bool {
        let node = &self.graph.nodes[node_idx];
        let table = &self.query.tables[node.table];

        // Let the engine refresh its row estimate, if it wants to.
        let mut num_output_rows = self
            .stats
            .and_then(|s| s.fetch_row_count(node.table))
            .unwrap_or(node.row_estimate);
        let mut cost = table
            .scan_cost
            .unwrap_or(num_output_rows * TABLE_SCAN_COST_PER_ROW);

        let mut path = AccessPath::new(AccessPathKind::TableScan { table: node.table });
        path.num_output_rows_before_filter = num_output_rows;
        path.cost_before_filter = cost;

        // Partition the relevant predicates: applicable right away, or
        // delayed until other tables are joined in.
        let my_map = table_bitmap(node_idx);
        for (pred_idx, predicate) in self.graph.predicates
            [..self.graph.num_where_predicates]
            .iter()
            .enumerate()
        {
            if predicate.total_eligibility_set == my_map {
                path.filter_predicates |= 1u64 << pred_idx;
                cost += num_output_rows * APPLY_ONE_FILTER_COST;
                num_output_rows *= predicate.selectivity;
                path.active_fds |= predicate.functional_dependencies;
            } else if overlaps(predicate.total_eligibility_set, my_map) {
                path.delayed_predicates |= 1u64 << pred_idx;
            }
        }

        path.num_output_rows = num_output_rows;
        path.cost = cost;
        path.ordering_state = self.orderings.apply_fds(self.orderings.set_order(0), path.active_fds);

        if self.trace.is_enabled() {
            self.trace.append(format!(
                "Found node {} [rows={:.0}, cost={:.1}]\n",
                node.alias, path.num_output_rows, path.cost
            ));
            for pred_idx in bits_set_in(path.filter_predicates) {
                self.trace.append(format!(
                    " - applied predicate {}\n",
                    self.query
                        .conditions
                        .get(self.graph.predicates[pred_idx].condition)
                        .label
                ));
            }
        }

        // Virtual tables must be filled in before they can be scanned.
        let path = match table.kind {
            TableKind::Base => path,
            TableKind::InformationSchema => {
                let child = self.paths.add(path.clone());
                let mut materialize_path =
                    AccessPath::new(AccessPathKind::MaterializeInformationSchema {
                        child,
                        table: node.table,
                    });
                materialize_path.num_output_rows = path.num_output_rows;
                materialize_path.num_output_rows_before_filter =
                    path.num_output_rows_before_filter;
                materialize_path.cost_before_filter = path.cost;
                materialize_path.cost = path.cost;
                materialize_path.filter_predicates = path.filter_predicates;
                materialize_path.delayed_predicates = path.delayed_predicates;
                materialize_path.ordering_state = path.ordering_state;
                materialize_path.active_fds = path.active_fds;
                self.paths.get_mut(child).filter_predicates = 0;
                self.paths.get_mut(child).delayed_predicates = 0;

                // Some information schema tables estimate zero rows,
                // which leads to wild plans; give them a placeholder.
                if materialize_path.num_output_rows_before_filter == 0.0 {
                    self.paths.get_mut(child).num_output_rows = 1000.0;
                    self.paths.get_mut(child).num_output_rows_before_filter = 1000.0;
                    materialize_path.num_output_rows = 1000.0;
                    materialize_path.num_output_rows_before_filter = 1000.0;
                }
                materialize_path
            }
            TableKind::Derived { rematerialize } => {
                materialize_on_top(&mut self.paths, path, node.table, rematerialize)
            }
            TableKind::CommonTableExpression => {
                // CTE invalidation is handled at the outer level, so no
                // rematerialization here.
                materialize_on_top(&mut self.paths, path, node.table, false)
            }
        };

        let id = self.paths.add(path);
        self.access_paths.insert(table_bitmap(node_idx), id);
        false
    }

    /// Called for each legal subjoin (left ∪ right). There may be several
    /// calls for the same union (e.g. {t1}/{t2,t3} and {t1,t2}/{t3});
    /// each proposal is costed and the cheapest kept. The two subsets
    /// never arrive in reversed order.
    fn found_subgraph_pair(&mut self, left: NodeMap, right: NodeMap, edge_idx: usize) -> bool {
        debug_assert!(left != 0);
        debug_assert!(right != 0);
        debug_assert_eq!(left & right, 0);

        let edge = &self.graph.edges[edge_idx];
        if !passes_conflict_rules(left | right, &self.query.exprs, edge.expr) {
            return false;
        }

        let left_path = self.access_paths[&left];
        let right_path = self.access_paths[&right];

        // Inner joins commute; build the hash table on the smaller side.
        let expr_type = self.query.exprs.get(edge.expr).type_;
        if expr_type.is_commutative()
            && self.paths.get(left_path).num_output_rows
                < self.paths.get(right_path).num_output_rows
        {
            self.propose_hash_join(right, left, right_path, left_path, edge_idx);
        } else {
            self.propose_hash_join(left, right, left_path, right_path, edge_idx);
        }

        if let Some(limit) = self.access_path_limit {
            if self.access_paths.len() > limit {
                // Bail out; graph simplification is needed.
                return true;
            }
        }
        false
    }

    fn has_seen(&self, subgraph: NodeMap) -> bool {
        self.access_paths.contains_key(&subgraph)
    }
}

fn materialize_on_top(
    paths: &mut PathArena,
    path: AccessPath,
    table: usize,
    rematerialize: bool,
) -> AccessPath {
    let child = paths.add(path.clone());
    let mut materialize_path = AccessPath::new(AccessPathKind::MaterializeTable {
        child,
        table,
        rematerialize,
    });
    materialize_path.num_output_rows = path.num_output_rows;
    materialize_path.num_output_rows_before_filter = path.num_output_rows_before_filter;
    materialize_path.cost_before_filter = path.cost;
    materialize_path.cost = path.cost;
    materialize_path.filter_predicates = path.filter_predicates;
    materialize_path.delayed_predicates = path.delayed_predicates;
    materialize_path.ordering_state = path.ordering_state;
    materialize_path.active_fds = path.active_fds;
    paths.get_mut(child).filter_predicates = 0;
    paths.get_mut(child).delayed_predicates = 0;
    materialize_path
}
