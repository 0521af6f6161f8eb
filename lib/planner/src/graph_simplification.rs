//! Heuristic simplification of join hypergraphs that are too large to
//! plan exhaustively; largely an implementation of Neumann: "Query
//! Simplification: Graceful Degradation for Join-Order Optimization".
//!
//! The algorithm evaluates pairs of neighboring joins (ones touching the
//! same tables), finds obviously _bad_ pairwise orders by cost heuristics,
//! and disallows them: if join A should very likely happen before join B,
//! the B-before-A order is removed by extending B's hyperedge to include
//! A's nodes. The graph becomes visually more complicated, but the search
//! space shrinks and planning gets faster.
//!
//! Being greedy, the algorithm sometimes locks in a worse plan; that is
//! the accepted trade. It addresses only subgraph-pair explosion: when
//! individual pairs generate many candidate paths, that needs separate
//! in-subgraph pruning.

use hyperjoin_common::bitset::{
    bits_set_in, find_lowest_bit_set, is_single_bit_set, is_subset, overlaps, tables_between,
    NodeMap,
};
use hyperjoin_hypergraph::{
    enumerate_all_connected_partitions, Hyperedge, OnlineCycleFinder,
};

use crate::cost::{find_output_rows_for_join, simulate_join, JoinStatus};
use crate::make_graph::{JoinHypergraph, JoinPredicate};
use crate::relational_expression::{ConflictRule, ExprArena};
use crate::trace::OptimizerTrace;
use crate::trivial_receiver::TrivialReceiver;

/// Maximum node count, bounded by the bitmap width.
const MAX_TABLES: usize = 64;

/// Outcome of one [`GraphSimplifier::do_simplification_step`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimplificationResult {
    /// No (more) simplifications are possible on this hypergraph.
    NoSimplificationPossible,

    /// A join order was forced (one join ahead of another).
    AppliedSimplification,

    /// An ordering that was already implicit in the graph was made
    /// explicit. Changes the graph but removes no real freedom.
    AppliedNoop,

    /// A step undone earlier was replayed.
    AppliedRedoStep,
}

/// Whether A is necessarily a part of B, making B-before-A impossible.
/// For `t1 LEFT JOIN (t2 JOIN t3)`, the t2-t3 join is part of the
/// t1-{t2,t3} hyperedge, so this holds.
fn is_subjoin(a: Hyperedge, b: Hyperedge) -> bool {
    is_subset(a.left | a.right, b.left | b.right)
}

fn combining_would_violate_conflict_rules(
    conflict_rules: &[ConflictRule],
    in_component: &[i32],
    left_component: i32,
    right_component: i32,
) -> bool {
    for rule in conflict_rules {
        let applies = bits_set_in(rule.needed_to_activate_rule).any(|node_idx| {
            in_component[node_idx] == left_component
                || in_component[node_idx] == right_component
        });
        if applies {
            let satisfied = bits_set_in(rule.required_nodes).all(|node_idx| {
                in_component[node_idx] == left_component
                    || in_component[node_idx] == right_component
            });
            if !satisfied {
                return true;
            }
        }
    }
    false
}

/// For a (nonempty) set of tables, the component they all belong to, or
/// -1 if they span several (or none).
fn get_component(components: &[NodeMap], in_component: &[i32], tables: NodeMap) -> i32 {
    debug_assert!(tables != 0);
    let component = in_component[find_lowest_bit_set(tables)];
    if component >= 0 && is_subset(tables, components[component as usize]) {
        component
    } else {
        -1
    }
}

/// Connects a set of per-table components up through the joins of the
/// graph, calling back on every merge. Joins are tried in the topological
/// order of the happens-before DAG (so most graphs finish in one pass),
/// repeatedly, until no more can be applied or the callback returns true.
/// `num_changed` is how many tables moved into the (lower-numbered)
/// surviving component; the callback also sees the merged component
/// state.
fn connect_components_through_joins<F>(
    graph: &JoinHypergraph,
    exprs: &ExprArena,
    cycles: &OnlineCycleFinder,
    mut callback_on_join: F,
    components: &mut [NodeMap],
    in_component: &mut [i32],
) where
    F: FnMut(i32, i32, usize, usize, &[NodeMap]) -> bool,
{
    let mut did_anything = true;
    while did_anything {
        did_anything = false;

        for &edge_idx in cycles.order() {
            let e = graph.graph.edges[edge_idx * 2];
            let mut left_component = get_component(components, in_component, e.left);
            if left_component == -1 {
                // Cannot apply this (yet).
                continue;
            }
            if overlaps(e.right, components[left_component as usize]) {
                // Already applied.
                continue;
            }
            let mut right_component = get_component(components, in_component, e.right);
            if right_component == -1
                || combining_would_violate_conflict_rules(
                    &exprs.get(graph.edges[edge_idx].expr).conflict_rules,
                    in_component,
                    left_component,
                    right_component,
                )
            {
                continue;
            }

            // Merge into the numerically smaller component, so that a
            // fully connected graph always ends up in component zero.
            if right_component < left_component {
                std::mem::swap(&mut left_component, &mut right_component);
            }
            let mut num_changed = 0;
            for table_idx in bits_set_in(components[right_component as usize]) {
                in_component[table_idx] = left_component;
                num_changed += 1;
            }
            debug_assert!(num_changed > 0);
            let right_tables = components[right_component as usize];
            components[left_component as usize] |= right_tables;

            if callback_on_join(left_component, right_component, edge_idx, num_changed, components)
            {
                return;
            }
            did_anything = true;
        }
    }
}

/// Estimates the cardinality of joining a set of tables together: the
/// number the costing receiver would come up with, without building any
/// access paths. Expensive (iterates all hyperedges several times), which
/// is why [`GraphSimplifier`] caches the result per hyperedge endpoint.
fn get_cardinality(
    tables_to_join: NodeMap,
    graph: &JoinHypergraph,
    exprs: &ExprArena,
    cycles: &OnlineCycleFinder,
) -> f64 {
    let mut components = [0 as NodeMap; MAX_TABLES];
    let mut in_component = [-1i32; MAX_TABLES];
    let mut component_cardinality = [0f64; MAX_TABLES];

    // Start with each relevant table in its own component. Assume at
    // least one row per table, or the rudimentary cost model ends up with
    // zero costs.
    let mut num_components = 0;
    for node_idx in bits_set_in(tables_to_join) {
        components[num_components] = 1u64 << node_idx;
        in_component[node_idx] = num_components as i32;
        component_cardinality[num_components] = graph.nodes[node_idx].row_estimate.max(1.0);
        num_components += 1;
    }

    let mut active_components = tables_between(0, num_components);

    // Apply table filters and constant predicates.
    for pred in &graph.predicates[..graph.num_where_predicates] {
        if pred.total_eligibility_set == 0 {
            // Only the total selectivity matters, so put these anywhere.
            component_cardinality[0] *= pred.selectivity;
        } else if is_subset(pred.total_eligibility_set, tables_to_join)
            && is_single_bit_set(pred.total_eligibility_set)
        {
            let node_idx = find_lowest_bit_set(pred.total_eligibility_set);
            let component = in_component[node_idx] as usize;
            component_cardinality[component] *= pred.selectivity;
        }
    }

    if num_components == 1 {
        return component_cardinality[0];
    }

    let mut multiple_equality_bitmap = 0u64;
    {
        let cardinality_ref = &mut component_cardinality;
        let callback = |left_component: i32,
                        right_component: i32,
                        edge_idx: usize,
                        _num_changed: usize,
                        components: &[NodeMap]| {
            let pred = &graph.edges[edge_idx];
            let mut cardinality = join_cardinality(
                cardinality_ref[left_component as usize],
                cardinality_ref[right_component as usize],
                exprs,
                pred,
            );

            // Note which multiple equalities this join discharges, so
            // implied WHERE equalities do not shrink the estimate twice.
            for &idx in &pred.source_multiple_equalities {
                multiple_equality_bitmap |= 1u64 << idx;
            }

            // Apply all newly applicable WHERE predicates: those now
            // fully inside the merged component, spanning the halves.
            for where_pred in &graph.predicates[..graph.num_where_predicates] {
                if is_subset(where_pred.total_eligibility_set, tables_to_join)
                    && overlaps(
                        where_pred.total_eligibility_set,
                        components[left_component as usize]
                            & !components[right_component as usize],
                    )
                    && overlaps(
                        where_pred.total_eligibility_set,
                        components[right_component as usize],
                    )
                {
                    let dedup_ok = match where_pred.source_multiple_equality {
                        Some(idx) => multiple_equality_bitmap & (1u64 << idx) == 0,
                        None => true,
                    };
                    if dedup_ok {
                        cardinality *= where_pred.selectivity;
                        if let Some(idx) = where_pred.source_multiple_equality {
                            multiple_equality_bitmap |= 1u64 << idx;
                        }
                    }
                }
            }

            cardinality_ref[left_component as usize] = cardinality;
            active_components &= !(1u64 << right_component);
            active_components == 0b1
        };
        connect_components_through_joins(
            graph,
            exprs,
            cycles,
            callback,
            &mut components,
            &mut in_component,
        );
    }

    // In rare cases an edge's side is joinable only through a hyperedge
    // containing tables outside the given set, leaving several
    // components. Combine the leftovers as if they were inner equi-joins
    // (selectivity 0.1), which seems the most neutral choice.
    for component_idx in bits_set_in(active_components & !1) {
        component_cardinality[0] *= component_cardinality[component_idx] * 0.1;
    }
    component_cardinality[0]
}

fn join_cardinality(
    left_rows: f64,
    right_rows: f64,
    exprs: &ExprArena,
    pred: &JoinPredicate,
) -> f64 {
    find_output_rows_for_join(
        left_rows,
        right_rows,
        exprs.get(pred.expr).type_,
        pred.selectivity,
    )
}

/// A much faster [`get_cardinality`] for joining two partitions along a
/// known edge: reuses the cached partition cardinalities and applies only
/// the edge itself plus any WHERE predicates that become applicable.
fn get_cardinality_single_join(
    left: NodeMap,
    right: NodeMap,
    left_rows: f64,
    right_rows: f64,
    graph: &JoinHypergraph,
    exprs: &ExprArena,
    pred: &JoinPredicate,
) -> f64 {
    debug_assert!(!overlaps(left, right));
    let mut cardinality = join_cardinality(left_rows, right_rows, exprs, pred);

    let mut multiple_equality_bitmap = 0u64;
    for &idx in &pred.source_multiple_equalities {
        multiple_equality_bitmap |= 1u64 << idx;
    }
    for where_pred in &graph.predicates[..graph.num_where_predicates] {
        if is_subset(where_pred.total_eligibility_set, left | right)
            && overlaps(where_pred.total_eligibility_set, left)
            && overlaps(where_pred.total_eligibility_set, right)
        {
            let dedup_ok = match where_pred.source_multiple_equality {
                Some(idx) => multiple_equality_bitmap & (1u64 << idx) == 0,
                None => true,
            };
            if dedup_ok {
                cardinality *= where_pred.selectivity;
                if let Some(idx) = where_pred.source_multiple_equality {
                    multiple_equality_bitmap |= 1u64 << idx;
                }
            }
        }
    }
    cardinality
}

/// Infers the join dependencies inherent in the hypergraph into a
/// happens-before DAG over the edges, so that forced orderings never
/// contradict them. The inference is incomplete ({t2,t3}-t4 is not a
/// subjoin of t1-{t2,t4} but must often still precede it), which is why
/// [`graph_is_joinable`] re-verifies every accepted step.
fn find_join_dependencies(graph: &JoinHypergraph) -> OnlineCycleFinder {
    let num_edges = graph.graph.edges.len() / 2;
    let mut cycles = OnlineCycleFinder::new(num_edges);
    for edge1_idx in 0..num_edges {
        let edge1 = graph.graph.edges[edge1_idx * 2];
        for edge2_idx in 0..num_edges {
            let edge2 = graph.graph.edges[edge2_idx * 2];
            if edge1_idx != edge2_idx && is_subjoin(edge1, edge2) {
                let added_cycle = cycles.add_edge(edge1_idx, edge2_idx);
                debug_assert!(!added_cycle);
            }
        }
    }
    cycles
}

/// Whether there is at least one valid join order for the graph: puts
/// every table in its own component and repeatedly applies edges (in
/// happens-before order, honoring conflict rules) until either all tables
/// are connected or nothing more applies.
///
/// Forced orderings can create contradictions the happens-before DAG does
/// not see, so this runs after every accepted simplification step.
pub(crate) fn graph_is_joinable(
    graph: &JoinHypergraph,
    exprs: &ExprArena,
    cycles: &OnlineCycleFinder,
) -> bool {
    let num_nodes = graph.nodes.len();
    let mut components = [0 as NodeMap; MAX_TABLES];
    let mut in_component = [-1i32; MAX_TABLES];
    for node_idx in 0..num_nodes {
        components[node_idx] = 1u64 << node_idx;
        in_component[node_idx] = node_idx as i32;
    }

    let mut num_in_component0 = 1;
    let callback = |left_component: i32,
                    _right_component: i32,
                    _edge_idx: usize,
                    num_changed: usize,
                    _components: &[NodeMap]| {
        if left_component == 0 {
            num_in_component0 += num_changed;
            return num_in_component0 == num_nodes;
        }
        false
    };
    connect_components_through_joins(
        graph,
        exprs,
        cycles,
        callback,
        &mut components,
        &mut in_component,
    );
    num_in_component0 == num_nodes
}

#[derive(Clone, Copy, Debug)]
struct ProposedSimplificationStep {
    benefit: f64,
    before_edge_idx: usize,
    after_edge_idx: usize,
}

/// One applied simplification, with enough state to undo it.
#[derive(Clone, Copy, Debug)]
struct SimplificationStep {
    before_edge_idx: usize,
    after_edge_idx: usize,

    // Old and new versions of after_edge_idx's hyperedge.
    old_edge: Hyperedge,
    new_edge: Hyperedge,
}

#[derive(Clone, Copy, Debug)]
struct EdgeCardinalities {
    left: f64,
    right: f64,
}

/// Per-edge cache of the best simplification step involving this edge and
/// a higher-numbered neighbor.
#[derive(Clone, Copy, Debug)]
struct NeighborCache {
    best_neighbor: Option<usize>,
    best_step: ProposedSimplificationStep,
    index_in_pq: Option<usize>,
}

/// Stepwise simplifier for one join hypergraph. Steps can be undone and
/// replayed in O(1) (the internal happens-before DAG and cardinality
/// caches are kept as if the steps were still applied, which is correct as
/// long as nobody else mutates the graph), so the driver can binary-search
/// the number of steps needed.
pub struct GraphSimplifier<'a> {
    graph: &'a mut JoinHypergraph,
    exprs: &'a ExprArena,

    /// Steps applied so far, in order.
    done_steps: Vec<SimplificationStep>,

    /// Steps undone, most recently undone last;
    /// [`GraphSimplifier::do_simplification_step`] replays from here
    /// first.
    undone_steps: Vec<SimplificationStep>,

    /// Cached cardinality of (the join of) each hyperedge side, kept in
    /// sync as edges are widened. Saves repeated `get_cardinality` calls.
    edge_cardinalities: Vec<EdgeCardinalities>,

    /// Happens-before relationships between the joins, so forced
    /// orderings never become contradictory.
    cycles: OnlineCycleFinder,

    cache: Vec<NeighborCache>,

    /// Max-heap over edges with a viable best step, keyed on benefit.
    pq: Vec<usize>,
}

impl<'a> GraphSimplifier<'a> {
    pub fn new(graph: &'a mut JoinHypergraph, exprs: &'a ExprArena) -> Self {
        let num_edges = graph.graph.edges.len() / 2;
        let cycles = find_join_dependencies(graph);

        let mut edge_cardinalities = Vec::with_capacity(num_edges);
        for edge_idx in 0..num_edges {
            let e = graph.graph.edges[edge_idx * 2];
            edge_cardinalities.push(EdgeCardinalities {
                left: get_cardinality(e.left, graph, exprs, &cycles),
                right: get_cardinality(e.right, graph, exprs, &cycles),
            });
        }

        let mut simplifier = Self {
            graph,
            exprs,
            done_steps: Vec::new(),
            undone_steps: Vec::new(),
            edge_cardinalities,
            cycles,
            cache: vec![
                NeighborCache {
                    best_neighbor: None,
                    best_step: ProposedSimplificationStep {
                        benefit: f64::NEG_INFINITY,
                        before_edge_idx: 0,
                        after_edge_idx: 0,
                    },
                    index_in_pq: None,
                };
                num_edges
            ],
            pq: Vec::new(),
        };

        for edge_idx in 0..num_edges {
            simplifier.recalculate_neighbors(edge_idx, edge_idx + 1, num_edges);
        }
        simplifier
    }

    /// How many steps have been (successfully) done and not undone.
    pub fn num_steps_done(&self) -> usize {
        self.done_steps.len()
    }

    /// The hypergraph being simplified, for inspecting its current state.
    pub fn graph(&self) -> &JoinHypergraph {
        self.graph
    }

    /// Performs a single simplification step. Most callers only care
    /// whether the result is `NoSimplificationPossible` or not.
    pub fn do_simplification_step(&mut self) -> SimplificationResult {
        // Replay a previously undone step, if any; no new work needed.
        if let Some(step) = self.undone_steps.pop() {
            self.graph.graph.modify_edge(
                step.after_edge_idx * 2,
                step.new_edge.left,
                step.new_edge.right,
            );
            self.done_steps.push(step);
            return SimplificationResult::AppliedRedoStep;
        }

        loop {
            let Some(&top_edge) = self.pq.first() else {
                return SimplificationResult::NoSimplificationPossible;
            };
            let mut best_step = self.cache[top_edge].best_step;

            let mut forced = false;
            if self
                .cycles
                .edge_would_create_cycle(best_step.before_edge_idx, best_step.after_edge_idx)
            {
                // This order is impossible, so make the opposite explicit
                // in the graph. Zero benefit in itself, but the pair never
                // comes up again.
                std::mem::swap(&mut best_step.before_edge_idx, &mut best_step.after_edge_idx);
                forced = true;
            }

            // Arrange for before_edge to happen before after_edge (i.e.
            // after_edge requires before_edge's nodes).
            let old_cardinalities = self.edge_cardinalities[best_step.after_edge_idx];
            let full_step = self.concretize_simplification_step(best_step);

            let added_cycle = self
                .cycles
                .add_edge(best_step.before_edge_idx, best_step.after_edge_idx);
            debug_assert!(!added_cycle);
            self.graph.graph.modify_edge(
                best_step.after_edge_idx * 2,
                full_step.new_edge.left,
                full_step.new_edge.right,
            );

            if !graph_is_joinable(self.graph, self.exprs, &self.cycles) {
                // The step made the graph unjoinable: the happens-before
                // inference missed a dependency. Undo, record the
                // opposite constraint (it just became known to be
                // implicit), and look for another step.
                self.cycles
                    .delete_edge(best_step.before_edge_idx, best_step.after_edge_idx);
                self.graph.graph.modify_edge(
                    best_step.after_edge_idx * 2,
                    full_step.old_edge.left,
                    full_step.old_edge.right,
                );
                self.edge_cardinalities[best_step.after_edge_idx] = old_cardinalities;

                if self
                    .cycles
                    .add_edge(full_step.after_edge_idx, full_step.before_edge_idx)
                {
                    // The opposite constraint would also cycle; the
                    // happens-before DAG and the joinability check
                    // disagree (cyclic hypergraphs can make the DAG too
                    // strict). Drop the pair from consideration instead.
                    let pos = self.cache[top_edge].index_in_pq.expect("was on top");
                    self.pq_remove(pos);
                }
                continue;
            }

            self.recalculate_neighbors(best_step.after_edge_idx, 0, self.cache.len());
            self.done_steps.push(full_step);
            return if forced {
                SimplificationResult::AppliedNoop
            } else {
                SimplificationResult::AppliedSimplification
            };
        }
    }

    /// Undoes the last applied step: restores the hyperedge, but keeps the
    /// happens-before DAG and cardinalities as if the step were still
    /// applied, so replaying is free.
    pub fn undo_simplification_step(&mut self) {
        let step = self.done_steps.pop().expect("no simplification step to undo");
        self.graph
            .graph
            .modify_edge(step.after_edge_idx * 2, step.old_edge.left, step.old_edge.right);
        self.undone_steps.push(step);
    }

    /// Turns "before_edge must come before after_edge" into the concrete
    /// widening of after_edge's hyperedge (and updates that side's cached
    /// cardinality).
    fn concretize_simplification_step(
        &mut self,
        step: ProposedSimplificationStep,
    ) -> SimplificationStep {
        let e1 = self.graph.graph.edges[step.before_edge_idx * 2];
        let e2 = self.graph.graph.edges[step.after_edge_idx * 2];

        let mut full_step = SimplificationStep {
            before_edge_idx: step.before_edge_idx,
            after_edge_idx: step.after_edge_idx,
            old_edge: e2,
            new_edge: e2,
        };

        // Find out whether they meet in e2's left or right.
        if is_subset(e1.left, e2.left)
            || is_subset(e2.left, e1.left)
            || is_subset(e1.right, e2.left)
            || is_subset(e2.left, e1.right)
        {
            if !overlaps(e2.right, e1.left | e1.right) {
                self.edge_cardinalities[step.after_edge_idx].left = get_cardinality_single_join(
                    e1.left,
                    e1.right,
                    self.edge_cardinalities[step.before_edge_idx].left,
                    self.edge_cardinalities[step.before_edge_idx].right,
                    self.graph,
                    self.exprs,
                    &self.graph.edges[step.before_edge_idx],
                );
                full_step.new_edge.left |= e1.left | e1.right;
            } else {
                // The two edges are not cleanly separated; recalculate the
                // cardinality from scratch. Slow, but rare.
                let nodes_to_add = (e1.left | e1.right) & !e2.right;
                full_step.new_edge.left |= nodes_to_add;
                self.edge_cardinalities[step.after_edge_idx].left = get_cardinality(
                    full_step.new_edge.left,
                    self.graph,
                    self.exprs,
                    &self.cycles,
                );
            }
        } else {
            debug_assert!(
                is_subset(e1.left, e2.right)
                    || is_subset(e2.right, e1.left)
                    || is_subset(e1.right, e2.right)
                    || is_subset(e2.right, e1.right)
            );
            if !overlaps(e2.left, e1.left | e1.right) {
                self.edge_cardinalities[step.after_edge_idx].right =
                    get_cardinality_single_join(
                        e1.left,
                        e1.right,
                        self.edge_cardinalities[step.before_edge_idx].left,
                        self.edge_cardinalities[step.before_edge_idx].right,
                        self.graph,
                        self.exprs,
                        &self.graph.edges[step.before_edge_idx],
                    );
                full_step.new_edge.right |= e1.left | e1.right;
            } else {
                let nodes_to_add = (e1.left | e1.right) & !e2.left;
                full_step.new_edge.right |= nodes_to_add;
                self.edge_cardinalities[step.after_edge_idx].right = get_cardinality(
                    full_step.new_edge.right,
                    self.graph,
                    self.exprs,
                    &self.cycles,
                );
            }
        }
        debug_assert!(!overlaps(full_step.new_edge.left, full_step.new_edge.right));

        full_step
    }

    /// Whether two joins are neighboring (share one side without one being
    /// a subjoin of the other), and if so, which order is likely better
    /// and by how much. The costs are compared on a common, imaginary
    /// table with the larger of the two shared-side cardinalities, since
    /// the shared sides need not be identical sets.
    fn edges_are_neighboring(
        &self,
        edge1_idx: usize,
        edge2_idx: usize,
    ) -> Option<ProposedSimplificationStep> {
        let e1 = self.graph.graph.edges[edge1_idx * 2];
        let e2 = self.graph.graph.edges[edge2_idx * 2];
        if is_subjoin(e1, e2) || is_subjoin(e2, e1) {
            // Ordering them is pointless.
            return None;
        }

        let j1 = &self.graph.edges[edge1_idx];
        let j2 = &self.graph.edges[edge2_idx];
        let t1 = self.exprs.get(j1.expr).type_;
        let t2 = self.exprs.get(j2.expr).type_;
        let e1l = self.edge_cardinalities[edge1_idx].left;
        let e1r = self.edge_cardinalities[edge1_idx].right;
        let e2l = self.edge_cardinalities[edge2_idx].left;
        let e2r = self.edge_cardinalities[edge2_idx].right;

        let sim1 = |l: JoinStatus, r: JoinStatus| simulate_join(l, r, t1, j1.selectivity);
        let sim2 = |l: JoinStatus, r: JoinStatus| simulate_join(l, r, t2, j2.selectivity);
        let rows = JoinStatus::base;

        let (cost_e1_before_e2, cost_e2_before_e1) =
            if is_subset(e1.left, e2.left) || is_subset(e2.left, e1.left) {
                // The joins meet in their left endpoints; compare
                //   (common JOIN e1r) JOIN e2r   versus
                //   (common JOIN e2r) JOIN e1r.
                let common = e1l.max(e2l);
                (
                    sim2(sim1(rows(common), rows(e1r)), rows(e2r)).cost,
                    sim1(sim2(rows(common), rows(e2r)), rows(e1r)).cost,
                )
            } else if is_subset(e1.left, e2.right) || is_subset(e2.right, e1.left) {
                // e1's left meets e2's right.
                let common = e1l.max(e2r);
                (
                    sim2(rows(e2l), sim1(rows(common), rows(e1r))).cost,
                    sim1(sim2(rows(e2l), rows(common)), rows(e1r)).cost,
                )
            } else if is_subset(e1.right, e2.right) || is_subset(e2.right, e1.right) {
                // They meet in their right endpoints.
                let common = e1r.max(e2r);
                (
                    sim2(rows(e2l), sim1(rows(e1l), rows(common))).cost,
                    sim1(rows(e1l), sim2(rows(e2l), rows(common))).cost,
                )
            } else if is_subset(e1.right, e2.left) || is_subset(e2.left, e1.right) {
                // e1's right meets e2's left.
                let common = e1r.max(e2l);
                (
                    sim2(sim1(rows(e1l), rows(common)), rows(e2r)).cost,
                    sim1(rows(e1l), sim2(rows(common), rows(e2r))).cost,
                )
            } else {
                // Not neighboring.
                return None;
            };

        debug_assert!(cost_e1_before_e2.is_finite());
        debug_assert!(cost_e2_before_e1.is_finite());

        // Degenerate joins (zero-row antijoin chains) can estimate to zero
        // cost; keep the ratios well-defined.
        let cost_e1_before_e2 = cost_e1_before_e2.max(f64::MIN_POSITIVE);
        let cost_e2_before_e1 = cost_e2_before_e1.max(f64::MIN_POSITIVE);

        if cost_e1_before_e2 > cost_e2_before_e1 {
            Some(ProposedSimplificationStep {
                benefit: cost_e1_before_e2 / cost_e2_before_e1,
                before_edge_idx: edge2_idx,
                after_edge_idx: edge1_idx,
            })
        } else {
            Some(ProposedSimplificationStep {
                benefit: cost_e2_before_e1 / cost_e1_before_e2,
                before_edge_idx: edge1_idx,
                after_edge_idx: edge2_idx,
            })
        }
    }

    /// Refreshes the cached best steps involving `edge1_idx` against
    /// neighbors in `[begin, end)`. Pairs are stored on their
    /// lower-numbered edge; higher neighbors rebuild from scratch, lower
    /// ones update incrementally (recursing when a stored best pair
    /// degrades and something else may now be best).
    fn recalculate_neighbors(&mut self, edge1_idx: usize, begin: usize, end: usize) {
        for edge2_idx in begin..edge1_idx.min(end) {
            let step = self.edges_are_neighboring(edge2_idx, edge1_idx);
            let other_cache = &mut self.cache[edge2_idx];
            if let Some(step) = step {
                if other_cache.best_neighbor.is_none()
                    || step.benefit >= other_cache.best_step.benefit
                {
                    // The new top for the other edge (including the case
                    // where it already was, and increased).
                    other_cache.best_neighbor = Some(edge1_idx);
                    other_cache.best_step = step;
                    self.pq_update(edge2_idx);
                    continue;
                }
            }
            if self.cache[edge2_idx].best_neighbor == Some(edge1_idx) {
                // The pair was the other edge's best and has degraded (or
                // stopped being a neighbor); re-check everything there.
                // Terminates because edge2_idx < edge1_idx.
                self.recalculate_neighbors(edge2_idx, 0, self.cache.len());
            }
        }

        // The neighbors stored on this edge can simply be rebuilt.
        self.cache[edge1_idx].best_neighbor = None;
        self.cache[edge1_idx].best_step.benefit = f64::NEG_INFINITY;
        for edge2_idx in begin.max(edge1_idx + 1)..end {
            if let Some(step) = self.edges_are_neighboring(edge1_idx, edge2_idx) {
                let cache = &mut self.cache[edge1_idx];
                if cache.best_neighbor.is_none() || step.benefit > cache.best_step.benefit {
                    cache.best_neighbor = Some(edge2_idx);
                    cache.best_step = step;
                }
            }
        }
        self.pq_update(edge1_idx);
    }

    // -- Indexed binary max-heap over edges, keyed on best-step benefit. --

    fn pq_update(&mut self, edge_idx: usize) {
        match (self.cache[edge_idx].index_in_pq, self.cache[edge_idx].best_neighbor) {
            (None, Some(_)) => {
                self.pq.push(edge_idx);
                let pos = self.pq.len() - 1;
                self.cache[edge_idx].index_in_pq = Some(pos);
                self.pq_sift_up(pos);
            }
            (Some(pos), None) => {
                self.pq_remove(pos);
            }
            (Some(pos), Some(_)) => {
                let pos = self.pq_sift_up(pos);
                self.pq_sift_down(pos);
            }
            (None, None) => {}
        }
    }

    fn pq_remove(&mut self, pos: usize) {
        let edge_idx = self.pq[pos];
        self.cache[edge_idx].index_in_pq = None;
        let last = self.pq.len() - 1;
        if pos != last {
            self.pq.swap(pos, last);
            self.pq.pop();
            self.cache[self.pq[pos]].index_in_pq = Some(pos);
            let pos = self.pq_sift_up(pos);
            self.pq_sift_down(pos);
        } else {
            self.pq.pop();
        }
    }

    fn pq_benefit(&self, pos: usize) -> f64 {
        self.cache[self.pq[pos]].best_step.benefit
    }

    fn pq_sift_up(&mut self, mut pos: usize) -> usize {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.pq_benefit(pos) <= self.pq_benefit(parent) {
                break;
            }
            self.pq.swap(pos, parent);
            self.cache[self.pq[pos]].index_in_pq = Some(pos);
            self.cache[self.pq[parent]].index_in_pq = Some(parent);
            pos = parent;
        }
        pos
    }

    fn pq_sift_down(&mut self, mut pos: usize) {
        loop {
            let mut largest = pos;
            for child in [2 * pos + 1, 2 * pos + 2] {
                if child < self.pq.len() && self.pq_benefit(child) > self.pq_benefit(largest) {
                    largest = child;
                }
            }
            if largest == pos {
                return;
            }
            self.pq.swap(pos, largest);
            self.cache[self.pq[pos]].index_in_pq = Some(pos);
            self.cache[self.pq[largest]].index_in_pq = Some(largest);
            pos = largest;
        }
    }
}

/// Runs [`TrivialReceiver`] over the graph to see whether it has at most
/// `subgraph_pair_limit` csg-cmp pairs; reports the count when it does.
pub fn count_subgraph_pairs(
    graph: &JoinHypergraph,
    exprs: &ExprArena,
    subgraph_pair_limit: usize,
) -> Option<usize> {
    let mut receiver = TrivialReceiver::new(graph, exprs, Some(subgraph_pair_limit));
    if enumerate_all_connected_partitions(&graph.graph, &mut receiver) {
        None
    } else {
        Some(receiver.seen_subgraph_pairs)
    }
}

fn set_number_of_simplifications(num_simplifications: usize, simplifier: &mut GraphSimplifier<'_>) {
    while simplifier.num_steps_done() < num_simplifications {
        let result = simplifier.do_simplification_step();
        debug_assert!(result != SimplificationResult::NoSimplificationPossible);
    }
    while simplifier.num_steps_done() > num_simplifications {
        simplifier.undo_simplification_step();
    }
}

/// Repeatedly applies simplification steps (most to least certain) until
/// the graph has at most `subgraph_pair_limit` subgraph pairs, or no more
/// steps exist. The needed step count is unknown up front, and counting
/// pairs (a DPhyp run without costing) dominates applying a step, so the
/// driver doubles the step count until the limit holds, then
/// binary-searches the boundary; undo/redo makes revisiting counts cheap.
pub fn simplify_query_graph(
    graph: &mut JoinHypergraph,
    exprs: &ExprArena,
    subgraph_pair_limit: usize,
    trace: &mut OptimizerTrace,
) {
    trace.append("\nQuery became too complicated, doing heuristic graph simplification.\n");

    let mut simplifier = GraphSimplifier::new(graph, exprs);

    let mut lower_bound = 0usize;
    let mut upper_bound = 1usize;
    let mut num_subgraph_pairs_upper = 0;
    loop {
        let mut hit_upper_limit = false;
        while simplifier.num_steps_done() < upper_bound {
            if simplifier.do_simplification_step()
                == SimplificationResult::NoSimplificationPossible
            {
                match count_subgraph_pairs(simplifier.graph, exprs, subgraph_pair_limit) {
                    None => {
                        // The limit is set very low; run with every
                        // simplification found, still above the limit.
                        trace.append(
                            "Cannot do any more simplification steps, just running the query as-is.\n",
                        );
                        return;
                    }
                    Some(_) => {
                        upper_bound = simplifier.num_steps_done();
                        hit_upper_limit = true;
                    }
                }
                break;
            }
        }
        if hit_upper_limit {
            break;
        }

        match count_subgraph_pairs(simplifier.graph, exprs, subgraph_pair_limit) {
            Some(num_pairs) => {
                // Enough steps; binary search the boundary below. The
                // remaining simplifier operations all hit the undo/redo
                // cache and are essentially free.
                num_subgraph_pairs_upper = num_pairs;
                break;
            }
            None => {
                lower_bound = upper_bound;
                upper_bound *= 2;
                debug_assert!(upper_bound <= 1_000_000);
            }
        }
    }

    // lower_bound is the highest count known to be insufficient,
    // upper_bound the lowest known to suffice.
    while upper_bound - lower_bound > 1 {
        let mid = (lower_bound + upper_bound) / 2;
        set_number_of_simplifications(mid, &mut simplifier);
        match count_subgraph_pairs(simplifier.graph, exprs, subgraph_pair_limit) {
            Some(num_pairs) => {
                num_subgraph_pairs_upper = num_pairs;
                upper_bound = mid;
            }
            None => lower_bound = mid,
        }
    }

    set_number_of_simplifications(upper_bound, &mut simplifier);

    trace.append(format!(
        "After {upper_bound} simplification steps, the query graph contains \
         {num_subgraph_pairs_upper} subgraph pairs, which is below the limit.\n"
    ));
}
