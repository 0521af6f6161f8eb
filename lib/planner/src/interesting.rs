//! Collects the interesting orderings and functional dependencies of a
//! query block and builds the interesting-orders state machine.
//!
//! Orderings come from ORDER BY (an order) and GROUP BY (a grouping).
//! Functional dependencies come from equi-join conditions (equivalences,
//! active once their join is performed) and from WHERE equalities against
//! constants ({} → x, always active when the predicate is applied
//! directly on a base table). Each hyperedge and WHERE predicate gets the
//! bitmap of the FDs it activates, so the costing receiver can advance
//! ordering states as it joins.

use hyperjoin_common::bitset::is_single_bit_set;
use hyperjoin_orders::{FunctionalDependency, LogicalOrderings, Ordering, OrderingElement};

use crate::condition::{ConditionArena, ConditionId, ConditionKind};
use crate::make_graph::JoinHypergraph;
use crate::query::QueryBlock;
use crate::trace::OptimizerTrace;

/// The built state machine plus the (remapped) indexes of the clauses'
/// orderings.
pub struct InterestingOrderInfo {
    pub orderings: LogicalOrderings,
    pub order_by_ordering_idx: Option<usize>,
    pub group_by_ordering_idx: Option<usize>,
}

/// If the condition is an equality, the FD it induces: an equivalence for
/// column = column, a `{} → x` for column = constant.
fn fd_from_equality(
    orderings: &mut LogicalOrderings,
    conditions: &ConditionArena,
    condition_id: ConditionId,
    always_active: bool,
) -> Option<usize> {
    let condition = conditions.get(condition_id);
    let ConditionKind::Equality { left, right } = &condition.kind else {
        return None;
    };
    let fd = match (left.tables, right.tables) {
        (0, 0) => return None,
        (0, _) => {
            let tail = orderings.get_handle(right.clone());
            FunctionalDependency::fd(Vec::new(), tail)
        }
        (_, 0) => {
            let tail = orderings.get_handle(left.clone());
            FunctionalDependency::fd(Vec::new(), tail)
        }
        _ => {
            let head = orderings.get_handle(left.clone());
            let tail = orderings.get_handle(right.clone());
            FunctionalDependency::equivalence(head, tail)
        }
    };
    let fd = if always_active { fd.always_active() } else { fd };
    Some(orderings.add_functional_dependency(fd))
}

/// Builds the interesting-orders framework for the query block and
/// annotates the hypergraph's edges and predicates with their FD bitmaps.
pub fn build_interesting_orders(
    query: &QueryBlock,
    graph: &mut JoinHypergraph,
    trace: &mut OptimizerTrace,
) -> InterestingOrderInfo {
    let mut orderings = LogicalOrderings::new();

    let order_by_idx = if query.order_by.is_empty() {
        None
    } else {
        let elements: Vec<OrderingElement> = query
            .order_by
            .iter()
            .map(|(term, direction)| OrderingElement {
                term: orderings.get_handle(term.clone()),
                direction: *direction,
            })
            .collect();
        Some(orderings.add_ordering(
            Ordering::order(elements),
            /*interesting=*/ true,
            /*used_at_end=*/ true,
            0,
        ))
    };

    let group_by_idx = if query.group_by.is_empty() {
        None
    } else {
        let elements: Vec<OrderingElement> = query
            .group_by
            .iter()
            .map(|term| OrderingElement::grouped(orderings.get_handle(term.clone())))
            .collect();
        Some(orderings.add_ordering(
            Ordering::grouping(elements),
            /*interesting=*/ true,
            /*used_at_end=*/ true,
            0,
        ))
    };

    // Equivalences from each join's equi-join conditions; they hold from
    // the moment the join has been performed.
    let mut edge_fds: Vec<(usize, usize)> = Vec::new();
    for edge_idx in 0..graph.edges.len() {
        let expr = query.exprs.get(graph.edges[edge_idx].expr);
        for &condition in &expr.equijoin_conditions {
            if let Some(fd_idx) =
                fd_from_equality(&mut orderings, &query.conditions, condition, false)
            {
                edge_fds.push((edge_idx, fd_idx));
            }
        }
    }

    // Constant FDs from WHERE equalities. Applied directly on a base
    // table they hold from the very start of execution; delayed ones
    // (outer joins above) only once the predicate is applied.
    let mut predicate_fds: Vec<(usize, usize)> = Vec::new();
    for pred_idx in 0..graph.num_where_predicates {
        let predicate = &graph.predicates[pred_idx];
        let always_active = is_single_bit_set(predicate.total_eligibility_set);
        if let Some(fd_idx) = fd_from_equality(
            &mut orderings,
            &query.conditions,
            predicate.condition,
            always_active,
        ) {
            predicate_fds.push((pred_idx, fd_idx));
        }
    }

    orderings.build(trace.buffer());

    for (edge_idx, fd_idx) in edge_fds {
        graph.edges[edge_idx].functional_dependencies |= orderings.get_fd_set(fd_idx);
    }
    for (pred_idx, fd_idx) in predicate_fds {
        graph.predicates[pred_idx].functional_dependencies |= orderings.get_fd_set(fd_idx);
    }

    InterestingOrderInfo {
        order_by_ordering_idx: order_by_idx.map(|i| orderings.remap_ordering_index(i)),
        group_by_ordering_idx: group_by_idx.map(|i| orderings.remap_ordering_index(i)),
        orderings,
    }
}
