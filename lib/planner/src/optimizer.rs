//! Top-level planning for one query block: feature checks, hypergraph
//! construction, interesting orders, (possibly) graph simplification,
//! DPhyp enumeration through the costing receiver, and the post-join
//! operators.

use hyperjoin_common::bitset::overlaps;
use hyperjoin_common::{OptResult, OptimizerError, UnsupportedFeature};
use hyperjoin_hypergraph::enumerate_all_connected_partitions;
use hyperjoin_orders::LogicalOrderings;

use crate::access_path::{
    expand_filter_access_paths, print_access_path, AccessPath, AccessPathKind, PathArena, PathId,
};
use crate::cost::{estimate_sort_cost, AGGREGATE_ONE_ROW_COST, APPLY_ONE_FILTER_COST};
use crate::costing::CostingReceiver;
use crate::graph_simplification::{count_subgraph_pairs, simplify_query_graph};
use crate::interesting::build_interesting_orders;
use crate::make_graph::make_join_hypergraph;
use crate::query::{QueryBlock, TableStatsRefresher};
use crate::selectivity::estimate_selectivity;
use crate::trace::OptimizerTrace;

/// Planner tunables.
#[derive(Clone, Copy, Debug)]
pub struct OptimizerOptions {
    /// When the graph has more csg-cmp pairs than this, it is simplified
    /// before planning starts.
    pub subgraph_pair_limit: usize,

    /// When the receiver's best-path map outgrows this, enumeration is
    /// aborted and the graph simplified further.
    pub access_path_limit: usize,

    /// Whether to accumulate the human-readable trace.
    pub trace: bool,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self { subgraph_pair_limit: 100_000, access_path_limit: 100_000, trace: false }
    }
}

/// The planning result: the chosen plan tree plus the headline estimates.
#[derive(Debug)]
pub struct PlannedQuery {
    pub paths: PathArena,
    pub root: PathId,

    /// Estimated row count of the full query, rounded.
    pub best_rowcount: u64,
    /// Estimated cost of the full query.
    pub best_read: f64,

    pub trace: Option<String>,
}

/// Rejects the features this planner deliberately does not handle; the
/// caller falls back to an older planner path for these.
fn check_supported_query(query: &QueryBlock) -> OptResult<()> {
    use UnsupportedFeature as F;
    let flags = &query.flags;
    let rejections = [
        (flags.has_rollup, F::Rollup),
        (flags.has_fulltext, F::FulltextSearch),
        (flags.distinct, F::Distinct),
        (flags.is_recursive_cte, F::RecursiveCte),
        (flags.uses_secondary_engine, F::SecondaryEngine),
        (flags.has_windows, F::WindowFunctions),
        (flags.buffer_result, F::BufferResult),
        (
            query.is_grouped() && query.is_ordered(),
            F::OrderByAndGroupBy,
        ),
        (flags.has_lateral, F::Lateral),
        (flags.has_table_functions, F::TableFunctions),
    ];
    for (rejected, feature) in rejections {
        if rejected {
            return Err(OptimizerError::Unsupported(feature));
        }
    }
    Ok(())
}

/// Finds the lowest-cost plan for the query block. On success the root
/// access path covers the whole query, including the post-join operators
/// (grouping, having, ordering, limit).
pub fn find_best_query_plan(
    query: &mut QueryBlock,
    options: &OptimizerOptions,
    stats: Option<&dyn TableStatsRefresher>,
) -> OptResult<PlannedQuery> {
    check_supported_query(query)?;

    let mut trace =
        if options.trace { OptimizerTrace::enabled() } else { OptimizerTrace::disabled() };

    let mut graph = make_join_hypergraph(query, &mut trace)?;
    let order_info = build_interesting_orders(query, &mut graph, &mut trace);
    let orderings = &order_info.orderings;

    // If the graph is too large to enumerate exhaustively, shrink its
    // search space up front.
    if count_subgraph_pairs(&graph, &query.exprs, options.subgraph_pair_limit).is_none() {
        simplify_query_graph(
            &mut graph,
            &query.exprs,
            options.subgraph_pair_limit,
            &mut trace,
        );
    }

    trace.append("\nEnumerating subplans:\n");

    // Run the enumeration. If the receiver overflows anyway, simplify
    // with a smaller target and retry; if the graph cannot be reduced
    // further, run unbounded and accept the planning time.
    let mut simplified_on_overflow = false;
    let (mut paths, root, num_access_paths) = loop {
        let limit = if simplified_on_overflow { None } else { Some(options.access_path_limit) };
        let mut receiver =
            CostingReceiver::new(query, &graph, orderings, stats, limit, options.trace);
        let aborted = enumerate_all_connected_partitions(&graph.graph, &mut receiver);
        if !aborted {
            let num_access_paths = receiver.num_access_paths();
            let (paths, root, receiver_trace) = receiver.into_parts();
            if let Some(text) = receiver_trace.finish() {
                trace.append(text);
            }
            let root = root.ok_or(OptimizerError::TooComplex {
                num_access_paths,
            })?;
            break (paths, root, num_access_paths);
        }

        if simplified_on_overflow {
            // Unbounded and still aborted: cannot happen, but keep the
            // error path total.
            return Err(OptimizerError::TooComplex {
                num_access_paths: receiver.num_access_paths(),
            });
        }
        simplified_on_overflow = true;
        simplify_query_graph(
            &mut graph,
            &query.exprs,
            options.access_path_limit / 2,
            &mut trace,
        );
    };

    trace.append(format!("\nEnumerated {num_access_paths} subplans.\n"));

    let mut root = root;

    // Apply predicates that belong to no table at all (constant or
    // nondeterministic conditions).
    {
        let all_nodes = graph.all_nodes();
        let root_path = paths.get_mut(root);
        for (pred_idx, predicate) in graph.predicates[..graph.num_where_predicates]
            .iter()
            .enumerate()
        {
            if !overlaps(predicate.total_eligibility_set, all_nodes) {
                root_path.filter_predicates |= 1u64 << pred_idx;
                root_path.cost += root_path.num_output_rows * APPLY_ONE_FILTER_COST;
                root_path.num_output_rows *= predicate.selectivity;
            }
        }
        debug_assert_eq!(root_path.filter_predicates & root_path.delayed_predicates, 0);
    }

    // The plan is decided; expand the filter bitmaps into FILTER nodes.
    root = expand_filter_access_paths(&mut paths, root, &graph);

    // GROUP BY: sort first (unless the rows already arrive grouped), then
    // streaming aggregation.
    if query.is_grouped() {
        if let Some(group_idx) = order_info.group_by_ordering_idx {
            root = sort_unless_already_ordered(&mut paths, orderings, root, group_idx);
        }

        let child_rows = paths.get(root).num_output_rows;
        let child_cost = paths.get(root).cost;
        let mut aggregate_path = AccessPath::new(AccessPathKind::Aggregate { child: root });
        // How much aggregation reduces the row count is anyone's guess
        // without group statistics; keep the input estimate.
        aggregate_path.num_output_rows = child_rows;
        aggregate_path.cost = child_cost + child_rows * AGGREGATE_ONE_ROW_COST;
        aggregate_path.num_output_rows_before_filter = aggregate_path.num_output_rows;
        aggregate_path.cost_before_filter = aggregate_path.cost;
        aggregate_path.ordering_state = paths.get(root).ordering_state;
        aggregate_path.active_fds = paths.get(root).active_fds;
        root = paths.add(aggregate_path);
    }

    // HAVING.
    if let Some(having) = query.having {
        let child_rows = paths.get(root).num_output_rows;
        let child_cost = paths.get(root).cost;
        let mut filter_path =
            AccessPath::new(AccessPathKind::Filter { child: root, conditions: vec![having] });
        filter_path.num_output_rows =
            child_rows * estimate_selectivity(&query.conditions, having, &mut trace);
        filter_path.cost = child_cost + child_rows * APPLY_ONE_FILTER_COST;
        filter_path.num_output_rows_before_filter = filter_path.num_output_rows;
        filter_path.cost_before_filter = filter_path.cost;
        filter_path.ordering_state = paths.get(root).ordering_state;
        filter_path.active_fds = paths.get(root).active_fds;
        root = paths.add(filter_path);
    }

    // ORDER BY.
    if query.is_ordered() {
        if let Some(order_idx) = order_info.order_by_ordering_idx {
            root = sort_unless_already_ordered(&mut paths, orderings, root, order_idx);
        }
    }

    // LIMIT / OFFSET.
    if query.limit.is_some() || query.offset != 0 {
        let child = paths.get(root).clone();
        let mut limit_path = AccessPath::new(AccessPathKind::LimitOffset {
            child: root,
            limit: query.limit,
            offset: query.offset,
        });
        let limited_rows = match query.limit {
            Some(limit) => child.num_output_rows.min(limit as f64),
            None => (child.num_output_rows - query.offset as f64).max(0.0),
        };
        limit_path.num_output_rows = limited_rows;
        limit_path.cost = child.cost;
        limit_path.num_output_rows_before_filter = limit_path.num_output_rows;
        limit_path.cost_before_filter = limit_path.cost;
        limit_path.ordering_state = child.ordering_state;
        limit_path.active_fds = child.active_fds;
        root = paths.add(limit_path);
    }

    let mut best_rowcount = paths.get(root).num_output_rows.round() as u64;
    let best_read = paths.get(root).cost;

    // A best_rowcount of 0 or 1 is a _guarantee_ of at most one row
    // downstream; only a LIMIT can actually promise that.
    if best_rowcount <= 1 && query.limit.unwrap_or(u64::MAX) > 1 {
        best_rowcount = 2;
    }

    if trace.is_enabled() {
        trace.append("\nFinal access path tree:\n");
        trace.append(print_access_path(&paths, query, &graph, root, 0));
    }

    Ok(PlannedQuery { paths, root, best_rowcount, best_read, trace: trace.finish() })
}

/// Wraps `root` in a SORT producing the given interesting ordering,
/// unless the stream already follows it, in which case the sort is
/// elided.
fn sort_unless_already_ordered(
    paths: &mut PathArena,
    orderings: &LogicalOrderings,
    root: PathId,
    ordering_idx: usize,
) -> PathId {
    let child = paths.get(root).clone();
    if orderings.does_follow_order(child.ordering_state, ordering_idx) {
        return root;
    }

    let mut sort_path = AccessPath::new(AccessPathKind::Sort { child: root, ordering_idx });
    sort_path.num_output_rows = child.num_output_rows;
    sort_path.cost = child.cost + estimate_sort_cost(child.num_output_rows);
    sort_path.num_output_rows_before_filter = sort_path.num_output_rows;
    sort_path.cost_before_filter = sort_path.cost;
    sort_path.ordering_state = orderings.set_order(ordering_idx);
    sort_path.active_fds = child.active_fds;
    paths.add(sort_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::ConditionArena;
    use crate::query::{QueryBlockFlags, TableInfo};
    use crate::relational_expression::ExprArena;

    fn trivial_query(flags: QueryBlockFlags) -> QueryBlock {
        let mut exprs = ExprArena::new();
        let root = exprs.table(0);
        QueryBlock {
            tables: vec![TableInfo::new("t1", 100.0)],
            exprs,
            join_root: root,
            conditions: ConditionArena::new(),
            where_condition: None,
            order_by: Vec::new(),
            group_by: Vec::new(),
            having: None,
            limit: None,
            offset: 0,
            flags,
        }
    }

    #[test]
    fn rejected_features_name_themselves() {
        let cases = [
            (QueryBlockFlags { has_rollup: true, ..Default::default() }, "ROLLUP"),
            (QueryBlockFlags { distinct: true, ..Default::default() }, "DISTINCT"),
            (
                QueryBlockFlags { has_windows: true, ..Default::default() },
                "windowing functions",
            ),
            (QueryBlockFlags { has_lateral: true, ..Default::default() }, "LATERAL"),
        ];
        for (flags, name) in cases {
            let mut query = trivial_query(flags);
            let err = find_best_query_plan(&mut query, &OptimizerOptions::default(), None)
                .unwrap_err();
            assert!(err.to_string().contains(name), "{err} should mention {name}");
        }
    }

    #[test]
    fn unsupported_order_and_group_combination() {
        let mut query = trivial_query(QueryBlockFlags::default());
        query.order_by = vec![(hyperjoin_orders::Term::new("t1.a", 0b1), hyperjoin_orders::Direction::Asc)];
        query.group_by = vec![hyperjoin_orders::Term::new("t1.b", 0b1)];
        let err =
            find_best_query_plan(&mut query, &OptimizerOptions::default(), None).unwrap_err();
        assert!(err.to_string().contains("ORDER BY and GROUP BY"));
    }
}
