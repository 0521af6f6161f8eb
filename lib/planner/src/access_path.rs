use hyperjoin_common::bitset::bits_set_in;
use hyperjoin_common::fmt::format_number_readably;
use hyperjoin_orders::{FunctionalDependencySet, StateIndex};

use crate::condition::ConditionId;
use crate::make_graph::JoinHypergraph;
use crate::query::QueryBlock;

/// Handle of an access path in a [`PathArena`].
pub type PathId = usize;

/// The operator variants this planner produces. The set is closed and
/// known at compile time; execution dispatches on the tag.
#[derive(Clone, Debug)]
pub enum AccessPathKind {
    TableScan {
        table: usize,
    },
    HashJoin {
        /// Probe side.
        outer: PathId,
        /// Build side.
        inner: PathId,
        /// Index into the hypergraph's edges.
        join_predicate: usize,
    },
    Filter {
        child: PathId,
        conditions: Vec<ConditionId>,
    },
    Sort {
        child: PathId,
        /// The ordering produced, as an interesting-orders index.
        ordering_idx: usize,
    },
    Aggregate {
        child: PathId,
    },
    LimitOffset {
        child: PathId,
        limit: Option<u64>,
        offset: u64,
    },
    /// Materialization of a derived table or common table expression.
    MaterializeTable {
        child: PathId,
        table: usize,
        rematerialize: bool,
    },
    MaterializeInformationSchema {
        child: PathId,
        table: usize,
    },
}

/// One candidate (sub)plan with its cost estimates.
///
/// `filter_predicates` and `delayed_predicates` are disjoint bitmaps over
/// the hypergraph's WHERE predicates: the former are applied at this
/// node, the latter wait for more tables to be joined in. Their union is
/// exactly the predicates overlapping this node's tables that have not
/// been discharged below.
#[derive(Clone, Debug)]
pub struct AccessPath {
    pub kind: AccessPathKind,

    pub num_output_rows: f64,
    pub cost: f64,
    pub num_output_rows_before_filter: f64,
    pub cost_before_filter: f64,

    pub filter_predicates: u64,
    pub delayed_predicates: u64,

    /// Interesting-orders DFSM state of the stream this path produces.
    pub ordering_state: StateIndex,
    /// The FDs active in this stream (applied predicates and performed
    /// joins).
    pub active_fds: FunctionalDependencySet,
}

impl AccessPath {
    pub fn new(kind: AccessPathKind) -> Self {
        Self {
            kind,
            num_output_rows: 0.0,
            cost: 0.0,
            num_output_rows_before_filter: 0.0,
            cost_before_filter: 0.0,
            filter_predicates: 0,
            delayed_predicates: 0,
            ordering_state: 0,
            active_fds: 0,
        }
    }
}

/// Arena of access paths; parent/child links go through [`PathId`], and
/// the link graph is acyclic. Replacing the path stored at an id is how
/// the costing receiver keeps "best seen so far" visible to any parent
/// already referring to it.
#[derive(Debug, Default)]
pub struct PathArena {
    paths: Vec<AccessPath>,
}

impl PathArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: AccessPath) -> PathId {
        self.paths.push(path);
        self.paths.len() - 1
    }

    pub fn get(&self, id: PathId) -> &AccessPath {
        &self.paths[id]
    }

    pub fn get_mut(&mut self, id: PathId) -> &mut AccessPath {
        &mut self.paths[id]
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Converts the `filter_predicates` bitmaps of the plan into explicit
/// FILTER nodes, so execution does not need to know about predicate
/// bitmaps. The filter node takes over the filtered row count and cost;
/// the node below reverts to its pre-filter estimates.
pub fn expand_filter_access_paths(
    paths: &mut PathArena,
    root: PathId,
    graph: &JoinHypergraph,
) -> PathId {
    // Expand children first.
    let kind = paths.get(root).kind.clone();
    match kind {
        AccessPathKind::TableScan { .. } => {}
        AccessPathKind::HashJoin { outer, inner, join_predicate } => {
            let new_outer = expand_filter_access_paths(paths, outer, graph);
            let new_inner = expand_filter_access_paths(paths, inner, graph);
            paths.get_mut(root).kind =
                AccessPathKind::HashJoin { outer: new_outer, inner: new_inner, join_predicate };
        }
        AccessPathKind::Filter { child, conditions } => {
            let new_child = expand_filter_access_paths(paths, child, graph);
            paths.get_mut(root).kind = AccessPathKind::Filter { child: new_child, conditions };
        }
        AccessPathKind::Sort { child, ordering_idx } => {
            let new_child = expand_filter_access_paths(paths, child, graph);
            paths.get_mut(root).kind = AccessPathKind::Sort { child: new_child, ordering_idx };
        }
        AccessPathKind::Aggregate { child } => {
            let new_child = expand_filter_access_paths(paths, child, graph);
            paths.get_mut(root).kind = AccessPathKind::Aggregate { child: new_child };
        }
        AccessPathKind::LimitOffset { child, limit, offset } => {
            let new_child = expand_filter_access_paths(paths, child, graph);
            paths.get_mut(root).kind =
                AccessPathKind::LimitOffset { child: new_child, limit, offset };
        }
        AccessPathKind::MaterializeTable { child, table, rematerialize } => {
            let new_child = expand_filter_access_paths(paths, child, graph);
            paths.get_mut(root).kind =
                AccessPathKind::MaterializeTable { child: new_child, table, rematerialize };
        }
        AccessPathKind::MaterializeInformationSchema { child, table } => {
            let new_child = expand_filter_access_paths(paths, child, graph);
            paths.get_mut(root).kind =
                AccessPathKind::MaterializeInformationSchema { child: new_child, table };
        }
    }

    let filter_predicates = paths.get(root).filter_predicates;
    if filter_predicates == 0 {
        return root;
    }

    let conditions: Vec<ConditionId> = bits_set_in(filter_predicates)
        .map(|pred_idx| graph.predicates[pred_idx].condition)
        .collect();

    let child = paths.get(root).clone();
    let mut filter = AccessPath::new(AccessPathKind::Filter { child: root, conditions });
    filter.num_output_rows = child.num_output_rows;
    filter.cost = child.cost;
    filter.num_output_rows_before_filter = child.num_output_rows_before_filter;
    filter.cost_before_filter = child.cost_before_filter;
    filter.delayed_predicates = child.delayed_predicates;
    filter.ordering_state = child.ordering_state;
    filter.active_fds = child.active_fds;

    // The node below reverts to its pre-filter estimates.
    {
        let below = paths.get_mut(root);
        below.filter_predicates = 0;
        below.num_output_rows = below.num_output_rows_before_filter;
        below.cost = below.cost_before_filter;
    }
    paths.add(filter)
}

/// An indented rendering of the final plan tree, for the trace.
pub fn print_access_path(
    paths: &PathArena,
    query: &QueryBlock,
    graph: &JoinHypergraph,
    path_id: PathId,
    level: usize,
) -> String {
    let path = paths.get(path_id);
    let mut out = "  ".repeat(level);
    let estimates = format!(
        " [rows={}, cost={}]\n",
        format_number_readably(path.num_output_rows),
        format_number_readably(path.cost)
    );

    match &path.kind {
        AccessPathKind::TableScan { table } => {
            out += &format!("-> Table scan on {}{}", query.tables[*table].alias, estimates);
        }
        AccessPathKind::HashJoin { outer, inner, join_predicate } => {
            let label = crate::make_graph::generate_expression_label(
                &query.exprs,
                &query.conditions,
                graph.edges[*join_predicate].expr,
            );
            out += &format!("-> Hash join on {label}{estimates}");
            out += &print_access_path(paths, query, graph, *outer, level + 1);
            out += &print_access_path(paths, query, graph, *inner, level + 1);
        }
        AccessPathKind::Filter { child, conditions } => {
            let labels = conditions
                .iter()
                .map(|&c| query.conditions.get(c).label.clone())
                .collect::<Vec<_>>()
                .join(" and ");
            out += &format!("-> Filter: {labels}{estimates}");
            out += &print_access_path(paths, query, graph, *child, level + 1);
        }
        AccessPathKind::Sort { child, .. } => {
            out += &format!("-> Sort{estimates}");
            out += &print_access_path(paths, query, graph, *child, level + 1);
        }
        AccessPathKind::Aggregate { child } => {
            out += &format!("-> Aggregate{estimates}");
            out += &print_access_path(paths, query, graph, *child, level + 1);
        }
        AccessPathKind::LimitOffset { child, limit, offset } => {
            out += &format!(
                "-> Limit: {} offset {}{}",
                limit.map_or_else(|| "none".to_owned(), |l| l.to_string()),
                offset,
                estimates
            );
            out += &print_access_path(paths, query, graph, *child, level + 1);
        }
        AccessPathKind::MaterializeTable { child, table, .. } => {
            out += &format!(
                "-> Materialize {}{}",
                query.tables[*table].alias, estimates
            );
            out += &print_access_path(paths, query, graph, *child, level + 1);
        }
        AccessPathKind::MaterializeInformationSchema { child, table } => {
            out += &format!(
                "-> Fill information schema table {}{}",
                query.tables[*table].alias, estimates
            );
            out += &print_access_path(paths, query, graph, *child, level + 1);
        }
    }
    out
}
