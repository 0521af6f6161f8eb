//! Conversion of a query block's relational-expression tree into a join
//! hypergraph, including WHERE-predicate pushdown and equi-join
//! detection. Outer-to-inner join simplification is presumed to have
//! happened upstream.
//!
//! Making a hypergraph that minimally expresses the constraints of a join
//! tree is nontrivial (see "On the correct and complete enumeration of
//! the core search space", Moerkotte et al). We take a conservative
//! approach: outer joins block all reordering across themselves, while
//! inner joins reorder freely. This forgoes some valid join orders but
//! never produces an invalid one.

use hyperjoin_common::bitset::{
    bits_set_in, find_lowest_bit_set, is_single_bit_set, is_subset, overlaps, NodeMap,
};
use hyperjoin_common::{OptResult, OptimizerError, UnsupportedFeature};
use hyperjoin_hypergraph::Hypergraph;
use hyperjoin_orders::FunctionalDependencySet;

use crate::condition::{ConditionArena, ConditionId, ConditionKind};
use crate::query::QueryBlock;
use crate::relational_expression::{ExprArena, ExprId, RelExprType};
use crate::selectivity::estimate_selectivity;
use crate::trace::OptimizerTrace;

/// Payload of one (logical) hyperedge: the join expression it represents
/// and the combined selectivity of its conditions. `edges[i]` corresponds
/// to `graph.edges[2 * i]`.
#[derive(Clone, Debug)]
pub struct JoinPredicate {
    pub expr: ExprId,
    pub selectivity: f64,

    /// FDs that become active once this join has been performed; filled
    /// in by the interesting-orders build.
    pub functional_dependencies: FunctionalDependencySet,

    /// Multiple equalities discharged by this join's conditions; used to
    /// deduplicate implied WHERE equalities in cardinality estimation.
    pub source_multiple_equalities: Vec<usize>,
}

/// A WHERE-level predicate that was not absorbed into any join.
#[derive(Clone, Debug)]
pub struct Predicate {
    pub condition: ConditionId,

    /// Nodes that must all have been joined before this predicate can be
    /// evaluated. At least the syntactic eligibility set; wider when
    /// outer/anti joins below could produce NULL-complemented rows.
    pub total_eligibility_set: NodeMap,

    pub selectivity: f64,

    /// Multiple equality this predicate was concretized from, for
    /// deduplicating implied predicates in cardinality estimation.
    pub source_multiple_equality: Option<usize>,

    /// FDs that become active once this predicate is applied; filled in
    /// by the interesting-orders build.
    pub functional_dependencies: FunctionalDependencySet,
}

/// One node of the join hypergraph, tied to its table.
#[derive(Clone, Debug)]
pub struct JoinGraphNode {
    pub table: usize,
    pub alias: String,
    pub row_estimate: f64,
}

/// The join hypergraph of a single query block: the bare graph plus the
/// per-node and per-edge payloads, indexed the same way the graph is.
#[derive(Debug, Default)]
pub struct JoinHypergraph {
    pub graph: Hypergraph,
    pub nodes: Vec<JoinGraphNode>,

    /// Maps table indexes to node indexes (usually the identity, but the
    /// tree's leaf order decides).
    pub table_num_to_node_num: Vec<Option<usize>>,

    pub edges: Vec<JoinPredicate>,
    pub predicates: Vec<Predicate>,
    pub num_where_predicates: usize,
}

impl JoinHypergraph {
    pub fn new(num_tables: usize) -> Self {
        Self {
            table_num_to_node_num: vec![None; num_tables],
            ..Default::default()
        }
    }

    /// Converts a bitmap over tables to a bitmap over graph nodes.
    pub fn node_map_from_table_map(&self, table_map: NodeMap) -> NodeMap {
        let mut ret = 0;
        for table_num in bits_set_in(table_map) {
            let node_num = self.table_num_to_node_num[table_num]
                .expect("table not part of the join graph");
            ret |= 1u64 << node_num;
        }
        ret
    }

    /// The bitmap of every node in the graph.
    pub fn all_nodes(&self) -> NodeMap {
        hyperjoin_common::bitset::tables_between(0, self.nodes.len())
    }
}

/// Checks a node subset against the conflict rules of a join: the join may
/// only be formed within `subset` if every activated rule has its required
/// nodes present.
pub fn passes_conflict_rules(
    subset: NodeMap,
    exprs: &ExprArena,
    expr_id: ExprId,
) -> bool {
    exprs
        .get(expr_id)
        .conflict_rules
        .iter()
        .all(|rule| {
            !is_subset(rule.needed_to_activate_rule, subset)
                || is_subset(rule.required_nodes, subset)
        })
}

/// Builds the join hypergraph for the query block: pushes conditions down
/// through the tree, splits equi-join conditions out, and emits one
/// hyperedge per join with conservative endpoints. The result is suitable
/// for running DPhyp over.
pub fn make_join_hypergraph(
    query: &mut QueryBlock,
    trace: &mut OptimizerTrace,
) -> OptResult<JoinHypergraph> {
    let root = query.join_root;

    if trace.is_enabled() {
        trace.append(format!(
            "Constructing hypergraph; WHERE condition is {}:\n",
            query
                .where_condition
                .map_or_else(|| "(none)".to_owned(), |c| query.conditions.get(c).label.clone())
        ));
        trace.append(print_relational_expression(&query.exprs, &query.conditions, root, 0));
        trace.append("\n");
    }

    let mut extra_where_conditions = Vec::new();
    push_down_join_conditions(
        root,
        &mut query.exprs,
        &mut query.conditions,
        &mut extra_where_conditions,
    );

    // Split the WHERE into its conjuncts and push those down as far as
    // possible too. This happens after the join conditions, so that
    // conditions pushed from joins do not get re-processed.
    let mut where_conditions = Vec::new();
    if let Some(where_condition) = query.where_condition {
        let mut conjuncts = Vec::new();
        query.conditions.extract_conditions(where_condition, &mut conjuncts);
        where_conditions = push_down_as_much_as_possible(
            conjuncts,
            root,
            /*is_join_condition_for_expr=*/ false,
            &mut query.exprs,
            &mut query.conditions,
            &mut extra_where_conditions,
        );
    }
    where_conditions.append(&mut extra_where_conditions);

    make_hash_join_conditions(root, &mut query.exprs, &query.conditions);
    make_cartesian_products(root, &mut query.exprs, &query.conditions);

    if trace.is_enabled() {
        trace.append("After pushdown; remaining WHERE conditions are:\n");
        for &cond in &where_conditions {
            trace.append(format!(" - {}\n", query.conditions.get(cond).label));
        }
        trace.append(print_relational_expression(&query.exprs, &query.conditions, root, 0));
        trace.append("\n");
    }

    let mut graph = JoinHypergraph::new(query.tables.len());
    make_join_graph_from_relational_expression(root, query, &mut graph, trace);

    if trace.is_enabled() {
        trace.append("\nConstructed hypergraph:\n");
        trace.append(print_dotty_hypergraph(&graph, &query.exprs, &query.conditions));
        trace.append("\n");
    }

    // Compute the total eligibility set and selectivity of each WHERE
    // predicate that was not pushed down.
    for condition in where_conditions {
        let used_tables = query.conditions.get(condition).used_tables;
        let tes_tables = find_tes_for_condition(used_tables, root, &query.exprs, &query.conditions);
        let predicate = Predicate {
            condition,
            total_eligibility_set: graph.node_map_from_table_map(tes_tables),
            selectivity: estimate_selectivity(&query.conditions, condition, trace),
            source_multiple_equality: query.conditions.get(condition).source_multiple_equality,
            functional_dependencies: 0,
        };
        if trace.is_enabled() {
            trace.append(format!(
                "Total eligibility set for {}: {}\n",
                query.conditions.get(condition).label,
                print_table_set(query, tes_tables)
            ));
        }
        graph.predicates.push(predicate);
    }
    graph.num_where_predicates = graph.predicates.len();

    if graph.predicates.len() > 64 {
        return Err(OptimizerError::Unsupported(UnsupportedFeature::TooManyPredicates));
    }

    Ok(graph)
}

/// Tries to push `cond` as far down into the tree under `expr_id` as
/// possible. `cond` is either a join condition on that expression
/// (`is_join_condition_for_expr`), or a filter applied at some point above
/// it. Returns false iff the condition found a home further down, so the
/// caller can forget it.
///
/// Beyond regular pushdown, necessary-but-not-sufficient one-sided
/// conditions are derived from disjunctions and pushed while the original
/// stays in place (earlier filtering for hash joins and the outer side of
/// nested loops; selectivity estimation is not compensated).
fn push_down_condition(
    cond: ConditionId,
    expr_id: ExprId,
    is_join_condition_for_expr: bool,
    exprs: &mut ExprArena,
    conditions: &mut ConditionArena,
    extra_where_conditions: &mut Vec<ConditionId>,
) -> bool {
    if exprs.get(expr_id).type_ == RelExprType::Table {
        extra_where_conditions.push(cond);
        return true;
    }

    let expr_type = exprs.get(expr_id).type_;
    let left = exprs.get(expr_id).left.expect("join node");
    let right = exprs.get(expr_id).right.expect("join node");
    let left_tables = exprs.get(left).tables_in_subtree;
    let right_tables = exprs.get(right).tables_in_subtree;
    debug_assert!(!overlaps(left_tables, right_tables));

    let used_tables = conditions.get(cond).used_tables;

    // Full outer joins accept no pushdown at all: either side can be
    // NULL-complemented.
    if expr_type == RelExprType::FullOuterJoin {
        return true;
    }

    // Push into the left side if the condition only touches tables there.
    // Filters can always go left; join conditions of outer joins and
    // antijoins cannot (they would remove rows that must be
    // NULL-complemented instead).
    if is_subset(used_tables, left_tables) {
        if expr_type != RelExprType::InnerJoin
            && expr_type != RelExprType::CartesianProduct
            && expr_type != RelExprType::Semijoin
            && is_join_condition_for_expr
        {
            return true;
        }
        return push_down_condition(
            cond,
            left,
            /*is_join_condition_for_expr=*/ false,
            exprs,
            conditions,
            extra_where_conditions,
        );
    }

    // The right side is the mirror image: join conditions may be pushed
    // through their own outer join / antijoin, filters may not cross the
    // null-producing side.
    let can_push_into_right = expr_type == RelExprType::InnerJoin
        || expr_type == RelExprType::CartesianProduct
        || expr_type == RelExprType::Semijoin
        || is_join_condition_for_expr;
    if is_subset(used_tables, right_tables) {
        if !can_push_into_right {
            return true;
        }
        return push_down_condition(
            cond,
            right,
            /*is_join_condition_for_expr=*/ false,
            exprs,
            conditions,
            extra_where_conditions,
        );
    }

    // Neither a subset of left nor of right: the condition stays at this
    // join, either as a filter above it or promoted to a join condition.

    // Partial pushdown of weaker one-sided conditions first.
    if let Some(partial) = conditions.make_condition_for_tables(cond, left_tables) {
        if partial != cond {
            push_down_condition(
                partial,
                left,
                /*is_join_condition_for_expr=*/ false,
                exprs,
                conditions,
                extra_where_conditions,
            );
        }
    }
    if can_push_into_right {
        if let Some(partial) = conditions.make_condition_for_tables(cond, right_tables) {
            if partial != cond {
                push_down_condition(
                    partial,
                    right,
                    /*is_join_condition_for_expr=*/ false,
                    exprs,
                    conditions,
                    extra_where_conditions,
                );
            }
        }
    }

    if is_join_condition_for_expr {
        // Already a join condition here; nothing more to do.
        return true;
    }

    // Filters cannot be promoted to join conditions on outer joins or
    // antijoins; on inner joins and semijoins they can.
    if expr_type == RelExprType::LeftJoin || expr_type == RelExprType::Antijoin {
        return true;
    }

    exprs.get_mut(expr_id).join_conditions.push(cond);
    false
}

/// Pushes each condition in `conditions_to_push` as far down under
/// `expr_id` as it will go; returns the ones that stayed put.
fn push_down_as_much_as_possible(
    conditions_to_push: Vec<ConditionId>,
    expr_id: ExprId,
    is_join_condition_for_expr: bool,
    exprs: &mut ExprArena,
    conditions: &mut ConditionArena,
    extra_where_conditions: &mut Vec<ConditionId>,
) -> Vec<ConditionId> {
    let mut remaining_parts = Vec::new();
    for cond in conditions_to_push {
        let used_tables = conditions.get(cond).used_tables;
        if is_single_bit_set(used_tables) || used_tables == 0 {
            // Single-table filters stay in the WHERE (the costing
            // receiver applies them on the table scans directly), and
            // table-independent ones are applied once on the final plan.
            remaining_parts.push(cond);
        } else if push_down_condition(
            cond,
            expr_id,
            is_join_condition_for_expr,
            exprs,
            conditions,
            extra_where_conditions,
        ) {
            remaining_parts.push(cond);
        }
    }
    remaining_parts
}

/// For each join condition posted on a join under `expr_id`, tries to push
/// it further down. The pre-planning phases hoist join conditions as far
/// up as outer joins allow, so e.g. `a LEFT JOIN (b JOIN c) ON b.x = c.x`
/// arrives with the condition on the left join; this sinks it back onto
/// the b-c join.
fn push_down_join_conditions(
    expr_id: ExprId,
    exprs: &mut ExprArena,
    conditions: &mut ConditionArena,
    extra_where_conditions: &mut Vec<ConditionId>,
) {
    if exprs.get(expr_id).type_ == RelExprType::Table {
        return;
    }
    debug_assert!(exprs.get(expr_id).equijoin_conditions.is_empty());

    let join_conditions = std::mem::take(&mut exprs.get_mut(expr_id).join_conditions);
    if !join_conditions.is_empty() {
        let remaining = push_down_as_much_as_possible(
            join_conditions,
            expr_id,
            /*is_join_condition_for_expr=*/ true,
            exprs,
            conditions,
            extra_where_conditions,
        );
        exprs.get_mut(expr_id).join_conditions = remaining;
    }

    let left = exprs.get(expr_id).left.expect("join node");
    let right = exprs.get(expr_id).right.expect("join node");
    push_down_join_conditions(left, exprs, conditions, extra_where_conditions);
    push_down_join_conditions(right, exprs, conditions, extra_where_conditions);
}

/// Figures out which join conditions are equi-join conditions, i.e.
/// suitable for hash join: an equality whose sides pull in relations from
/// both subtrees. Such conditions move from `join_conditions` to
/// `equijoin_conditions`; the rest stay residual.
fn make_hash_join_conditions(
    expr_id: ExprId,
    exprs: &mut ExprArena,
    conditions: &ConditionArena,
) {
    if exprs.get(expr_id).type_ == RelExprType::Table {
        return;
    }

    let left = exprs.get(expr_id).left.expect("join node");
    let right = exprs.get(expr_id).right.expect("join node");
    let left_tables = exprs.get(left).tables_in_subtree;
    let right_tables = exprs.get(right).tables_in_subtree;

    if !exprs.get(expr_id).join_conditions.is_empty() {
        debug_assert!(exprs.get(expr_id).equijoin_conditions.is_empty());
        let mut extra_conditions = Vec::new();
        let mut equijoin_conditions = Vec::new();

        for cond in std::mem::take(&mut exprs.get_mut(expr_id).join_conditions) {
            let condition = conditions.get(cond);
            let is_equijoin = match &condition.kind {
                ConditionKind::Equality { left: l, right: r } => {
                    // Both sides of the tree must be referenced, and each
                    // argument must stay on one side of the join.
                    overlaps(condition.used_tables, left_tables)
                        && overlaps(condition.used_tables, right_tables)
                        && (is_subset(l.tables, left_tables)
                            && is_subset(r.tables, right_tables)
                            || is_subset(l.tables, right_tables)
                                && is_subset(r.tables, left_tables))
                }
                _ => false,
            };
            if is_equijoin {
                equijoin_conditions.push(cond);
            } else {
                extra_conditions.push(cond);
            }
        }

        let expr = exprs.get_mut(expr_id);
        expr.join_conditions = extra_conditions;
        expr.equijoin_conditions = equijoin_conditions;
    }

    make_hash_join_conditions(left, exprs, conditions);
    make_hash_join_conditions(right, exprs, conditions);
}

/// Marks inner joins without any non-degenerate join condition as
/// Cartesian products. Mostly for display, but also input to conflict
/// detection.
fn make_cartesian_products(expr_id: ExprId, exprs: &mut ExprArena, conditions: &ConditionArena) {
    if exprs.get(expr_id).type_ == RelExprType::Table {
        return;
    }

    let left = exprs.get(expr_id).left.expect("join node");
    let right = exprs.get(expr_id).right.expect("join node");

    if exprs.get(expr_id).type_ == RelExprType::InnerJoin
        && exprs.get(expr_id).equijoin_conditions.is_empty()
    {
        let left_tables = exprs.get(left).tables_in_subtree;
        let right_tables = exprs.get(right).tables_in_subtree;
        let any_join_condition = exprs.get(expr_id).join_conditions.iter().any(|&cond| {
            let used = conditions.get(cond).used_tables;
            overlaps(used, left_tables) && overlaps(used, right_tables)
        });
        if !any_join_condition {
            exprs.get_mut(expr_id).type_ = RelExprType::CartesianProduct;
        }
    }

    make_cartesian_products(left, exprs, conditions);
    make_cartesian_products(right, exprs, conditions);
}

/// Whether the subtree consists of inner joins (and Cartesian products)
/// only, i.e. reordering into it cannot interact with NULL-complemented
/// rows.
fn consists_of_inner_joins_only(exprs: &ExprArena, expr_id: ExprId) -> bool {
    let expr = exprs.get(expr_id);
    match expr.type_ {
        RelExprType::Table => true,
        RelExprType::InnerJoin | RelExprType::CartesianProduct => {
            consists_of_inner_joins_only(exprs, expr.left.expect("join node"))
                && consists_of_inner_joins_only(exprs, expr.right.expect("join node"))
        }
        _ => false,
    }
}

/// For a condition with syntactic eligibility set `used_tables`, finds the
/// total eligibility set: all relations that must be available before the
/// condition can be evaluated. With `a LEFT JOIN b`, a condition like
/// `b.x IS NULL` has SES {b} but TES {a, b}, since joining in a can
/// synthesize NULL rows for b; with an inner join the TES equals the SES.
fn find_tes_for_condition(
    used_tables: NodeMap,
    expr_id: ExprId,
    exprs: &ExprArena,
    conditions: &ConditionArena,
) -> NodeMap {
    let expr = exprs.get(expr_id);
    match expr.type_ {
        RelExprType::Table => {
            // Bottom of an inner-join stack; makes sure the SES is
            // included in the TES.
            used_tables
        }
        RelExprType::LeftJoin | RelExprType::Antijoin | RelExprType::FullOuterJoin => {
            let left = expr.left.expect("join node");
            let right = expr.right.expect("join node");
            let mut tes = used_tables;
            if overlaps(used_tables, exprs.get(left).tables_in_subtree) {
                tes |= find_tes_for_condition(used_tables, left, exprs, conditions);
            }
            if overlaps(used_tables, exprs.get(right).tables_in_subtree) {
                tes |= find_tes_for_condition(used_tables, right, exprs, conditions);

                // The condition needs a table this join can NULL out, so
                // it must wait until the join has happened; the join in
                // turn cannot happen before its own condition's tables
                // are in place.
                for &condition in
                    expr.equijoin_conditions.iter().chain(expr.join_conditions.iter())
                {
                    tes |= conditions.get(condition).used_tables;
                }

                // Degenerate conditions (referencing the right side only)
                // must still not be pushed into the right-hand side, so
                // require the whole left subtree.
                if !overlaps(tes, exprs.get(left).tables_in_subtree) {
                    tes |= exprs.get(left).tables_in_subtree;
                }
            }
            tes
        }
        _ => {
            let left = expr.left.expect("join node");
            let right = expr.right.expect("join node");
            let mut tes = used_tables;
            if overlaps(used_tables, exprs.get(left).tables_in_subtree) {
                tes |= find_tes_for_condition(used_tables, left, exprs, conditions);
            }
            if overlaps(used_tables, exprs.get(right).tables_in_subtree) {
                tes |= find_tes_for_condition(used_tables, right, exprs, conditions);
            }
            tes
        }
    }
}

/// Recursively adds nodes and hyperedges for the tree under `expr_id`.
///
/// The hyperedge endpoints are computed conservatively: for an inner join,
/// each endpoint is the set of nodes its side's conditions actually
/// reference, unless that side contains outer joins, in which case the
/// whole subtree is required (over-constrained, but never wrong). All
/// other join types pin both full subtrees; so do degenerate conditions.
fn make_join_graph_from_relational_expression(
    expr_id: ExprId,
    query: &QueryBlock,
    graph: &mut JoinHypergraph,
    trace: &mut OptimizerTrace,
) {
    let expr = query.exprs.get(expr_id);
    if expr.type_ == RelExprType::Table {
        let table_idx = expr.table.expect("table node");
        graph.graph.add_node();
        graph.nodes.push(JoinGraphNode {
            table: table_idx,
            alias: query.tables[table_idx].alias.clone(),
            row_estimate: query.tables[table_idx].row_estimate,
        });
        graph.table_num_to_node_num[table_idx] = Some(graph.nodes.len() - 1);
        return;
    }

    let left_expr = expr.left.expect("join node");
    let right_expr = expr.right.expect("join node");
    make_join_graph_from_relational_expression(left_expr, query, graph, trace);
    make_join_graph_from_relational_expression(right_expr, query, graph, trace);

    let expr = query.exprs.get(expr_id);
    let mut used_tables = 0;
    for &condition in expr.join_conditions.iter().chain(expr.equijoin_conditions.iter()) {
        used_tables |= query.conditions.get(condition).used_tables;
    }

    let left_subtree = query.exprs.get(left_expr).tables_in_subtree;
    let right_subtree = query.exprs.get(right_expr).tables_in_subtree;

    let left_full = graph.node_map_from_table_map(left_subtree);
    let right_full = graph.node_map_from_table_map(right_subtree);
    let mut left = graph.node_map_from_table_map(used_tables & left_subtree);
    let mut right = graph.node_map_from_table_map(used_tables & right_subtree);

    if expr.type_ == RelExprType::InnerJoin || expr.type_ == RelExprType::CartesianProduct {
        // Reordering is fine, but not into parts that may contain outer
        // joins: reordering (a LEFT JOIN b) JOIN c is invalid if the
        // outer condition can see a NULL-complemented row from b.
        if !consists_of_inner_joins_only(&query.exprs, left_expr) {
            left = left_full;
        }
        if !consists_of_inner_joins_only(&query.exprs, right_expr) {
            right = right_full;
        }
    } else {
        // No reordering at all. (Not even on the left side: for
        // (a LEFT JOIN b) SEMIJOIN c ON b.x = c.x, the left endpoint
        // really needs {a, b}, not just {b}.)
        left = left_full;
        right = right_full;
    }

    // Degenerate predicates stop all reordering too.
    if left == 0 || right == 0 {
        left = left_full;
        right = right_full;
    }

    debug_assert!(left != 0);
    debug_assert!(right != 0);
    graph.graph.add_edge(left, right);

    if trace.is_enabled() {
        trace.append(format!(
            "Selectivity of join {}:\n",
            generate_expression_label(&query.exprs, &query.conditions, expr_id)
        ));
    }
    let mut selectivity = 1.0;
    for &condition in expr.equijoin_conditions.iter().chain(expr.join_conditions.iter()) {
        selectivity *= estimate_selectivity(&query.conditions, condition, trace);
    }
    if trace.is_enabled()
        && expr.equijoin_conditions.len() + expr.join_conditions.len() > 1
    {
        trace.append(format!("  - total: {selectivity:.3}\n"));
    }

    let source_multiple_equalities = expr
        .equijoin_conditions
        .iter()
        .chain(expr.join_conditions.iter())
        .filter_map(|&c| query.conditions.get(c).source_multiple_equality)
        .collect();
    graph.edges.push(JoinPredicate {
        expr: expr_id,
        selectivity,
        functional_dependencies: 0,
        source_multiple_equalities,
    });
}

/// A short label for a join, for the trace and graphviz output.
pub fn generate_expression_label(
    exprs: &ExprArena,
    conditions: &ConditionArena,
    expr_id: ExprId,
) -> String {
    let expr = exprs.get(expr_id);
    let mut label = expr
        .equijoin_conditions
        .iter()
        .chain(expr.join_conditions.iter())
        .map(|&c| conditions.get(c).label.clone())
        .collect::<Vec<_>>()
        .join(", ");
    match expr.type_ {
        RelExprType::LeftJoin => label = format!("[left] {label}"),
        RelExprType::Semijoin => label = format!("[semi] {label}"),
        RelExprType::Antijoin => label = format!("[anti] {label}"),
        RelExprType::FullOuterJoin => label = format!("[full] {label}"),
        _ => {}
    }
    label
}

fn print_table_set(query: &QueryBlock, tables: NodeMap) -> String {
    let mut ret = String::from("{");
    for (i, table_idx) in bits_set_in(tables).enumerate() {
        if i != 0 {
            ret.push(',');
        }
        ret.push_str(&query.tables[table_idx].alias);
    }
    ret.push('}');
    ret
}

/// An indented textual rendering of the join tree, for the trace.
pub fn print_relational_expression(
    exprs: &ExprArena,
    conditions: &ConditionArena,
    expr_id: ExprId,
    level: usize,
) -> String {
    let expr = exprs.get(expr_id);
    let mut result = "  ".repeat(level);

    match expr.type_ {
        RelExprType::Table => {
            result += &format!("* table {}\n", expr.table.expect("table node"));
            return result;
        }
        RelExprType::CartesianProduct => result += "* Cartesian product",
        RelExprType::InnerJoin | RelExprType::MultiInnerJoin => result += "* Inner join",
        RelExprType::StraightInnerJoin => result += "* Straight inner join",
        RelExprType::LeftJoin => result += "* Left join",
        RelExprType::Semijoin => result += "* Semijoin",
        RelExprType::Antijoin => result += "* Antijoin",
        RelExprType::FullOuterJoin => result += "* Full outer join",
    }
    if expr.type_ != RelExprType::CartesianProduct {
        if expr.equijoin_conditions.is_empty() && expr.join_conditions.is_empty() {
            result += " (no join conditions)";
        } else {
            if !expr.equijoin_conditions.is_empty() {
                let labels = expr
                    .equijoin_conditions
                    .iter()
                    .map(|&c| conditions.get(c).label.clone())
                    .collect::<Vec<_>>()
                    .join(", ");
                result += &format!(" (equijoin condition = {labels})");
            }
            if !expr.join_conditions.is_empty() {
                let labels = expr
                    .join_conditions
                    .iter()
                    .map(|&c| conditions.get(c).label.clone())
                    .collect::<Vec<_>>()
                    .join(", ");
                result += &format!(" (extra join condition = {labels})");
            }
        }
    }
    result += "\n";

    result += &print_relational_expression(
        exprs,
        conditions,
        expr.left.expect("join node"),
        level + 1,
    );
    result += &print_relational_expression(
        exprs,
        conditions,
        expr.right.expect("join node"),
        level + 1,
    );
    result
}

/// The hypergraph as a graphviz digraph; render with `dot -Tps` for a
/// picture of the join structure.
pub fn print_dotty_hypergraph(
    graph: &JoinHypergraph,
    exprs: &ExprArena,
    conditions: &ConditionArena,
) -> String {
    let mut digraph = format!("digraph G {{  # {} edges\n", graph.graph.edges.len() / 2);
    for edge_idx in (0..graph.graph.edges.len()).step_by(2) {
        let e = graph.graph.edges[edge_idx];
        let label = generate_expression_label(exprs, conditions, graph.edges[edge_idx / 2].expr);
        if is_single_bit_set(e.left) && is_single_bit_set(e.right) {
            // Simple edge.
            let left_node = find_lowest_bit_set(e.left);
            let right_node = find_lowest_bit_set(e.right);
            digraph += &format!(
                "  {} -> {} [label=\"{}\"]\n",
                graph.nodes[left_node].alias, graph.nodes[right_node].alias, label
            );
        } else {
            // Hyperedge; draw it as a tiny "virtual node".
            digraph += &format!(
                "  e{edge_idx} [shape=circle,width=.001,height=.001,label=\"\"]\n"
            );

            // Print the label only once.
            let (mut left_label, mut right_label) = ("", "");
            if is_single_bit_set(e.right) && !is_single_bit_set(e.left) {
                right_label = label.as_str();
            } else {
                left_label = label.as_str();
            }

            for left_node in bits_set_in(e.left) {
                digraph += &format!(
                    "  {} -> e{} [arrowhead=none,label=\"{}\"]\n",
                    graph.nodes[left_node].alias, edge_idx, left_label
                );
                left_label = "";
            }
            for right_node in bits_set_in(e.right) {
                digraph += &format!(
                    "  e{} -> {} [label=\"{}\"]\n",
                    edge_idx, graph.nodes[right_node].alias, right_label
                );
                right_label = "";
            }
        }
    }
    digraph += "}\n";
    digraph
}
