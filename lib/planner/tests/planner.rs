use hyperjoin_orders::{Direction, Term};
use hyperjoin_planner::{
    find_best_query_plan, AccessPathKind, Condition, ConditionArena, ExprArena, OptimizerOptions,
    PathArena, PathId, QueryBlock, QueryBlockFlags, RelExprType, TableInfo,
};

fn term(label: &str, tables: u64) -> Term {
    Term::new(label, tables)
}

fn query_block(tables: Vec<TableInfo>, build: impl FnOnce(&mut ExprArena, &mut ConditionArena) -> (usize, Option<usize>)) -> QueryBlock {
    let mut exprs = ExprArena::new();
    let mut conditions = ConditionArena::new();
    let (join_root, where_condition) = build(&mut exprs, &mut conditions);
    QueryBlock {
        tables,
        exprs,
        join_root,
        conditions,
        where_condition,
        order_by: Vec::new(),
        group_by: Vec::new(),
        having: None,
        limit: None,
        offset: 0,
        flags: QueryBlockFlags::default(),
    }
}

/// Checks the access-path invariants on the whole tree: disjoint
/// filter/delayed bitmaps and costs that are at least the children's.
fn check_path_invariants(paths: &PathArena, path_id: PathId) -> f64 {
    let path = paths.get(path_id);
    assert_eq!(
        path.filter_predicates & path.delayed_predicates,
        0,
        "filter and delayed predicates must be disjoint"
    );

    let children: Vec<PathId> = match &path.kind {
        AccessPathKind::TableScan { .. } => Vec::new(),
        AccessPathKind::HashJoin { outer, inner, .. } => vec![*outer, *inner],
        AccessPathKind::Filter { child, .. }
        | AccessPathKind::Sort { child, .. }
        | AccessPathKind::Aggregate { child }
        | AccessPathKind::LimitOffset { child, .. }
        | AccessPathKind::MaterializeTable { child, .. }
        | AccessPathKind::MaterializeInformationSchema { child, .. } => vec![*child],
    };
    let child_cost_sum: f64 = children.iter().map(|&c| check_path_invariants(paths, c)).sum();
    assert!(
        path.cost >= child_cost_sum - 1e-9,
        "cost {} must cover the children's {}",
        path.cost,
        child_cost_sum
    );
    path.cost
}

fn collect_scans(paths: &PathArena, path_id: PathId, out: &mut Vec<usize>) {
    let path = paths.get(path_id);
    match &path.kind {
        AccessPathKind::TableScan { table } => out.push(*table),
        AccessPathKind::HashJoin { outer, inner, .. } => {
            collect_scans(paths, *outer, out);
            collect_scans(paths, *inner, out);
        }
        AccessPathKind::Filter { child, .. }
        | AccessPathKind::Sort { child, .. }
        | AccessPathKind::Aggregate { child }
        | AccessPathKind::LimitOffset { child, .. }
        | AccessPathKind::MaterializeTable { child, .. }
        | AccessPathKind::MaterializeInformationSchema { child, .. } => {
            collect_scans(paths, *child, out);
        }
    }
}

#[test]
fn single_table_with_filter() {
    let mut query = query_block(vec![TableInfo::new("t1", 1000.0)], |exprs, conditions| {
        let root = exprs.table(0);
        let cond = conditions
            .add(Condition::comparison("t1.x < 3", 0b1).with_selectivity(0.2));
        (root, Some(cond))
    });

    let planned =
        find_best_query_plan(&mut query, &OptimizerOptions::default(), None).unwrap();

    // The filter is expanded into an explicit FILTER node over the scan.
    let root = planned.paths.get(planned.root);
    let AccessPathKind::Filter { child, ref conditions } = root.kind else {
        panic!("expected a filter on top, got {:?}", root.kind);
    };
    assert_eq!(conditions.len(), 1);
    assert!(matches!(
        planned.paths.get(child).kind,
        AccessPathKind::TableScan { table: 0 }
    ));

    assert_eq!(planned.best_rowcount, 200);
    check_path_invariants(&planned.paths, planned.root);
}

#[test]
fn inner_join_chain() {
    // t1(100) JOIN t2(1000) ON t1.a = t2.a JOIN t3(10) ON t2.b = t3.b.
    let mut query = query_block(
        vec![
            TableInfo::new("t1", 100.0),
            TableInfo::new("t2", 1000.0),
            TableInfo::new("t3", 10.0),
        ],
        |exprs, conditions| {
            let t1 = exprs.table(0);
            let t2 = exprs.table(1);
            let t3 = exprs.table(2);
            let c12 = conditions.add(
                Condition::equality(term("t1.a", 0b001), term("t2.a", 0b010))
                    .with_selectivity(0.01),
            );
            let c23 = conditions.add(
                Condition::equality(term("t2.b", 0b010), term("t3.b", 0b100))
                    .with_selectivity(0.05),
            );
            let j12 = exprs.join(RelExprType::InnerJoin, t1, t2, vec![c12]);
            let root = exprs.join(RelExprType::InnerJoin, j12, t3, vec![c23]);
            (root, None)
        },
    );

    let planned =
        find_best_query_plan(&mut query, &OptimizerOptions::default(), None).unwrap();

    // All three tables are scanned exactly once, and the estimate is the
    // full product of cardinalities and selectivities.
    let mut scans = Vec::new();
    collect_scans(&planned.paths, planned.root, &mut scans);
    scans.sort_unstable();
    assert_eq!(scans, vec![0, 1, 2]);

    let rows = planned.paths.get(planned.root).num_output_rows;
    assert!((rows - 100.0 * 1000.0 * 10.0 * 0.01 * 0.05).abs() < 1e-6);

    check_path_invariants(&planned.paths, planned.root);
}

#[test]
fn where_predicate_is_delayed_until_its_tables_are_joined() {
    // (t1 LEFT JOIN t2) JOIN t3, with WHERE t1.x < t2.x. The WHERE
    // condition cannot be pushed through the left join (it would filter
    // rows that must be NULL-complemented instead), so it stays delayed
    // until both t1 and t2 have been joined, and is applied exactly once.
    let mut query = query_block(
        vec![
            TableInfo::new("t1", 100.0),
            TableInfo::new("t2", 50.0),
            TableInfo::new("t3", 20.0),
        ],
        |exprs, conditions| {
            let t1 = exprs.table(0);
            let t2 = exprs.table(1);
            let t3 = exprs.table(2);
            let c12 = conditions.add(
                Condition::equality(term("t1.a", 0b001), term("t2.a", 0b010))
                    .with_selectivity(0.1),
            );
            let c23 = conditions.add(
                Condition::equality(term("t2.b", 0b010), term("t3.b", 0b100))
                    .with_selectivity(0.1),
            );
            let j12 = exprs.join(RelExprType::LeftJoin, t1, t2, vec![c12]);
            let root = exprs.join(RelExprType::InnerJoin, j12, t3, vec![c23]);
            let where_cond = conditions
                .add(Condition::comparison("t1.x < t2.x", 0b011).with_selectivity(0.5));
            (root, Some(where_cond))
        },
    );

    let planned =
        find_best_query_plan(&mut query, &OptimizerOptions::default(), None).unwrap();

    // The WHERE selectivity shows up exactly once in the final estimate:
    // (100·50·0.1 = 500, clamped at ≥ 100 outer rows) · 0.5 · 20 · 0.1.
    let rows = planned.paths.get(planned.root).num_output_rows;
    assert!((rows - 500.0).abs() < 1e-6, "got {rows}");

    // Nothing is left delayed at the root.
    assert_eq!(planned.paths.get(planned.root).delayed_predicates, 0);
    check_path_invariants(&planned.paths, planned.root);
}

#[test]
fn left_join_keeps_outer_rows() {
    let mut query = query_block(
        vec![TableInfo::new("t1", 1000.0), TableInfo::new("t2", 10.0)],
        |exprs, conditions| {
            let t1 = exprs.table(0);
            let t2 = exprs.table(1);
            let cond = conditions.add(
                Condition::equality(term("t1.a", 0b01), term("t2.a", 0b10))
                    .with_selectivity(0.001),
            );
            let root = exprs.join(RelExprType::LeftJoin, t1, t2, vec![cond]);
            (root, None)
        },
    );

    let planned =
        find_best_query_plan(&mut query, &OptimizerOptions::default(), None).unwrap();

    // 1000·10·0.001 = 10 < 1000 outer rows; the left join clamps.
    let rows = planned.paths.get(planned.root).num_output_rows;
    assert!((rows - 1000.0).abs() < 1e-6);
    check_path_invariants(&planned.paths, planned.root);
}

#[test]
fn antijoin_with_huge_inner_is_planned_first() {
    // The antijoin seed scenario, end to end: (t1 JOIN t2) ▷ t3 with a
    // huge t3 and all selectivities 1. The graph is pre-simplified only
    // when too large, so here the planner goes straight to enumeration;
    // the cheapest plan still performs the antijoin before the expensive
    // inner join where the hyperedge allows.
    let mut query = query_block(
        vec![
            TableInfo::new("t1", 100.0),
            TableInfo::new("t2", 100.0),
            TableInfo::new("t3", 10000.0),
        ],
        |exprs, conditions| {
            let t1 = exprs.table(0);
            let t2 = exprs.table(1);
            let t3 = exprs.table(2);
            let c12 = conditions.add(
                Condition::equality(term("t1.a", 0b001), term("t2.a", 0b010))
                    .with_selectivity(1.0),
            );
            let c23 = conditions.add(
                Condition::equality(term("t2.b", 0b010), term("t3.b", 0b100))
                    .with_selectivity(1.0),
            );
            let j12 = exprs.join(RelExprType::InnerJoin, t1, t2, vec![c12]);
            let root = exprs.join(RelExprType::Antijoin, j12, t3, vec![c23]);
            (root, None)
        },
    );

    let planned =
        find_best_query_plan(&mut query, &OptimizerOptions::default(), None).unwrap();

    // Antijoin output: 100·100·1 rows in, times (1 − 1.0) = 0 out.
    let rows = planned.paths.get(planned.root).num_output_rows;
    assert_eq!(rows, 0.0);
    check_path_invariants(&planned.paths, planned.root);
}

#[test]
fn order_by_constant_column_elides_sort() {
    // WHERE t1.a = 3 ORDER BY t1.a: the constant FD makes every stream
    // trivially ordered on a, so no sort is needed.
    let mut query = query_block(vec![TableInfo::new("t1", 1000.0)], |exprs, conditions| {
        let root = exprs.table(0);
        let cond =
            conditions.add(Condition::equality(term("t1.a", 0b1), term("3", 0)));
        (root, Some(cond))
    });
    query.order_by = vec![(term("t1.a", 0b1), Direction::Asc)];

    let planned =
        find_best_query_plan(&mut query, &OptimizerOptions::default(), None).unwrap();

    let mut saw_sort = false;
    for_each_path(&planned.paths, planned.root, &mut |kind| {
        saw_sort |= matches!(kind, AccessPathKind::Sort { .. });
    });
    assert!(!saw_sort, "sort should be elided for a constant ordering column");
}

#[test]
fn order_by_unordered_column_sorts() {
    let mut query = query_block(vec![TableInfo::new("t1", 1000.0)], |exprs, _conditions| {
        (exprs.table(0), None)
    });
    query.order_by = vec![(term("t1.b", 0b1), Direction::Asc)];

    let planned =
        find_best_query_plan(&mut query, &OptimizerOptions::default(), None).unwrap();

    assert!(matches!(
        planned.paths.get(planned.root).kind,
        AccessPathKind::Sort { .. }
    ));
    check_path_invariants(&planned.paths, planned.root);
}

#[test]
fn group_by_sorts_and_aggregates() {
    let mut query = query_block(vec![TableInfo::new("t1", 1000.0)], |exprs, _conditions| {
        (exprs.table(0), None)
    });
    query.group_by = vec![term("t1.a", 0b1)];

    let planned =
        find_best_query_plan(&mut query, &OptimizerOptions::default(), None).unwrap();

    // Aggregate over a sort over the scan.
    let root = planned.paths.get(planned.root);
    let AccessPathKind::Aggregate { child } = root.kind else {
        panic!("expected aggregation at the root, got {:?}", root.kind);
    };
    assert!(matches!(
        planned.paths.get(child).kind,
        AccessPathKind::Sort { .. }
    ));
    check_path_invariants(&planned.paths, planned.root);
}

#[test]
fn limit_caps_the_estimate() {
    let mut query = query_block(vec![TableInfo::new("t1", 1000.0)], |exprs, _conditions| {
        (exprs.table(0), None)
    });
    query.limit = Some(7);

    let planned =
        find_best_query_plan(&mut query, &OptimizerOptions::default(), None).unwrap();
    assert!(matches!(
        planned.paths.get(planned.root).kind,
        AccessPathKind::LimitOffset { limit: Some(7), .. }
    ));
    assert_eq!(planned.best_rowcount, 7);
}

#[test]
fn derived_table_is_materialized() {
    let mut query = query_block(
        vec![
            TableInfo::new("t1", 100.0),
            TableInfo {
                alias: "dt".to_owned(),
                row_estimate: 50.0,
                scan_cost: None,
                kind: hyperjoin_planner::TableKind::Derived { rematerialize: false },
            },
        ],
        |exprs, conditions| {
            let t1 = exprs.table(0);
            let dt = exprs.table(1);
            let cond = conditions.add(
                Condition::equality(term("t1.a", 0b01), term("dt.a", 0b10))
                    .with_selectivity(0.1),
            );
            let root = exprs.join(RelExprType::InnerJoin, t1, dt, vec![cond]);
            (root, None)
        },
    );

    let planned =
        find_best_query_plan(&mut query, &OptimizerOptions::default(), None).unwrap();

    let mut saw_materialize = false;
    for_each_path(&planned.paths, planned.root, &mut |kind| {
        saw_materialize |= matches!(kind, AccessPathKind::MaterializeTable { table: 1, .. });
    });
    assert!(saw_materialize, "derived tables must be materialized before scanning");
    check_path_invariants(&planned.paths, planned.root);
}

#[test]
fn trace_describes_the_planning() {
    let mut query = query_block(
        vec![TableInfo::new("t1", 100.0), TableInfo::new("t2", 10.0)],
        |exprs, conditions| {
            let t1 = exprs.table(0);
            let t2 = exprs.table(1);
            let cond = conditions.add(Condition::equality(
                term("t1.a", 0b01),
                term("t2.a", 0b10),
            ));
            let root = exprs.join(RelExprType::InnerJoin, t1, t2, vec![cond]);
            (root, None)
        },
    );

    let options = OptimizerOptions { trace: true, ..Default::default() };
    let planned = find_best_query_plan(&mut query, &options, None).unwrap();
    let trace = planned.trace.expect("trace was requested");

    assert!(trace.contains("Constructed hypergraph"));
    assert!(trace.contains("digraph G"));
    assert!(trace.contains("Enumerating subplans"));
    assert!(trace.contains("Final access path tree"));
    assert!(trace.contains("Hash join"));
}

#[test]
fn tiny_limits_degrade_gracefully() {
    // With absurdly small limits, the planner simplifies what it can,
    // then plans the rest unbounded rather than failing: resource
    // exhaustion degrades to longer planning, not to an error.
    let mut query = query_block(
        vec![
            TableInfo::new("t1", 100.0),
            TableInfo::new("t2", 200.0),
            TableInfo::new("t3", 300.0),
            TableInfo::new("t4", 400.0),
        ],
        |exprs, conditions| {
            let mut root = exprs.table(0);
            for i in 1..4 {
                let t = exprs.table(i);
                let cond = conditions.add(
                    Condition::equality(
                        term(&format!("t{i}.a"), 1 << (i - 1)),
                        term(&format!("t{}.a", i + 1), 1 << i),
                    )
                    .with_selectivity(0.1),
                );
                root = exprs.join(RelExprType::InnerJoin, root, t, vec![cond]);
            }
            (root, None)
        },
    );

    let options = OptimizerOptions {
        subgraph_pair_limit: 1,
        access_path_limit: 2,
        trace: false,
    };
    let planned = find_best_query_plan(&mut query, &options, None).unwrap();

    let mut scans = Vec::new();
    collect_scans(&planned.paths, planned.root, &mut scans);
    scans.sort_unstable();
    assert_eq!(scans, vec![0, 1, 2, 3]);
    check_path_invariants(&planned.paths, planned.root);
}

struct FixedStats;

impl hyperjoin_planner::TableStatsRefresher for FixedStats {
    fn fetch_row_count(&self, table_idx: usize) -> Option<f64> {
        (table_idx == 0).then_some(42.0)
    }
}

#[test]
fn stats_refresh_overrides_the_static_estimate() {
    let mut query = query_block(vec![TableInfo::new("t1", 1000.0)], |exprs, _conditions| {
        (exprs.table(0), None)
    });

    let planned =
        find_best_query_plan(&mut query, &OptimizerOptions::default(), Some(&FixedStats))
            .unwrap();
    assert_eq!(planned.paths.get(planned.root).num_output_rows, 42.0);
    assert_eq!(planned.best_rowcount, 42);
}

fn for_each_path(
    paths: &PathArena,
    path_id: PathId,
    f: &mut impl FnMut(&AccessPathKind),
) {
    let path = paths.get(path_id);
    f(&path.kind);
    match &path.kind {
        AccessPathKind::TableScan { .. } => {}
        AccessPathKind::HashJoin { outer, inner, .. } => {
            for_each_path(paths, *outer, f);
            for_each_path(paths, *inner, f);
        }
        AccessPathKind::Filter { child, .. }
        | AccessPathKind::Sort { child, .. }
        | AccessPathKind::Aggregate { child }
        | AccessPathKind::LimitOffset { child, .. }
        | AccessPathKind::MaterializeTable { child, .. }
        | AccessPathKind::MaterializeInformationSchema { child, .. } => {
            for_each_path(paths, *child, f);
        }
    }
}
