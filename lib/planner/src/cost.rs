//! The planner's cost model.
//!
//! The coefficients are deliberately simple constants; they should be
//! fitted against observed latencies before the cost ordering across join
//! shapes is trusted. They live here, in one place, to make that exercise
//! possible.

use crate::relational_expression::RelExprType;

pub const APPLY_ONE_FILTER_COST: f64 = 0.01;
pub const AGGREGATE_ONE_ROW_COST: f64 = 0.01;
pub const SORT_ONE_ROW_COST: f64 = 0.01;
pub const HASH_BUILD_ONE_ROW_COST: f64 = 0.01;
pub const HASH_PROBE_ONE_ROW_COST: f64 = 0.01;
pub const HASH_RETURN_ONE_ROW_COST: f64 = 0.01;

/// Fallback per-row scan cost when the engine reported none.
pub const TABLE_SCAN_COST_PER_ROW: f64 = 0.1;

/// Estimated output cardinality of a join, given the input cardinalities,
/// join type and combined predicate selectivity.
pub fn find_output_rows_for_join(
    outer_rows: f64,
    inner_rows: f64,
    join_type: RelExprType,
    selectivity: f64,
) -> f64 {
    match join_type {
        RelExprType::Antijoin => outer_rows * (1.0 - selectivity),
        RelExprType::Semijoin => outer_rows * selectivity,
        RelExprType::LeftJoin => (outer_rows * inner_rows * selectivity).max(outer_rows),
        RelExprType::FullOuterJoin => {
            // Every row from both sides survives at least once.
            (outer_rows * inner_rows * selectivity).max(outer_rows + inner_rows)
        }
        _ => outer_rows * inner_rows * selectivity,
    }
}

/// Aggregate cost/cardinality of a (sub)join, used when simulating join
/// trees without materializing access paths.
#[derive(Clone, Copy, Debug)]
pub struct JoinStatus {
    pub cost: f64,
    pub num_output_rows: f64,
}

impl JoinStatus {
    pub fn base(num_output_rows: f64) -> Self {
        Self { cost: 0.0, num_output_rows }
    }
}

/// Simulates the total cost and cardinality of hash-joining two sets of
/// tables, without building access paths. Uses the same hash-join cost
/// estimation as the costing receiver; keep the two in sync.
pub fn simulate_join(
    mut left: JoinStatus,
    mut right: JoinStatus,
    join_type: RelExprType,
    selectivity: f64,
) -> JoinStatus {
    // Building on fewer rows is cheaper than probing more rows, so put the
    // smaller input on the build side where the join commutes.
    if join_type.is_commutative() && left.num_output_rows < right.num_output_rows {
        std::mem::swap(&mut left, &mut right);
    }

    let num_output_rows =
        find_output_rows_for_join(left.num_output_rows, right.num_output_rows, join_type, selectivity);
    let build_cost = right.num_output_rows * HASH_BUILD_ONE_ROW_COST;
    let join_cost = build_cost
        + left.num_output_rows * HASH_PROBE_ONE_ROW_COST
        + num_output_rows * HASH_RETURN_ONE_ROW_COST;

    JoinStatus { cost: left.cost + right.cost + join_cost, num_output_rows }
}

/// Cost of sorting `num_rows` rows (n·log₂(n) with a fixed coefficient).
pub fn estimate_sort_cost(num_rows: f64) -> f64 {
    if num_rows <= 1.0 {
        // Avoid NaNs from log2().
        SORT_ONE_ROW_COST
    } else {
        SORT_ONE_ROW_COST * num_rows * num_rows.log2().max(1.0)
    }
}
