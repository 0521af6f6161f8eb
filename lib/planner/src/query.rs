use hyperjoin_common::NodeMap;
use hyperjoin_orders::{Direction, Term};

use crate::condition::{ConditionArena, ConditionId};
use crate::relational_expression::{ExprArena, ExprId};

/// What kind of relation a node of the join graph reads from. Everything
/// that is not a plain base table needs a materialization step before it
/// can be scanned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableKind {
    Base,
    Derived { rematerialize: bool },
    CommonTableExpression,
    InformationSchema,
}

/// Per-table input from the catalog / storage layer.
#[derive(Clone, Debug)]
pub struct TableInfo {
    pub alias: String,
    /// Estimated number of rows in the table.
    pub row_estimate: f64,
    /// Engine-reported cost of a full scan; estimated from the row count
    /// when absent.
    pub scan_cost: Option<f64>,
    pub kind: TableKind,
}

impl TableInfo {
    pub fn new(alias: impl Into<String>, row_estimate: f64) -> Self {
        Self { alias: alias.into(), row_estimate, scan_cost: None, kind: TableKind::Base }
    }
}

/// Properties of the query block that the planner must react to, mostly by
/// rejecting what it does not support yet.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueryBlockFlags {
    /// The query computes aggregates (with or without GROUP BY).
    pub grouped: bool,
    pub distinct: bool,
    pub has_rollup: bool,
    pub has_windows: bool,
    pub has_fulltext: bool,
    pub buffer_result: bool,
    pub is_recursive_cte: bool,
    pub uses_secondary_engine: bool,
    pub has_lateral: bool,
    pub has_table_functions: bool,
}

/// Hook for refreshing row estimates from the storage engine. Consulted
/// once per base table when the costing receiver sets up table scans; the
/// static [`TableInfo::row_estimate`] is used where it returns `None`.
pub trait TableStatsRefresher {
    fn fetch_row_count(&self, table_idx: usize) -> Option<f64>;
}

/// A single query block, as handed to the planner by the resolver: a join
/// tree over tables, an optional WHERE conjunction, and the post-join
/// clauses. Multiple equalities are assumed to have been concretized into
/// simple equalities upstream.
#[derive(Debug)]
pub struct QueryBlock {
    pub tables: Vec<TableInfo>,
    pub exprs: ExprArena,
    pub join_root: ExprId,
    pub conditions: ConditionArena,
    pub where_condition: Option<ConditionId>,

    pub order_by: Vec<(Term, Direction)>,
    pub group_by: Vec<Term>,
    pub having: Option<ConditionId>,
    pub limit: Option<u64>,
    pub offset: u64,

    pub flags: QueryBlockFlags,
}

impl QueryBlock {
    pub fn num_tables(&self) -> usize {
        self.tables.len()
    }

    pub fn is_ordered(&self) -> bool {
        !self.order_by.is_empty()
    }

    pub fn is_explicitly_grouped(&self) -> bool {
        !self.group_by.is_empty()
    }

    pub fn is_grouped(&self) -> bool {
        self.flags.grouped || self.is_explicitly_grouped()
    }

    /// The bitmap of all tables in this query block.
    pub fn all_tables(&self) -> NodeMap {
        hyperjoin_common::bitset::tables_between(0, self.tables.len())
    }
}
